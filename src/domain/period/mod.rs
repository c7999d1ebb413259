//! Trading-calendar period engine.
//!
//! A [`Period`] binds one interval to a market-session descriptor and
//! provides exact grid arithmetic over session-aligned instants: `floor`,
//! `ceil`, `inc`, `dec` and `diff`. All counting is integer node-index
//! arithmetic — overnight and weekend gaps collapse to nothing, so
//! `diff(inc(t, n), t) == n` holds without floating-point slop.
//!
//! Boundary math runs on the security timezone's wall clock (a session is
//! 09:30–16:00 in wall time on either side of a DST transition) and results
//! are converted to the caller's display timezone. Ambiguous local times
//! resolve to the earliest instant; spring-forward gaps shift forward.

pub mod daily;
pub mod monthly;
pub mod subday;
pub mod weekly;

use crate::domain::bar::parse_instant;
use crate::domain::error::BarscriptError;
use crate::domain::interval::Interval;
use crate::domain::session::SessionOptions;
use chrono::offset::LocalResult;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Weekday};
use chrono_tz::Tz;

/// Calendar for one (interval, session-description) pair. Stateless after
/// construction.
#[derive(Debug, Clone)]
pub struct Period {
    interval: Interval,
    open: NaiveTime,
    close: NaiveTime,
    security_tz: Tz,
    tz: Tz,
}

impl Period {
    pub fn new(options: &SessionOptions) -> Self {
        Period::for_interval(options, options.interval)
    }

    /// A calendar for a different interval over the same session description.
    /// The lookback functions use this for day-session arithmetic regardless
    /// of the bar interval.
    pub fn for_interval(options: &SessionOptions, interval: Interval) -> Self {
        let (open, close) = options.window_for(interval);
        Period {
            interval,
            open,
            close,
            security_tz: options.security_tz,
            tz: options.tz,
        }
    }

    pub fn value(&self) -> &'static str {
        self.interval.value()
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn millis(&self) -> i64 {
        self.interval.millis()
    }

    /// An always-open market (open == close) has no session boundaries and
    /// therefore no gaps to skip.
    pub fn all_day(&self) -> bool {
        self.open == self.close
    }

    /// Bars per session for this interval (1 for day and coarser).
    pub fn session_length(&self) -> f64 {
        match self.interval.step_minutes() {
            Some(step) => {
                if self.all_day() {
                    (24 * 60) as f64 / step as f64
                } else {
                    steps_per_session(self.open, self.close, step) as f64
                }
            }
            None => 1.0,
        }
    }

    /// Sessions elapsed per trading day, used for history sizing.
    pub fn sessions_per_day(&self) -> f64 {
        match self.interval {
            Interval::Day => 1.0,
            Interval::Week => 1.0 / 5.0,
            Interval::Month => 1.0 / 21.0,
            Interval::Quarter => 1.0 / 63.0,
            Interval::Year => 1.0 / 252.0,
            _ => self.session_length(),
        }
    }

    /// Parse an ISO-8601 instant and express it in the display timezone.
    pub fn parse_instant(&self, s: &str) -> Result<DateTime<Tz>, BarscriptError> {
        Ok(parse_instant(s)?.with_timezone(&self.tz))
    }

    /// Latest grid-aligned, in-session instant at or before `t`; an instant
    /// after the session close advances to the next session's open.
    pub fn floor<Z: TimeZone>(&self, t: &DateTime<Z>) -> DateTime<Tz> {
        let local = self.to_local(t);
        let snapped = match self.interval.step_minutes() {
            Some(step) if self.all_day() => subday::floor_all_day(local, step),
            Some(step) => subday::floor(local, self.open, self.close, step),
            None => match self.interval {
                Interval::Week => weekly::floor(local, self.close),
                Interval::Month => monthly::floor(local, self.close, 1),
                Interval::Quarter => monthly::floor(local, self.close, 3),
                Interval::Year => monthly::floor(local, self.close, 12),
                _ => daily::floor_with(local, self.close, !self.all_day()),
            },
        };
        self.from_local(snapped)
    }

    /// Earliest grid-aligned, in-session instant at or after `t`; an instant
    /// before the session open retreats to the prior session's close.
    pub fn ceil<Z: TimeZone>(&self, t: &DateTime<Z>) -> DateTime<Tz> {
        let local = self.to_local(t);
        let snapped = match self.interval.step_minutes() {
            Some(step) if self.all_day() => subday::ceil_all_day(local, step),
            Some(step) => subday::ceil(local, self.open, self.close, step),
            None => match self.interval {
                Interval::Week => weekly::ceil(local, self.close),
                Interval::Month => monthly::ceil(local, self.close, 1),
                Interval::Quarter => monthly::ceil(local, self.close, 3),
                Interval::Year => monthly::ceil(local, self.close, 12),
                _ => daily::ceil_with(local, self.close, !self.all_day()),
            },
        };
        self.from_local(snapped)
    }

    /// Move forward `n` grid steps counting only in-session steps. Fractional
    /// steps move a proportional sub-step within the target session.
    pub fn inc<Z: TimeZone>(&self, t: &DateTime<Z>, n: f64) -> DateTime<Tz> {
        let local = self.to_local(t);
        let whole = n.floor();
        let frac = n - whole;
        let stepped = match self.interval.step_minutes() {
            Some(step) if self.all_day() => subday::inc_all_day(local, step, whole as i64, frac),
            Some(step) => subday::inc(local, self.open, self.close, step, whole as i64, frac),
            None => match self.interval {
                Interval::Week => weekly::inc(local, self.open, self.close, whole as i64, frac),
                Interval::Month => {
                    monthly::inc(local, self.open, self.close, 1, whole as i64, frac)
                }
                Interval::Quarter => {
                    monthly::inc(local, self.open, self.close, 3, whole as i64, frac)
                }
                Interval::Year => {
                    monthly::inc(local, self.open, self.close, 12, whole as i64, frac)
                }
                _ => daily::inc_with(local, self.open, self.close, whole as i64, frac, !self.all_day()),
            },
        };
        self.from_local(stepped)
    }

    /// Move backward `n` grid steps; `dec(t, n) == inc(t, -n)`.
    pub fn dec<Z: TimeZone>(&self, t: &DateTime<Z>, n: f64) -> DateTime<Tz> {
        self.inc(t, -n)
    }

    /// Signed count of grid steps between two instants, consistent with
    /// `inc`/`dec`: `diff(inc(t, n), t) == n` for every integer `n`.
    pub fn diff<Z1: TimeZone, Z2: TimeZone>(&self, to: &DateTime<Z1>, from: &DateTime<Z2>) -> i64 {
        self.index(to) - self.index(from)
    }

    fn index<Z: TimeZone>(&self, t: &DateTime<Z>) -> i64 {
        let local = self.to_local(t);
        match self.interval.step_minutes() {
            Some(step) if self.all_day() => subday::index_all_day(local, step),
            Some(step) => subday::index(local, self.open, self.close, step),
            None => match self.interval {
                Interval::Week => weekly::floor_index(local, self.close),
                Interval::Month => monthly::floor_index(local, self.close, 1),
                Interval::Quarter => monthly::floor_index(local, self.close, 3),
                Interval::Year => monthly::floor_index(local, self.close, 12),
                _ => daily::floor_index_with(local, self.close, !self.all_day()),
            },
        }
    }

    fn to_local<Z: TimeZone>(&self, t: &DateTime<Z>) -> NaiveDateTime {
        t.with_timezone(&self.security_tz).naive_local()
    }

    fn from_local(&self, naive: NaiveDateTime) -> DateTime<Tz> {
        let resolved = match self.security_tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => dt,
            LocalResult::Ambiguous(earliest, _) => earliest,
            LocalResult::None => {
                // Spring-forward gap: the wall time does not exist; take the
                // first instant after the jump.
                let shifted = naive + Duration::hours(1);
                match self.security_tz.from_local_datetime(&shifted) {
                    LocalResult::Single(dt) => dt,
                    LocalResult::Ambiguous(earliest, _) => earliest,
                    LocalResult::None => self.security_tz.from_utc_datetime(&naive),
                }
            }
        };
        resolved.with_timezone(&self.tz)
    }
}

/// Grid nodes per session: a partial trailing bar still ends at the close.
pub(crate) fn steps_per_session(open: NaiveTime, close: NaiveTime, step_minutes: u32) -> i64 {
    let session_secs =
        close.signed_duration_since(open).num_seconds();
    let step_secs = step_minutes as i64 * 60;
    (session_secs + step_secs - 1).div_euclid(step_secs)
}

pub(crate) fn epoch_monday_date() -> NaiveDate {
    // 1970-01-05, the Monday after the epoch.
    NaiveDate::default() + Duration::days(4)
}

/// Trading-day number: Mon 1970-01-05 is 0, weekends do not count.
/// Must only be called with a Mon-Fri date.
pub(crate) fn trading_day_index(date: NaiveDate) -> i64 {
    let days = (date - epoch_monday_date()).num_days();
    let weeks = days.div_euclid(7);
    let rem = days.rem_euclid(7);
    debug_assert!(rem < 5, "trading_day_index called with a weekend date");
    weeks * 5 + rem.min(4)
}

pub(crate) fn date_for_trading_day(index: i64) -> NaiveDate {
    let weeks = index.div_euclid(5);
    let rem = index.rem_euclid(5);
    epoch_monday_date() + Duration::days(weeks * 7 + rem)
}

pub(crate) fn is_trading_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

pub(crate) fn next_trading_day(date: NaiveDate) -> NaiveDate {
    let mut d = date + Duration::days(1);
    while !is_trading_day(d) {
        d += Duration::days(1);
    }
    d
}

pub(crate) fn prev_trading_day(date: NaiveDate) -> NaiveDate {
    let mut d = date - Duration::days(1);
    while !is_trading_day(d) {
        d -= Duration::days(1);
    }
    d
}

/// First day of the month `month0` months after January of `year` 0-based.
pub(crate) fn month_start(month0: i64) -> NaiveDate {
    let year = month0.div_euclid(12);
    let month = month0.rem_euclid(12) as u32 + 1;
    NaiveDate::from_ymd_opt(year as i32, month, 1).unwrap_or_default()
}

pub(crate) fn last_trading_day_of_month(month0: i64) -> NaiveDate {
    let mut d = month_start(month0 + 1) - Duration::days(1);
    while !is_trading_day(d) {
        d -= Duration::days(1);
    }
    d
}
