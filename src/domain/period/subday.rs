//! Grid arithmetic for the minute- and hour-multiple interval classes.
//!
//! A session of S minutes holds `K = ceil(S / step)` nodes; node r of trading
//! day d sits at `open + r*step` and node 0 doubles as the prior session's
//! close, so overnight and weekend gaps collapse: stepping past a Friday
//! close lands on the following Monday's open.

use super::{
    date_for_trading_day, is_trading_day, next_trading_day, prev_trading_day, steps_per_session,
    trading_day_index,
};
use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, Timelike};

fn secs(t: NaiveTime) -> i64 {
    t.num_seconds_from_midnight() as i64
}

fn instant_for(open: NaiveTime, step: u32, per_session: i64, index: i64) -> NaiveDateTime {
    let day = date_for_trading_day(index.div_euclid(per_session));
    let r = index.rem_euclid(per_session);
    day.and_time(open) + Duration::minutes(r * step as i64)
}

/// Absolute node index of the latest node at or before `local`.
pub fn index(local: NaiveDateTime, open: NaiveTime, close: NaiveTime, step: u32) -> i64 {
    let per_session = steps_per_session(open, close, step);
    let step_secs = step as i64 * 60;
    let date = local.date();
    if !is_trading_day(date) {
        return per_session * trading_day_index(next_trading_day(date));
    }
    let t = secs(local.time());
    let (o, c) = (secs(open), secs(close));
    let day = trading_day_index(date);
    if t < o {
        per_session * day
    } else if t >= c {
        per_session * (day + 1)
    } else {
        per_session * day + (t - o).div_euclid(step_secs)
    }
}

pub fn floor(local: NaiveDateTime, open: NaiveTime, close: NaiveTime, step: u32) -> NaiveDateTime {
    let date = local.date();
    if !is_trading_day(date) {
        return next_trading_day(date).and_time(open);
    }
    let t = secs(local.time());
    let (o, c) = (secs(open), secs(close));
    if t > c {
        next_trading_day(date).and_time(open)
    } else if t < o {
        prev_trading_day(date).and_time(close)
    } else if t == c {
        date.and_time(close)
    } else {
        let k = (t - o).div_euclid(step as i64 * 60);
        date.and_time(open) + Duration::minutes(k * step as i64)
    }
}

pub fn ceil(local: NaiveDateTime, open: NaiveTime, close: NaiveTime, step: u32) -> NaiveDateTime {
    let date = local.date();
    if !is_trading_day(date) {
        return next_trading_day(date).and_time(open);
    }
    let t = secs(local.time());
    let (o, c) = (secs(open), secs(close));
    if t > c {
        next_trading_day(date).and_time(open)
    } else if t < o {
        prev_trading_day(date).and_time(close)
    } else {
        let step_secs = step as i64 * 60;
        let k = (t - o + step_secs - 1).div_euclid(step_secs);
        if o + k * step_secs >= c {
            date.and_time(close)
        } else {
            date.and_time(open) + Duration::minutes(k * step as i64)
        }
    }
}

pub fn inc(
    local: NaiveDateTime,
    open: NaiveTime,
    close: NaiveTime,
    step: u32,
    whole: i64,
    frac: f64,
) -> NaiveDateTime {
    let per_session = steps_per_session(open, close, step);
    let target = index(local, open, close, step) + whole;
    let base = instant_for(open, step, per_session, target);
    if frac > 0.0 {
        let extra = (frac * step as f64 * 60.0).round() as i64;
        let candidate = base + Duration::seconds(extra);
        let session_close = base.date().and_time(close);
        // the trailing partial bar still ends at the close
        if candidate > session_close {
            session_close
        } else {
            candidate
        }
    } else {
        base
    }
}

// Always-open markets: a pure step grid over continuous time, weekends
// included, aligned to the epoch.

pub fn index_all_day(local: NaiveDateTime, step: u32) -> i64 {
    local.and_utc().timestamp().div_euclid(step as i64 * 60)
}

fn instant_all_day(index: i64, step: u32) -> NaiveDateTime {
    DateTime::from_timestamp(index * step as i64 * 60, 0)
        .map(|dt| dt.naive_utc())
        .unwrap_or_default()
}

pub fn floor_all_day(local: NaiveDateTime, step: u32) -> NaiveDateTime {
    instant_all_day(index_all_day(local, step), step)
}

pub fn ceil_all_day(local: NaiveDateTime, step: u32) -> NaiveDateTime {
    let step_secs = step as i64 * 60;
    let ts = local.and_utc().timestamp();
    instant_all_day((ts + step_secs - 1).div_euclid(step_secs), step)
}

pub fn inc_all_day(local: NaiveDateTime, step: u32, whole: i64, frac: f64) -> NaiveDateTime {
    let base = instant_all_day(index_all_day(local, step) + whole, step);
    if frac > 0.0 {
        base + Duration::seconds((frac * step as f64 * 60.0).round() as i64)
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn open() -> NaiveTime {
        NaiveTime::from_hms_opt(9, 30, 0).unwrap()
    }

    fn close() -> NaiveTime {
        NaiveTime::from_hms_opt(16, 0, 0).unwrap()
    }

    #[test]
    fn floor_aligns_within_session() {
        // 2024-01-10 is a Wednesday
        let snapped = floor(t(2024, 1, 10, 10, 17), open(), close(), 5);
        assert_eq!(snapped, t(2024, 1, 10, 10, 15));
    }

    #[test]
    fn floor_first_bar_snaps_to_open() {
        let snapped = floor(t(2024, 1, 10, 9, 33), open(), close(), 5);
        assert_eq!(snapped, t(2024, 1, 10, 9, 30));
    }

    #[test]
    fn floor_at_close_stays_at_close() {
        let snapped = floor(t(2024, 1, 10, 16, 0), open(), close(), 5);
        assert_eq!(snapped, t(2024, 1, 10, 16, 0));
    }

    #[test]
    fn floor_after_close_advances_to_next_open() {
        let snapped = floor(t(2024, 1, 10, 18, 30), open(), close(), 5);
        assert_eq!(snapped, t(2024, 1, 11, 9, 30));
    }

    #[test]
    fn floor_before_open_retreats_to_prior_close() {
        let snapped = floor(t(2024, 1, 10, 8, 0), open(), close(), 5);
        assert_eq!(snapped, t(2024, 1, 9, 16, 0));
    }

    #[test]
    fn floor_on_saturday_advances_to_monday_open() {
        let snapped = floor(t(2024, 1, 13, 12, 0), open(), close(), 5);
        assert_eq!(snapped, t(2024, 1, 15, 9, 30));
    }

    #[test]
    fn ceil_rounds_up_within_session() {
        let snapped = ceil(t(2024, 1, 10, 10, 17), open(), close(), 5);
        assert_eq!(snapped, t(2024, 1, 10, 10, 20));
    }

    #[test]
    fn ceil_before_open_retreats_to_prior_close() {
        let snapped = ceil(t(2024, 1, 10, 8, 0), open(), close(), 5);
        assert_eq!(snapped, t(2024, 1, 9, 16, 0));
    }

    #[test]
    fn inc_crosses_friday_close_to_monday_open() {
        // 2024-01-12 is a Friday; one step past the last bar of the session
        // lands on Monday's open, never inside the weekend.
        let monday_open = inc(t(2024, 1, 12, 15, 55), open(), close(), 5, 1, 0.0);
        assert_eq!(monday_open, t(2024, 1, 15, 9, 30));
    }

    #[test]
    fn inc_and_index_are_consistent() {
        let start = t(2024, 1, 10, 10, 15);
        for n in [-20i64, -3, 0, 1, 7, 200] {
            let moved = inc(start, open(), close(), 5, n, 0.0);
            let counted = index(moved, open(), close(), 5) - index(start, open(), close(), 5);
            assert_eq!(counted, n, "n = {n}");
        }
    }

    #[test]
    fn fractional_inc_moves_within_bar() {
        let moved = inc(t(2024, 1, 10, 10, 15), open(), close(), 10, 0, 0.5);
        assert_eq!(moved, t(2024, 1, 10, 10, 15) + Duration::minutes(5));
    }

    #[test]
    fn partial_trailing_bar_collapses_into_next_open() {
        // 09:30-16:00 is 6.5h: one full 240m bar, then a partial bar ending
        // at the close, which is the same node as the next session's open.
        let stepped = inc(t(2024, 1, 10, 9, 30), open(), close(), 240, 2, 0.0);
        assert_eq!(stepped, t(2024, 1, 11, 9, 30));
        let counted = index(t(2024, 1, 10, 16, 0), open(), close(), 240)
            - index(t(2024, 1, 10, 9, 30), open(), close(), 240);
        assert_eq!(counted, 2);
    }

    #[test]
    fn all_day_grid_ignores_weekends() {
        let sat = t(2024, 1, 13, 12, 7);
        assert_eq!(floor_all_day(sat, 5), t(2024, 1, 13, 12, 5));
        assert_eq!(inc_all_day(sat, 5, 3, 0.0), t(2024, 1, 13, 12, 20));
    }
}
