//! Market session descriptor and validation.
//!
//! The descriptor is the engine's only configuration surface. Every field is
//! validated up front, before any parsing or compiling happens; a malformed
//! descriptor never reaches the calendar or compiler.

use crate::domain::error::BarscriptError;
use crate::domain::interval::Interval;
use chrono::NaiveTime;
use chrono_tz::Tz;

/// A validated session/options descriptor.
///
/// `liquid_hours` is the regular trading session, `trading_hours` the
/// extended-hours window containing it. A window whose open equals its close
/// describes an always-open market (24h), which disables gap skipping.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub interval: Interval,
    pub open_time: NaiveTime,
    pub liquid_hours: (NaiveTime, NaiveTime),
    pub trading_hours: (NaiveTime, NaiveTime),
    pub security_tz: Tz,
    pub tz: Tz,
    /// Regular-trading-hours mode. When false, day-and-coarser intervals use
    /// the extended window instead of liquid hours.
    pub rth: bool,
}

impl SessionOptions {
    /// Build and validate a descriptor from its textual form.
    ///
    /// Formats: `open_time` is `HH:MM`; the hour windows are
    /// `HH:MM - HH:MM`; the timezones are IANA names.
    pub fn new(
        interval: &str,
        open_time: &str,
        liquid_hours: &str,
        trading_hours: &str,
        security_tz: &str,
        tz: &str,
    ) -> Result<Self, BarscriptError> {
        let interval: Interval = interval.parse()?;
        let open_time = parse_time("open_time", open_time)?;
        let liquid_hours = parse_hours("liquid_hours", liquid_hours)?;
        let trading_hours = parse_hours("trading_hours", trading_hours)?;
        let security_tz = parse_tz("security_tz", security_tz)?;
        let tz = parse_tz("tz", tz)?;
        Ok(SessionOptions {
            interval,
            open_time,
            liquid_hours,
            trading_hours,
            security_tz,
            tz,
            rth: true,
        })
    }

    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_rth(mut self, rth: bool) -> Self {
        self.rth = rth;
        self
    }

    /// The session window the given interval's calendar uses: sub-day classes
    /// run on the extended window, day and coarser on liquid hours unless
    /// `rth` is off.
    pub fn window_for(&self, interval: Interval) -> (NaiveTime, NaiveTime) {
        if interval.is_sub_day() || !self.rth {
            self.trading_hours
        } else {
            self.liquid_hours
        }
    }
}

impl Default for SessionOptions {
    /// NYSE-style defaults: 09:30–16:00 regular, 04:00–20:00 extended,
    /// America/New_York both sides, daily bars.
    fn default() -> Self {
        SessionOptions {
            interval: Interval::Day,
            open_time: hm(9, 30),
            liquid_hours: (hm(9, 30), hm(16, 0)),
            trading_hours: (hm(4, 0), hm(20, 0)),
            security_tz: chrono_tz::America::New_York,
            tz: chrono_tz::America::New_York,
            rth: true,
        }
    }
}

fn hm(h: u32, m: u32) -> NaiveTime {
    // Both constants are in range; NaiveTime::from_hms_opt only fails beyond 23:59.
    NaiveTime::from_hms_opt(h, m, 0).unwrap_or_default()
}

fn parse_time(field: &str, value: &str) -> Result<NaiveTime, BarscriptError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|_| BarscriptError::BadSession {
        field: field.to_string(),
        reason: format!("expected HH:MM, found {value:?}"),
    })
}

fn parse_hours(field: &str, value: &str) -> Result<(NaiveTime, NaiveTime), BarscriptError> {
    let mut parts = value.splitn(2, '-');
    let start = parts.next().unwrap_or_default();
    let end = parts.next().ok_or_else(|| BarscriptError::BadSession {
        field: field.to_string(),
        reason: format!("expected HH:MM - HH:MM, found {value:?}"),
    })?;
    let start = parse_time(field, start)?;
    let end = parse_time(field, end)?;
    if end < start {
        return Err(BarscriptError::BadSession {
            field: field.to_string(),
            reason: format!("window end {end} before start {start}"),
        });
    }
    Ok((start, end))
}

fn parse_tz(field: &str, value: &str) -> Result<Tz, BarscriptError> {
    value.parse::<Tz>().map_err(|_| BarscriptError::BadSession {
        field: field.to_string(),
        reason: format!("unknown timezone {value:?}"),
    })
}
