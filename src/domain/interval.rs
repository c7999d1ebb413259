//! The closed set of bar interval granularities.

use crate::domain::error::BarscriptError;
use std::fmt;
use std::str::FromStr;

/// One of the fixed interval granularities a field catalog or calendar can be
/// keyed by. The derived `Ord` follows declaration order, which is the order
/// of nominal duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Interval {
    M1,
    M2,
    M5,
    M10,
    M15,
    M20,
    M30,
    M60,
    M120,
    M240,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Interval {
    pub const VALUES: [Interval; 15] = [
        Interval::M1,
        Interval::M2,
        Interval::M5,
        Interval::M10,
        Interval::M15,
        Interval::M20,
        Interval::M30,
        Interval::M60,
        Interval::M120,
        Interval::M240,
        Interval::Day,
        Interval::Week,
        Interval::Month,
        Interval::Quarter,
        Interval::Year,
    ];

    pub fn value(self) -> &'static str {
        match self {
            Interval::M1 => "m1",
            Interval::M2 => "m2",
            Interval::M5 => "m5",
            Interval::M10 => "m10",
            Interval::M15 => "m15",
            Interval::M20 => "m20",
            Interval::M30 => "m30",
            Interval::M60 => "m60",
            Interval::M120 => "m120",
            Interval::M240 => "m240",
            Interval::Day => "day",
            Interval::Week => "week",
            Interval::Month => "month",
            Interval::Quarter => "quarter",
            Interval::Year => "year",
        }
    }

    /// Nominal duration in milliseconds, used only for ordering and ratios.
    pub fn millis(self) -> i64 {
        const MINUTE: i64 = 60_000;
        const DAY: i64 = 24 * 60 * MINUTE;
        match self {
            Interval::M1 => MINUTE,
            Interval::M2 => 2 * MINUTE,
            Interval::M5 => 5 * MINUTE,
            Interval::M10 => 10 * MINUTE,
            Interval::M15 => 15 * MINUTE,
            Interval::M20 => 20 * MINUTE,
            Interval::M30 => 30 * MINUTE,
            Interval::M60 => 60 * MINUTE,
            Interval::M120 => 120 * MINUTE,
            Interval::M240 => 240 * MINUTE,
            Interval::Day => DAY,
            Interval::Week => 7 * DAY,
            Interval::Month => 31 * DAY,
            Interval::Quarter => 3 * 31 * DAY,
            Interval::Year => 365 * DAY,
        }
    }

    /// Step size in minutes for the sub-day classes.
    pub fn step_minutes(self) -> Option<u32> {
        match self {
            Interval::M1 => Some(1),
            Interval::M2 => Some(2),
            Interval::M5 => Some(5),
            Interval::M10 => Some(10),
            Interval::M15 => Some(15),
            Interval::M20 => Some(20),
            Interval::M30 => Some(30),
            Interval::M60 => Some(60),
            Interval::M120 => Some(120),
            Interval::M240 => Some(240),
            _ => None,
        }
    }

    pub fn is_sub_day(self) -> bool {
        self.step_minutes().is_some()
    }

    /// Sort interval names by nominal duration, shortest first.
    pub fn sort(mut list: Vec<Interval>) -> Vec<Interval> {
        list.sort();
        list
    }

    fn valid_names() -> Vec<String> {
        Interval::VALUES
            .iter()
            .map(|i| i.value().to_string())
            .collect()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

impl FromStr for Interval {
    type Err = BarscriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::VALUES
            .iter()
            .copied()
            .find(|i| i.value() == s)
            .ok_or_else(|| BarscriptError::UnknownInterval {
                name: s.to_string(),
                valid: Interval::valid_names(),
            })
    }
}
