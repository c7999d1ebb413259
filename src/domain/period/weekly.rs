//! Grid arithmetic for the week interval: nodes are the closes of each
//! trading week's last session (Friday under the Mon-Fri week model).

use super::epoch_monday_date;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

fn secs(t: NaiveTime) -> i64 {
    t.num_seconds_from_midnight() as i64
}

fn week_index(date: NaiveDate) -> i64 {
    (date - epoch_monday_date()).num_days().div_euclid(7)
}

fn friday_of(index: i64) -> NaiveDate {
    epoch_monday_date() + Duration::days(index * 7 + 4)
}

fn node(close: NaiveTime, index: i64) -> NaiveDateTime {
    friday_of(index).and_time(close)
}

/// Index of the latest Friday close at or before `local`.
pub fn floor_index(local: NaiveDateTime, close: NaiveTime) -> i64 {
    let w = week_index(local.date());
    if local >= node(close, w) {
        w
    } else {
        w - 1
    }
}

pub fn floor(local: NaiveDateTime, close: NaiveTime) -> NaiveDateTime {
    node(close, floor_index(local, close))
}

pub fn ceil(local: NaiveDateTime, close: NaiveTime) -> NaiveDateTime {
    let f = floor_index(local, close);
    let at = node(close, f);
    if at == local {
        at
    } else {
        node(close, f + 1)
    }
}

pub fn inc(
    local: NaiveDateTime,
    open: NaiveTime,
    close: NaiveTime,
    whole: i64,
    frac: f64,
) -> NaiveDateTime {
    let base = floor_index(local, close) + whole;
    if frac > 0.0 {
        let span = if open == close {
            86_400
        } else {
            secs(close) - secs(open)
        };
        friday_of(base + 1).and_time(open) + Duration::seconds((frac * span as f64).round() as i64)
    } else {
        node(close, base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn close() -> NaiveTime {
        NaiveTime::from_hms_opt(16, 0, 0).unwrap()
    }

    fn open() -> NaiveTime {
        NaiveTime::from_hms_opt(9, 30, 0).unwrap()
    }

    #[test]
    fn floor_mid_week_is_prior_friday() {
        // 2024-01-10 is a Wednesday; the prior Friday close is Jan 5.
        assert_eq!(floor(t(2024, 1, 10, 12, 0), close()), t(2024, 1, 5, 16, 0));
    }

    #[test]
    fn floor_on_saturday_is_same_week_friday() {
        assert_eq!(floor(t(2024, 1, 13, 9, 0), close()), t(2024, 1, 12, 16, 0));
    }

    #[test]
    fn ceil_mid_week_is_coming_friday() {
        assert_eq!(ceil(t(2024, 1, 10, 12, 0), close()), t(2024, 1, 12, 16, 0));
    }

    #[test]
    fn inc_and_floor_index_are_consistent() {
        let start = t(2024, 1, 12, 16, 0);
        for n in [-4i64, 0, 1, 9] {
            let moved = inc(start, open(), close(), n, 0.0);
            assert_eq!(
                floor_index(moved, close()) - floor_index(start, close()),
                n,
                "n = {n}"
            );
        }
    }

    #[test]
    fn fractional_inc_enters_next_friday_session() {
        let moved = inc(t(2024, 1, 5, 16, 0), open(), close(), 0, 0.5);
        assert_eq!(moved, t(2024, 1, 12, 12, 45));
    }
}
