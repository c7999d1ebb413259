//! Grid arithmetic for the month, quarter and year intervals: nodes are the
//! closes of the last trading day of each step's final month, with a
//! months-per-step parameter of 1, 3 or 12.

use super::last_trading_day_of_month;
use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Timelike};

fn secs(t: NaiveTime) -> i64 {
    t.num_seconds_from_midnight() as i64
}

fn group_of(local: NaiveDateTime, months_per_step: i64) -> i64 {
    let month0 = local.date().year() as i64 * 12 + (local.date().month0() as i64);
    month0.div_euclid(months_per_step)
}

fn node(close: NaiveTime, group: i64, months_per_step: i64) -> NaiveDateTime {
    last_trading_day_of_month(group * months_per_step + months_per_step - 1).and_time(close)
}

/// Index of the latest step-end close at or before `local`.
pub fn floor_index(local: NaiveDateTime, close: NaiveTime, months_per_step: i64) -> i64 {
    let g = group_of(local, months_per_step);
    if local >= node(close, g, months_per_step) {
        g
    } else {
        g - 1
    }
}

pub fn floor(local: NaiveDateTime, close: NaiveTime, months_per_step: i64) -> NaiveDateTime {
    node(close, floor_index(local, close, months_per_step), months_per_step)
}

pub fn ceil(local: NaiveDateTime, close: NaiveTime, months_per_step: i64) -> NaiveDateTime {
    let f = floor_index(local, close, months_per_step);
    let at = node(close, f, months_per_step);
    if at == local {
        at
    } else {
        node(close, f + 1, months_per_step)
    }
}

pub fn inc(
    local: NaiveDateTime,
    open: NaiveTime,
    close: NaiveTime,
    months_per_step: i64,
    whole: i64,
    frac: f64,
) -> NaiveDateTime {
    let base = floor_index(local, close, months_per_step) + whole;
    if frac > 0.0 {
        let span = if open == close {
            86_400
        } else {
            secs(close) - secs(open)
        };
        let day = last_trading_day_of_month(
            (base + 1) * months_per_step + months_per_step - 1,
        );
        day.and_time(open) + Duration::seconds((frac * span as f64).round() as i64)
    } else {
        node(close, base, months_per_step)
    }
}
