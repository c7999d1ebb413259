//! Grid arithmetic for the day interval: nodes are the session closes of
//! Mon-Fri trading days (or of every calendar day for always-open markets).

use super::{date_for_trading_day, is_trading_day, prev_trading_day, trading_day_index};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

fn secs(t: NaiveTime) -> i64 {
    t.num_seconds_from_midnight() as i64
}

fn all_day(open: NaiveTime, close: NaiveTime) -> bool {
    open == close
}

fn epoch() -> NaiveDate {
    NaiveDate::default()
}

fn day_index(date: NaiveDate, skip_weekends: bool) -> i64 {
    if skip_weekends {
        trading_day_index(if is_trading_day(date) {
            date
        } else {
            prev_trading_day(date)
        })
    } else {
        (date - epoch()).num_days()
    }
}

fn date_for(index: i64, skip_weekends: bool) -> NaiveDate {
    if skip_weekends {
        date_for_trading_day(index)
    } else {
        epoch() + Duration::days(index)
    }
}

fn node(close: NaiveTime, index: i64, skip_weekends: bool) -> NaiveDateTime {
    date_for(index, skip_weekends).and_time(close)
}

/// Index of the latest session close at or before `local`.
pub fn floor_index_with(local: NaiveDateTime, close: NaiveTime, skip_weekends: bool) -> i64 {
    let date = local.date();
    if skip_weekends && !is_trading_day(date) {
        return trading_day_index(prev_trading_day(date));
    }
    let idx = day_index(date, skip_weekends);
    if secs(local.time()) >= secs(close) {
        idx
    } else {
        idx - 1
    }
}

pub fn floor_index(local: NaiveDateTime, close: NaiveTime) -> i64 {
    floor_index_with(local, close, true)
}

pub fn floor(local: NaiveDateTime, close: NaiveTime) -> NaiveDateTime {
    floor_with(local, close, true)
}

pub fn floor_with(local: NaiveDateTime, close: NaiveTime, skip_weekends: bool) -> NaiveDateTime {
    node(close, floor_index_with(local, close, skip_weekends), skip_weekends)
}

pub fn ceil(local: NaiveDateTime, close: NaiveTime) -> NaiveDateTime {
    ceil_with(local, close, true)
}

pub fn ceil_with(local: NaiveDateTime, close: NaiveTime, skip_weekends: bool) -> NaiveDateTime {
    let f = floor_index_with(local, close, skip_weekends);
    let at = node(close, f, skip_weekends);
    if at == local {
        at
    } else {
        node(close, f + 1, skip_weekends)
    }
}

pub fn inc(
    local: NaiveDateTime,
    open: NaiveTime,
    close: NaiveTime,
    whole: i64,
    frac: f64,
) -> NaiveDateTime {
    inc_with(local, open, close, whole, frac, true)
}

pub fn inc_with(
    local: NaiveDateTime,
    open: NaiveTime,
    close: NaiveTime,
    whole: i64,
    frac: f64,
    skip_weekends: bool,
) -> NaiveDateTime {
    let base = floor_index_with(local, close, skip_weekends) + whole;
    if frac > 0.0 {
        let span = if all_day(open, close) {
            86_400
        } else {
            secs(close) - secs(open)
        };
        let day = date_for(base + 1, skip_weekends);
        day.and_time(open) + Duration::seconds((frac * span as f64).round() as i64)
    } else {
        node(close, base, skip_weekends)
    }
}
