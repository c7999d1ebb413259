//! Built-in implementation of the indicator port.
//!
//! A small default library so expressions like `day.atr(14)` evaluate
//! without an external data-fetch layer: Wilder's average true range,
//! on-balance volume, and volume-weighted average price.

use crate::domain::bar::Bar;
use crate::domain::error::BarscriptError;
use crate::domain::interval::Interval;
use crate::domain::value::Value;
use crate::ports::indicator_port::{IndicatorDef, IndicatorLibrary};
use std::sync::Arc;

/// Warm-up margin for the smoothed indicators to converge.
const WARM_UP: usize = 250;

pub struct BuiltinIndicators;

impl IndicatorLibrary for BuiltinIndicators {
    fn lookup(&self, _interval: Interval, name: &str) -> Option<IndicatorDef> {
        match name {
            "atr" => Some(IndicatorDef {
                fields: ohlc_fields(&["high", "low", "close"]),
                warm_up_length: WARM_UP,
                eval: Arc::new(atr),
            }),
            "obv" => Some(IndicatorDef {
                fields: ohlc_fields(&["close", "volume"]),
                warm_up_length: WARM_UP,
                eval: Arc::new(obv),
            }),
            "vwap" => Some(IndicatorDef {
                fields: ohlc_fields(&["high", "low", "close", "volume"]),
                warm_up_length: WARM_UP,
                eval: Arc::new(vwap),
            }),
            _ => None,
        }
    }

    fn names(&self, _interval: Interval) -> Vec<String> {
        vec!["atr".to_string(), "obv".to_string(), "vwap".to_string()]
    }
}

fn ohlc_fields(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn numbers(bars: &[Bar], field: &str) -> Vec<f64> {
    bars.iter()
        .filter_map(|b| b.get("", field).and_then(Value::as_number))
        .collect()
}

fn period_param(params: &[Value], default: usize) -> usize {
    params
        .first()
        .and_then(Value::as_number)
        .filter(|n| *n > 0.0)
        .map(|n| n as usize)
        .unwrap_or(default)
}

/// Wilder's ATR: seed with the mean true range of the first n bars, then
/// `atr = (prev * (n-1) + tr) / n`.
fn atr(params: &[Value], bars: &[Bar]) -> Result<Value, BarscriptError> {
    let period = period_param(params, 14);
    let highs = numbers(bars, "high");
    let lows = numbers(bars, "low");
    let closes = numbers(bars, "close");
    let len = highs.len().min(lows.len()).min(closes.len());
    if len == 0 {
        return Ok(Value::Nil);
    }
    let mut true_ranges = Vec::with_capacity(len);
    for i in 0..len {
        let tr = if i == 0 {
            highs[i] - lows[i]
        } else {
            let hl = highs[i] - lows[i];
            let hc = (highs[i] - closes[i - 1]).abs();
            let lc = (lows[i] - closes[i - 1]).abs();
            hl.max(hc).max(lc)
        };
        true_ranges.push(tr);
    }
    let seed_len = period.min(true_ranges.len());
    let mut atr = true_ranges[..seed_len].iter().sum::<f64>() / seed_len as f64;
    for tr in &true_ranges[seed_len..] {
        atr = (atr * (period as f64 - 1.0) + tr) / period as f64;
    }
    Ok(Value::Number(atr))
}

/// On-balance volume over the visible window.
fn obv(_params: &[Value], bars: &[Bar]) -> Result<Value, BarscriptError> {
    let closes = numbers(bars, "close");
    let volumes = numbers(bars, "volume");
    let len = closes.len().min(volumes.len());
    if len == 0 {
        return Ok(Value::Nil);
    }
    let mut obv = volumes[0];
    for i in 1..len {
        if closes[i] > closes[i - 1] {
            obv += volumes[i];
        } else if closes[i] < closes[i - 1] {
            obv -= volumes[i];
        }
    }
    Ok(Value::Number(obv))
}

/// Volume-weighted average of the typical price over the last n bars.
fn vwap(params: &[Value], bars: &[Bar]) -> Result<Value, BarscriptError> {
    let period = period_param(params, 14);
    let highs = numbers(bars, "high");
    let lows = numbers(bars, "low");
    let closes = numbers(bars, "close");
    let volumes = numbers(bars, "volume");
    let len = highs
        .len()
        .min(lows.len())
        .min(closes.len())
        .min(volumes.len());
    if len == 0 {
        return Ok(Value::Nil);
    }
    let start = len.saturating_sub(period);
    let mut weighted = 0.0;
    let mut volume = 0.0;
    for i in start..len {
        let typical = (highs[i] + lows[i] + closes[i]) / 3.0;
        weighted += typical * volumes[i];
        volume += volumes[i];
    }
    if volume == 0.0 {
        return Ok(Value::Nil);
    }
    Ok(Value::Number(weighted / volume))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bar(i: usize, high: f64, low: f64, close: f64, volume: f64) -> Bar {
        Bar::new(format!("2024-01-{:02}T16:00:00-05:00", i + 1))
            .with("high", high)
            .with("low", low)
            .with("close", close)
            .with("volume", volume)
    }

    #[test]
    fn atr_seed_is_mean_true_range() {
        let bars: Vec<Bar> = (0..3)
            .map(|i| make_bar(i, 110.0, 100.0, 105.0, 1000.0))
            .collect();
        let result = atr(&[Value::Number(3.0)], &bars).unwrap();
        assert_eq!(result, Value::Number(10.0));
    }

    #[test]
    fn atr_wilder_smoothing() {
        let bars = vec![
            make_bar(0, 110.0, 100.0, 105.0, 1000.0),
            make_bar(1, 115.0, 105.0, 110.0, 1000.0),
            make_bar(2, 120.0, 110.0, 115.0, 1000.0),
            make_bar(3, 125.0, 115.0, 120.0, 1000.0),
        ];
        let result = atr(&[Value::Number(3.0)], &bars).unwrap();
        // seed 10, then (10*2 + 10)/3
        assert_eq!(result, Value::Number(10.0));
    }

    #[test]
    fn obv_accumulates_signed_volume() {
        let bars = vec![
            make_bar(0, 10.0, 10.0, 10.0, 100.0),
            make_bar(1, 11.0, 11.0, 11.0, 200.0),
            make_bar(2, 10.5, 10.5, 10.5, 50.0),
        ];
        let result = obv(&[], &bars).unwrap();
        assert_eq!(result, Value::Number(100.0 + 200.0 - 50.0));
    }

    #[test]
    fn vwap_weights_typical_price() {
        let bars = vec![
            make_bar(0, 12.0, 8.0, 10.0, 100.0),
            make_bar(1, 22.0, 18.0, 20.0, 300.0),
        ];
        let result = vwap(&[Value::Number(2.0)], &bars).unwrap();
        assert_eq!(result, Value::Number((10.0 * 100.0 + 20.0 * 300.0) / 400.0));
    }

    #[test]
    fn empty_window_is_nil() {
        assert_eq!(atr(&[], &[]).unwrap(), Value::Nil);
        assert_eq!(obv(&[], &[]).unwrap(), Value::Nil);
        assert_eq!(vwap(&[], &[]).unwrap(), Value::Nil);
    }

    #[test]
    fn library_lookup_and_names() {
        let lib = BuiltinIndicators;
        assert!(lib.lookup(Interval::Day, "atr").is_some());
        assert!(lib.lookup(Interval::Day, "macd").is_none());
        assert_eq!(lib.names(Interval::Day).len(), 3);
    }
}
