//! Lookback (rolling-window) function registry.
//!
//! Second resolution tier of the compiler. Every entry is a builder from
//! compiled arguments to a calculation over a trailing window; window sizes
//! must be positive-integer literals at compile time, and the finished
//! calculation only ever sees its declared `warm_up_length + 1` trailing
//! bars.

use crate::domain::bar::{parse_instant, Bar};
use crate::domain::calc::Calculation;
use crate::domain::error::BarscriptError;
use crate::domain::interval::Interval;
use crate::domain::period::Period;
use crate::domain::session::SessionOptions;
use crate::domain::value::Value;
use chrono::{DateTime, Datelike, Duration, NaiveTime, Weekday};
use chrono_tz::Tz;
use statrs::distribution::{ContinuousCDF, Normal};
use std::sync::Arc;

pub type Builder = fn(&SessionOptions, Vec<Calculation>) -> Result<Calculation, BarscriptError>;

const NAMES: &[&str] = &[
    "AOH",
    "CVAR",
    "DIRECTION",
    "EMA",
    "HIGHEST",
    "LOWEST",
    "LRS",
    "OFFSET",
    "PAST",
    "PF",
    "PRIOR",
    "R2",
    "RSI",
    "SESSION",
    "SINCE",
    "SMA",
    "STDEV",
    "TOD",
    "VAR",
];

pub fn names() -> &'static [&'static str] {
    NAMES
}

pub fn lookup(name: &str) -> Option<Builder> {
    let builder: Builder = match name {
        "OFFSET" => offset,
        "HIGHEST" => highest,
        "LOWEST" => lowest,
        "DIRECTION" => direction,
        "AOH" => aoh,
        "SMA" => sma,
        "EMA" => ema,
        "PF" => pf,
        "LRS" => lrs,
        "R2" => r2,
        "STDEV" => stdev,
        "RSI" => rsi,
        "PRIOR" => prior,
        "SINCE" => since,
        "PAST" => past,
        "SESSION" => session,
        "TOD" => tod,
        "VAR" => var,
        "CVAR" => cvar,
        _ => return None,
    };
    Some(builder)
}

// ---- shared helpers -------------------------------------------------------

fn expect_arity(args: &[Calculation], name: &str, expected: usize) -> Result<(), BarscriptError> {
    if args.len() != expected {
        return Err(BarscriptError::BadArity {
            function: name.to_string(),
            expected: expected.to_string(),
            got: args.len(),
        });
    }
    Ok(())
}

/// A window parameter must be a positive integer literal, checked by
/// evaluating the sub-calculation with no bars.
fn positive_int(name: &str, arg: &Calculation) -> Result<usize, BarscriptError> {
    match arg.literal_value().and_then(|v| v.as_number()) {
        Some(n) if n > 0.0 && n.fract() == 0.0 => Ok(n as usize),
        _ => Err(BarscriptError::NotLiteral {
            function: name.to_string(),
        }),
    }
}

fn positive_number(name: &str, arg: &Calculation) -> Result<f64, BarscriptError> {
    match arg.literal_value().and_then(|v| v.as_number()) {
        Some(n) if n > 0.0 => Ok(n),
        _ => Err(BarscriptError::NotLiteral {
            function: name.to_string(),
        }),
    }
}

/// The most recent numeric samples of `x`, one per trailing bar position,
/// oldest first. Positions where `x` has no value yet are skipped.
fn series(x: &Calculation, bars: &[Bar], count: usize) -> Result<Vec<f64>, BarscriptError> {
    let len = bars.len();
    let take = count.min(len);
    let mut out = Vec::with_capacity(take);
    for i in (len - take)..len {
        if let Some(v) = x.evaluate(&bars[..=i])?.as_number() {
            out.push(v);
        }
    }
    Ok(out)
}

/// Package an evaluation closure with its warm-up length, slicing incoming
/// sequences down to the declared window, and union in argument metadata
/// (fields and side effects; the warm-up formula is the builder's business).
fn windowed<F>(args: &[Calculation], warm_up: usize, eval: F) -> Calculation
where
    F: Fn(&[Bar]) -> Result<Value, BarscriptError> + Send + Sync + 'static,
{
    let mut calc = Calculation::new(Arc::new(move |bars: &[Bar]| {
        let start = bars.len().saturating_sub(warm_up + 1);
        eval(&bars[start..])
    }))
    .with_warm_up(warm_up);
    for arg in args {
        calc.fields.extend(arg.fields.iter().cloned());
        calc.side_effect = calc.side_effect || arg.side_effect;
    }
    calc
}

fn changes(samples: &[f64]) -> Vec<f64> {
    samples.windows(2).map(|w| w[1] - w[0]).collect()
}

fn simple_returns(samples: &[f64]) -> Vec<f64> {
    samples
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn population_stdev(values: &[f64]) -> f64 {
    let m = mean(values);
    (values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64).sqrt()
}

fn inverse_normal(name: &str, p: f64) -> Result<f64, BarscriptError> {
    if p <= 0.0 || p >= 100.0 {
        return Err(BarscriptError::NotLiteral {
            function: name.to_string(),
        });
    }
    let normal = Normal::new(0.0, 1.0).map_err(|_| BarscriptError::NotLiteral {
        function: name.to_string(),
    })?;
    Ok(normal.inverse_cdf(p / 100.0))
}

fn ending_timestamp(bar: &Bar) -> Result<i64, BarscriptError> {
    Ok(parse_instant(&bar.ending)?.timestamp())
}

/// Index of the last bar ending at or before `target`, by binary search.
fn search_at_or_before(bars: &[Bar], target: i64) -> Result<Option<usize>, BarscriptError> {
    let mut lo = 0usize;
    let mut hi = bars.len();
    while lo < hi {
        let mid = (lo + hi) / 2;
        if ending_timestamp(&bars[mid])? <= target {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    Ok(lo.checked_sub(1))
}

// ---- plain rolling functions ----------------------------------------------

/// OFFSET(n,x): value of x, n bars earlier.
fn offset(_: &SessionOptions, args: Vec<Calculation>) -> Result<Calculation, BarscriptError> {
    expect_arity(&args, "OFFSET", 2)?;
    let n = positive_int("OFFSET", &args[0])?;
    let x = args[1].clone();
    let warm = n + x.warm_up_length;
    Ok(windowed(&args, warm, move |bars| {
        if bars.len() > n {
            x.evaluate(&bars[..bars.len() - n])
        } else {
            Ok(Value::Nil)
        }
    }))
}

fn highest(_: &SessionOptions, args: Vec<Calculation>) -> Result<Calculation, BarscriptError> {
    expect_arity(&args, "HIGHEST", 2)?;
    let n = positive_int("HIGHEST", &args[0])?;
    let x = args[1].clone();
    let warm = n + x.warm_up_length - 1;
    Ok(windowed(&args, warm, move |bars| {
        let samples = series(&x, bars, n)?;
        Ok(samples
            .into_iter()
            .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |a| a.max(v))))
            .map(Value::Number)
            .unwrap_or(Value::Nil))
    }))
}

fn lowest(_: &SessionOptions, args: Vec<Calculation>) -> Result<Calculation, BarscriptError> {
    expect_arity(&args, "LOWEST", 2)?;
    let n = positive_int("LOWEST", &args[0])?;
    let x = args[1].clone();
    let warm = n + x.warm_up_length - 1;
    Ok(windowed(&args, warm, move |bars| {
        let samples = series(&x, bars, n)?;
        Ok(samples
            .into_iter()
            .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |a| a.min(v))))
            .map(Value::Number)
            .unwrap_or(Value::Nil))
    }))
}

/// DIRECTION(n,x): sign of the most recent value against the last value in
/// the window that differs from it; 0 when nothing differs.
fn direction(_: &SessionOptions, args: Vec<Calculation>) -> Result<Calculation, BarscriptError> {
    expect_arity(&args, "DIRECTION", 2)?;
    let n = positive_int("DIRECTION", &args[0])?;
    let x = args[1].clone();
    let warm = n + x.warm_up_length;
    Ok(windowed(&args, warm, move |bars| {
        let samples = series(&x, bars, n + 1)?;
        let Some((&last, earlier)) = samples.split_last() else {
            return Ok(Value::Nil);
        };
        for &prev in earlier.iter().rev() {
            if prev != last {
                return Ok(Value::Number((last - prev).signum()));
            }
        }
        Ok(Value::Number(0.0))
    }))
}

/// AOH(n,x): bars since the highest value in the window; ties resolve to the
/// earliest occurrence.
fn aoh(_: &SessionOptions, args: Vec<Calculation>) -> Result<Calculation, BarscriptError> {
    expect_arity(&args, "AOH", 2)?;
    let n = positive_int("AOH", &args[0])?;
    let x = args[1].clone();
    let warm = n - 1;
    Ok(windowed(&args, warm, move |bars| {
        let samples = series(&x, bars, n)?;
        if samples.is_empty() {
            return Ok(Value::Nil);
        }
        let mut best = 0usize;
        for (i, &v) in samples.iter().enumerate() {
            if v > samples[best] {
                best = i;
            }
        }
        Ok(Value::Number((samples.len() - 1 - best) as f64))
    }))
}

fn sma(_: &SessionOptions, args: Vec<Calculation>) -> Result<Calculation, BarscriptError> {
    expect_arity(&args, "SMA", 2)?;
    let n = positive_int("SMA", &args[0])?;
    let x = args[1].clone();
    let warm = n + x.warm_up_length - 1;
    Ok(windowed(&args, warm, move |bars| {
        let samples = series(&x, bars, n)?;
        if samples.is_empty() {
            return Ok(Value::Nil);
        }
        Ok(Value::Number(mean(&samples)))
    }))
}

/// EMA(n,x): seeded with the SMA of the first n samples of a 10n window,
/// then smoothed with alpha = 2/(n+1). EMA(1,x) is x unchanged.
fn ema(_: &SessionOptions, args: Vec<Calculation>) -> Result<Calculation, BarscriptError> {
    expect_arity(&args, "EMA", 2)?;
    let n = positive_int("EMA", &args[0])?;
    let x = args[1].clone();
    if n == 1 {
        return Ok(x);
    }
    let warm = n * 10 + x.warm_up_length - 1;
    Ok(windowed(&args, warm, move |bars| {
        let samples = series(&x, bars, n * 10)?;
        if samples.is_empty() {
            return Ok(Value::Nil);
        }
        let seed_len = n.min(samples.len());
        let alpha = 2.0 / (n as f64 + 1.0);
        let mut value = mean(&samples[..seed_len]);
        for &v in &samples[seed_len..] {
            value = v * alpha + value * (1.0 - alpha);
        }
        Ok(Value::Number(value))
    }))
}

/// PF(n,x): profit factor over n changes; Nil when the window has no losses.
fn pf(_: &SessionOptions, args: Vec<Calculation>) -> Result<Calculation, BarscriptError> {
    expect_arity(&args, "PF", 2)?;
    let n = positive_int("PF", &args[0])?;
    let x = args[1].clone();
    let warm = n + x.warm_up_length;
    Ok(windowed(&args, warm, move |bars| {
        let samples = series(&x, bars, n + 1)?;
        let deltas = changes(&samples);
        if deltas.is_empty() {
            return Ok(Value::Nil);
        }
        let gains: f64 = deltas.iter().filter(|d| **d > 0.0).sum();
        let losses: f64 = deltas.iter().filter(|d| **d < 0.0).sum();
        if losses == 0.0 {
            return Ok(Value::Nil);
        }
        Ok(Value::Number(gains / -losses))
    }))
}

fn regression(samples: &[f64]) -> Option<(f64, f64, f64)> {
    // least squares of y over x = 0..k; returns (slope, mean, r-squared)
    let k = samples.len();
    if k < 2 {
        return None;
    }
    let xs: Vec<f64> = (0..k).map(|i| i as f64).collect();
    let mx = mean(&xs);
    let my = mean(samples);
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syy = 0.0;
    for i in 0..k {
        let dx = xs[i] - mx;
        let dy = samples[i] - my;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    if sxx == 0.0 {
        return None;
    }
    let slope = sxy / sxx;
    let r_squared = if syy == 0.0 { 1.0 } else { (sxy * sxy) / (sxx * syy) };
    Some((slope, my, r_squared))
}

/// LRS(n,x): least-squares slope over n samples, as a percentage of the mean.
fn lrs(_: &SessionOptions, args: Vec<Calculation>) -> Result<Calculation, BarscriptError> {
    expect_arity(&args, "LRS", 2)?;
    let n = positive_int("LRS", &args[0])?;
    let x = args[1].clone();
    let warm = n * 10 + x.warm_up_length - 1;
    Ok(windowed(&args, warm, move |bars| {
        let samples = series(&x, bars, n)?;
        match regression(&samples) {
            Some((slope, my, _)) if my != 0.0 => Ok(Value::Number(slope * 100.0 / my)),
            _ => Ok(Value::Nil),
        }
    }))
}

/// R2(n,x): coefficient of determination of the same fit, as a percentage.
fn r2(_: &SessionOptions, args: Vec<Calculation>) -> Result<Calculation, BarscriptError> {
    expect_arity(&args, "R2", 2)?;
    let n = positive_int("R2", &args[0])?;
    let x = args[1].clone();
    let warm = n * 10 + x.warm_up_length - 1;
    Ok(windowed(&args, warm, move |bars| {
        let samples = series(&x, bars, n)?;
        match regression(&samples) {
            Some((_, _, r_squared)) => Ok(Value::Number(r_squared * 100.0)),
            None => Ok(Value::Nil),
        }
    }))
}

/// STDEV(n,x): population standard deviation; 1 when the computed value is 0.
fn stdev(_: &SessionOptions, args: Vec<Calculation>) -> Result<Calculation, BarscriptError> {
    expect_arity(&args, "STDEV", 2)?;
    let n = positive_int("STDEV", &args[0])?;
    let x = args[1].clone();
    let warm = n - 1 + x.warm_up_length;
    Ok(windowed(&args, warm, move |bars| {
        let samples = series(&x, bars, n)?;
        if samples.is_empty() {
            return Ok(Value::Nil);
        }
        let sd = population_stdev(&samples);
        Ok(Value::Number(if sd == 0.0 { 1.0 } else { sd }))
    }))
}

/// RSI(n,x): Wilder smoothing seeded over the first n changes, warmed over up
/// to 250 further samples for convergence.
fn rsi(_: &SessionOptions, args: Vec<Calculation>) -> Result<Calculation, BarscriptError> {
    expect_arity(&args, "RSI", 2)?;
    let n = positive_int("RSI", &args[0])?;
    let x = args[1].clone();
    let warm = n + 250 + x.warm_up_length;
    Ok(windowed(&args, warm, move |bars| {
        let samples = series(&x, bars, n + 251)?;
        let deltas = changes(&samples);
        if deltas.is_empty() {
            return Ok(Value::Nil);
        }
        let seed_len = n.min(deltas.len());
        let mut avg_gain = deltas[..seed_len]
            .iter()
            .map(|d| d.max(0.0))
            .sum::<f64>()
            / seed_len as f64;
        let mut avg_loss = deltas[..seed_len]
            .iter()
            .map(|d| (-d).max(0.0))
            .sum::<f64>()
            / seed_len as f64;
        for d in &deltas[seed_len..] {
            avg_gain = (avg_gain * (n as f64 - 1.0) + d.max(0.0)) / n as f64;
            avg_loss = (avg_loss * (n as f64 - 1.0) + (-d).max(0.0)) / n as f64;
        }
        if avg_loss == 0.0 {
            return Ok(Value::Number(100.0));
        }
        Ok(Value::Number(
            100.0 - 100.0 / (1.0 + avg_gain / avg_loss),
        ))
    }))
}

// ---- session-relative functions -------------------------------------------

fn prior_warm_up(options: &SessionOptions, d: usize, x: &Calculation) -> usize {
    let per_day = Period::new(options).sessions_per_day();
    ((d as f64 + 1.0) * per_day).ceil() as usize + x.warm_up_length
}

/// PRIOR(d,x): value of x as of the session close d trading days ago, found
/// by binary search on bar endings.
fn prior(options: &SessionOptions, args: Vec<Calculation>) -> Result<Calculation, BarscriptError> {
    expect_arity(&args, "PRIOR", 2)?;
    let d = positive_int("PRIOR", &args[0])?;
    let x = args[1].clone();
    let warm = prior_warm_up(options, d, &x);
    let day = Period::for_interval(options, Interval::Day);
    Ok(windowed(&args, warm, move |bars| {
        let Some(last) = bars.last() else {
            return Ok(Value::Nil);
        };
        let now = day.parse_instant(&last.ending)?;
        let target = day.dec(&now, d as f64).timestamp();
        match search_at_or_before(bars, target)? {
            Some(idx) => x.evaluate(&bars[..=idx]),
            None => Ok(Value::Nil),
        }
    }))
}

/// SINCE(d,x): x evaluated over only the bars after the session close d
/// trading days ago.
fn since(options: &SessionOptions, args: Vec<Calculation>) -> Result<Calculation, BarscriptError> {
    expect_arity(&args, "SINCE", 2)?;
    let d = positive_int("SINCE", &args[0])?;
    let x = args[1].clone();
    let warm = prior_warm_up(options, d, &x).saturating_sub(1);
    let day = Period::for_interval(options, Interval::Day);
    Ok(windowed(&args, warm, move |bars| {
        let Some(last) = bars.last() else {
            return Ok(Value::Nil);
        };
        let now = day.parse_instant(&last.ending)?;
        let anchor = day.dec(&now, d as f64).timestamp();
        let start = match search_at_or_before(bars, anchor)? {
            Some(idx) => idx + 1,
            None => 0,
        };
        if start >= bars.len() {
            return Ok(Value::Nil);
        }
        x.evaluate(&bars[start..])
    }))
}

/// PAST(d,x): x evaluated over the bars of the last d calendar days. An
/// anchor landing on Sunday or Monday widens by two further days.
fn past(options: &SessionOptions, args: Vec<Calculation>) -> Result<Calculation, BarscriptError> {
    expect_arity(&args, "PAST", 2)?;
    let d = positive_int("PAST", &args[0])?;
    let x = args[1].clone();
    let warm = prior_warm_up(options, d, &x).saturating_sub(1);
    let security_tz = options.security_tz;
    Ok(windowed(&args, warm, move |bars| {
        let Some(last) = bars.last() else {
            return Ok(Value::Nil);
        };
        let now = parse_instant(&last.ending)?.with_timezone(&security_tz);
        let mut anchor = now - Duration::days(d as i64);
        if matches!(anchor.weekday(), Weekday::Sun | Weekday::Mon) {
            anchor -= Duration::days(2);
        }
        let start = match search_at_or_before(bars, anchor.timestamp())? {
            Some(idx) => idx + 1,
            None => 0,
        };
        if start >= bars.len() {
            return Ok(Value::Nil);
        }
        x.evaluate(&bars[start..])
    }))
}

fn local_time_and_date(bar: &Bar, tz: Tz) -> Result<(chrono::NaiveDate, NaiveTime), BarscriptError> {
    let local: DateTime<Tz> = parse_instant(&bar.ending)?.with_timezone(&tz);
    Ok((local.date_naive(), local.time()))
}

/// SESSION(x): x evaluated over only the bars inside the configured session
/// window of the trading date the last bar belongs to.
fn session(options: &SessionOptions, args: Vec<Calculation>) -> Result<Calculation, BarscriptError> {
    expect_arity(&args, "SESSION", 1)?;
    let x = args[0].clone();
    let length = Period::new(options).session_length().ceil() as usize;
    let warm = length + x.warm_up_length - 1;
    let (open, close) = options.window_for(Interval::Day);
    let security_tz = options.security_tz;
    Ok(windowed(&args, warm, move |bars| {
        let Some(last) = bars.last() else {
            return Ok(Value::Nil);
        };
        let (session_date, _) = local_time_and_date(last, security_tz)?;
        let mut filtered = Vec::new();
        for bar in bars {
            let (date, time) = local_time_and_date(bar, security_tz)?;
            if date != session_date {
                continue;
            }
            if open == close || (time > open && time <= close) {
                filtered.push(bar.clone());
            }
        }
        if filtered.is_empty() {
            return Ok(Value::Nil);
        }
        x.evaluate(&filtered)
    }))
}

/// TOD(x): x evaluated over a same-time-of-day history, stepping back one
/// session length at a time and searching for a matching bar when the
/// sequence is misaligned.
fn tod(options: &SessionOptions, args: Vec<Calculation>) -> Result<Calculation, BarscriptError> {
    expect_arity(&args, "TOD", 1)?;
    let x = args[0].clone();
    let length = (Period::new(options).session_length().ceil() as usize).max(1);
    let count = x.warm_up_length + 1;
    let warm = count * length;
    let security_tz = options.security_tz;
    Ok(windowed(&args, warm, move |bars| {
        let Some(last) = bars.last() else {
            return Ok(Value::Nil);
        };
        let (_, wanted) = local_time_and_date(last, security_tz)?;
        let mut picked: Vec<Bar> = Vec::with_capacity(count);
        let mut cursor = bars.len();
        for k in 0..count {
            let aligned = (bars.len() as i64 - 1) - (k as i64) * length as i64;
            if aligned < 0 || cursor == 0 {
                break;
            }
            let aligned = (aligned as usize).min(cursor - 1);
            let (_, time) = local_time_and_date(&bars[aligned], security_tz)?;
            let found = if time == wanted {
                Some(aligned)
            } else {
                // misaligned history: walk back to the nearest matching bar
                let mut hit = None;
                for j in (0..=aligned).rev() {
                    let (_, t) = local_time_and_date(&bars[j], security_tz)?;
                    if t == wanted {
                        hit = Some(j);
                        break;
                    }
                }
                hit
            };
            match found {
                Some(idx) => {
                    picked.push(bars[idx].clone());
                    cursor = idx;
                }
                None => break,
            }
        }
        if picked.is_empty() {
            return Ok(Value::Nil);
        }
        picked.reverse();
        x.evaluate(&picked)
    }))
}

// ---- value-at-risk --------------------------------------------------------

/// VAR(p,n,x): parametric value-at-risk of the simple returns of x over n
/// changes, sign-flipped to the loss side.
fn var(_: &SessionOptions, args: Vec<Calculation>) -> Result<Calculation, BarscriptError> {
    expect_arity(&args, "VAR", 3)?;
    let p = positive_number("VAR", &args[0])?;
    let n = positive_int("VAR", &args[1])?;
    let x = args[2].clone();
    let z = inverse_normal("VAR", p)?;
    let warm = n + x.warm_up_length;
    Ok(windowed(&args, warm, move |bars| {
        let samples = series(&x, bars, n + 1)?;
        let returns = simple_returns(&samples);
        if returns.is_empty() {
            return Ok(Value::Nil);
        }
        let mu = mean(&returns);
        let sigma = population_stdev(&returns);
        Ok(Value::Number(-(z * sigma + mu)))
    }))
}

/// CVAR(p,n,x): average of the returns beyond the VAR threshold, sign-flipped.
fn cvar(_: &SessionOptions, args: Vec<Calculation>) -> Result<Calculation, BarscriptError> {
    expect_arity(&args, "CVAR", 3)?;
    let p = positive_number("CVAR", &args[0])?;
    let n = positive_int("CVAR", &args[1])?;
    let x = args[2].clone();
    let z = inverse_normal("CVAR", p)?;
    let warm = n + x.warm_up_length;
    Ok(windowed(&args, warm, move |bars| {
        let samples = series(&x, bars, n + 1)?;
        let returns = simple_returns(&samples);
        if returns.is_empty() {
            return Ok(Value::Nil);
        }
        let mu = mean(&returns);
        let sigma = population_stdev(&returns);
        let threshold = z * sigma + mu;
        let tail: Vec<f64> = returns.into_iter().filter(|r| *r <= threshold).collect();
        if tail.is_empty() {
            return Ok(Value::Nil);
        }
        Ok(Value::Number(-mean(&tail)))
    }))
}
