//! Common (pure, bar-local) function registry.
//!
//! First resolution tier of the compiler: operators, math, the conditional,
//! and date extraction from the tail bar's `ending`. Each entry is a factory
//! from compiled arguments to a calculation whose warm-up is the max of its
//! arguments' and whose field set is their union.

use crate::domain::calc::Calculation;
use crate::domain::error::BarscriptError;
use crate::domain::session::SessionOptions;
use crate::domain::value::Value;
use chrono::{DateTime, Datelike, Timelike};
use chrono_tz::Tz;
use std::sync::Arc;

const EPSILON: f64 = 1e-9;

pub type Factory = fn(&SessionOptions, Vec<Calculation>) -> Result<Calculation, BarscriptError>;

const NAMES: &[&str] = &[
    "ABS",
    "ADD",
    "AND",
    "CEILING",
    "DATE",
    "DAY",
    "DIVIDE",
    "EQUALS",
    "FLOOR",
    "GREATER_THAN",
    "HOUR",
    "IF",
    "LESS_THAN",
    "MAX",
    "MIN",
    "MINUTE",
    "MOD",
    "MONTH",
    "NEGATIVE",
    "NOT",
    "NOT_EQUAL",
    "NOT_GREATER_THAN",
    "NOT_LESS_THAN",
    "OR",
    "POW",
    "PRODUCT",
    "ROUND",
    "SIGN",
    "SQRT",
    "SUBTRACT",
    "TIME",
    "YEAR",
];

pub fn names() -> &'static [&'static str] {
    NAMES
}

pub fn lookup(name: &str) -> Option<Factory> {
    let factory: Factory = match name {
        "ADD" => |_, args| binary(args, "ADD", |x, y| Value::Number(x + y)),
        "SUBTRACT" => |_, args| binary(args, "SUBTRACT", |x, y| Value::Number(x - y)),
        "PRODUCT" => |_, args| binary(args, "PRODUCT", |x, y| Value::Number(x * y)),
        "DIVIDE" => |_, args| {
            binary(args, "DIVIDE", |x, y| {
                if y == 0.0 {
                    Value::Nil
                } else {
                    Value::Number(x / y)
                }
            })
        },
        "MOD" => |_, args| {
            binary(args, "MOD", |x, y| {
                if y == 0.0 {
                    Value::Nil
                } else {
                    Value::Number(x % y)
                }
            })
        },
        "POW" => |_, args| binary(args, "POW", |x, y| Value::Number(x.powf(y))),
        "NEGATIVE" => |_, args| unary(args, "NEGATIVE", |x| Value::Number(-x)),
        "ABS" => |_, args| unary(args, "ABS", |x| Value::Number(x.abs())),
        "SIGN" => |_, args| unary(args, "SIGN", |x| Value::Number(x.signum())),
        "ROUND" => |_, args| unary(args, "ROUND", |x| Value::Number(x.round())),
        "FLOOR" => |_, args| unary(args, "FLOOR", |x| Value::Number(x.floor())),
        "CEILING" => |_, args| unary(args, "CEILING", |x| Value::Number(x.ceil())),
        "SQRT" => |_, args| {
            unary(args, "SQRT", |x| {
                if x < 0.0 {
                    Value::Nil
                } else {
                    Value::Number(x.sqrt())
                }
            })
        },
        "MIN" => |_, args| fold_numbers(args, "MIN", f64::min),
        "MAX" => |_, args| fold_numbers(args, "MAX", f64::max),
        "NOT" => |_, args| {
            expect_arity(&args, "NOT", 1)?;
            let calc = Calculation::new(Arc::new({
                let args = args.clone();
                move |bars| {
                    Ok(Value::Number(if args[0].evaluate(bars)?.is_truthy() {
                        0.0
                    } else {
                        1.0
                    }))
                }
            }));
            Ok(calc.inherit(&args))
        },
        "AND" => |_, args| {
            expect_at_least(&args, "AND", 1)?;
            let calc = Calculation::new(Arc::new({
                let args = args.clone();
                move |bars| {
                    let mut last = Value::Nil;
                    for arg in &args {
                        last = arg.evaluate(bars)?;
                        if !last.is_truthy() {
                            return Ok(last);
                        }
                    }
                    Ok(last)
                }
            }));
            Ok(calc.inherit(&args))
        },
        "OR" => |_, args| {
            expect_at_least(&args, "OR", 1)?;
            let calc = Calculation::new(Arc::new({
                let args = args.clone();
                move |bars| {
                    let mut last = Value::Nil;
                    for arg in &args {
                        last = arg.evaluate(bars)?;
                        if last.is_truthy() {
                            return Ok(last);
                        }
                    }
                    Ok(last)
                }
            }));
            Ok(calc.inherit(&args))
        },
        "IF" => |_, args| {
            expect_arity(&args, "IF", 3)?;
            let calc = Calculation::new(Arc::new({
                let args = args.clone();
                move |bars| {
                    if args[0].evaluate(bars)?.is_truthy() {
                        args[1].evaluate(bars)
                    } else {
                        args[2].evaluate(bars)
                    }
                }
            }));
            Ok(calc.inherit(&args))
        },
        "EQUALS" => |_, args| comparison(args, "EQUALS", |x, y| equals(x, y)),
        "NOT_EQUAL" => |_, args| comparison(args, "NOT_EQUAL", |x, y| !equals(x, y)),
        "LESS_THAN" => |_, args| ordered(args, "LESS_THAN", |o| o.is_lt()),
        "GREATER_THAN" => |_, args| ordered(args, "GREATER_THAN", |o| o.is_gt()),
        "NOT_LESS_THAN" => |_, args| ordered(args, "NOT_LESS_THAN", |o| o.is_ge()),
        "NOT_GREATER_THAN" => |_, args| ordered(args, "NOT_GREATER_THAN", |o| o.is_le()),
        "DATE" => |options, args| {
            date_part(options, args, "DATE", |t| {
                Value::Text(t.format("%Y-%m-%d").to_string())
            })
        },
        "TIME" => |options, args| {
            date_part(options, args, "TIME", |t| {
                Value::Text(t.format("%H:%M:%S").to_string())
            })
        },
        "YEAR" => |options, args| {
            date_part(options, args, "YEAR", |t| Value::Number(t.year() as f64))
        },
        "MONTH" => |options, args| {
            date_part(options, args, "MONTH", |t| Value::Number(t.month() as f64))
        },
        "DAY" => |options, args| date_part(options, args, "DAY", |t| Value::Number(t.day() as f64)),
        "HOUR" => |options, args| {
            date_part(options, args, "HOUR", |t| Value::Number(t.hour() as f64))
        },
        "MINUTE" => |options, args| {
            date_part(options, args, "MINUTE", |t| Value::Number(t.minute() as f64))
        },
        _ => return None,
    };
    Some(factory)
}

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

fn expect_at_least(args: &[Calculation], name: &str, min: usize) -> Result<(), BarscriptError> {
    if args.len() < min {
        return Err(BarscriptError::BadArity {
            function: name.to_string(),
            expected: format!("at least {min}"),
            got: args.len(),
        });
    }
    Ok(())
}

fn unary(
    args: Vec<Calculation>,
    name: &str,
    f: fn(f64) -> Value,
) -> Result<Calculation, BarscriptError> {
    expect_arity(&args, name, 1)?;
    let calc = Calculation::new(Arc::new({
        let args = args.clone();
        move |bars| match args[0].evaluate(bars)?.as_number() {
            Some(x) => Ok(f(x)),
            None => Ok(Value::Nil),
        }
    }));
    Ok(calc.inherit(&args))
}

fn binary(
    args: Vec<Calculation>,
    name: &str,
    f: fn(f64, f64) -> Value,
) -> Result<Calculation, BarscriptError> {
    expect_arity(&args, name, 2)?;
    let calc = Calculation::new(Arc::new({
        let args = args.clone();
        move |bars| {
            let x = args[0].evaluate(bars)?;
            let y = args[1].evaluate(bars)?;
            match (x.as_number(), y.as_number()) {
                (Some(x), Some(y)) => Ok(f(x, y)),
                _ => Ok(Value::Nil),
            }
        }
    }));
    Ok(calc.inherit(&args))
}

fn fold_numbers(
    args: Vec<Calculation>,
    name: &str,
    f: fn(f64, f64) -> f64,
) -> Result<Calculation, BarscriptError> {
    expect_at_least(&args, name, 1)?;
    let calc = Calculation::new(Arc::new({
        let args = args.clone();
        move |bars| {
            let mut acc: Option<f64> = None;
            for arg in &args {
                match arg.evaluate(bars)?.as_number() {
                    Some(x) => acc = Some(acc.map(|a| f(a, x)).unwrap_or(x)),
                    None => return Ok(Value::Nil),
                }
            }
            Ok(acc.map(Value::Number).unwrap_or(Value::Nil))
        }
    }));
    Ok(calc.inherit(&args))
}

fn equals(x: &Value, y: &Value) -> bool {
    match (x, y) {
        (Value::Number(x), Value::Number(y)) => (x - y).abs() < EPSILON,
        (Value::Text(x), Value::Text(y)) => x == y,
        _ => false,
    }
}

fn comparison(
    args: Vec<Calculation>,
    name: &str,
    f: fn(&Value, &Value) -> bool,
) -> Result<Calculation, BarscriptError> {
    expect_arity(&args, name, 2)?;
    let calc = Calculation::new(Arc::new({
        let args = args.clone();
        move |bars| {
            let x = args[0].evaluate(bars)?;
            let y = args[1].evaluate(bars)?;
            if x.is_nil() || y.is_nil() {
                return Ok(Value::Nil);
            }
            Ok(Value::Number(if f(&x, &y) { 1.0 } else { 0.0 }))
        }
    }));
    Ok(calc.inherit(&args))
}

fn ordered(
    args: Vec<Calculation>,
    name: &str,
    f: fn(std::cmp::Ordering) -> bool,
) -> Result<Calculation, BarscriptError> {
    expect_arity(&args, name, 2)?;
    let calc = Calculation::new(Arc::new({
        let args = args.clone();
        move |bars| {
            let x = args[0].evaluate(bars)?;
            let y = args[1].evaluate(bars)?;
            let ordering = match (&x, &y) {
                (Value::Number(x), Value::Number(y)) => x.partial_cmp(y),
                (Value::Text(x), Value::Text(y)) => Some(x.cmp(y)),
                _ => None,
            };
            match ordering {
                Some(o) => Ok(Value::Number(if f(o) { 1.0 } else { 0.0 })),
                None => Ok(Value::Nil),
            }
        }
    }));
    Ok(calc.inherit(&args))
}

fn date_part(
    options: &SessionOptions,
    args: Vec<Calculation>,
    name: &str,
    f: fn(DateTime<Tz>) -> Value,
) -> Result<Calculation, BarscriptError> {
    expect_arity(&args, name, 0)?;
    let tz = options.tz;
    Ok(Calculation::new(Arc::new(move |bars| match bars.last() {
        Some(bar) => {
            let instant = bar.ending_instant()?.with_timezone(&tz);
            Ok(f(instant))
        }
        None => Ok(Value::Nil),
    })))
}
