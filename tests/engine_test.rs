//! End-to-end engine tests.
//!
//! Covers:
//! - Bollinger reference scenario (stockcharts 20-close series)
//! - RSI reference scenario (stockcharts 33-close series)
//! - warm-up monotonicity and the EMA seed property
//! - criteria/columns/warm-up map surfaces
//! - calendar session skipping through the public API
//! - parser/serializer round-trip and calendar inverse laws as properties

use barscript::domain::bar::Bar;
use barscript::domain::catalog::FieldCatalog;
use barscript::domain::compiler::Engine;
use barscript::domain::error::BarscriptError;
use barscript::domain::interval::Interval;
use barscript::domain::period::Period;
use barscript::domain::session::SessionOptions;
use barscript::domain::value::Value;
use chrono::{Datelike, Duration, NaiveDate, Weekday};

const BOLLINGER_CLOSES: [f64; 20] = [
    86.1557, 89.0867, 88.7829, 90.3228, 89.0671, 91.1453, 89.4397, 89.1750, 86.9302, 87.6752,
    86.9596, 89.4299, 89.3221, 88.7241, 87.4497, 87.2634, 89.4985, 87.9006, 89.1260, 90.7043,
];

const RSI_CLOSES: [f64; 33] = [
    44.3389, 44.0902, 44.1497, 43.6124, 44.3278, 44.8264, 45.0955, 45.4245, 45.8433, 46.0826,
    45.8931, 46.0328, 45.6140, 46.2820, 46.2820, 46.0028, 46.0328, 46.4116, 46.2222, 45.6439,
    46.2122, 46.2521, 45.7137, 46.4515, 45.7835, 45.3548, 44.0288, 44.1783, 44.2181, 44.5672,
    43.4205, 42.6628, 43.1314,
];

fn catalog() -> FieldCatalog {
    FieldCatalog::from_iter([("day", vec!["open", "high", "low", "close", "volume"])])
}

fn options() -> SessionOptions {
    SessionOptions::default()
}

/// Bars on consecutive trading days ending at the New York close.
fn daily_bars(closes: &[f64]) -> Vec<Bar> {
    let mut date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    closes
        .iter()
        .map(|&close| {
            while matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
                date += Duration::days(1);
            }
            let bar = Bar::new(format!("{date}T16:00:00-05:00")).with("close", close);
            date += Duration::days(1);
            bar
        })
        .collect()
}

fn evaluate(text: &str, bars: &[Bar]) -> Value {
    let engine = Engine::new();
    let calc = engine.parse(text, &catalog(), &options()).unwrap();
    calc.evaluate(bars).unwrap()
}

mod reference_scenarios {
    use super::*;

    #[test]
    fn bollinger_sma_and_stdev_match_stockcharts() {
        let bars = daily_bars(&BOLLINGER_CLOSES);
        let sma = evaluate("SMA(20,day.close)", &bars).as_number().unwrap();
        assert!((sma - 88.70794).abs() < 0.01, "sma = {sma}");

        let stdev = evaluate("STDEV(20,day.close)", &bars).as_number().unwrap();
        assert!((stdev - 1.291961214).abs() < 0.01, "stdev = {stdev}");

        let upper = evaluate("SMA(20,day.close) + 2*STDEV(20,day.close)", &bars)
            .as_number()
            .unwrap();
        assert!((upper - (88.70794 + 2.0 * 1.291961214)).abs() < 0.03);
    }

    #[test]
    fn rsi_matches_stockcharts_at_bar_fifteen() {
        let bars = daily_bars(&RSI_CLOSES);
        let rsi = evaluate("RSI(14,day.close)", &bars[..15]).as_number().unwrap();
        assert!((rsi - 70.5327894837).abs() < 0.01, "rsi = {rsi}");
    }

    #[test]
    fn rsi_converges_with_more_history() {
        let bars = daily_bars(&RSI_CLOSES);
        let rsi = evaluate("RSI(14,day.close)", &bars).as_number().unwrap();
        assert!(rsi > 0.0 && rsi < 100.0);
    }
}

mod warm_up_properties {
    use super::*;

    #[test]
    fn sma_is_stable_once_warm() {
        let closes: Vec<f64> = (0..30).map(|i| 80.0 + ((i * 7) % 11) as f64).collect();
        let bars = daily_bars(&closes);
        let engine = Engine::new();
        let calc = engine.parse("SMA(20,day.close)", &catalog(), &options()).unwrap();
        assert_eq!(calc.warm_up_length, 19);

        let minimal = calc.evaluate(&bars[bars.len() - 20..]).unwrap();
        let generous = calc.evaluate(&bars).unwrap();
        assert_eq!(minimal, generous);
    }

    #[test]
    fn ema_of_one_is_the_last_value() {
        let bars = daily_bars(&[10.0, 25.0, 40.0]);
        assert_eq!(
            evaluate("EMA(1,day.close)", &bars),
            Value::Number(40.0)
        );
    }

    #[test]
    fn ema_declares_tenfold_warm_up() {
        let engine = Engine::new();
        let calc = engine.parse("EMA(20,day.close)", &catalog(), &options()).unwrap();
        assert_eq!(calc.warm_up_length, 20 * 10 - 1);
    }

    #[test]
    fn too_little_history_degrades_not_fails() {
        let bars = daily_bars(&[100.0, 101.0]);
        let value = evaluate("SMA(20,day.close)", &bars);
        assert!(value.as_number().is_some());
        let empty: Vec<Bar> = Vec::new();
        assert_eq!(evaluate("SMA(20,day.close)", &empty), Value::Nil);
    }
}

mod error_surfaces {
    use super::*;

    #[test]
    fn unknown_function_names_itself() {
        let engine = Engine::new();
        let err = engine
            .parse("FOOBAR(1,close)", &catalog(), &options())
            .unwrap_err();
        assert!(err.to_string().contains("Unknown function"));
    }

    #[test]
    fn mixing_intervals_in_a_lookback_names_both() {
        let engine = Engine::new();
        let two = FieldCatalog::from_iter([("day", vec!["close"]), ("week", vec!["close"])]);
        let err = engine
            .parse("SMA(20, day.close - week.close)", &two, &options())
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("day") && message.contains("week"), "{message}");
    }

    #[test]
    fn window_must_be_a_literal() {
        let engine = Engine::new();
        let err = engine
            .parse("SMA(day.volume, day.close)", &catalog(), &options())
            .unwrap_err();
        assert!(matches!(err, BarscriptError::NotLiteral { .. }));
    }

    #[test]
    fn malformed_session_descriptor_is_rejected_up_front() {
        let err = SessionOptions::new(
            "day",
            "09:30",
            "09:30 to 16:00",
            "04:00 - 20:00",
            "America/New_York",
            "UTC",
        )
        .unwrap_err();
        assert!(matches!(err, BarscriptError::BadSession { .. }));
    }
}

mod map_surfaces {
    use super::*;

    #[test]
    fn columns_map_preserves_order_and_names() {
        let engine = Engine::new();
        let columns = engine
            .parse_columns_map(
                "day.close AS last, SMA(20,day.close)",
                &catalog(),
                &options(),
            )
            .unwrap();
        assert_eq!(columns[0].0, "last");
        assert_eq!(columns[1].0, "SMA(20,close)");
    }

    #[test]
    fn criteria_map_splits_conjunction_by_interval() {
        let engine = Engine::new();
        let two = FieldCatalog::from_iter([("day", vec!["close"]), ("week", vec!["close"])]);
        let map = engine
            .parse_criteria_map(
                "day.close > 100 and week.close > 90",
                &two,
                &options(),
            )
            .unwrap();
        assert!(map.contains_key(&Interval::Day));
        assert!(map.contains_key(&Interval::Week));
    }

    #[test]
    fn warm_up_map_sizes_history_retrieval() {
        let engine = Engine::new();
        let map = engine
            .parse_warm_up_map("RSI(14,day.close)", &catalog(), &options())
            .unwrap();
        let day = &map["day"];
        assert_eq!(day["RSI(14,close)"].warm_up_length, 14 + 250);
    }
}

mod calendar_surface {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;

    #[test]
    fn minute_increment_across_friday_close_lands_on_monday_open() {
        let period = Period::new(&options().with_interval(Interval::M5));
        // last m5 bar of Friday's extended session ends 20:00
        let friday_late = New_York
            .with_ymd_and_hms(2024, 1, 12, 19, 55, 0)
            .single()
            .unwrap();
        let next = period.inc(&friday_late, 1.0);
        let monday_open = New_York
            .with_ymd_and_hms(2024, 1, 15, 4, 0, 0)
            .single()
            .unwrap();
        assert_eq!(next, monday_open);
        assert_eq!(next.weekday(), Weekday::Mon);
    }

    #[test]
    fn day_diff_counts_trading_days_only() {
        let period = Period::new(&options());
        let monday = New_York.with_ymd_and_hms(2024, 1, 8, 16, 0, 0).single().unwrap();
        let next_monday = New_York.with_ymd_and_hms(2024, 1, 15, 16, 0, 0).single().unwrap();
        assert_eq!(period.diff(&next_monday, &monday), 5);
    }
}

mod properties {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn calendar_inc_diff_inverse_law(
            // about four years of instants starting 2022
            offset_minutes in 0i64..(4 * 365 * 24 * 60),
            n in -150i64..150,
        ) {
            let base = New_York.with_ymd_and_hms(2022, 1, 3, 9, 30, 0).single().unwrap();
            let t = base + Duration::minutes(offset_minutes);
            for interval in [Interval::M5, Interval::M60, Interval::Day, Interval::Week] {
                let period = Period::new(&options().with_interval(interval));
                let moved = period.inc(&t, n as f64);
                prop_assert_eq!(period.diff(&moved, &t), n);
                prop_assert_eq!(period.diff(&t, &moved), -n);
            }
        }

        #[test]
        fn parser_serialization_is_stable(
            a in 1u32..500,
            b in 1u32..500,
            op in prop::sample::select(vec!["+", "-", "*", "/", "%", "<", ">", "=", "and", "or"]),
        ) {
            use barscript::domain::expr_parser::parse_expression;
            let text = format!("SMA({a},day.close) {op} {b}");
            let first = parse_expression(&text).unwrap();
            let second = parse_expression(&first.serialize()).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
