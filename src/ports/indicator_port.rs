//! Port for the per-interval indicator library.
//!
//! Indicators are supplied by the data-fetch layer: each declares the catalog
//! fields it reads and a fixed warm-up, takes literal parameters only, and is
//! invoked on the single-interval column view of the trailing bars.

use crate::domain::bar::Bar;
use crate::domain::error::BarscriptError;
use crate::domain::interval::Interval;
use crate::domain::value::Value;
use std::sync::Arc;

pub type IndicatorFn =
    Arc<dyn Fn(&[Value], &[Bar]) -> Result<Value, BarscriptError> + Send + Sync>;

#[derive(Clone)]
pub struct IndicatorDef {
    pub fields: Vec<String>,
    pub warm_up_length: usize,
    pub eval: IndicatorFn,
}

pub trait IndicatorLibrary: Send + Sync {
    /// The definition of `name` for bars of `interval`, when it exists.
    fn lookup(&self, interval: Interval, name: &str) -> Option<IndicatorDef>;

    /// Indicator names available for `interval`, used for suggestion lists.
    fn names(&self, interval: Interval) -> Vec<String>;
}

/// A library with no indicators at all.
pub struct NoIndicators;

impl IndicatorLibrary for NoIndicators {
    fn lookup(&self, _interval: Interval, _name: &str) -> Option<IndicatorDef> {
        None
    }

    fn names(&self, _interval: Interval) -> Vec<String> {
        Vec::new()
    }
}
