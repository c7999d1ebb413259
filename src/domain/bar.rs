//! Bar records: one sampled period's named values with an `ending` timestamp.

use crate::domain::error::BarscriptError;
use crate::domain::value::Value;
use chrono::{DateTime, FixedOffset};
use std::collections::BTreeMap;

/// One sampled period's record.
///
/// `ending` is an ISO-8601 timestamp with offset marking the session-relative
/// end of the period. Values live in a flat map; when several intervals are
/// combined into one record, each coarser interval's view nests under
/// `intervals` keyed by interval name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bar {
    pub ending: String,
    pub values: BTreeMap<String, Value>,
    pub intervals: BTreeMap<String, Bar>,
}

impl Bar {
    pub fn new(ending: impl Into<String>) -> Self {
        Bar {
            ending: ending.into(),
            values: BTreeMap::new(),
            intervals: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn with_interval(mut self, interval: impl Into<String>, bar: Bar) -> Self {
        self.intervals.insert(interval.into(), bar);
        self
    }

    /// Read a field for the given interval, falling back to the flat map when
    /// the record carries no nested view for that interval.
    pub fn get(&self, interval: &str, name: &str) -> Option<&Value> {
        if interval.is_empty() {
            return self.values.get(name);
        }
        match self.intervals.get(interval) {
            Some(sub) => sub.values.get(name).or_else(|| self.values.get(name)),
            None => self.values.get(name),
        }
    }

    /// The `ending` of the given interval's view (nested when present).
    pub fn ending(&self, interval: &str) -> &str {
        if !interval.is_empty() {
            if let Some(sub) = self.intervals.get(interval) {
                if !sub.ending.is_empty() {
                    return &sub.ending;
                }
            }
        }
        &self.ending
    }

    /// Flatten this record to a single-interval view for indicator invocation.
    pub fn column(&self, interval: &str) -> Bar {
        match self.intervals.get(interval) {
            Some(sub) => {
                let mut flat = sub.clone();
                if flat.ending.is_empty() {
                    flat.ending = self.ending.clone();
                }
                flat.intervals.clear();
                flat
            }
            None => {
                let mut flat = self.clone();
                flat.intervals.clear();
                flat
            }
        }
    }

    pub fn ending_instant(&self) -> Result<DateTime<FixedOffset>, BarscriptError> {
        parse_instant(&self.ending)
    }
}

/// Parse an ISO-8601 timestamp with offset. The only evaluation-time failure
/// the calendar functions can raise.
pub fn parse_instant(s: &str) -> Result<DateTime<FixedOffset>, BarscriptError> {
    DateTime::parse_from_rfc3339(s).map_err(|_| BarscriptError::BadTimestamp {
        value: s.to_string(),
    })
}
