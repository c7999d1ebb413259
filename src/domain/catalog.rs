//! Field catalog: which fields the data-fetch layer can supply per interval.

use crate::domain::error::BarscriptError;
use crate::domain::interval::Interval;
use std::collections::BTreeMap;

/// Interval name (including the `""` default bucket) to the ordered list of
/// field names available on bars of that interval.
#[derive(Debug, Clone, Default)]
pub struct FieldCatalog {
    buckets: BTreeMap<String, Vec<String>>,
}

impl FieldCatalog {
    pub fn new() -> Self {
        FieldCatalog::default()
    }

    pub fn insert(&mut self, interval: impl Into<String>, fields: Vec<String>) {
        self.buckets.insert(interval.into(), fields);
    }

    pub fn bucket(&self, interval: &str) -> Option<&[String]> {
        self.buckets.get(interval).map(|v| v.as_slice())
    }

    pub fn contains(&self, interval: &str, name: &str) -> bool {
        self.buckets
            .get(interval)
            .map(|fields| fields.iter().any(|f| f == name))
            .unwrap_or(false)
    }

    pub fn interval_names(&self) -> Vec<&str> {
        self.buckets.keys().map(|k| k.as_str()).collect()
    }

    /// Catalog buckets that name real intervals, finest first.
    pub fn intervals(&self) -> Vec<Interval> {
        let mut found: Vec<Interval> = self
            .buckets
            .keys()
            .filter_map(|k| k.parse().ok())
            .collect();
        found.sort();
        found
    }

    /// Resolve a field token to its (interval, name) pair.
    ///
    /// A dotted token names its bucket exactly. A bare token searches the
    /// `""` bucket, then the active interval's bucket, then the remaining
    /// interval buckets finest-first.
    pub fn resolve(
        &self,
        token: &str,
        active: Option<Interval>,
    ) -> Result<(String, String), BarscriptError> {
        if let Some((interval, name)) = token.split_once('.') {
            if self.bucket(interval).is_none() {
                // an unknown prefix is an interval error when it at least
                // looks like one, otherwise an unknown field
                return if interval.parse::<Interval>().is_ok() {
                    Err(BarscriptError::UnknownInterval {
                        name: interval.to_string(),
                        valid: self.interval_names().iter().map(|s| s.to_string()).collect(),
                    })
                } else {
                    Err(self.unknown_field(token))
                };
            }
            if self.contains(interval, name) {
                return Ok((interval.to_string(), name.to_string()));
            }
            return Err(self.unknown_field(token));
        }

        if self.contains("", token) {
            return Ok((String::new(), token.to_string()));
        }
        if let Some(active) = active {
            if self.contains(active.value(), token) {
                return Ok((active.value().to_string(), token.to_string()));
            }
        }
        for interval in self.intervals() {
            if self.contains(interval.value(), token) {
                return Ok((interval.value().to_string(), token.to_string()));
            }
        }
        Err(self.unknown_field(token))
    }

    fn unknown_field(&self, token: &str) -> BarscriptError {
        let mut valid: Vec<String> = self
            .buckets
            .iter()
            .flat_map(|(interval, fields)| {
                fields.iter().map(move |f| {
                    if interval.is_empty() {
                        f.clone()
                    } else {
                        format!("{interval}.{f}")
                    }
                })
            })
            .collect();
        valid.sort();
        BarscriptError::UnknownField {
            name: token.to_string(),
            valid,
        }
    }
}

impl<I, F> FromIterator<(I, Vec<F>)> for FieldCatalog
where
    I: Into<String>,
    F: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (I, Vec<F>)>>(iter: T) -> Self {
        let mut catalog = FieldCatalog::new();
        for (interval, fields) in iter {
            catalog.insert(interval, fields.into_iter().map(Into::into).collect());
        }
        catalog
    }
}
