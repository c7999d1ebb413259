//! Compiled calculations.
//!
//! A calculation is an evaluation closure over a bar sequence plus the
//! metadata the compiler needs to compose it: which fields it reads, how
//! much trailing history it wants, and whether any contained function
//! declared non-idempotent behavior.

use crate::domain::bar::Bar;
use crate::domain::error::BarscriptError;
use crate::domain::value::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

pub type EvalFn = Arc<dyn Fn(&[Bar]) -> Result<Value, BarscriptError> + Send + Sync>;

/// A compiled evaluator: bar sequence in, scalar out.
///
/// Immutable after construction; cloning shares the closure. Evaluating with
/// fewer than `warm_up_length + 1` bars is legal and degrades to whatever the
/// available history supports (ultimately [`Value::Nil`]).
#[derive(Clone)]
pub struct Calculation {
    eval: EvalFn,
    pub fields: BTreeSet<String>,
    pub warm_up_length: usize,
    pub side_effect: bool,
}

impl Calculation {
    pub fn new(eval: EvalFn) -> Self {
        Calculation {
            eval,
            fields: BTreeSet::new(),
            warm_up_length: 0,
            side_effect: false,
        }
    }

    pub fn constant(value: Value) -> Self {
        Calculation::new(Arc::new(move |_| Ok(value.clone())))
    }

    pub fn with_fields(mut self, fields: BTreeSet<String>) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.fields.insert(field.into());
        self
    }

    pub fn with_warm_up(mut self, warm_up_length: usize) -> Self {
        self.warm_up_length = warm_up_length;
        self
    }

    pub fn with_side_effect(mut self, side_effect: bool) -> Self {
        self.side_effect = side_effect;
        self
    }

    /// Union the metadata of `children` into this calculation: fields are
    /// unioned, warm-up is the max, side effects propagate.
    pub fn inherit(mut self, children: &[Calculation]) -> Self {
        for child in children {
            self.fields.extend(child.fields.iter().cloned());
            self.warm_up_length = self.warm_up_length.max(child.warm_up_length);
            self.side_effect = self.side_effect || child.side_effect;
        }
        self
    }

    pub fn evaluate(&self, bars: &[Bar]) -> Result<Value, BarscriptError> {
        (self.eval)(bars)
    }

    /// The value this calculation takes with no bars at all, when it has one.
    /// Literal-constraint checks use this: constants succeed, anything that
    /// needs data does not.
    pub fn literal_value(&self) -> Option<Value> {
        match self.evaluate(&[]) {
            Ok(Value::Nil) | Err(_) => None,
            Ok(v) => Some(v),
        }
    }
}

impl fmt::Debug for Calculation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Calculation")
            .field("fields", &self.fields)
            .field("warm_up_length", &self.warm_up_length)
            .field("side_effect", &self.side_effect)
            .finish()
    }
}
