//! Calculation compiler.
//!
//! Walks expression trees, resolves field references against the catalog,
//! and binds call nodes through three resolution tiers in a fixed order:
//! common (pure) functions, lookback functions, then per-interval
//! indicators. Produces [`Calculation`] closures annotated with required
//! fields, warm-up length and side-effect flag.

use crate::adapters::builtin_indicators::BuiltinIndicators;
use crate::domain::ast::Expr;
use crate::domain::calc::Calculation;
use crate::domain::catalog::FieldCatalog;
use crate::domain::common_fns;
use crate::domain::error::BarscriptError;
use crate::domain::expr_parser;
use crate::domain::interval::Interval;
use crate::domain::lookback;
use crate::domain::session::SessionOptions;
use crate::domain::value::Value;
use crate::ports::indicator_port::IndicatorLibrary;
use log::{debug, trace};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub type WarmUpMap = BTreeMap<String, BTreeMap<String, Calculation>>;

/// The expression engine: owns the indicator library and compiles text into
/// calculations against a field catalog and session descriptor.
pub struct Engine {
    indicators: Box<dyn IndicatorLibrary>,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Engine {
            indicators: Box::new(BuiltinIndicators),
        }
    }

    pub fn with_indicators(indicators: Box<dyn IndicatorLibrary>) -> Self {
        Engine { indicators }
    }

    /// Compile a single expression. Zero or several top-level expressions are
    /// an error.
    pub fn parse(
        &self,
        text: &str,
        catalog: &FieldCatalog,
        options: &SessionOptions,
    ) -> Result<Calculation, BarscriptError> {
        let expr = expr_parser::parse_expression(text)?;
        let expr = strip_as(expr);
        self.compile(&expr, catalog, options)
    }

    /// Split a conjunctive expression into per-interval criteria.
    ///
    /// Conjuncts group under their minimal required interval (the finest
    /// one they reference). Groups are emitted finest first; each coarser
    /// group's list is prefixed with the AND-fold of every finer conjunct,
    /// so evaluating the outermost interval's entries decides the whole
    /// conjunction.
    pub fn parse_criteria_map(
        &self,
        text: &str,
        catalog: &FieldCatalog,
        options: &SessionOptions,
    ) -> Result<BTreeMap<Interval, Vec<Calculation>>, BarscriptError> {
        let expr = strip_as(expr_parser::parse_expression(text)?);
        let mut conjuncts = Vec::new();
        flatten_and(&expr, &mut conjuncts);

        let mut groups: BTreeMap<Interval, Vec<Expr>> = BTreeMap::new();
        for conjunct in conjuncts {
            let intervals = self.referenced_intervals(&conjunct, catalog, options)?;
            let primary = intervals
                .iter()
                .find_map(|name| name.parse::<Interval>().ok())
                .unwrap_or(options.interval);
            groups.entry(primary).or_default().push(conjunct);
        }

        let mut result: BTreeMap<Interval, Vec<Calculation>> = BTreeMap::new();
        let mut carried: Vec<Expr> = Vec::new();
        for (interval, exprs) in groups {
            let scoped = options.clone().with_interval(interval);
            let mut entry = Vec::new();
            if !carried.is_empty() {
                let folded = and_fold(&carried);
                entry.push(self.compile(&folded, catalog, &scoped)?);
            }
            for expr in &exprs {
                entry.push(self.compile(expr, catalog, &scoped)?);
            }
            carried.extend(exprs);
            result.insert(interval, entry);
        }
        Ok(result)
    }

    /// Compile a comma-separated list into ordered (column name, calculation)
    /// pairs. Names come from an `AS` clause or from the serialized
    /// expression with a single common interval prefix stripped.
    pub fn parse_columns_map(
        &self,
        text: &str,
        catalog: &FieldCatalog,
        options: &SessionOptions,
    ) -> Result<Vec<(String, Calculation)>, BarscriptError> {
        let exprs = expr_parser::parse_expressions(text)?;
        let mut columns = Vec::with_capacity(exprs.len());
        for expr in exprs {
            let (inner, name) = match expr {
                Expr::As(inner, name) => (*inner, name),
                other => {
                    let intervals = self.referenced_intervals(&other, catalog, options)?;
                    let name = match single_real_interval(&intervals) {
                        Some(interval) => other.serialize_unqualified(&interval),
                        None => other.serialize(),
                    };
                    (other, name)
                }
            };
            let calc = self.compile(&inner, catalog, options)?;
            columns.push((name, calc));
        }
        Ok(columns)
    }

    /// Collect every sub-expression resolving to exactly one interval with a
    /// positive warm-up, keyed interval name to serialized form. The
    /// data-fetch layer sizes its history retrieval from this.
    pub fn parse_warm_up_map(
        &self,
        text: &str,
        catalog: &FieldCatalog,
        options: &SessionOptions,
    ) -> Result<WarmUpMap, BarscriptError> {
        let expr = strip_as(expr_parser::parse_expression(text)?);
        // surface compile errors for the whole expression first
        self.compile(&expr, catalog, options)?;

        let mut nodes = Vec::new();
        expr.walk(&mut nodes);

        let mut merged = WarmUpMap::new();
        for node in nodes {
            if !matches!(node, Expr::Call(_, _)) {
                continue;
            }
            let intervals = self.referenced_intervals(node, catalog, options)?;
            if intervals.len() != 1 {
                continue;
            }
            let interval = intervals[0].clone();
            let scoped = match interval.parse::<Interval>() {
                Ok(parsed) => options.clone().with_interval(parsed),
                Err(_) => options.clone(),
            };
            // sub-expressions that only compile in a wider context are not
            // retrievable columns; skip them
            let Ok(calc) = self.compile(node, catalog, &scoped) else {
                continue;
            };
            if calc.warm_up_length == 0 {
                continue;
            }
            let serialized = node.serialize_unqualified(&interval);
            let mut single = WarmUpMap::new();
            single
                .entry(interval)
                .or_default()
                .insert(serialized, calc);
            merged = merge_warm_up_maps(merged, single);
        }
        Ok(merged)
    }

    /// Compile one AST node.
    pub fn compile(
        &self,
        expr: &Expr,
        catalog: &FieldCatalog,
        options: &SessionOptions,
    ) -> Result<Calculation, BarscriptError> {
        match expr {
            Expr::Number(n) => Ok(Calculation::constant(Value::Number(*n))),
            Expr::Text(s) => Ok(Calculation::constant(Value::Text(s.clone()))),
            Expr::As(inner, _) => self.compile(inner, catalog, options),
            Expr::Field(token) => {
                let (interval, name) = catalog.resolve(token, Some(options.interval))?;
                Ok(field_reader(interval, name))
            }
            Expr::Call(name, args) => self.compile_call(expr, name, args, catalog, options),
        }
    }

    fn compile_call(
        &self,
        expr: &Expr,
        name: &str,
        args: &[Expr],
        catalog: &FieldCatalog,
        options: &SessionOptions,
    ) -> Result<Calculation, BarscriptError> {
        let intervals = self.referenced_intervals(expr, catalog, options)?;

        // memoized-field shortcut: the whole call is available precomputed
        if let [only] = intervals.as_slice() {
            let serialized = expr.serialize_unqualified(only);
            if catalog.contains(only, &serialized) {
                debug!("using precomputed {only}.{serialized}");
                return Ok(field_reader(only.clone(), serialized));
            }
        }

        // propagate a single resolved interval into the child options when
        // the catalog actually has a bucket for it
        let scoped = match single_real_interval(&intervals) {
            Some(interval_name) if catalog.bucket(&interval_name).is_some() => {
                match interval_name.parse::<Interval>() {
                    Ok(parsed) => options.clone().with_interval(parsed),
                    Err(_) => options.clone(),
                }
            }
            _ => options.clone(),
        };

        let compiled: Vec<Calculation> = args
            .iter()
            .map(|arg| self.compile(arg, catalog, &scoped))
            .collect::<Result<_, _>>()?;

        if let Some(factory) = common_fns::lookup(name) {
            trace!("{name} resolved as a common function");
            return factory(&scoped, compiled);
        }

        if let Some(builder) = lookback::lookup(name) {
            trace!("{name} resolved as a lookback function");
            if intervals.len() != 1 {
                return Err(BarscriptError::IntervalConflict {
                    function: name.to_string(),
                    intervals,
                });
            }
            return builder(&scoped, compiled);
        }

        if let Some((interval_name, indicator_name)) = name.split_once('.') {
            if let Ok(stated) = interval_name.parse::<Interval>() {
                if let Some(def) = self.indicators.lookup(stated, indicator_name) {
                    trace!("{name} resolved as an indicator function");
                    return self.compile_indicator(name, stated, def, compiled, catalog, &scoped);
                }
            }
        }

        Err(BarscriptError::UnknownFunction {
            name: name.to_string(),
            suggestions: self.suggestions(name, catalog),
        })
    }

    fn compile_indicator(
        &self,
        name: &str,
        stated: Interval,
        def: crate::ports::indicator_port::IndicatorDef,
        compiled: Vec<Calculation>,
        catalog: &FieldCatalog,
        options: &SessionOptions,
    ) -> Result<Calculation, BarscriptError> {
        if options.interval != stated {
            return Err(BarscriptError::IntervalConflict {
                function: name.to_string(),
                intervals: vec![
                    options.interval.value().to_string(),
                    stated.value().to_string(),
                ],
            });
        }

        let params: Vec<Value> = compiled
            .iter()
            .map(|calc| calc.literal_value())
            .collect::<Option<_>>()
            .ok_or_else(|| BarscriptError::NotLiteral {
                function: name.to_string(),
            })?;

        let missing: Vec<String> = def
            .fields
            .iter()
            .filter(|field| !catalog.contains(stated.value(), field))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(BarscriptError::MissingFields {
                indicator: name.to_string(),
                interval: stated.value().to_string(),
                fields: missing,
            });
        }

        let warm_up = def.warm_up_length;
        let eval = def.eval.clone();
        let interval_key = stated.value().to_string();
        let calc = Calculation::new(Arc::new(move |bars| {
            let start = bars.len().saturating_sub(warm_up + 1);
            let column: Vec<_> = bars[start..]
                .iter()
                .map(|bar| bar.column(&interval_key))
                .collect();
            eval(&params, &column)
        }))
        .with_warm_up(warm_up)
        .with_fields(def.fields.iter().cloned().collect());
        Ok(calc)
    }

    /// The interval names referenced transitively by the field leaves of an
    /// expression, deduplicated and sorted finest first.
    fn referenced_intervals(
        &self,
        expr: &Expr,
        catalog: &FieldCatalog,
        options: &SessionOptions,
    ) -> Result<Vec<String>, BarscriptError> {
        let mut found = BTreeSet::new();
        self.collect_intervals(expr, catalog, options, &mut found)?;
        let mut names: Vec<String> = found.into_iter().collect();
        names.sort_by_key(|name| {
            name.parse::<Interval>()
                .map(|i| (1, i as i64, String::new()))
                .unwrap_or_else(|_| {
                    if name.is_empty() {
                        (0, 0, String::new())
                    } else {
                        (2, 0, name.clone())
                    }
                })
        });
        Ok(names)
    }

    fn collect_intervals(
        &self,
        expr: &Expr,
        catalog: &FieldCatalog,
        options: &SessionOptions,
        found: &mut BTreeSet<String>,
    ) -> Result<(), BarscriptError> {
        match expr {
            Expr::Field(token) => {
                let (interval, _) = catalog.resolve(token, Some(options.interval))?;
                found.insert(interval);
            }
            Expr::Call(_, args) => {
                for arg in args {
                    self.collect_intervals(arg, catalog, options, found)?;
                }
            }
            Expr::As(inner, _) => self.collect_intervals(inner, catalog, options, found)?,
            _ => {}
        }
        Ok(())
    }

    /// The five lexicographic neighbors on each side of `name` among every
    /// known function name, including synthesized `interval.indicator`
    /// combinations.
    fn suggestions(&self, name: &str, catalog: &FieldCatalog) -> Vec<String> {
        let mut all: Vec<String> = common_fns::names()
            .iter()
            .chain(lookback::names().iter())
            .map(|s| s.to_string())
            .collect();
        for interval in catalog.intervals() {
            for indicator in self.indicators.names(interval) {
                all.push(format!("{}.{}", interval.value(), indicator));
            }
        }
        all.sort();
        all.dedup();
        let pos = all.partition_point(|candidate| candidate.as_str() < name);
        let lo = pos.saturating_sub(5);
        let hi = (pos + 5).min(all.len());
        all[lo..hi].to_vec()
    }
}

fn strip_as(expr: Expr) -> Expr {
    match expr {
        Expr::As(inner, _) => *inner,
        other => other,
    }
}

fn field_reader(interval: String, name: String) -> Calculation {
    let field = name.clone();
    let calc = Calculation::new(Arc::new(move |bars| {
        Ok(bars
            .last()
            .and_then(|bar| bar.get(&interval, &field))
            .cloned()
            .unwrap_or(Value::Nil))
    }));
    calc.with_field(name)
}

fn flatten_and(expr: &Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::Call(name, args) if name == "AND" => {
            for arg in args {
                flatten_and(arg, out);
            }
        }
        other => out.push(other.clone()),
    }
}

fn and_fold(exprs: &[Expr]) -> Expr {
    if exprs.len() == 1 {
        exprs[0].clone()
    } else {
        Expr::Call("AND".to_string(), exprs.to_vec())
    }
}

fn single_real_interval(intervals: &[String]) -> Option<String> {
    match intervals {
        [only] if !only.is_empty() => Some(only.clone()),
        _ => None,
    }
}

/// Union two warm-up maps into a new one, merging nested maps recursively.
pub fn merge_warm_up_maps(a: WarmUpMap, b: WarmUpMap) -> WarmUpMap {
    let mut out = a;
    for (interval, inner) in b {
        out.entry(interval).or_default().extend(inner);
    }
    out
}
