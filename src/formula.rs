//! Calculation-field formulas.
//!
//! Formulas address other fields as `S<sheet>F<field>` and may use
//! same-sheet ranges (`S1F4:S1F13`), one of the aggregates
//! SUM/AVERAGE/MIN/MAX/COUNT wrapping the whole formula, or plain
//! `+ - * /` arithmetic with parentheses.

pub mod expr;

use crate::error::FormulaError;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

lazy_static! {
    static ref FUNC_REGEX: Regex = Regex::new(r"(?i)^(SUM|AVERAGE|MIN|MAX|COUNT)\((.*)\)$").unwrap();
    static ref REFERENCE_REGEX: Regex = Regex::new(r"(?i)^S(\d+)F(\d+)$").unwrap();
    static ref RANGE_REGEX: Regex = Regex::new(r"(?i)^S(\d+)F(\d+):S(\d+)F(\d+)$").unwrap();
    static ref RANGE_TOKEN_REGEX: Regex = Regex::new(r"(?i)S\d+F\d+:S\d+F\d+").unwrap();
    static ref REFERENCE_TOKEN_REGEX: Regex = Regex::new(r"(?i)S\d+F\d+").unwrap();
}

/// Value shown in place of a calculation that failed to evaluate.
pub const ERROR_VALUE: &str = "Error";

/// Address of one field's value: sheet number and field number, both 1-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    pub sheet: u32,
    pub field: u32,
}

impl Reference {
    pub fn new(sheet: u32, field: u32) -> Self {
        Reference { sheet, field }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}F{}", self.sheet, self.field)
    }
}

impl FromStr for Reference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_reference(s).ok_or_else(|| format!("invalid field reference '{}'", s))
    }
}

impl Serialize for Reference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Aggregate {
    Sum,
    Average,
    Min,
    Max,
    Count,
}

impl Aggregate {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_uppercase().as_str() {
            "SUM" => Some(Aggregate::Sum),
            "AVERAGE" => Some(Aggregate::Average),
            "MIN" => Some(Aggregate::Min),
            "MAX" => Some(Aggregate::Max),
            "COUNT" => Some(Aggregate::Count),
            _ => None,
        }
    }

    /// Applies the aggregate to already-filtered numeric values. Every
    /// aggregate of an empty set is 0.
    pub fn apply(&self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        match self {
            Aggregate::Sum => values.iter().sum(),
            Aggregate::Average => values.iter().sum::<f64>() / values.len() as f64,
            Aggregate::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Aggregate::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Aggregate::Count => values.len() as f64,
        }
    }
}

/// A field as known to the evaluator: its address and last-known value.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldInfo {
    pub reference: Reference,
    pub value: Option<String>,
}

fn capture_u32(captures: &Captures, idx: usize) -> Option<u32> {
    captures.get(idx)?.as_str().parse().ok()
}

pub fn parse_reference(s: &str) -> Option<Reference> {
    let captures = REFERENCE_REGEX.captures(s.trim())?;
    Some(Reference::new(
        capture_u32(&captures, 1)?,
        capture_u32(&captures, 2)?,
    ))
}

/// Parses `S<n>F<a>:S<n>F<b>`. Ranges whose endpoints are on different
/// sheets are rejected.
pub fn parse_range(s: &str) -> Option<(Reference, Reference)> {
    let captures = RANGE_REGEX.captures(s.trim())?;
    let start = Reference::new(capture_u32(&captures, 1)?, capture_u32(&captures, 2)?);
    let end = Reference::new(capture_u32(&captures, 3)?, capture_u32(&captures, 4)?);
    if start.sheet != end.sheet {
        return None;
    }
    Some((start, end))
}

/// Every reference from `start` to `end` inclusive. Empty when the range is
/// written backwards.
pub fn expand_range(start: Reference, end: Reference) -> Vec<Reference> {
    if start.sheet != end.sheet || start.field > end.field {
        return Vec::new();
    }
    (start.field..=end.field)
        .map(|field| Reference::new(start.sheet, field))
        .collect()
}

/// Resolves a reference to a number.
///
/// The live value wins unless it is missing or zero, in which case the
/// field's last-known value is tried. A live zero with no usable last-known
/// value stays zero.
pub fn resolve_reference(
    reference: Reference,
    values: &HashMap<Reference, f64>,
    fields: &[FieldInfo],
) -> Option<f64> {
    let live = values.get(&reference).copied().filter(|v| v.is_finite());
    if let Some(v) = live {
        if v != 0.0 {
            return Some(v);
        }
    }

    let fallback = fields
        .iter()
        .find(|f| f.reference == reference)
        .and_then(|f| f.value.as_deref())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite());

    fallback.or(live)
}

/// Largest precision a field may ask for. Larger requests are clamped.
pub const MAX_DECIMAL_PLACES: u32 = 20;

/// Formats a result to a fixed number of decimals. Zero decimals rounds
/// half up and prints a bare integer.
pub fn format_number(value: f64, decimal_places: u32) -> String {
    let decimal_places = decimal_places.min(MAX_DECIMAL_PLACES);
    if decimal_places == 0 {
        let rounded = (value + 0.5).floor();
        if rounded == 0.0 {
            return "0".to_string();
        }
        return format!("{}", rounded);
    }
    format!("{:.*}", decimal_places as usize, value)
}

fn strip_whitespace(formula: &str) -> String {
    formula.chars().filter(|c| !c.is_whitespace()).collect()
}

// Whole-formula aggregate, e.g. SUM(S1F1:S1F3, S1F5). Returns None when the
// formula is not a single aggregate call over references, ranges and numbers.
fn evaluate_function(
    formula: &str,
    values: &HashMap<Reference, f64>,
    fields: &[FieldInfo],
) -> Option<f64> {
    let captures = FUNC_REGEX.captures(formula)?;
    let aggregate = Aggregate::from_name(captures.get(1)?.as_str())?;
    let args = captures.get(2)?.as_str();

    let mut resolved = Vec::new();
    for arg in args.split(',').filter(|a| !a.is_empty()) {
        if let Some((start, end)) = parse_range(arg) {
            resolved.extend(
                expand_range(start, end)
                    .into_iter()
                    .map(|r| resolve_reference(r, values, fields)),
            );
        } else if let Some(reference) = parse_reference(arg) {
            resolved.push(resolve_reference(reference, values, fields));
        } else if let Ok(n) = arg.parse::<f64>() {
            resolved.push(Some(n));
        } else {
            return None;
        }
    }

    let numeric: Vec<f64> = resolved
        .into_iter()
        .flatten()
        .filter(|v| v.is_finite())
        .collect();
    Some(aggregate.apply(&numeric))
}

fn number_literal(value: f64) -> String {
    if value < 0.0 {
        format!("({})", value)
    } else {
        format!("{}", value)
    }
}

// Substitutes ranges and references with numbers and strips everything that
// is not part of the arithmetic grammar.
fn substitute_references(
    formula: &str,
    values: &HashMap<Reference, f64>,
    fields: &[FieldInfo],
) -> Result<String, FormulaError> {
    let mut with_ranges = String::with_capacity(formula.len());
    let mut last = 0;
    for m in RANGE_TOKEN_REGEX.find_iter(formula) {
        let (start, end) =
            parse_range(m.as_str()).ok_or_else(|| FormulaError::CrossSheetRange(m.as_str().to_string()))?;
        let terms: Vec<String> = expand_range(start, end)
            .into_iter()
            .map(|r| number_literal(resolve_reference(r, values, fields).unwrap_or(0.0)))
            .collect();
        with_ranges.push_str(&formula[last..m.start()]);
        if terms.is_empty() {
            with_ranges.push_str("(0)");
        } else {
            with_ranges.push('(');
            with_ranges.push_str(&terms.join("+"));
            with_ranges.push(')');
        }
        last = m.end();
    }
    with_ranges.push_str(&formula[last..]);

    let substituted = REFERENCE_TOKEN_REGEX.replace_all(&with_ranges, |caps: &Captures| {
        let value = parse_reference(&caps[0])
            .and_then(|r| resolve_reference(r, values, fields))
            .unwrap_or(0.0);
        number_literal(value)
    });

    Ok(substituted
        .chars()
        .filter(|c| c.is_ascii_digit() || "+-*/().".contains(*c))
        .collect())
}

/// Evaluates a calculation formula against the current field values and
/// formats the result to `decimal_places`.
pub fn evaluate(
    formula: &str,
    values: &HashMap<Reference, f64>,
    fields: &[FieldInfo],
    decimal_places: u32,
) -> Result<String, FormulaError> {
    let normalized = strip_whitespace(formula);
    if normalized.is_empty() {
        return Err(FormulaError::Empty);
    }

    let result = match evaluate_function(&normalized, values, fields) {
        Some(result) => result,
        None => {
            let expression = substitute_references(&normalized, values, fields)?;
            expr::evaluate(&expression)?
        }
    };

    if !result.is_finite() {
        return Err(FormulaError::NonFinite);
    }
    Ok(format_number(result, decimal_places))
}

/// Every reference a formula reads, with valid ranges expanded.
pub fn formula_references(formula: &str) -> BTreeSet<Reference> {
    let normalized = strip_whitespace(formula);
    let mut refs = BTreeSet::new();
    for m in RANGE_TOKEN_REGEX.find_iter(&normalized) {
        if let Some((start, end)) = parse_range(m.as_str()) {
            refs.extend(expand_range(start, end));
        }
    }
    for m in REFERENCE_TOKEN_REGEX.find_iter(&normalized) {
        if let Some(r) = parse_reference(m.as_str()) {
            refs.insert(r);
        }
    }
    refs
}

fn dependencies(formulas: &BTreeMap<Reference, String>, node: Reference) -> Vec<Reference> {
    formulas
        .get(&node)
        .map(|f| {
            formula_references(f)
                .into_iter()
                .filter(|r| formulas.contains_key(r))
                .collect()
        })
        .unwrap_or_default()
}

fn reaches_itself(formulas: &BTreeMap<Reference, String>, start: Reference) -> bool {
    let mut visited = BTreeSet::new();
    let mut stack = dependencies(formulas, start);

    while let Some(node) = stack.pop() {
        if node == start {
            return true;
        }
        if !visited.insert(node) {
            continue;
        }
        for dep in dependencies(formulas, node) {
            if !visited.contains(&dep) {
                stack.push(dep);
            }
        }
    }
    false
}

/// Calculation fields whose formula reaches back to themselves.
pub fn find_cycles(formulas: &BTreeMap<Reference, String>) -> BTreeSet<Reference> {
    formulas
        .keys()
        .copied()
        .filter(|r| reaches_itself(formulas, *r))
        .collect()
}

/// Orders calculation fields so that every field comes after the
/// calculation fields it reads. Cyclic fields are left out and returned
/// separately.
pub fn evaluation_order(
    formulas: &BTreeMap<Reference, String>,
) -> (Vec<Reference>, BTreeSet<Reference>) {
    let cyclic = find_cycles(formulas);
    let mut sorted = Vec::new();
    let mut visited = BTreeSet::new();

    for &root in formulas.keys() {
        if cyclic.contains(&root) || visited.contains(&root) {
            continue;
        }
        let mut work_stack = vec![root];
        while let Some(current) = work_stack.pop() {
            if visited.contains(&current) {
                continue;
            }
            let pending = dependencies(formulas, current)
                .into_iter()
                .find(|d| !visited.contains(d) && !cyclic.contains(d));
            match pending {
                Some(dep) => {
                    work_stack.push(current);
                    work_stack.push(dep);
                }
                None => {
                    visited.insert(current);
                    sorted.push(current);
                }
            }
        }
    }

    (sorted, cyclic)
}
