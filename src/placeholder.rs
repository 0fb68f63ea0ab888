//! Placeholder grammar for spreadsheet-exported checksheets.
//!
//! A placeholder looks like `{{type:label[:decimals][:options]}}`. The
//! segments are positional: a digit-only segment right after the label is
//! always the decimal precision, whatever the type, and the segment after
//! that is always the option list.

use crate::field::FieldType;
use crate::formula::{MAX_DECIMAL_PLACES, Reference};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Range;

lazy_static! {
    static ref PLACEHOLDER_REGEX: Regex =
        Regex::new(r"\{\{(\w+):([^:}]+)(?::(\d*))?(?::([^}]*))?\}\}").unwrap();
    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();
}

/// Base key for a label that is empty after trimming. Labels never contain
/// `:`, so no real label can produce it.
pub const UNLABELED_BASE_KEY: &str = "field:unlabeled";

/// One placeholder occurrence found in a document.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct FieldDescriptor {
    /// Type token as written, lowercased.
    pub raw_type: String,
    pub field_type: FieldType,
    pub label: String,
    pub decimal_places: Option<u32>,
    pub options: Option<Vec<String>>,
    /// Stable across re-parses while the label is unchanged.
    pub base_key: String,
    /// Unique within one parse pass only. Never persist this.
    pub instance_key: String,
    /// `S{sheet}F{ordinal}` address used by formulas.
    pub reference: Reference,
    /// Byte range of the placeholder in the parsed document.
    pub span: Range<usize>,
    /// The placeholder text exactly as it appears in the document.
    pub original_html: String,
}

/// Derives the label-based correlation key. Total over all strings.
pub fn base_key_for_label(label: &str) -> String {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return UNLABELED_BASE_KEY.to_string();
    }
    format!("field_{}", WHITESPACE_REGEX.replace_all(trimmed, "_"))
}

/// Extracts the label from a single placeholder string such as
/// `{{number:Weight:3}}`.
pub fn embedded_label(placeholder: &str) -> Option<String> {
    PLACEHOLDER_REGEX
        .captures(placeholder)
        .and_then(|c| c.get(2))
        .map(|m| m.as_str().trim().to_string())
}

fn parse_options(raw: &str) -> Vec<String> {
    raw.split(',').map(|o| o.trim().to_string()).collect()
}

// Digit runs too long for a u32 still ask for the most precision allowed.
fn parse_decimals(digits: &str) -> Option<u32> {
    match digits.parse::<u32>() {
        Ok(n) => Some(n.min(MAX_DECIMAL_PLACES)),
        Err(_) if digits.bytes().all(|b| b.is_ascii_digit()) => Some(MAX_DECIMAL_PLACES),
        Err(_) => None,
    }
}

/// Scans `html` and returns every placeholder in document order.
///
/// Instance keys are numbered 1.. per call and references are assigned
/// `S{sheet}F{n}` in the same order.
pub fn parse_placeholders(html: &str, sheet: u32) -> Vec<FieldDescriptor> {
    let mut fields = Vec::new();

    for (idx, captures) in PLACEHOLDER_REGEX.captures_iter(html).enumerate() {
        let whole = match captures.get(0) {
            Some(m) => m,
            None => continue,
        };
        let raw_type = captures
            .get(1)
            .map(|m| m.as_str().to_lowercase())
            .unwrap_or_default();
        let label = captures
            .get(2)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        let decimal_places = captures
            .get(3)
            .map(|m| m.as_str())
            .filter(|d| !d.is_empty())
            .and_then(parse_decimals);
        let options = captures
            .get(4)
            .map(|m| parse_options(m.as_str()))
            .filter(|opts| opts.iter().any(|o| !o.is_empty()));

        let ordinal = (idx + 1) as u32;
        let base_key = base_key_for_label(&label);
        let instance_key = format!("{}_{}", base_key, ordinal);

        fields.push(FieldDescriptor {
            field_type: FieldType::from_name(&raw_type),
            raw_type,
            label,
            decimal_places,
            options,
            instance_key,
            base_key,
            reference: Reference::new(sheet, ordinal),
            span: whole.range(),
            original_html: whole.as_str().to_string(),
        });
    }

    debug!("parsed {} placeholder(s) on sheet {}", fields.len(), sheet);
    fields
}
