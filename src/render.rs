//! Turns processed template HTML into a live form.
//!
//! Rendering is a pure function of three inputs: the HTML, the field
//! configuration and the current values. Every placeholder becomes a bound
//! control; every other byte of the document passes through unchanged.

use crate::field::{FieldType, FieldValue};
use crate::field_config::{FieldConfigStore, ResolvedField};
use crate::formula::{ERROR_VALUE, MAX_DECIMAL_PLACES};
use crate::placeholder::FieldDescriptor;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write;

/// Template stylesheet owned by one render session. It is emitted next to
/// the form it belongs to and goes away with the session.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScopedStyle {
    pub scope: String,
    pub css: String,
}

impl ScopedStyle {
    pub fn new(scope: &str, css: &str) -> Self {
        ScopedStyle {
            scope: scope.to_string(),
            css: css.to_string(),
        }
    }

    pub fn to_html(&self) -> String {
        format!(
            "<style data-form-scope=\"{}\">{}</style>",
            escape_html(&self.scope),
            self.css.replace("</style", "<\\/style")
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Control {
    Text,
    Number { step: String },
    Date,
    Checkbox { checked: bool },
    Select { options: Vec<String> },
    Image { src: Option<String> },
    Calculated,
}

/// A placeholder replaced by an input bound to form state.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BoundField {
    pub field: ResolvedField,
    pub control: Control,
    pub value: FieldValue,
    pub error: Option<String>,
    pub background: Option<String>,
}

impl BoundField {
    pub fn is_editable(&self) -> bool {
        !self.field.field_type.is_calculation()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "node", content = "content", rename_all = "lowercase")]
pub enum RenderNode {
    Markup(String),
    Field(BoundField),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RenderedForm {
    pub scope: String,
    pub style: Option<ScopedStyle>,
    pub nodes: Vec<RenderNode>,
}

/// Current values and per-field evaluation errors, keyed by instance key.
#[derive(Clone, Copy, Debug)]
pub struct FormState<'a> {
    pub values: &'a HashMap<String, FieldValue>,
    pub errors: &'a HashMap<String, String>,
}

fn step_for(decimal_places: Option<u32>) -> String {
    match decimal_places {
        None | Some(0) => "1".to_string(),
        Some(d) => {
            let d = d.min(MAX_DECIMAL_PLACES) as usize;
            format!("0.{}1", "0".repeat(d - 1))
        }
    }
}

fn bind(field: ResolvedField, state: &FormState) -> BoundField {
    let mut value = state
        .values
        .get(&field.instance_key)
        .cloned()
        .unwrap_or_else(|| field.default_value.clone());
    let error = state.errors.get(&field.instance_key).cloned();
    if error.is_some() {
        value = FieldValue::from(ERROR_VALUE);
    }

    let control = match field.field_type {
        FieldType::Text => Control::Text,
        FieldType::Number => Control::Number {
            step: step_for(field.decimal_places),
        },
        FieldType::Date => Control::Date,
        FieldType::Checkbox => Control::Checkbox {
            checked: matches!(value, FieldValue::Bool(true))
                || matches!(&value, FieldValue::Text(s) if s == "true" || s == "on"),
        },
        FieldType::Dropdown => Control::Select {
            options: field.options.clone().unwrap_or_default(),
        },
        FieldType::Image => Control::Image {
            src: Some(value.to_string()).filter(|s| !s.trim().is_empty()),
        },
        FieldType::Calculation => Control::Calculated,
    };

    let background = match (field.field_type, &field.thresholds, value.as_number()) {
        (FieldType::Number | FieldType::Calculation, Some(t), Some(n)) => {
            t.color_for(n).map(|c| c.to_string())
        }
        _ => None,
    };

    BoundField {
        field,
        control,
        value,
        error,
        background,
    }
}

/// Renders `html`, replacing each descriptor's span with its bound control.
///
/// `descriptors` must come from parsing this same `html`.
pub fn render_form(
    html: &str,
    descriptors: &[FieldDescriptor],
    configs: &FieldConfigStore,
    state: FormState,
    scope: &str,
    style: Option<&ScopedStyle>,
) -> RenderedForm {
    let mut nodes = Vec::with_capacity(descriptors.len() * 2 + 1);
    let mut last = 0;

    for descriptor in descriptors {
        let span = &descriptor.span;
        if span.start < last || span.end > html.len() {
            continue;
        }
        if span.start > last {
            nodes.push(RenderNode::Markup(html[last..span.start].to_string()));
        }
        nodes.push(RenderNode::Field(bind(configs.resolve(descriptor), &state)));
        last = span.end;
    }
    if last < html.len() {
        nodes.push(RenderNode::Markup(html[last..].to_string()));
    }

    RenderedForm {
        scope: scope.to_string(),
        style: style.cloned(),
        nodes,
    }
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn common_attrs(bound: &BoundField) -> String {
    let f = &bound.field;
    let mut attrs = format!(
        "name=\"{}\" data-base-key=\"{}\" data-ref=\"{}\" title=\"{}\"",
        escape_html(&f.instance_key),
        escape_html(&f.base_key),
        f.reference,
        escape_html(&f.label)
    );
    if let Some(bg) = &bound.background {
        let _ = write!(attrs, " style=\"background-color:{}\"", escape_html(bg));
    }
    attrs
}

impl BoundField {
    pub fn to_html(&self) -> String {
        let attrs = common_attrs(self);
        let value = escape_html(&self.value.to_string());
        match &self.control {
            Control::Text => format!("<input type=\"text\" class=\"cs-field\" {} value=\"{}\">", attrs, value),
            Control::Number { step } => format!(
                "<input type=\"number\" class=\"cs-field\" step=\"{}\" {} value=\"{}\">",
                step, attrs, value
            ),
            Control::Date => format!("<input type=\"date\" class=\"cs-field\" {} value=\"{}\">", attrs, value),
            Control::Checkbox { checked } => format!(
                "<input type=\"checkbox\" class=\"cs-field\" {}{}>",
                attrs,
                if *checked { " checked" } else { "" }
            ),
            Control::Select { options } => {
                let current = self.value.to_string();
                let mut out = format!("<select class=\"cs-field\" {}><option value=\"\"></option>", attrs);
                for option in options {
                    let _ = write!(
                        out,
                        "<option value=\"{0}\"{1}>{0}</option>",
                        escape_html(option),
                        if *option == current { " selected" } else { "" }
                    );
                }
                out.push_str("</select>");
                out
            }
            Control::Image { src: Some(src) } => format!(
                "<img class=\"cs-field cs-image\" {} src=\"{}\" alt=\"{}\">",
                attrs,
                escape_html(src),
                escape_html(&self.field.label)
            ),
            Control::Image { src: None } => format!(
                "<input type=\"file\" accept=\"image/*\" class=\"cs-field cs-image\" {}>",
                attrs
            ),
            Control::Calculated => match &self.error {
                Some(err) => format!(
                    "<input type=\"text\" readonly class=\"cs-field cs-calculated cs-error\" {} value=\"{}\"><span class=\"cs-error-indicator\" title=\"{}\">!</span>",
                    attrs,
                    value,
                    escape_html(err)
                ),
                None => format!(
                    "<input type=\"text\" readonly class=\"cs-field cs-calculated\" {} value=\"{}\">",
                    attrs, value
                ),
            },
        }
    }
}

impl RenderedForm {
    pub fn fields(&self) -> impl Iterator<Item = &BoundField> {
        self.nodes.iter().filter_map(|n| match n {
            RenderNode::Field(f) => Some(f),
            RenderNode::Markup(_) => None,
        })
    }

    pub fn field(&self, instance_key: &str) -> Option<&BoundField> {
        self.fields().find(|f| f.field.instance_key == instance_key)
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        if let Some(style) = &self.style {
            out.push_str(&style.to_html());
        }
        let _ = write!(
            out,
            "<div class=\"cs-form\" data-form-scope=\"{}\">",
            escape_html(&self.scope)
        );
        for node in &self.nodes {
            match node {
                RenderNode::Markup(markup) => out.push_str(markup),
                RenderNode::Field(field) => out.push_str(&field.to_html()),
            }
        }
        out.push_str("</div>");
        out
    }
}
