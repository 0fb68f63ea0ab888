use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of field kinds a placeholder can turn into.
///
/// Unknown type names never fail: [`FieldType::from_name`] maps them to
/// [`FieldType::Text`].
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Date,
    Checkbox,
    Dropdown,
    Image,
    Calculation,
}

impl FieldType {
    /// Registry declaration order, used for type-selection controls.
    pub const ALL: [FieldType; 7] = [
        FieldType::Text,
        FieldType::Number,
        FieldType::Date,
        FieldType::Checkbox,
        FieldType::Dropdown,
        FieldType::Image,
        FieldType::Calculation,
    ];

    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "number" => FieldType::Number,
            "date" => FieldType::Date,
            "checkbox" => FieldType::Checkbox,
            "dropdown" => FieldType::Dropdown,
            "image" => FieldType::Image,
            "calculation" => FieldType::Calculation,
            _ => FieldType::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Date => "date",
            FieldType::Checkbox => "checkbox",
            FieldType::Dropdown => "dropdown",
            FieldType::Image => "image",
            FieldType::Calculation => "calculation",
        }
    }

    pub fn is_calculation(&self) -> bool {
        matches!(self, FieldType::Calculation)
    }

    pub fn info(&self) -> FieldTypeDefinition {
        let label_editor = EditorField::text("label", "Label").required();
        let decimals_editor = EditorField::number("decimalPlaces", "Decimal places")
            .range(0.0, 10.0)
            .placeholder("0");

        let (label, default_value, variable_height, editor_fields) = match self {
            FieldType::Text => ("Text", FieldValue::empty(), true, vec![label_editor]),
            FieldType::Number => (
                "Number",
                FieldValue::empty(),
                false,
                vec![label_editor, decimals_editor],
            ),
            FieldType::Date => ("Date", FieldValue::empty(), false, vec![label_editor]),
            FieldType::Checkbox => (
                "Checkbox",
                FieldValue::Bool(false),
                false,
                vec![
                    label_editor,
                    EditorField::checkbox("defaultChecked", "Checked by default"),
                ],
            ),
            FieldType::Dropdown => (
                "Dropdown",
                FieldValue::empty(),
                false,
                vec![
                    label_editor,
                    EditorField::text("options", "Options (comma separated)")
                        .required()
                        .placeholder("OK, NG"),
                ],
            ),
            FieldType::Image => (
                "Image",
                FieldValue::empty(),
                true,
                vec![
                    label_editor,
                    EditorField::number("width", "Width (px)").range(1.0, 2000.0),
                    EditorField::number("height", "Height (px)").range(1.0, 2000.0),
                ],
            ),
            FieldType::Calculation => (
                "Calculation",
                FieldValue::empty(),
                false,
                vec![
                    label_editor,
                    EditorField::text("formula", "Formula")
                        .required()
                        .placeholder("SUM(S1F1:S1F3)"),
                    decimals_editor,
                ],
            ),
        };

        FieldTypeDefinition {
            field_type: *self,
            label,
            default_value,
            variable_height,
            editor_fields,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-entered (or derived) form value.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn empty() -> Self {
        FieldValue::Text(String::new())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::Number(n) => n.is_nan(),
            FieldValue::Bool(_) => false,
        }
    }

    /// Numeric reading used by formulas. Checkboxes count as 1/0.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) if n.is_finite() => Some(*n),
            FieldValue::Number(_) => None,
            FieldValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            FieldValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EditorWidget {
    Text,
    Number,
    Checkbox,
}

/// One input of the field configuration editor.
#[derive(Clone, Serialize, Debug, PartialEq)]
pub struct EditorField {
    pub name: &'static str,
    pub label: &'static str,
    pub widget: EditorWidget,
    pub required: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub placeholder: Option<&'static str>,
}

impl EditorField {
    fn new(name: &'static str, label: &'static str, widget: EditorWidget) -> Self {
        EditorField {
            name,
            label,
            widget,
            required: false,
            min: None,
            max: None,
            placeholder: None,
        }
    }

    fn text(name: &'static str, label: &'static str) -> Self {
        Self::new(name, label, EditorWidget::Text)
    }

    fn number(name: &'static str, label: &'static str) -> Self {
        Self::new(name, label, EditorWidget::Number)
    }

    fn checkbox(name: &'static str, label: &'static str) -> Self {
        Self::new(name, label, EditorWidget::Checkbox)
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    fn placeholder(mut self, placeholder: &'static str) -> Self {
        self.placeholder = Some(placeholder);
        self
    }
}

/// Registry entry describing how a field kind behaves and is configured.
#[derive(Clone, Serialize, Debug, PartialEq)]
pub struct FieldTypeDefinition {
    pub field_type: FieldType,
    pub label: &'static str,
    pub default_value: FieldValue,
    pub variable_height: bool,
    pub editor_fields: Vec<EditorField>,
}

/// `{value, label}` pair for a type-selection control.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct FieldTypeOption {
    pub value: String,
    pub label: String,
}

// Lookup functions used by the editor UI
pub fn get_field_type_info(type_name: &str) -> FieldTypeDefinition {
    FieldType::from_name(type_name).info()
}

pub fn get_field_type_options() -> Vec<FieldTypeOption> {
    FieldType::ALL
        .iter()
        .map(|t| FieldTypeOption {
            value: t.as_str().to_string(),
            label: t.info().label.to_string(),
        })
        .collect()
}
