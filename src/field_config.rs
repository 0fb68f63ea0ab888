//! User overrides of parsed field settings, keyed by base key.
//!
//! Effective settings for a rendered field are layered as: parsed
//! placeholder, then the registry default value, then the stored override,
//! then the edit currently in progress.

use crate::field::{FieldType, FieldValue};
use crate::formula::{MAX_DECIMAL_PLACES, Reference};
use crate::placeholder::{FieldDescriptor, embedded_label};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A partial set of field settings. `None` inherits from the layer below.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct FieldConfigPatch {
    #[serde(default, rename = "type")]
    pub field_type: Option<FieldType>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub options: Option<Vec<String>>,
    #[serde(default)]
    pub decimal_places: Option<u32>,
    #[serde(default)]
    pub formula: Option<String>,
}

impl FieldConfigPatch {
    /// Layers `other` on top of `self`.
    pub fn merge(&mut self, other: &FieldConfigPatch) {
        if other.field_type.is_some() {
            self.field_type = other.field_type;
        }
        if other.label.is_some() {
            self.label = other.label.clone();
        }
        if other.options.is_some() {
            self.options = other.options.clone();
        }
        if other.decimal_places.is_some() {
            self.decimal_places = other.decimal_places;
        }
        if other.formula.is_some() {
            self.formula = other.formula.clone();
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == FieldConfigPatch::default()
    }
}

/// Conditional-formatting bounds for numeric controls.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct Thresholds {
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub min_color: Option<String>,
    pub max_color: Option<String>,
}

impl Thresholds {
    pub fn is_empty(&self) -> bool {
        self.min_value.is_none() && self.max_value.is_none()
    }

    /// Background colour for an out-of-range value, if any.
    pub fn color_for(&self, value: f64) -> Option<&str> {
        if let Some(min) = self.min_value {
            if value < min {
                return Some(self.min_color.as_deref().unwrap_or("#f8d7da"));
            }
        }
        if let Some(max) = self.max_value {
            if value > max {
                return Some(self.max_color.as_deref().unwrap_or("#f8d7da"));
            }
        }
        None
    }
}

/// Stored configuration for one base key.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct FieldConfig {
    pub overrides: FieldConfigPatch,
    pub original_type: FieldType,
    /// Placeholder text the field was first parsed from.
    pub original_html: String,
    pub thresholds: Option<Thresholds>,
}

impl FieldConfig {
    fn for_descriptor(descriptor: &FieldDescriptor) -> Self {
        FieldConfig {
            overrides: FieldConfigPatch::default(),
            original_type: descriptor.field_type,
            original_html: descriptor.original_html.clone(),
            thresholds: None,
        }
    }

    pub fn original_label(&self) -> String {
        embedded_label(&self.original_html).unwrap_or_default()
    }

    pub fn effective_type(&self) -> FieldType {
        self.overrides.field_type.unwrap_or(self.original_type)
    }

    pub fn effective_label(&self) -> String {
        self.overrides
            .label
            .clone()
            .unwrap_or_else(|| self.original_label())
    }

    /// True when the type or label no longer matches the parsed original.
    pub fn differs_from_original(&self) -> bool {
        self.effective_type() != self.original_type
            || self.effective_label() != self.original_label()
    }
}

/// Entry of the published `field_configurations` map.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ConfigDiff {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub label: String,
    pub original_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimal_places: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

/// Fully merged settings of one rendered field occurrence.
#[derive(Clone, Serialize, Debug, PartialEq)]
pub struct ResolvedField {
    pub instance_key: String,
    pub base_key: String,
    pub reference: Reference,
    pub field_type: FieldType,
    pub label: String,
    pub decimal_places: Option<u32>,
    pub options: Option<Vec<String>>,
    pub formula: Option<String>,
    pub default_value: FieldValue,
    pub thresholds: Option<Thresholds>,
}

#[derive(Clone, Debug, PartialEq)]
struct PendingEdit {
    base_key: String,
    patch: FieldConfigPatch,
}

#[derive(Clone, Debug, Default)]
pub struct FieldConfigStore {
    configs: BTreeMap<String, FieldConfig>,
    editing: Option<PendingEdit>,
}

impl FieldConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the parsed original of every base key seen for the first time.
    /// Existing entries keep their originals and overrides.
    pub fn register_originals(&mut self, descriptors: &[FieldDescriptor]) {
        for descriptor in descriptors {
            self.configs
                .entry(descriptor.base_key.clone())
                .or_insert_with(|| FieldConfig::for_descriptor(descriptor));
        }
    }

    pub fn get(&self, base_key: &str) -> Option<&FieldConfig> {
        self.configs.get(base_key)
    }

    pub fn base_keys(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(|k| k.as_str())
    }

    pub fn clear(&mut self) {
        self.configs.clear();
        self.editing = None;
    }

    pub fn begin_edit(&mut self, base_key: &str) {
        self.editing = Some(PendingEdit {
            base_key: base_key.to_string(),
            patch: FieldConfigPatch::default(),
        });
    }

    /// Adds to the in-progress edit. Ignored when no edit is open.
    pub fn update_edit(&mut self, patch: &FieldConfigPatch) {
        if let Some(edit) = self.editing.as_mut() {
            edit.patch.merge(patch);
        }
    }

    pub fn cancel_edit(&mut self) {
        self.editing = None;
    }

    pub fn editing_key(&self) -> Option<&str> {
        self.editing.as_ref().map(|e| e.base_key.as_str())
    }

    /// Saves the in-progress edit, if any, and returns its base key.
    pub fn commit_edit(&mut self) -> Option<String> {
        let edit = self.editing.take()?;
        self.save_field_config(&edit.base_key, &edit.patch);
        Some(edit.base_key)
    }

    /// Writes `patch` into the base-key bucket, reconfiguring every
    /// occurrence that shares the label.
    pub fn save_field_config(&mut self, base_key: &str, patch: &FieldConfigPatch) {
        let config = self
            .configs
            .entry(base_key.to_string())
            .or_insert_with(|| FieldConfig {
                overrides: FieldConfigPatch::default(),
                original_type: FieldType::Text,
                original_html: String::new(),
                thresholds: None,
            });
        config.overrides.merge(patch);

        if self.editing.as_ref().map(|e| e.base_key.as_str()) == Some(base_key) {
            self.editing = None;
        }
    }

    pub fn set_thresholds(&mut self, base_key: &str, thresholds: Thresholds) {
        if let Some(config) = self.configs.get_mut(base_key) {
            config.thresholds = if thresholds.is_empty() {
                None
            } else {
                Some(thresholds)
            };
        }
    }

    /// Merges a parsed descriptor with the stored override and the pending
    /// edit.
    pub fn resolve(&self, descriptor: &FieldDescriptor) -> ResolvedField {
        let mut patch = FieldConfigPatch::default();
        let stored = self.configs.get(&descriptor.base_key);
        if let Some(config) = stored {
            patch.merge(&config.overrides);
        }
        if let Some(edit) = &self.editing {
            if edit.base_key == descriptor.base_key {
                patch.merge(&edit.patch);
            }
        }

        let field_type = patch.field_type.unwrap_or(descriptor.field_type);
        ResolvedField {
            instance_key: descriptor.instance_key.clone(),
            base_key: descriptor.base_key.clone(),
            reference: descriptor.reference,
            field_type,
            label: patch.label.unwrap_or_else(|| descriptor.label.clone()),
            decimal_places: patch
                .decimal_places
                .or(descriptor.decimal_places)
                .map(|d| d.min(MAX_DECIMAL_PLACES)),
            options: patch.options.or_else(|| descriptor.options.clone()),
            formula: patch.formula,
            default_value: field_type.info().default_value,
            thresholds: stored.and_then(|c| c.thresholds.clone()),
        }
    }

    /// Configurations that differ from their parsed originals in type or
    /// label. Unedited fields are left out.
    pub fn published_diff(&self) -> BTreeMap<String, ConfigDiff> {
        self.published_diff_for(|_| true)
    }

    /// Like [`published_diff`](Self::published_diff), limited to the base
    /// keys for which `present` returns true. Configuration kept for labels
    /// that left the document is not published.
    pub fn published_diff_for(&self, present: impl Fn(&str) -> bool) -> BTreeMap<String, ConfigDiff> {
        self.configs
            .iter()
            .filter(|(key, config)| present(key) && config.differs_from_original())
            .map(|(key, config)| {
                (
                    key.clone(),
                    ConfigDiff {
                        field_type: config.effective_type(),
                        label: config.effective_label(),
                        original_type: config.original_type,
                        decimal_places: config.overrides.decimal_places,
                        options: config.overrides.options.clone(),
                        formula: config.overrides.formula.clone(),
                    },
                )
            })
            .collect()
    }
}
