//! One template's live form: the upload→parse→render pipeline and all of
//! its mutable state.
//!
//! ```text
//! Empty → Uploading → Parsed | UploadFailed
//! Parsed → Rendering → Parsed
//! ```
//!
//! Every load takes a [`LoadTicket`]. Only the most recent ticket may
//! complete; older responses are dropped so a slow load cannot overwrite a
//! newer one.

use crate::error::{FormulaError, SessionError, UploadError};
use crate::field::{FieldType, FieldValue};
use crate::field_config::{FieldConfigPatch, FieldConfigStore, ResolvedField, Thresholds};
use crate::formula::{self, ERROR_VALUE, FieldInfo, Reference};
use crate::images::{ImageMiss, ImageRecord, image_url, is_resolved_image_url, resolve_images};
use crate::loader::{EmbeddedImage, LoadedTemplate, TemplateSource};
use crate::placeholder::{FieldDescriptor, parse_placeholders};
use crate::render::{FormState, RenderedForm, ScopedStyle, render_form};
use crate::saving::PublishedTemplate;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum PipelineState {
    Empty,
    Uploading,
    Parsed,
    UploadFailed(String),
    Rendering,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadTicket {
    generation: u64,
}

impl LoadTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug)]
pub struct FormSession {
    template_id: String,
    state: PipelineState,
    generation: u64,
    sheet: u32,
    html: String,
    style: Option<ScopedStyle>,
    descriptors: Vec<FieldDescriptor>,
    configs: FieldConfigStore,
    images: Vec<ImageRecord>,
    image_files: HashMap<String, EmbeddedImage>,
    image_misses: Vec<ImageMiss>,
    values: HashMap<String, FieldValue>,
    numeric: HashMap<Reference, f64>,
    last_known: HashMap<Reference, String>,
    errors: HashMap<String, String>,
    // Instance keys whose value was written by a calculation.
    derived: HashSet<String>,
}

impl Default for FormSession {
    fn default() -> Self {
        Self::new()
    }
}

impl FormSession {
    pub fn new() -> Self {
        Self::with_template_id(&Uuid::new_v4().to_string())
    }

    pub fn with_template_id(template_id: &str) -> Self {
        FormSession {
            template_id: template_id.to_string(),
            state: PipelineState::Empty,
            generation: 0,
            sheet: 1,
            html: String::new(),
            style: None,
            descriptors: Vec::new(),
            configs: FieldConfigStore::new(),
            images: Vec::new(),
            image_files: HashMap::new(),
            image_misses: Vec::new(),
            values: HashMap::new(),
            numeric: HashMap::new(),
            last_known: HashMap::new(),
            errors: HashMap::new(),
            derived: HashSet::new(),
        }
    }

    pub fn template_id(&self) -> &str {
        &self.template_id
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn descriptors(&self) -> &[FieldDescriptor] {
        &self.descriptors
    }

    pub fn images(&self) -> &[ImageRecord] {
        &self.images
    }

    pub fn image_file(&self, image_id: &str) -> Option<&EmbeddedImage> {
        self.image_files.get(image_id)
    }

    pub fn image_misses(&self) -> &[ImageMiss] {
        &self.image_misses
    }

    pub fn configs(&self) -> &FieldConfigStore {
        &self.configs
    }

    pub fn value(&self, instance_key: &str) -> Option<&FieldValue> {
        self.values.get(instance_key)
    }

    pub fn error(&self, instance_key: &str) -> Option<&str> {
        self.errors.get(instance_key).map(|e| e.as_str())
    }

    pub fn values(&self) -> &HashMap<String, FieldValue> {
        &self.values
    }

    pub fn has_content(&self) -> bool {
        matches!(self.state, PipelineState::Parsed | PipelineState::Rendering)
    }

    /// Merged settings of every placeholder occurrence, in document order.
    pub fn resolved_fields(&self) -> Vec<ResolvedField> {
        self.descriptors
            .iter()
            .map(|d| self.configs.resolve(d))
            .collect()
    }

    pub fn find_instance(&self, reference: Reference) -> Option<&FieldDescriptor> {
        self.descriptors.iter().find(|d| d.reference == reference)
    }

    /// Starts a new load. Any load still in flight becomes stale.
    pub fn begin_load(&mut self) -> LoadTicket {
        self.generation += 1;
        self.state = PipelineState::Uploading;
        LoadTicket {
            generation: self.generation,
        }
    }

    fn check_ticket(&self, ticket: LoadTicket) -> Result<(), SessionError> {
        if ticket.generation != self.generation {
            warn!(
                "discarding stale load {} (current load is {})",
                ticket.generation, self.generation
            );
            return Err(SessionError::StaleLoad {
                ticket: ticket.generation,
                current: self.generation,
            });
        }
        Ok(())
    }

    fn clear_content(&mut self) {
        self.html.clear();
        self.style = None;
        self.descriptors.clear();
        self.configs.clear();
        self.images.clear();
        self.image_files.clear();
        self.image_misses.clear();
        self.values.clear();
        self.numeric.clear();
        self.last_known.clear();
        self.errors.clear();
        self.derived.clear();
    }

    /// Completes an upload started with [`begin_load`](Self::begin_load).
    /// A failed upload clears whatever was shown before.
    pub fn complete_upload(
        &mut self,
        ticket: LoadTicket,
        result: Result<TemplateSource, UploadError>,
    ) -> Result<(), SessionError> {
        self.check_ticket(ticket)?;
        self.clear_content();

        let source = match result {
            Ok(source) => source,
            Err(e) => {
                warn!("upload failed: {}", e);
                self.state = PipelineState::UploadFailed(e.to_string());
                return Err(e.into());
            }
        };

        for (idx, image) in source.images.into_iter().enumerate() {
            let id = (idx + 1).to_string();
            self.images.push(ImageRecord {
                id: id.clone(),
                filename: image.filename.clone(),
                position_index: image.position_index,
                url: image_url(&self.template_id, &id),
            });
            self.image_files.insert(id, image);
        }

        self.style = source
            .css
            .as_deref()
            .map(|css| ScopedStyle::new(&self.template_id, css));
        self.sheet = 1;
        self.load_content(&source.html);
        info!(
            "template {} uploaded: {} field(s), {} image(s)",
            self.template_id,
            self.descriptors.len(),
            self.images.len()
        );
        Ok(())
    }

    /// Completes a load of a stored template.
    pub fn complete_template_load(
        &mut self,
        ticket: LoadTicket,
        template: LoadedTemplate,
    ) -> Result<(), SessionError> {
        self.check_ticket(ticket)?;
        self.clear_content();

        for row in &template.images {
            let url = row
                .url
                .clone()
                .filter(|u| is_resolved_image_url(u))
                .unwrap_or_else(|| image_url(&self.template_id, &row.id));
            self.images.push(ImageRecord {
                id: row.id.clone(),
                filename: row.filename.clone(),
                position_index: row.position_index,
                url,
            });
        }

        self.style = template
            .css_content
            .as_deref()
            .filter(|css| !css.trim().is_empty())
            .map(|css| ScopedStyle::new(&self.template_id, css));
        self.sheet = template
            .sheets
            .iter()
            .map(|s| s.sheet_number)
            .min()
            .unwrap_or(1);
        self.load_content(&template.html_content);

        for row in &template.fields {
            let reference = match formula::parse_reference(&row.position) {
                Some(r) => r,
                None => {
                    warn!("ignoring field row with invalid position '{}'", row.position);
                    continue;
                }
            };
            if let Some(value) = row.value.clone().filter(|v| !v.trim().is_empty()) {
                self.last_known.insert(reference, value);
            }
            let base_key = match self.find_instance(reference) {
                Some(d) => d.base_key.clone(),
                None => {
                    debug!("field row {} has no placeholder in the document", reference);
                    continue;
                }
            };
            self.configs.save_field_config(
                &base_key,
                &FieldConfigPatch {
                    field_type: Some(FieldType::from_name(&row.field_type)),
                    label: Some(row.label.trim().to_string()),
                    options: row.options.clone(),
                    decimal_places: row.decimal_places,
                    formula: row.formula.clone().filter(|f| !f.trim().is_empty()),
                },
            );
            self.configs.set_thresholds(
                &base_key,
                Thresholds {
                    min_value: row.min_value,
                    max_value: row.max_value,
                    min_color: row.min_color.clone(),
                    max_color: row.max_color.clone(),
                },
            );
        }

        self.recompute_calculations();
        info!(
            "template {} loaded: {} field(s), {} row(s)",
            self.template_id,
            self.descriptors.len(),
            template.fields.len()
        );
        Ok(())
    }

    /// Records a failed network load. Nothing from the previous template
    /// stays visible.
    pub fn fail_load(&mut self, ticket: LoadTicket, message: &str) -> Result<(), SessionError> {
        self.check_ticket(ticket)?;
        self.clear_content();
        self.state = PipelineState::UploadFailed(message.to_string());
        Ok(())
    }

    /// Replaces the document after an edit. Field configuration survives,
    /// entered values do not.
    pub fn edit_content(&mut self, html: &str) -> Result<(), SessionError> {
        if !self.has_content() {
            return Err(SessionError::NoContent);
        }
        self.load_content(html);
        Ok(())
    }

    fn load_content(&mut self, html: &str) {
        let resolved = resolve_images(html, &self.images);
        self.html = resolved.html;
        self.image_misses = resolved.misses;
        self.descriptors = parse_placeholders(&self.html, self.sheet);
        self.configs.register_originals(&self.descriptors);
        self.values.clear();
        self.numeric.clear();
        self.errors.clear();
        self.derived.clear();
        self.state = PipelineState::Parsed;
        self.recompute_calculations();
    }

    /// Sets one field's value and recomputes every calculation.
    pub fn set_value(
        &mut self,
        instance_key: &str,
        value: impl Into<FieldValue>,
    ) -> Result<(), SessionError> {
        let descriptor = self
            .descriptors
            .iter()
            .find(|d| d.instance_key == instance_key)
            .ok_or_else(|| SessionError::UnknownField(instance_key.to_string()))?;
        let resolved = self.configs.resolve(descriptor);
        if resolved.field_type.is_calculation() {
            return Err(SessionError::NotEditable(instance_key.to_string()));
        }

        let value = value.into();
        match value.as_number() {
            Some(n) => self.numeric.insert(resolved.reference, n),
            None => self.numeric.remove(&resolved.reference),
        };
        self.errors.remove(&resolved.instance_key);
        self.derived.remove(&resolved.instance_key);
        self.values.insert(resolved.instance_key, value);
        self.recompute_calculations();
        Ok(())
    }

    /// Sets a field's value by its `S{n}F{m}` reference.
    pub fn set_value_at(
        &mut self,
        reference: Reference,
        value: impl Into<FieldValue>,
    ) -> Result<(), SessionError> {
        let instance_key = self
            .find_instance(reference)
            .map(|d| d.instance_key.clone())
            .ok_or_else(|| SessionError::UnknownField(reference.to_string()))?;
        self.set_value(&instance_key, value)
    }

    pub fn begin_edit(&mut self, base_key: &str) {
        self.configs.begin_edit(base_key);
    }

    /// Updates the in-progress edit; the form reflects it before it is saved.
    pub fn update_edit(&mut self, patch: &FieldConfigPatch) {
        self.configs.update_edit(patch);
        self.recompute_calculations();
    }

    pub fn cancel_edit(&mut self) {
        self.configs.cancel_edit();
        self.recompute_calculations();
    }

    pub fn commit_edit(&mut self) -> Option<String> {
        let key = self.configs.commit_edit();
        self.recompute_calculations();
        key
    }

    /// Saves configuration for every occurrence sharing `base_key`.
    pub fn save_field_config(&mut self, base_key: &str, patch: &FieldConfigPatch) {
        self.configs.save_field_config(base_key, patch);
        self.recompute_calculations();
    }

    // Last-known values for the evaluator's fallback. Calculation results
    // from an earlier pass are not used; they are re-derived in order.
    fn field_infos(&self) -> Vec<FieldInfo> {
        self.resolved_fields()
            .into_iter()
            .map(|f| {
                let entered = if f.field_type.is_calculation() {
                    None
                } else {
                    self.values
                        .get(&f.instance_key)
                        .map(|v| v.to_string())
                        .filter(|v| !v.trim().is_empty())
                };
                FieldInfo {
                    reference: f.reference,
                    value: entered.or_else(|| self.last_known.get(&f.reference).cloned()),
                }
            })
            .collect()
    }

    /// Re-derives every calculation field in dependency order and publishes
    /// each result back into the reference map for downstream formulas.
    fn recompute_calculations(&mut self) {
        let mut formulas = BTreeMap::new();
        let mut by_reference = HashMap::new();

        for field in self.resolved_fields() {
            if !field.field_type.is_calculation() {
                // A field retyped away from calculation drops what the
                // formula left behind.
                self.errors.remove(&field.instance_key);
                if self.derived.remove(&field.instance_key) {
                    self.values.remove(&field.instance_key);
                    self.numeric.remove(&field.reference);
                }
                continue;
            }
            match field.formula.as_deref().map(str::trim) {
                Some(f) if !f.is_empty() => {
                    formulas.insert(field.reference, f.to_string());
                }
                _ => {
                    self.values.insert(field.instance_key.clone(), FieldValue::empty());
                    self.derived.insert(field.instance_key.clone());
                    self.errors.remove(&field.instance_key);
                    self.numeric.remove(&field.reference);
                }
            }
            by_reference.insert(field.reference, field);
        }

        if formulas.is_empty() {
            return;
        }

        let (order, cyclic) = formula::evaluation_order(&formulas);
        for reference in &cyclic {
            if let Some(field) = by_reference.get(reference) {
                warn!("calculation {} ({}) references itself", reference, field.label);
                self.errors.insert(
                    field.instance_key.clone(),
                    FormulaError::Cycle(reference.to_string()).to_string(),
                );
                self.values.insert(field.instance_key.clone(), FieldValue::from(ERROR_VALUE));
                self.derived.insert(field.instance_key.clone());
                self.numeric.remove(reference);
            }
        }

        let infos = self.field_infos();
        for reference in order {
            let (field, formula) = match (by_reference.get(&reference), formulas.get(&reference)) {
                (Some(field), Some(formula)) => (field, formula),
                _ => continue,
            };
            let decimals = field.decimal_places.unwrap_or(0);
            match formula::evaluate(formula, &self.numeric, &infos, decimals) {
                Ok(result) => {
                    match result.parse::<f64>() {
                        Ok(n) => self.numeric.insert(reference, n),
                        Err(_) => self.numeric.remove(&reference),
                    };
                    self.errors.remove(&field.instance_key);
                    self.values.insert(field.instance_key.clone(), FieldValue::Text(result));
                    self.derived.insert(field.instance_key.clone());
                }
                Err(e) => {
                    debug!("calculation {} failed: {}", reference, e);
                    self.errors.insert(field.instance_key.clone(), e.to_string());
                    self.values.insert(field.instance_key.clone(), FieldValue::from(ERROR_VALUE));
                    self.derived.insert(field.instance_key.clone());
                    self.numeric.remove(&reference);
                }
            }
        }
    }

    /// Renders the current content. Unresolvable fields and images degrade
    /// individually; the document as a whole always renders.
    pub fn render(&mut self) -> Result<RenderedForm, SessionError> {
        if !self.has_content() {
            return Err(SessionError::NoContent);
        }
        self.state = PipelineState::Rendering;
        let form = render_form(
            &self.html,
            &self.descriptors,
            &self.configs,
            FormState {
                values: &self.values,
                errors: &self.errors,
            },
            &self.template_id,
            self.style.as_ref(),
        );
        self.state = PipelineState::Parsed;
        Ok(form)
    }

    pub fn publish(&self, name: &str) -> Result<PublishedTemplate, SessionError> {
        self.publish_at(name, Utc::now())
    }

    /// Builds the published payload with an explicit timestamp.
    pub fn publish_at(
        &self,
        name: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<PublishedTemplate, SessionError> {
        if !self.has_content() {
            return Err(SessionError::NoContent);
        }

        let form_values = self
            .values
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let payload = PublishedTemplate {
            name: name.to_string(),
            html_content: self.html.clone(),
            field_configurations: self
                .configs
                .published_diff_for(|base_key| self.descriptors.iter().any(|d| d.base_key == base_key)),
            form_values,
            last_updated: timestamp.to_rfc3339(),
        };
        info!(
            "published '{}' with {} changed field(s)",
            name,
            payload.field_configurations.len()
        );
        Ok(payload)
    }
}

/// Live sessions by template id, oldest evicted first once `capacity` is
/// reached.
#[derive(Debug)]
pub struct SessionStore {
    sessions: HashMap<String, FormSession>,
    order: VecDeque<String>,
    capacity: usize,
}

impl SessionStore {
    pub fn new(capacity: usize) -> Self {
        SessionStore {
            sessions: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, template_id: &str) -> bool {
        self.sessions.contains_key(template_id)
    }

    pub fn get_mut(&mut self, template_id: &str) -> Option<&mut FormSession> {
        self.sessions.get_mut(template_id)
    }

    /// Stores `session` under its template id and returns the ids evicted
    /// to make room.
    pub fn insert(&mut self, session: FormSession) -> Vec<String> {
        let id = session.template_id().to_string();
        if self.sessions.insert(id.clone(), session).is_some() {
            self.order.retain(|existing| existing != &id);
        }
        self.order.push_back(id);

        let mut evicted = Vec::new();
        while self.sessions.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else { break };
            self.sessions.remove(&oldest);
            info!("evicted template {}", oldest);
            evicted.push(oldest);
        }
        evicted
    }

    pub fn remove(&mut self, template_id: &str) -> Option<FormSession> {
        let session = self.sessions.remove(template_id)?;
        self.order.retain(|existing| existing != template_id);
        Some(session)
    }
}
