/*!
# Checksheet

Turns spreadsheet exports (HTML, or a ZIP of HTML plus stylesheet and
images) into fillable web forms, built in Rust.

## Overview

A template is an HTML sheet in which cells carry placeholders of the form
`{{type:label[:decimals][:options]}}`. Uploading a template discovers every
placeholder, binds embedded pictures to stable URLs, and renders a form with
one input control per placeholder. Calculation fields evaluate formulas over
other fields, referenced as `S{sheet}F{field}`, and recompute whenever an
input changes.

## Architecture

### Template Layer
- **loader**: accepts `.htm`/`.html` or a `.zip` with the first sheet, the
  shared stylesheet and embedded images
- **images**: rewrites `<img>` and VML picture shapes to served image URLs
- **placeholder**: scans HTML for placeholders and produces field descriptors

### Field Layer
- **field**: the closed set of field types and their editor metadata
- **field_config**: per-label overrides layered over the parsed originals,
  with an in-progress edit that previews before it is saved
- **formula**: reference/range parsing, `SUM`/`AVERAGE`/`MIN`/`MAX`,
  arithmetic, and dependency ordering with cycle detection

### Form Layer
- **render**: binds descriptors and values into a scoped form tree
- **session**: one template's upload→parse→render pipeline, with load
  tickets so only the latest load wins, and a bounded store of live sessions
- **saving**: publishes changed field configuration and entered values as
  gzip-compressed JSON
- **downloader**: CSV and XLSX export of a filled form

### Outer Surfaces
- **config**: bind address, data directory, upload limit and session cap
  from the environment
- **app** (`web` feature): axum routes for upload, render, values, field
  configuration, publishing and image serving

## Formula Examples

- `SUM(S1F1:S1F3)`, `AVERAGE(S1F2,S1F4)`, `MAX(S1F1:S1F5,10)`
- `S1F1*2`, `(S1F1+S1F2)/S1F3`

## REST API Endpoints

- `POST /api/templates` - Upload a new template
- `POST /api/templates/{id}/upload` - Replace a template's content
- `DELETE /api/templates/{id}` - Drop a template and its images
- `GET /api/templates/{id}/form` - Rendered form HTML
- `POST /api/templates/{id}/values` - Set one field's value
- `POST /api/templates/{id}/fields/{baseKey}` - Save field configuration
- `POST /api/templates/{id}/publish` - Publish the template
- `GET /api/templates/{id}/images/{imageId}` - Embedded image bytes
- `GET /api/templates/{id}/export.csv`, `export.xlsx` - Exports
*/

pub mod config;
pub mod downloader;
pub mod error;
pub mod field;
pub mod field_config;
pub mod formula;
pub mod images;
pub mod loader;
pub mod placeholder;
pub mod render;
pub mod saving;
pub mod session;

#[cfg(feature = "web")]
pub mod app;

pub use config::AppConfig;
pub use error::{FormulaError, SessionError, UploadError};
pub use field::{FieldType, FieldValue, get_field_type_info, get_field_type_options};
pub use field_config::{ConfigDiff, FieldConfigPatch, FieldConfigStore, ResolvedField};
pub use formula::{Reference, evaluate, format_number};
pub use images::{ImageRecord, resolve_images};
pub use loader::{LoadedTemplate, TemplateSource, load_template_bytes, load_template_file};
pub use placeholder::{FieldDescriptor, parse_placeholders};
pub use render::{RenderedForm, render_form};
pub use saving::{PublishedTemplate, load_published, save_published};
pub use session::{FormSession, SessionStore};
