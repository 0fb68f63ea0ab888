use crate::error::UploadError;
use crate::images::img_tag_sources;
use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;
use zip::ZipArchive;

lazy_static! {
    static ref SHEET_NAME_REGEX: Regex = Regex::new(r"(?i)(^|/)sheet\d*\.html?$").unwrap();
}

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "gif", "bmp", "svg"];

/// An image file shipped inside an uploaded archive.
#[derive(Clone, Debug, PartialEq)]
pub struct EmbeddedImage {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub position_index: Option<usize>,
}

impl EmbeddedImage {
    pub fn content_type(&self) -> &'static str {
        match extension(&self.filename).as_deref() {
            Some("png") => "image/png",
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("gif") => "image/gif",
            Some("bmp") => "image/bmp",
            Some("svg") => "image/svg+xml",
            _ => "application/octet-stream",
        }
    }
}

/// Raw content of an uploaded template.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct TemplateSource {
    pub html: String,
    pub css: Option<String>,
    pub images: Vec<EmbeddedImage>,
}

fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

fn base_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn decode_text(bytes: Vec<u8>) -> Result<String, UploadError> {
    String::from_utf8(bytes).map_err(|e| UploadError::Encoding(e.to_string()))
}

/// Assigns each image the index of the first `<img>` tag that refers to it.
/// Tags without a `src` still take up an index.
fn assign_positions(html: &str, images: &mut [EmbeddedImage]) {
    for (index, src) in img_tag_sources(html).into_iter().enumerate() {
        let Some(src) = src else { continue };
        let name = base_name(src.split(['?', '#']).next().unwrap_or(""));
        if let Some(image) = images
            .iter_mut()
            .find(|img| img.position_index.is_none() && img.filename == name)
        {
            image.position_index = Some(index);
        }
    }
}

/// Reads a ZIP export: one sheet document, an optional stylesheet and any
/// number of images.
pub fn from_zip(bytes: &[u8]) -> Result<TemplateSource, UploadError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut sheets: Vec<(String, Vec<u8>)> = Vec::new();
    let mut css = None;
    let mut images = Vec::new();

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        let lower = name.to_lowercase();

        let is_sheet = SHEET_NAME_REGEX.is_match(&name);
        let is_css = lower.contains("stylesheet.css");
        let is_image = extension(&name)
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false);
        if !(is_sheet || is_css || is_image) {
            continue;
        }

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        if is_sheet {
            sheets.push((name, buf));
        } else if is_css {
            if css.is_none() {
                css = Some(decode_text(buf)?);
            }
        } else {
            images.push(EmbeddedImage {
                filename: base_name(&name).to_string(),
                bytes: buf,
                position_index: None,
            });
        }
    }

    sheets.sort_by(|a, b| a.0.cmp(&b.0));
    let (sheet_name, sheet_bytes) = sheets.into_iter().next().ok_or(UploadError::MissingSheet)?;
    let html = decode_text(sheet_bytes)?;
    assign_positions(&html, &mut images);

    debug!(
        "archive sheet '{}' with {} image(s), stylesheet: {}",
        sheet_name,
        images.len(),
        css.is_some()
    );

    Ok(TemplateSource { html, css, images })
}

/// Dispatches on the file extension: `.htm`/`.html` or `.zip`.
pub fn load_template_bytes(filename: &str, bytes: &[u8]) -> Result<TemplateSource, UploadError> {
    if bytes.is_empty() {
        return Err(UploadError::Empty);
    }

    let source = match extension(filename).as_deref() {
        Some("htm") | Some("html") => TemplateSource {
            html: decode_text(bytes.to_vec())?,
            css: None,
            images: Vec::new(),
        },
        Some("zip") => from_zip(bytes)?,
        Some(ext) => return Err(UploadError::UnsupportedFormat(ext.to_string())),
        None => return Err(UploadError::UnsupportedFormat(filename.to_string())),
    };

    info!("loaded template '{}' ({} bytes)", filename, bytes.len());
    Ok(source)
}

pub fn load_template_file(filepath: impl AsRef<Path>) -> Result<TemplateSource, UploadError> {
    let path = filepath.as_ref();
    let bytes = fs::read(path)?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    load_template_bytes(name, &bytes)
}

// Options arrive either as a JSON array or as a JSON-encoded string of one.
fn deserialize_options<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawOptions {
        List(Vec<String>),
        Encoded(String),
    }

    match Option::<RawOptions>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawOptions::List(list)) => Ok(Some(list)),
        Some(RawOptions::Encoded(s)) if s.trim().is_empty() => Ok(None),
        Some(RawOptions::Encoded(s)) => serde_json::from_str::<Vec<String>>(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// A field row of a stored template.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct FieldRow {
    /// `S{n}F{m}` address of the field.
    pub position: String,
    pub field_type: String,
    pub label: String,
    #[serde(default)]
    pub decimal_places: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_options")]
    pub options: Option<Vec<String>>,
    #[serde(default)]
    pub formula: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
    #[serde(default)]
    pub min_color: Option<String>,
    #[serde(default)]
    pub max_color: Option<String>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct SheetRow {
    pub sheet_number: u32,
    #[serde(default)]
    pub name: String,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ImageRow {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub position_index: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
}

/// A previously stored template as returned by the template service.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct LoadedTemplate {
    #[serde(default)]
    pub fields: Vec<FieldRow>,
    #[serde(default)]
    pub sheets: Vec<SheetRow>,
    #[serde(default)]
    pub images: Vec<ImageRow>,
    pub html_content: String,
    #[serde(default)]
    pub css_content: Option<String>,
}
