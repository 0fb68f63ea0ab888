use crate::field::FieldValue;
use crate::field_config::ConfigDiff;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, create_dir_all};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Payload produced when a template is published.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct PublishedTemplate {
    pub name: String,
    pub html_content: String,
    /// Only base keys whose type or label differ from the parsed original.
    pub field_configurations: BTreeMap<String, ConfigDiff>,
    /// Non-empty values keyed by instance key.
    pub form_values: BTreeMap<String, FieldValue>,
    /// ISO-8601 UTC timestamp.
    pub last_updated: String,
}

/// File name used for a published template: the name reduced to a safe
/// character set, with a `.json.gz` suffix.
pub fn published_file_name(name: &str) -> String {
    let safe: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let safe = if safe.is_empty() {
        "template".to_string()
    } else {
        safe
    };
    format!("{}.json.gz", safe)
}

pub fn save_published(template: &PublishedTemplate, filename: impl AsRef<Path>) -> std::io::Result<()> {
    let file = File::create(filename)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut writer = BufWriter::new(encoder);

    serde_json::to_writer(&mut writer, template)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    writer.flush()?;
    writer.into_inner()?.finish()?;

    Ok(())
}

pub fn load_published(filename: impl AsRef<Path>) -> std::io::Result<PublishedTemplate> {
    let file = File::open(filename)?;
    let decoder = GzDecoder::new(file);
    let reader = BufReader::new(decoder);

    let template: PublishedTemplate = serde_json::from_reader(reader)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    Ok(template)
}

/// Saves into `dir` (created if needed) and returns the written path.
pub fn save_published_in(template: &PublishedTemplate, dir: impl AsRef<Path>) -> std::io::Result<PathBuf> {
    let dir = dir.as_ref();
    create_dir_all(dir)?;
    let path = dir.join(published_file_name(&template.name));
    save_published(template, &path)?;
    Ok(path)
}
