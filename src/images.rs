//! Re-links images embedded in a spreadsheet web export.
//!
//! Every `<img>` source is rewritten to the template's image API URL. The
//! n-th tag is matched to the image recorded at position n when positions
//! are known; otherwise, or when that position is missing or ambiguous, the
//! file name in the source is matched against the known image names.
//! Excel's VML `<v:shape><v:imagedata/></v:shape>` blocks are replaced by
//! plain `<img>` elements carrying the shape's width and height.

use lazy_static::lazy_static;
use log::{debug, warn};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref RESOLVED_URL_REGEX: Regex =
        Regex::new(r"^/api/templates/[^/\s]+/images/[^/\s]+$").unwrap();
    static ref IMG_TAG_REGEX: Regex = Regex::new(r"(?is)<img\b[^>]*>").unwrap();
    static ref SRC_ATTR_REGEX: Regex =
        Regex::new(r#"(?is)\bsrc\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>"']+))"#).unwrap();
    static ref VML_SHAPE_REGEX: Regex =
        Regex::new(r"(?is)<v:shape\b([^>]*)>(.*?)</v:shape>").unwrap();
    static ref VML_IMAGEDATA_REGEX: Regex = Regex::new(r"(?is)<v:imagedata\b[^>]*>").unwrap();
    static ref STYLE_ATTR_REGEX: Regex =
        Regex::new(r#"(?is)\bstyle\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap();
    static ref SIZE_DECL_REGEX: Regex =
        Regex::new(r"(?i)(?:^|;)\s*(width|height)\s*:\s*([^;]+)").unwrap();
    static ref TITLE_ATTR_REGEX: Regex = Regex::new(r#"(?is)\bo:title\s*=\s*"([^"]*)""#).unwrap();
}

/// Marker some exports put in front of an image file name.
pub const IMAGE_PLACEHOLDER_MARKER: &str = "IMAGE_PLACEHOLDER:";

/// One image belonging to a template.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ImageRecord {
    pub id: String,
    pub filename: String,
    /// Order of appearance in the source document, 0-based.
    pub position_index: Option<usize>,
    pub url: String,
}

/// An image source that could not be matched to any record.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct ImageMiss {
    /// Index of the tag among the document's `<img>` tags, or `None` for VML.
    pub tag_index: Option<usize>,
    pub src: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedHtml {
    pub html: String,
    pub resolved: usize,
    pub misses: Vec<ImageMiss>,
}

/// Deterministic URL for an image of a template.
pub fn image_url(template_id: &str, image_id: &str) -> String {
    format!("/api/templates/{}/images/{}", template_id, image_id)
}

pub fn is_resolved_image_url(src: &str) -> bool {
    RESOLVED_URL_REGEX.is_match(src.trim())
}

/// File name a source refers to: the token after the placeholder marker, or
/// the last path segment without query or fragment.
pub fn filename_key(src: &str) -> String {
    if let Some(idx) = src.find(IMAGE_PLACEHOLDER_MARKER) {
        let rest = &src[idx + IMAGE_PLACEHOLDER_MARKER.len()..];
        return rest
            .split(|c: char| c.is_whitespace() || c == '"' || c == '\'')
            .next()
            .unwrap_or("")
            .to_string();
    }
    let without_query = src.split(['?', '#']).next().unwrap_or("");
    without_query
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Exact name first, then containment in either direction ignoring case.
pub fn match_by_filename<'a>(key: &str, images: &'a [ImageRecord]) -> Option<&'a ImageRecord> {
    if key.is_empty() {
        return None;
    }
    if let Some(exact) = images.iter().find(|img| img.filename == key) {
        return Some(exact);
    }
    let key_lower = key.to_lowercase();
    images.iter().find(|img| {
        let name = img.filename.to_lowercase();
        !name.is_empty() && (name.contains(&key_lower) || key_lower.contains(&name))
    })
}

fn match_by_position(index: usize, images: &[ImageRecord]) -> Option<&ImageRecord> {
    let mut candidates = images
        .iter()
        .filter(|img| img.position_index == Some(index));
    let first = candidates.next()?;
    if candidates.next().is_some() {
        return None;
    }
    Some(first)
}

fn src_value<'t>(captures: &Captures<'t>) -> &'t str {
    captures
        .get(1)
        .or_else(|| captures.get(2))
        .or_else(|| captures.get(3))
        .map(|m| m.as_str())
        .unwrap_or("")
}

/// The `src` of every `<img>` tag in document order, `None` for tags
/// without one. A tag's index here is its position index.
pub fn img_tag_sources(html: &str) -> Vec<Option<&str>> {
    IMG_TAG_REGEX
        .find_iter(html)
        .map(|tag| {
            SRC_ATTR_REGEX
                .captures(tag.as_str())
                .map(|caps| src_value(&caps))
        })
        .collect()
}

/// Sizing declarations from a VML shape's inline style.
fn shape_size_style(shape_attrs: &str) -> String {
    let style = STYLE_ATTR_REGEX
        .captures(shape_attrs)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str())
        .unwrap_or("");
    SIZE_DECL_REGEX
        .captures_iter(style)
        .map(|c| format!("{}:{}", c[1].to_lowercase(), c[2].trim()))
        .collect::<Vec<_>>()
        .join(";")
}

fn resolve_img_tags(html: &str, images: &[ImageRecord], misses: &mut Vec<ImageMiss>) -> (String, usize) {
    let tag_count = IMG_TAG_REGEX.find_iter(html).count();
    let positional = tag_count > 0 && images.iter().any(|img| img.position_index.is_some());
    let mut resolved = 0;
    let mut index = 0;

    let html = IMG_TAG_REGEX.replace_all(html, |tag_caps: &Captures| {
        let tag = &tag_caps[0];
        let tag_index = index;
        index += 1;

        let src_caps = match SRC_ATTR_REGEX.captures(tag) {
            Some(c) => c,
            None => return tag.to_string(),
        };
        let src = src_value(&src_caps);
        if is_resolved_image_url(src) {
            return tag.to_string();
        }

        let by_position = if positional {
            match_by_position(tag_index, images)
        } else {
            None
        };
        let record = by_position.or_else(|| match_by_filename(&filename_key(src), images));

        match record {
            Some(record) => {
                resolved += 1;
                let attr = src_caps.get(0).map(|m| m.range()).unwrap_or(0..0);
                format!(
                    "{}src=\"{}\"{}",
                    &tag[..attr.start],
                    record.url,
                    &tag[attr.end..]
                )
            }
            None => {
                warn!("no image found for <img> #{} with src '{}'", tag_index, src);
                misses.push(ImageMiss {
                    tag_index: Some(tag_index),
                    src: src.to_string(),
                });
                tag.to_string()
            }
        }
    });

    (html.into_owned(), resolved)
}

fn resolve_vml_shapes(html: &str, images: &[ImageRecord], misses: &mut Vec<ImageMiss>) -> (String, usize) {
    let mut resolved = 0;

    let html = VML_SHAPE_REGEX.replace_all(html, |shape: &Captures| {
        let whole = &shape[0];
        let body = &shape[2];
        let imagedata = match VML_IMAGEDATA_REGEX.find(body) {
            Some(m) => m.as_str(),
            None => return whole.to_string(),
        };
        let src = SRC_ATTR_REGEX
            .captures(imagedata)
            .map(|c| src_value(&c).to_string())
            .unwrap_or_default();

        let url = if is_resolved_image_url(&src) {
            Some(src.clone())
        } else {
            match_by_filename(&filename_key(&src), images).map(|r| r.url.clone())
        };

        match url {
            Some(url) => {
                resolved += 1;
                let style = shape_size_style(&shape[1]);
                let alt = TITLE_ATTR_REGEX
                    .captures(imagedata)
                    .map(|c| c[1].to_string())
                    .unwrap_or_default();
                if style.is_empty() {
                    format!("<img src=\"{}\" alt=\"{}\">", url, alt)
                } else {
                    format!("<img src=\"{}\" style=\"{}\" alt=\"{}\">", url, style, alt)
                }
            }
            None => {
                warn!("no image found for VML image data '{}'", src);
                misses.push(ImageMiss {
                    tag_index: None,
                    src,
                });
                whole.to_string()
            }
        }
    });

    (html.into_owned(), resolved)
}

/// Rewrites every image source in `html` to its resolved URL.
///
/// Already-resolved sources are left alone, so running this twice yields the
/// same document. Unmatched images are reported, never fatal.
pub fn resolve_images(html: &str, images: &[ImageRecord]) -> ResolvedHtml {
    let mut misses = Vec::new();
    let (html, from_tags) = resolve_img_tags(html, images, &mut misses);
    let (html, from_vml) = resolve_vml_shapes(&html, images, &mut misses);

    debug!(
        "resolved {} image(s), {} unresolved",
        from_tags + from_vml,
        misses.len()
    );

    ResolvedHtml {
        html,
        resolved: from_tags + from_vml,
        misses,
    }
}
