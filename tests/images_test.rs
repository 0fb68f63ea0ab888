use checksheet::images::{ImageRecord, filename_key, image_url, is_resolved_image_url, resolve_images};

fn record(id: &str, filename: &str, position: Option<usize>) -> ImageRecord {
    ImageRecord {
        id: id.to_string(),
        filename: filename.to_string(),
        position_index: position,
        url: image_url("tpl", id),
    }
}

#[test]
fn test_position_wins_over_filename() {
    let images = vec![record("1", "logo.png", Some(1)), record("2", "stamp.png", Some(0))];
    // The first tag names logo.png but position 0 belongs to stamp.png.
    let html = r#"<img src="book_files/logo.png"><img src="book_files/other.png">"#;
    let out = resolve_images(html, &images);

    assert_eq!(
        out.html,
        r#"<img src="/api/templates/tpl/images/2"><img src="/api/templates/tpl/images/1">"#
    );
    assert_eq!(out.resolved, 2);
    assert!(out.misses.is_empty());
}

#[test]
fn test_filename_fallback_without_positions() {
    let images = vec![record("1", "image001.png", None), record("2", "Image002.PNG", None)];
    let html = r#"<img width=40 src='sheet_files/image002.png?v=1' alt="x">"#;
    let out = resolve_images(html, &images);

    assert_eq!(
        out.html,
        r#"<img width=40 src="/api/templates/tpl/images/2" alt="x">"#
    );
}

#[test]
fn test_placeholder_marker_names_the_file() {
    assert_eq!(filename_key("IMAGE_PLACEHOLDER:image003.jpg"), "image003.jpg");
    assert_eq!(filename_key(r"C:\exports\book_files\image004.gif"), "image004.gif");
}

#[test]
fn test_rewrite_is_idempotent() {
    let images = vec![record("1", "image001.png", Some(0))];
    let html = r#"<p><img src="image001.png"></p>"#;
    let once = resolve_images(html, &images);
    let twice = resolve_images(&once.html, &images);

    assert_eq!(once.html, twice.html, "Second pass must not change anything");
    assert!(is_resolved_image_url("/api/templates/tpl/images/1"));
    assert!(!is_resolved_image_url("image001.png"));
}

#[test]
fn test_vml_shape_becomes_img() {
    let images = vec![record("1", "image001.png", None)];
    let html = concat!(
        r#"<td><v:shape id="Picture_1" style='position:absolute;width:120pt;height:45.5pt'>"#,
        r#"<v:imagedata src="book_files/image001.png" o:title="Logo"/></v:shape></td>"#
    );
    let out = resolve_images(html, &images);

    assert_eq!(
        out.html,
        r#"<td><img src="/api/templates/tpl/images/1" style="width:120pt;height:45.5pt" alt="Logo"></td>"#
    );
    assert_eq!(out.resolved, 1);
}

#[test]
fn test_unmatched_images_are_reported() {
    let images = vec![record("1", "image001.png", None)];
    let html = r#"<img src="missing.png"><img src="image001.png">"#;
    let out = resolve_images(html, &images);

    assert_eq!(out.misses.len(), 1);
    assert_eq!(out.misses[0].tag_index, Some(0));
    assert_eq!(out.misses[0].src, "missing.png");
    assert!(out.html.starts_with(r#"<img src="missing.png">"#), "Miss keeps its source");
    assert!(out.html.ends_with(r#"<img src="/api/templates/tpl/images/1">"#));
}
