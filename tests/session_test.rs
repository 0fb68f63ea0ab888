use checksheet::error::{SessionError, UploadError};
use checksheet::field::{FieldType, FieldValue};
use checksheet::field_config::FieldConfigPatch;
use checksheet::formula::Reference;
use checksheet::loader::{LoadedTemplate, TemplateSource, load_template_bytes};
use checksheet::render::Control;
use checksheet::session::{FormSession, PipelineState, SessionStore};
use chrono::{TimeZone, Utc};

const ORDER_SHEET: &str = "<table><tr><td>{{number:Qty}}</td><td>{{calculation:Total}}</td><td>{{text:Note}}</td></tr></table>";

fn loaded(html: &str) -> FormSession {
    let mut session = FormSession::with_template_id("tpl");
    let ticket = session.begin_load();
    session
        .complete_upload(ticket, load_template_bytes("sheet.html", html.as_bytes()))
        .unwrap();
    session
}

fn formula(f: &str) -> FieldConfigPatch {
    FieldConfigPatch {
        formula: Some(f.to_string()),
        ..FieldConfigPatch::default()
    }
}

#[test]
fn test_value_change_recomputes_calculation() {
    let mut session = loaded(ORDER_SHEET);
    assert_eq!(session.state(), &PipelineState::Parsed);

    session.save_field_config("field_Total", &formula("S1F1*2"));
    assert_eq!(session.value("field_Total_2"), Some(&FieldValue::from("0")));

    session.set_value("field_Qty_1", "5").unwrap();
    assert_eq!(session.value("field_Total_2"), Some(&FieldValue::from("10")));

    let form = session.render().unwrap();
    let total = form.field("field_Total_2").unwrap();
    assert_eq!(total.control, Control::Calculated);
    assert!(!total.is_editable());
    assert!(form.to_html().contains(r#"value="10""#));
}

#[test]
fn test_qty_total_scenario() {
    let mut session = loaded("Qty: {{number:Qty:0}} Total: {{calculation:Total}}");
    session.save_field_config("field_Total", &formula("S1F1*2"));
    session.set_value("field_Qty_1", "5").unwrap();

    let form = session.render().unwrap();
    assert_eq!(
        form.field("field_Total_2").unwrap().value,
        FieldValue::from("10")
    );
}

#[test]
fn test_calculation_cannot_be_set_directly() {
    let mut session = loaded(ORDER_SHEET);
    let result = session.set_value("field_Total_2", "99");
    assert!(matches!(result, Err(SessionError::NotEditable(_))));

    let result = session.set_value("field_Missing_9", "1");
    assert!(matches!(result, Err(SessionError::UnknownField(_))));
}

#[test]
fn test_calculation_chain_and_decimals() {
    let html = "{{number:A}} {{calculation:B:2}} {{calculation:C}}";
    let mut session = loaded(html);
    session.save_field_config("field_C", &formula("S1F2+1"));
    session.save_field_config("field_B", &formula("S1F1/4"));
    session.set_value_at(Reference::new(1, 1), "3").unwrap();

    assert_eq!(session.value("field_B_2"), Some(&FieldValue::from("0.75")));
    assert_eq!(session.value("field_C_3"), Some(&FieldValue::from("2")));
}

#[test]
fn test_cycles_are_reported_not_evaluated() {
    let mut session = loaded("{{calculation:A}} {{calculation:B}} {{calculation:Self}}");
    session.save_field_config("field_A", &formula("S1F2+1"));
    session.save_field_config("field_B", &formula("S1F1+1"));
    session.save_field_config("field_Self", &formula("S1F3*2"));

    for key in ["field_A_1", "field_B_2", "field_Self_3"] {
        assert_eq!(session.value(key), Some(&FieldValue::from("Error")), "{} should fail", key);
        assert!(session.error(key).unwrap().contains("references itself"));
    }

    let form = session.render().unwrap();
    assert!(form.to_html().contains("cs-error-indicator"));
}

#[test]
fn test_pending_edit_previews_and_cancels() {
    let mut session = loaded(ORDER_SHEET);
    session.begin_edit("field_Note");
    session.update_edit(&FieldConfigPatch {
        field_type: Some(FieldType::Dropdown),
        options: Some(vec!["OK".to_string(), "NG".to_string()]),
        ..FieldConfigPatch::default()
    });

    let form = session.render().unwrap();
    assert_eq!(
        form.field("field_Note_3").unwrap().control,
        Control::Select {
            options: vec!["OK".to_string(), "NG".to_string()]
        }
    );

    session.cancel_edit();
    let form = session.render().unwrap();
    assert_eq!(form.field("field_Note_3").unwrap().control, Control::Text);
}

#[test]
fn test_stale_load_is_discarded() {
    let mut session = FormSession::with_template_id("tpl");
    let first = session.begin_load();
    let second = session.begin_load();

    session
        .complete_upload(second, load_template_bytes("b.html", b"{{text:Second}}"))
        .unwrap();
    let late = session.complete_upload(first, load_template_bytes("a.html", b"{{text:First}}"));

    assert!(matches!(late, Err(SessionError::StaleLoad { ticket: 1, current: 2 })));
    assert_eq!(session.descriptors()[0].label, "Second");
}

#[test]
fn test_failed_upload_clears_previous_content() {
    let mut session = loaded(ORDER_SHEET);
    session.set_value("field_Qty_1", "5").unwrap();

    let ticket = session.begin_load();
    let result = session.complete_upload(ticket, Err(UploadError::MissingSheet));

    assert!(matches!(result, Err(SessionError::Upload(UploadError::MissingSheet))));
    assert!(matches!(session.state(), PipelineState::UploadFailed(_)));
    assert!(session.descriptors().is_empty());
    assert!(session.values().is_empty());
    assert!(session.html().is_empty());
    assert!(matches!(session.render(), Err(SessionError::NoContent)));
}

#[test]
fn test_upload_binds_images_and_scopes_stylesheet() {
    let mut session = FormSession::with_template_id("tpl");
    let ticket = session.begin_load();
    let source = TemplateSource {
        html: r#"<img src="book_files/image001.png"><td>{{image:Photo}}</td>"#.to_string(),
        css: Some("td { color: red; }".to_string()),
        images: vec![checksheet::loader::EmbeddedImage {
            filename: "image001.png".to_string(),
            bytes: b"png".to_vec(),
            position_index: Some(0),
        }],
    };
    session.complete_upload(ticket, Ok(source)).unwrap();

    assert_eq!(session.images()[0].url, "/api/templates/tpl/images/1");
    assert!(session.html().starts_with(r#"<img src="/api/templates/tpl/images/1">"#));
    assert_eq!(session.image_file("1").unwrap().content_type(), "image/png");

    let html = session.render().unwrap().to_html();
    assert!(html.starts_with(r#"<style data-form-scope="tpl">td { color: red; }</style>"#));
    assert!(html.contains(r#"accept="image/*""#));
}

#[test]
fn test_edit_keeps_configuration_and_resets_values() {
    let mut session = loaded(ORDER_SHEET);
    session.save_field_config("field_Total", &formula("S1F1*2"));
    session.set_value("field_Qty_1", "5").unwrap();

    session
        .edit_content("<p>{{text:Header}}</p><p>{{number:Qty}}</p><p>{{calculation:Total}}</p>")
        .unwrap();

    assert_eq!(session.value("field_Qty_2"), None);
    let fields = session.resolved_fields();
    assert_eq!(fields[2].base_key, "field_Total");
    assert_eq!(fields[2].formula.as_deref(), Some("S1F1*2"), "Formula follows the label");
    assert_eq!(fields[2].reference, Reference::new(1, 3));
}

#[test]
fn test_publish_contains_changes_and_filled_values() {
    let mut session = loaded(ORDER_SHEET);
    session.save_field_config("field_Total", &formula("S1F1*2"));
    session.save_field_config(
        "field_Qty",
        &FieldConfigPatch {
            label: Some("Quantity".to_string()),
            ..FieldConfigPatch::default()
        },
    );
    session.set_value("field_Qty_1", "5").unwrap();
    session.set_value("field_Note_3", "  ").unwrap();

    let timestamp = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let payload = session.publish_at("Order form", timestamp).unwrap();

    assert_eq!(payload.name, "Order form");
    assert_eq!(payload.last_updated, "2024-03-01T12:00:00+00:00");
    assert_eq!(
        payload.field_configurations.keys().collect::<Vec<_>>(),
        vec!["field_Qty"],
        "Only the relabelled field is published"
    );
    assert_eq!(payload.form_values.get("field_Qty_1"), Some(&FieldValue::from("5")));
    assert_eq!(payload.form_values.get("field_Total_2"), Some(&FieldValue::from("10")));
    assert!(!payload.form_values.contains_key("field_Note_3"), "Blank values are left out");
}

#[test]
fn test_stored_template_load() {
    let json = r##"{
        "html_content": "<td>{{text:Status}}</td><td>{{number:Qty}}</td><td>{{calculation:Double}}</td>",
        "fields": [
            {"position": "S1F1", "field_type": "dropdown", "label": "Status", "options": "[\"OK\",\"NG\"]"},
            {"position": "S1F2", "field_type": "number", "label": "Qty", "value": "7",
             "min_value": 1, "max_value": 5, "max_color": "#ff0000"},
            {"position": "S1F3", "field_type": "calculation", "label": "Double", "formula": "S1F2*2"}
        ],
        "sheets": [{"sheet_number": 1, "name": "Sheet1"}],
        "images": []
    }"##;
    let template: LoadedTemplate = serde_json::from_str(json).unwrap();

    let mut session = FormSession::with_template_id("tpl");
    let ticket = session.begin_load();
    session.complete_template_load(ticket, template).unwrap();

    let fields = session.resolved_fields();
    assert_eq!(fields[0].field_type, FieldType::Dropdown);
    assert_eq!(fields[0].options, Some(vec!["OK".to_string(), "NG".to_string()]));

    // No live value yet, so the stored value feeds the formula.
    assert_eq!(session.value("field_Double_3"), Some(&FieldValue::from("14")));

    session.set_value("field_Qty_2", "9").unwrap();
    let form = session.render().unwrap();
    assert_eq!(
        form.field("field_Qty_2").unwrap().background.as_deref(),
        Some("#ff0000")
    );
    assert_eq!(session.value("field_Double_3"), Some(&FieldValue::from("18")));
}

#[test]
fn test_failed_network_load() {
    let mut session = loaded(ORDER_SHEET);
    let ticket = session.begin_load();
    session.fail_load(ticket, "template service unavailable").unwrap();

    assert_eq!(
        session.state(),
        &PipelineState::UploadFailed("template service unavailable".to_string())
    );
    assert!(!session.has_content());
}

#[test]
fn test_retyped_calculation_drops_its_error() {
    let mut session = loaded("{{calculation:X}}");
    session.save_field_config("field_X", &formula("1/0"));
    assert_eq!(session.value("field_X_1"), Some(&FieldValue::from("Error")));
    assert!(session.error("field_X_1").is_some());

    session.save_field_config(
        "field_X",
        &FieldConfigPatch {
            field_type: Some(FieldType::Number),
            ..FieldConfigPatch::default()
        },
    );
    assert_eq!(session.error("field_X_1"), None, "No longer a calculation");
    assert_eq!(session.value("field_X_1"), None, "The formula's result is gone");

    session.set_value("field_X_1", "5").unwrap();
    let form = session.render().unwrap();
    assert_eq!(form.field("field_X_1").unwrap().value, FieldValue::from("5"));
    assert!(!form.to_html().contains("cs-error-indicator"));
}

#[test]
fn test_retyping_back_to_calculation_recomputes() {
    let mut session = loaded("{{number:A}} {{calculation:B}}");
    session.save_field_config("field_B", &formula("S1F1+1"));
    session.begin_edit("field_B");
    session.update_edit(&FieldConfigPatch {
        field_type: Some(FieldType::Text),
        ..FieldConfigPatch::default()
    });
    session.set_value("field_B_2", "typed").unwrap();

    session.cancel_edit();
    assert_eq!(session.value("field_B_2"), Some(&FieldValue::from("1")));
}

#[test]
fn test_huge_decimals_render_clamped() {
    let mut session = loaded("{{number:X:2147483648}} {{calculation:Y:4000000000}}");
    session.save_field_config("field_Y", &formula("S1F1/4"));
    session.set_value("field_X_1", "3").unwrap();

    let form = session.render().unwrap();
    assert_eq!(
        form.field("field_X_1").unwrap().control,
        Control::Number {
            step: "0.00000000000000000001".to_string()
        }
    );
    assert_eq!(
        session.value("field_Y_2"),
        Some(&FieldValue::from("0.75000000000000000000"))
    );
}

#[test]
fn test_unreadable_reupload_fails_the_load() {
    let mut session = loaded(ORDER_SHEET);
    session.set_value("field_Qty_1", "5").unwrap();

    let ticket = session.begin_load();
    session.fail_load(ticket, "No file data received").unwrap();
    assert!(matches!(session.state(), PipelineState::UploadFailed(_)));
    assert!(session.values().is_empty());
    assert!(matches!(session.render(), Err(SessionError::NoContent)));

    // The next upload recovers.
    let ticket = session.begin_load();
    session
        .complete_upload(ticket, load_template_bytes("sheet.html", b"{{text:Again}}"))
        .unwrap();
    assert_eq!(session.state(), &PipelineState::Parsed);
    assert!(session.render().is_ok());
}

#[test]
fn test_publish_skips_fields_removed_by_edit() {
    let mut session = loaded(ORDER_SHEET);
    session.save_field_config(
        "field_Note",
        &FieldConfigPatch {
            label: Some("Remark".to_string()),
            ..FieldConfigPatch::default()
        },
    );
    let timestamp = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let payload = session.publish_at("Order form", timestamp).unwrap();
    assert!(payload.field_configurations.contains_key("field_Note"));

    session
        .edit_content("<td>{{number:Qty}}</td><td>{{calculation:Total}}</td>")
        .unwrap();
    let payload = session.publish_at("Order form", timestamp).unwrap();
    assert!(
        payload.field_configurations.is_empty(),
        "A removed field is not published"
    );
}

#[test]
fn test_session_store_evicts_oldest() {
    let mut store = SessionStore::new(2);
    assert!(store.insert(FormSession::with_template_id("a")).is_empty());
    assert!(store.insert(FormSession::with_template_id("b")).is_empty());

    // Re-inserting refreshes its place in line.
    assert!(store.insert(FormSession::with_template_id("a")).is_empty());
    assert_eq!(store.insert(FormSession::with_template_id("c")), vec!["b".to_string()]);
    assert!(store.contains("a"));
    assert!(store.contains("c"));
    assert_eq!(store.len(), 2);

    assert!(store.remove("a").is_some());
    assert!(store.remove("a").is_none());
    assert!(store.get_mut("c").is_some());
    assert_eq!(store.insert(FormSession::with_template_id("d")), Vec::<String>::new());
}
