use checksheet::downloader::to_csv;
use checksheet::field::FieldValue;
use checksheet::loader::load_template_bytes;
use checksheet::saving::{load_published, published_file_name, save_published, save_published_in};
use checksheet::session::FormSession;
use chrono::{TimeZone, Utc};

fn filled_session() -> FormSession {
    let mut session = FormSession::with_template_id("tpl");
    let ticket = session.begin_load();
    let html = b"<td>{{text:Inspector, Name}}</td><td>{{checkbox:Passed}}</td><td>{{number:Qty}}</td>";
    session
        .complete_upload(ticket, load_template_bytes("sheet.html", html))
        .unwrap();
    session.set_value("field_Inspector,_Name_1", "Lee \"QA\"").unwrap();
    session.set_value("field_Passed_2", true).unwrap();
    session.set_value("field_Qty_3", "12").unwrap();
    session
}

#[test]
fn test_save_and_load_published_template() {
    let dir = tempfile::tempdir().unwrap();
    let session = filled_session();
    let timestamp = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    let payload = session.publish_at("Line 3 check", timestamp).unwrap();

    // Save the payload and make sure it landed where expected
    let path = save_published_in(&payload, dir.path()).unwrap();
    assert_eq!(path, dir.path().join("Line_3_check.json.gz"));
    assert!(path.exists(), "File was not created");

    // Load it back and compare
    let loaded = load_published(&path).unwrap();
    assert_eq!(loaded, payload, "Published template changed on disk");
    assert_eq!(loaded.form_values.get("field_Passed_2"), Some(&FieldValue::Bool(true)));
}

#[test]
fn test_load_rejects_uncompressed_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plain.json.gz");
    std::fs::write(&path, "{}").unwrap();
    assert!(load_published(&path).is_err());
}

#[test]
fn test_save_into_missing_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    let payload = filled_session().publish("x").unwrap();
    let result = save_published(&payload, dir.path().join("no/such/dir/x.json.gz"));
    assert!(result.is_err());
}

#[test]
fn test_published_file_names() {
    assert_eq!(published_file_name("Order form"), "Order_form.json.gz");
    assert_eq!(published_file_name("../etc/passwd"), "___etc_passwd.json.gz");
    assert_eq!(published_file_name("   "), "template.json.gz");
}

#[test]
fn test_csv_export_escapes_cells() {
    let csv = to_csv(&filled_session()).unwrap();
    let lines: Vec<&str> = csv.lines().collect();

    assert_eq!(lines[0], "reference,label,type,value");
    assert_eq!(lines[1], r#"S1F1,"Inspector, Name",text,"Lee ""QA""""#);
    assert_eq!(lines[2], "S1F2,Passed,checkbox,true");
    assert_eq!(lines[3], "S1F3,Qty,number,12");
}
