use crate::session::FormSession;
use std::error::Error;

fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Rows of the export grid: reference, label, type and current value for
/// every placeholder occurrence.
fn export_rows(session: &FormSession) -> Vec<[String; 4]> {
    session
        .resolved_fields()
        .into_iter()
        .map(|field| {
            let value = session
                .value(&field.instance_key)
                .cloned()
                .unwrap_or_else(|| field.default_value.clone());
            [
                field.reference.to_string(),
                field.label,
                field.field_type.to_string(),
                value.to_string(),
            ]
        })
        .collect()
}

/// Convert a filled form to CSV
///
/// # Examples
/// ```
/// use checksheet::downloader::to_csv;
/// use checksheet::loader::load_template_bytes;
/// use checksheet::session::FormSession;
///
/// let mut session = FormSession::new();
/// let ticket = session.begin_load();
/// let source = load_template_bytes("sheet.html", b"<td>{{number:Qty}}</td>");
/// session.complete_upload(ticket, source).unwrap();
/// session.set_value("field_Qty_1", "5").unwrap();
///
/// let csv = to_csv(&session).unwrap();
/// assert!(csv.contains("S1F1,Qty,number,5"));
/// ```
pub fn to_csv(session: &FormSession) -> Result<String, Box<dyn Error>> {
    let mut csv_content = String::from("reference,label,type,value\n");
    for row in export_rows(session) {
        let line: Vec<String> = row.iter().map(|cell| escape_csv(cell)).collect();
        csv_content.push_str(&line.join(","));
        csv_content.push('\n');
    }
    Ok(csv_content)
}

/// Convert a filled form to XLSX using rust_xlsxwriter.
#[cfg(feature = "web")]
pub fn to_xlsx(session: &FormSession) -> Result<Vec<u8>, Box<dyn Error>> {
    use rust_xlsxwriter::{Workbook, Worksheet};

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();

    for (col, header) in ["Reference", "Label", "Type", "Value"].iter().enumerate() {
        worksheet.write_string(0, col as u16, *header)?;
    }

    for (r, row) in export_rows(session).iter().enumerate() {
        let row_idx = (r + 1) as u32;
        for (c, cell) in row.iter().enumerate() {
            match (c, cell.parse::<f64>()) {
                (3, Ok(n)) => worksheet.write_number(row_idx, c as u16, n)?,
                _ => worksheet.write_string(row_idx, c as u16, cell.as_str())?,
            };
        }
    }

    workbook.push_worksheet(worksheet);
    let buffer = workbook.save_to_buffer()?;

    Ok(buffer)
}
