//! Minimal CSV rendering for tables.

use crate::fsio;
use crate::models::Table;
use serde_json::Value;
use std::path::Path;

/// Render `table` as CSV with a header row and `\n` line endings.
///
/// `Null` cells are empty; fields containing a comma, quote or line break
/// are quoted with inner quotes doubled.
pub fn to_csv(table: &Table) -> String {
    let mut out = String::new();
    push_record(&mut out, table.columns().iter().map(|c| c.as_str().into()));
    for row in table.rows() {
        push_record(&mut out, row.iter().map(render_cell));
    }
    out
}

/// Atomically write `table` as CSV to `path`.
pub fn write_csv(path: &Path, table: &Table) -> std::io::Result<()> {
    fsio::write_atomic(path, to_csv(table).as_bytes())
}

fn render_cell(value: &Value) -> std::borrow::Cow<'_, str> {
    match value {
        Value::Null => "".into(),
        Value::String(s) => s.as_str().into(),
        Value::Bool(b) => b.to_string().into(),
        Value::Number(n) => n.to_string().into(),
        other => other.to_string().into(),
    }
}

fn push_record<'a>(out: &mut String, fields: impl Iterator<Item = std::borrow::Cow<'a, str>>) {
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.push(',');
        }
        if field.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(&field);
        }
    }
    out.push('\n');
}
