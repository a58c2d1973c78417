//! Data quality: null filling, normalization and range validation.
//!
//! Rows failing validation are removed from the step output and written to
//! `<output>/sandbox/{current,forecast,location}.csv` for inspection.

use super::{require_table, write_csv, CURRENT, FORECAST, LOCATION, RAW_CURRENT, RAW_FORECAST, RAW_LOCATION};
use crate::models::{Dataset, Payload, Table};
use crate::pipeline::{RunContext, StepHandler};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use tracing::{debug, info, warn};

/// Sub-directory of the output directory receiving rejected rows.
pub const SANDBOX_DIR: &str = "sandbox";

/// Cleans the transformed tables and sandboxes invalid rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct DqChecks;

/// Inferred type of a column, from its non-null values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Int,
    Float,
    Str,
    /// Mixed or non-scalar values, left untouched
    Other,
}

#[async_trait]
impl StepHandler for DqChecks {
    async fn run(&self, input: Payload, ctx: &RunContext) -> anyhow::Result<Payload> {
        let sandbox = ctx.output_dir().join(SANDBOX_DIR);
        let mut output = Payload::new();

        let checks: [(&str, &str, &str, fn(&Table, usize) -> bool); 3] = [
            (RAW_CURRENT, CURRENT, "current", valid_current),
            (RAW_FORECAST, FORECAST, "forecast", valid_forecast),
            (RAW_LOCATION, LOCATION, "location", valid_location),
        ];

        for (source, target, label, rule) in checks {
            let table = fill_missing(require_table(&input, source, "dq_checks")?.clone());
            let total = table.len();
            let (valid, invalid) = table.partition(rule);

            if !invalid.is_empty() {
                warn!(dataset = label, rejected = invalid.len(), total, "Rows failed quality checks");
            }
            write_sandbox(&sandbox, label, &invalid)?;
            debug!(dataset = label, valid = valid.len(), "Quality checks applied");

            output.insert(target, Dataset::Table(valid));
        }

        info!(run_id = %ctx.run_id(), sandbox = %sandbox.display(), "Data quality checks completed");
        Ok(output)
    }
}

fn write_sandbox(dir: &Path, label: &str, rejected: &Table) -> anyhow::Result<()> {
    let path = dir.join(format!("{label}.csv"));
    write_csv(&path, rejected).with_context(|| format!("Writing sandbox file {}", path.display()))
}

/// Infer the kind of column `idx`. An all-null column counts as a string column.
pub fn column_kind(table: &Table, idx: usize) -> ColumnKind {
    let mut kind: Option<ColumnKind> = None;
    for row in table.rows() {
        let cell = match &row[idx] {
            Value::Null => continue,
            Value::Number(n) if n.is_f64() => ColumnKind::Float,
            Value::Number(_) => ColumnKind::Int,
            Value::String(_) => ColumnKind::Str,
            _ => return ColumnKind::Other,
        };
        kind = Some(match (kind, cell) {
            (None, cell) => cell,
            (Some(a), b) if a == b => a,
            (Some(ColumnKind::Int), ColumnKind::Float) | (Some(ColumnKind::Float), ColumnKind::Int) => {
                ColumnKind::Float
            }
            _ => return ColumnKind::Other,
        });
    }
    kind.unwrap_or(ColumnKind::Str)
}

/// Fill nulls by column kind (0, 0.0, ""), round floats to 2 decimals and
/// trim + upper-case strings.
pub fn fill_missing(mut table: Table) -> Table {
    let kinds: Vec<ColumnKind> = (0..table.columns().len())
        .map(|idx| column_kind(&table, idx))
        .collect();

    for row in table.rows_mut() {
        for (cell, kind) in row.iter_mut().zip(&kinds) {
            *cell = match (kind, &*cell) {
                (ColumnKind::Int, Value::Null) => json!(0),
                (ColumnKind::Float, Value::Null) => json!(0.0),
                (ColumnKind::Float, Value::Number(n)) => json!(round2(n.as_f64().unwrap_or_default())),
                (ColumnKind::Str, Value::Null) => json!(""),
                (ColumnKind::Str, Value::String(s)) => json!(s.trim().to_uppercase()),
                _ => continue,
            };
        }
    }
    table
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn between(table: &Table, row: usize, column: &str, lo: f64, hi: f64) -> bool {
    table.f64(row, column).is_some_and(|v| (lo..=hi).contains(&v))
}

fn non_empty(table: &Table, row: usize, column: &str) -> bool {
    !table.key(row, column).is_empty()
}

/// Current conditions: plausible temperatures that agree across units.
pub fn valid_current(t: &Table, i: usize) -> bool {
    let consistent = match (t.f64(i, "temp_c"), t.f64(i, "temp_f")) {
        (Some(c), Some(f)) => (c * 9.0 / 5.0 + 32.0 - f).abs() <= 0.1,
        _ => false,
    };
    between(t, i, "temp_c", -50.0, 50.0)
        && between(t, i, "temp_f", -58.0, 122.0)
        && consistent
        && matches!(t.f64(i, "is_day"), Some(v) if v == 0.0 || v == 1.0)
}

/// Forecast days: temperature, humidity and precipitation ranges.
pub fn valid_forecast(t: &Table, i: usize) -> bool {
    between(t, i, "day_maxtemp_c", 0.0, 50.0)
        && between(t, i, "day_maxtemp_f", 32.0, 122.0)
        && between(t, i, "day_mintemp_c", -50.0, 50.0)
        && between(t, i, "day_mintemp_f", -58.0, 122.0)
        && between(t, i, "day_avgtemp_c", -50.0, 50.0)
        && between(t, i, "day_avghumidity", 0.0, 100.0)
        && t.f64(i, "day_totalprecip_mm").is_some_and(|v| v >= 0.0)
}

/// Locations: valid coordinates and non-empty names.
pub fn valid_location(t: &Table, i: usize) -> bool {
    between(t, i, "lat", -90.0, 90.0)
        && between(t, i, "lon", -180.0, 180.0)
        && non_empty(t, i, "name")
        && non_empty(t, i, "region")
        && non_empty(t, i, "country")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::testing::{city, ctx};
    use crate::steps::{combine, to_csv};
    use std::fs;
    use tempfile::TempDir;

    fn table(columns: &[&str], rows: Vec<Vec<Value>>) -> Table {
        let mut table = Table::new(columns.iter().map(|c| c.to_string()).collect());
        for row in rows {
            table.push_row(row);
        }
        table
    }

    #[test]
    fn test_fill_missing_by_kind() {
        let t = table(
            &["i", "f", "s", "empty"],
            vec![
                vec![json!(1), json!(1.234), json!("  oslo "), Value::Null],
                vec![Value::Null, Value::Null, Value::Null, Value::Null],
                vec![json!(3), json!(2), json!("Rome"), Value::Null],
            ],
        );
        let filled = fill_missing(t);

        assert_eq!(filled.rows()[0], vec![json!(1), json!(1.23), json!("OSLO"), json!("")]);
        assert_eq!(filled.rows()[1], vec![json!(0), json!(0.0), json!(""), json!("")]);
        assert_eq!(filled.rows()[2][1], json!(2.0));
        assert_eq!(filled.rows()[2][2], json!("ROME"));
    }

    #[test]
    fn test_current_rules() {
        let t = table(
            &["temp_c", "temp_f", "is_day"],
            vec![
                vec![json!(20.0), json!(68.0), json!(1)],
                vec![json!(20.0), json!(70.0), json!(1)],
                vec![json!(60.0), json!(140.0), json!(0)],
                vec![json!(20.0), json!(68.0), json!(2)],
            ],
        );
        let verdicts: Vec<bool> = (0..t.len()).map(|i| valid_current(&t, i)).collect();
        assert_eq!(verdicts, [true, false, false, false]);
    }

    #[test]
    fn test_forecast_and_location_rules() {
        let record = city("Oslo", 2.0, &[("2024-01-01", 5.0, 3.0), ("2024-01-02", -1.0, -3.0)]);
        let tables = combine("Oslo, Norway", &record).unwrap();

        // Freezing maximum is outside the accepted forecast range.
        assert!(valid_forecast(&tables.forecast, 0));
        assert!(!valid_forecast(&tables.forecast, 1));

        assert!(valid_location(&tables.location, 0));
        let mut bad = tables.location.clone();
        bad.set_column_with("lat", |_, _| json!(91.0));
        assert!(!valid_location(&bad, 0));
    }

    #[tokio::test]
    async fn test_dq_checks_sandboxes_rejected_rows() {
        let dir = TempDir::new().unwrap();
        let ok = combine("Oslo, Norway", &city("Oslo", 2.0, &[("2024-01-01", 5.0, 3.0)])).unwrap();
        let hot = combine("Rome, Italy", &city("Rome", 55.0, &[("2024-01-01", 30.0, 25.0)])).unwrap();

        let input = Payload::new()
            .with(RAW_CURRENT, Dataset::Table(Table::concat([ok.current, hot.current])))
            .with(RAW_FORECAST, Dataset::Table(Table::concat([ok.forecast, hot.forecast])))
            .with(RAW_LOCATION, Dataset::Table(Table::concat([ok.location, hot.location])));

        let ctx = ctx(dir.path());
        let out = DqChecks.run(input, &ctx).await.unwrap();

        let current = out.table(CURRENT).unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current.key(0, "name"), "OSLO");
        assert_eq!(out.table(FORECAST).unwrap().len(), 2);
        assert_eq!(out.table(LOCATION).unwrap().len(), 2);

        let sandbox = ctx.output_dir().join(SANDBOX_DIR);
        let rejected = fs::read_to_string(sandbox.join("current.csv")).unwrap();
        assert_eq!(rejected.lines().count(), 2);
        assert!(rejected.contains("ROME"));
        let location = fs::read_to_string(sandbox.join("location.csv")).unwrap();
        assert_eq!(location, to_csv(&Table::new(out.table(LOCATION).unwrap().columns().to_vec())));
    }

    #[tokio::test]
    async fn test_dq_checks_requires_inputs() {
        let dir = TempDir::new().unwrap();
        let err = DqChecks.run(Payload::new(), &ctx(dir.path())).await.unwrap_err();
        assert!(err.to_string().contains(RAW_CURRENT));
    }
}
