//! Analyze: temperature statistics over current + forecast data.

use super::{require_table, AGGREGATED_TEMP, CURRENT, FORECAST, LOCATION, MAX_TEMP, TEMP_DIFF};
use crate::models::{Dataset, Payload, Table};
use crate::pipeline::{RunContext, StepHandler};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Weekday};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::info;

/// Join keys between current conditions and forecast days.
pub const JOIN_KEYS: [&str; 2] = ["name", "country"];

/// Derives the analysis tables and forwards the cleaned inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Analyze;

#[async_trait]
impl StepHandler for Analyze {
    async fn run(&self, input: Payload, ctx: &RunContext) -> anyhow::Result<Payload> {
        let current = require_table(&input, CURRENT, "analyze")?;
        let forecast = require_table(&input, FORECAST, "analyze")?;
        let location = require_table(&input, LOCATION, "analyze")?;

        let merged = current.inner_join(forecast, &JOIN_KEYS);
        let max_temp = day_of_max_temperature(&merged);
        let aggregated = temperature_summary(&merged);
        let diff = forecast_to_current_diff(merged);

        info!(
            run_id = %ctx.run_id(),
            joined = diff.len(),
            cities = max_temp.len(),
            "Temperature analysis completed"
        );

        Ok(Payload::new()
            .with(LOCATION, Dataset::Table(location.clone()))
            .with(CURRENT, Dataset::Table(current.clone()))
            .with(FORECAST, Dataset::Table(forecast.clone()))
            .with(MAX_TEMP, Dataset::Table(max_temp))
            .with(AGGREGATED_TEMP, Dataset::Table(aggregated))
            .with(TEMP_DIFF, Dataset::Table(diff)))
    }
}

/// Per city (sorted by name), the first day with the highest maximum.
pub fn day_of_max_temperature(merged: &Table) -> Table {
    let mut best: BTreeMap<String, (usize, f64)> = BTreeMap::new();
    for row in 0..merged.len() {
        let Some(max_c) = merged.f64(row, "day_maxtemp_c") else {
            continue;
        };
        best.entry(merged.key(row, "name"))
            .and_modify(|(idx, top)| {
                if max_c > *top {
                    *idx = row;
                    *top = max_c;
                }
            })
            .or_insert((row, max_c));
    }

    let columns = ["name", "region", "date", "day_maxtemp_c", "day_maxtemp_f"];
    let mut out = Table::new(columns.iter().map(|c| c.to_string()).collect());
    out.add_column("day_name", Value::Null);
    for (idx, _) in best.values() {
        let mut row: Vec<Value> = columns
            .iter()
            .map(|c| merged.value(*idx, c).cloned().unwrap_or(Value::Null))
            .collect();
        row.push(day_name(&merged.key(*idx, "date")).map_or(Value::Null, Value::from));
        out.push_row(row);
    }
    out
}

/// Full weekday name of a `YYYY-MM-DD` date.
pub fn day_name(date: &str) -> Option<&'static str> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    Some(match date.weekday() {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    })
}

/// Max / mean / min of the average daily temperature per (name, region, country).
pub fn temperature_summary(merged: &Table) -> Table {
    const METRICS: [&str; 2] = ["day_avgtemp_c", "day_avgtemp_f"];

    let mut groups: BTreeMap<(String, String, String), Vec<usize>> = BTreeMap::new();
    for row in 0..merged.len() {
        let key = (
            merged.key(row, "name"),
            merged.key(row, "region"),
            merged.key(row, "country"),
        );
        groups.entry(key).or_default().push(row);
    }

    let mut columns = vec!["name".to_string(), "region".to_string(), "country".to_string()];
    for metric in METRICS {
        for stat in ["max", "mean", "min"] {
            columns.push(format!("{metric}_{stat}"));
        }
    }

    let mut out = Table::new(columns);
    for ((name, region, country), rows) in groups {
        let mut row = vec![json!(name), json!(region), json!(country)];
        for metric in METRICS {
            let values: Vec<f64> = rows.iter().filter_map(|&r| merged.f64(r, metric)).collect();
            row.extend(stats(&values));
        }
        out.push_row(row);
    }
    out
}

fn stats(values: &[f64]) -> [Value; 3] {
    if values.is_empty() {
        return [Value::Null, Value::Null, Value::Null];
    }
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    [json!(max), json!(mean), json!(min)]
}

/// Joined rows plus forecast-minus-current differences in both units.
pub fn forecast_to_current_diff(mut merged: Table) -> Table {
    merged.set_column_with("forecasted_celsius_diff", difference("day_avgtemp_c", "temp_c"));
    merged.set_column_with("forecasted_fahrenheit_diff", difference("day_avgtemp_f", "temp_f"));
    merged
}

fn difference(minuend: &'static str, subtrahend: &'static str) -> impl Fn(&Table, usize) -> Value {
    move |t: &Table, i: usize| match (t.f64(i, minuend), t.f64(i, subtrahend)) {
        (Some(a), Some(b)) => json!(a - b),
        _ => Value::Null,
    }
}
