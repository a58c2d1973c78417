//! Transform: flatten nested weather records into three tables.
//!
//! Locations are processed concurrently, bounded by
//! `transform.max_workers`. Results are concatenated in location-key order,
//! so the output does not depend on task completion order.

use super::{RAW_CURRENT, RAW_FORECAST, RAW_LOCATION};
use crate::models::{Dataset, Payload, Table};
use crate::pipeline::{RunContext, StepHandler, RAW_DATA};
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

/// Separator between nested key segments in flattened column names.
pub const SEPARATOR: &str = "_";

/// Flattens validated records into current, forecast and location tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct Transform;

/// Tables produced for one location.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationTables {
    pub current: Table,
    pub forecast: Table,
    pub location: Table,
}

#[async_trait]
impl StepHandler for Transform {
    async fn run(&self, mut input: Payload, ctx: &RunContext) -> anyhow::Result<Payload> {
        let records = match input.remove(RAW_DATA) {
            Some(Dataset::Records(records)) => records,
            _ => return Err(anyhow!("transform: no '{RAW_DATA}' records in input")),
        };

        let workers = ctx.config().transform.max_workers.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        debug!(locations = records.len(), workers, "Flattening locations");

        let mut handles = Vec::with_capacity(records.len());
        for (key, record) in records {
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| anyhow!("worker semaphore closed"))?;
                combine(&key, &record).with_context(|| format!("Failed to flatten '{key}'"))
            }));
        }

        let mut current = Vec::with_capacity(handles.len());
        let mut forecast = Vec::with_capacity(handles.len());
        let mut location = Vec::with_capacity(handles.len());
        for handle in handles {
            let tables = handle.await.context("transform worker panicked")??;
            current.push(tables.current);
            forecast.push(tables.forecast);
            location.push(tables.location);
        }

        let current = Table::concat(current);
        let forecast = Table::concat(forecast);
        let location = Table::concat(location);
        info!(
            run_id = %ctx.run_id(),
            current = current.len(),
            forecast = forecast.len(),
            location = location.len(),
            "Transformed weather records"
        );

        Ok(Payload::new()
            .with(RAW_CURRENT, Dataset::Table(current))
            .with(RAW_FORECAST, Dataset::Table(forecast))
            .with(RAW_LOCATION, Dataset::Table(location)))
    }
}

/// Flatten one location record keyed by "City, Country".
pub fn combine(key: &str, record: &Value) -> anyhow::Result<LocationTables> {
    let location = record
        .get("location")
        .and_then(Value::as_object)
        .context("missing 'location'")?;
    let current = record
        .get("current")
        .and_then(Value::as_object)
        .context("missing 'current'")?;
    let days = record
        .pointer("/forecast/forecastday")
        .and_then(Value::as_array)
        .context("missing 'forecast.forecastday'")?;

    let (city, country) = split_key(key, location);
    let region = location.get("region").cloned().unwrap_or(Value::Null);

    let mut current_row = flatten(current);
    current_row.insert("name".into(), Value::String(city.clone()));
    current_row.insert("country".into(), Value::String(country.clone()));
    current_row.insert("region".into(), region);

    let mut forecast = Table::default();
    for day in days {
        let day = day.as_object().context("forecast day is not an object")?;
        let mut row = flatten(day);
        row.insert("name".into(), Value::String(city.clone()));
        row.insert("country".into(), Value::String(country.clone()));
        forecast.push_object(&row);
    }

    Ok(LocationTables {
        current: Table::from_objects([&current_row]),
        forecast,
        location: Table::from_objects([&flatten(location)]),
    })
}

/// City and country from the input key, falling back to the location's own
/// fields when the key has no comma.
fn split_key(key: &str, location: &Map<String, Value>) -> (String, String) {
    match key.split_once(',') {
        Some((city, country)) => (city.trim().to_string(), country.trim().to_string()),
        None => {
            let field = |name: &str| {
                location
                    .get(name)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            (field("name"), field("country"))
        }
    }
}

/// Flatten nested objects into `parent_child` keys. Arrays are kept as values.
pub fn flatten(object: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    flatten_into(object, "", &mut out);
    out
}

fn flatten_into(object: &Map<String, Value>, prefix: &str, out: &mut Map<String, Value>) {
    for (key, value) in object {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}{SEPARATOR}{key}")
        };
        match value {
            Value::Object(nested) => flatten_into(nested, &name, out),
            other => {
                out.insert(name, other.clone());
            }
        }
    }
}
