//! Extract: schema validation of the raw weather records.

use crate::models::{CityWeather, Dataset, Payload};
use crate::pipeline::{RunContext, StepHandler, RAW_DATA};
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Validates every input record against the weather schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct Extract;

#[async_trait]
impl StepHandler for Extract {
    async fn run(&self, input: Payload, ctx: &RunContext) -> anyhow::Result<Payload> {
        let raw = input
            .records(RAW_DATA)
            .with_context(|| format!("extract: no '{RAW_DATA}' records in input"))?;

        let mut validated = BTreeMap::new();
        for (key, record) in raw {
            validated.insert(key.clone(), validate(key, record)?);
            debug!(location = %key, "Record validated");
        }

        info!(
            run_id = %ctx.run_id(),
            locations = validated.len(),
            "Extracted weather records"
        );
        Ok(Payload::new().with(RAW_DATA, Dataset::Records(validated)))
    }
}

/// Parse `record` as `CityWeather` and return its normalized JSON form.
pub fn validate(key: &str, record: &Value) -> anyhow::Result<Value> {
    let city = CityWeather::deserialize(record)
        .with_context(|| format!("Invalid weather record for '{key}'"))?;
    serde_json::to_value(&city).with_context(|| format!("Normalizing record for '{key}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::testing::{city, ctx};
    use serde_json::json;

    #[tokio::test]
    async fn test_extract_validates_all_records() {
        let records = BTreeMap::from([
            ("Oslo, Norway".to_string(), city("Oslo", 1.0, &[])),
            ("Rome, Italy".to_string(), city("Rome", 15.0, &[])),
        ]);
        let input = Payload::new().with(RAW_DATA, Dataset::Records(records));

        let out = Extract.run(input, &ctx("/tmp/unused")).await.unwrap();
        let raw = out.records(RAW_DATA).unwrap();
        assert_eq!(raw.len(), 2);
        assert_eq!(raw["Rome, Italy"]["current"]["temp_c"], json!(15.0));
    }

    #[tokio::test]
    async fn test_extract_names_invalid_record() {
        let mut broken = city("Oslo", 1.0, &[]);
        broken["location"].as_object_mut().unwrap().remove("lat");
        let records = BTreeMap::from([("Oslo, Norway".to_string(), broken)]);
        let input = Payload::new().with(RAW_DATA, Dataset::Records(records));

        let err = Extract.run(input, &ctx("/tmp/unused")).await.unwrap_err();
        assert!(format!("{err:#}").contains("Oslo, Norway"));
        assert!(format!("{err:#}").contains("lat"));
    }

    #[tokio::test]
    async fn test_extract_requires_raw_data() {
        let err = Extract.run(Payload::new(), &ctx("/tmp/unused")).await.unwrap_err();
        assert!(err.to_string().contains("raw_data"));
    }
}
