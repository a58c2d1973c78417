//! Load: write the final CSV artifacts.

use super::{require_table, write_csv, AGGREGATED_TEMP, CURRENT, FORECAST, LOCATION, MAX_TEMP, TEMP_DIFF};
use crate::models::Payload;
use crate::pipeline::{RunContext, StepHandler};
use anyhow::Context;
use async_trait::async_trait;
use std::fs;
use tracing::{debug, info};

/// Output file name for each analyzed dataset.
pub const OUTPUT_FILES: [(&str, &str); 6] = [
    ("max_temp.csv", MAX_TEMP),
    ("aggregated_temp.csv", AGGREGATED_TEMP),
    ("forecasted_current_temp.csv", TEMP_DIFF),
    ("current_weather.csv", CURRENT),
    ("forecast_weather.csv", FORECAST),
    ("location.csv", LOCATION),
];

/// Writes every output table to the output directory. Each file is
/// replaced atomically; the returned payload is empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct Load;

#[async_trait]
impl StepHandler for Load {
    async fn run(&self, input: Payload, ctx: &RunContext) -> anyhow::Result<Payload> {
        let output_dir = ctx.output_dir();
        fs::create_dir_all(&output_dir)
            .with_context(|| format!("Creating output directory {}", output_dir.display()))?;

        // Every dataset must be present before the first file is replaced.
        let tables = OUTPUT_FILES
            .iter()
            .map(|&(file, dataset)| Ok((file, require_table(&input, dataset, "load")?)))
            .collect::<anyhow::Result<Vec<_>>>()?;

        for (file, table) in tables {
            let path = output_dir.join(file);
            write_csv(&path, table).with_context(|| format!("Writing {}", path.display()))?;
            debug!(file, rows = table.len(), "Output written");
        }

        info!(
            run_id = %ctx.run_id(),
            output = %output_dir.display(),
            files = OUTPUT_FILES.len(),
            "Exported weather data"
        );
        Ok(Payload::new())
    }
}
