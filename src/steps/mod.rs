//! Steps module - the five weather handlers.
//!
//! Dataflow:
//! raw_data (records) → extract → raw_data (validated)
//!   → transform → raw_current / raw_forecast / raw_location
//!   → dq_checks → current_df / forecast_df / location_df (+ sandbox CSVs)
//!   → analyze → + max_temp_df / aggregated_temp_df / temp_diff_df
//!   → load → CSV files, empty payload

mod analyze;
mod csv;
mod dq_checks;
mod extract;
mod load;
mod transform;

pub use analyze::*;
pub use csv::*;
pub use dq_checks::*;
pub use extract::*;
pub use load::*;
pub use transform::*;

pub const RAW_CURRENT: &str = "raw_current";
pub const RAW_FORECAST: &str = "raw_forecast";
pub const RAW_LOCATION: &str = "raw_location";

pub const CURRENT: &str = "current_df";
pub const FORECAST: &str = "forecast_df";
pub const LOCATION: &str = "location_df";

pub const MAX_TEMP: &str = "max_temp_df";
pub const AGGREGATED_TEMP: &str = "aggregated_temp_df";
pub const TEMP_DIFF: &str = "temp_diff_df";

use crate::models::{Payload, Table};
use anyhow::Context;

/// Table dataset `name` from `payload`, or an error naming the step.
pub(crate) fn require_table<'a>(payload: &'a Payload, name: &str, step: &str) -> anyhow::Result<&'a Table> {
    payload
        .table(name)
        .with_context(|| format!("{step}: input has no table '{name}'"))
}
