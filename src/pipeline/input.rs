//! Extraction input providers.

use crate::models::{Config, Dataset, EtlError, Payload, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Dataset name under which raw input records are delivered.
pub const RAW_DATA: &str = "raw_data";

/// Supplies the input payload of steps without dependencies.
pub trait InputProvider: Send + Sync {
    fn load(&self, config: &Config) -> Result<Payload>;
}

/// Reads a JSON object keyed by location ("City, Country") from disk.
///
/// Without an explicit path the configured input file is used.
#[derive(Debug, Clone, Default)]
pub struct JsonFileInput {
    path: Option<PathBuf>,
}

impl JsonFileInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read from `path` instead of the configured input file.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Parse a weather input file into a `raw_data` payload.
    pub fn read(path: &Path) -> Result<Payload> {
        let content = fs::read_to_string(path)
            .map_err(|e| EtlError::io(format!("reading input file {}", path.display()), e))?;
        let records: BTreeMap<String, Value> = serde_json::from_str(&content)
            .map_err(|e| EtlError::Parse(format!("Input file {}: {e}", path.display())))?;

        info!(path = %path.display(), locations = records.len(), "Loaded extraction input");
        Ok(Payload::new().with(RAW_DATA, Dataset::Records(records)))
    }
}

impl InputProvider for JsonFileInput {
    fn load(&self, config: &Config) -> Result<Payload> {
        match &self.path {
            Some(path) => Self::read(path),
            None => Self::read(&config.paths.input_file()),
        }
    }
}

/// Fixed in-memory input, mostly useful in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticInput(pub Payload);

impl InputProvider for StaticInput {
    fn load(&self, _config: &Config) -> Result<Payload> {
        Ok(self.0.clone())
    }
}
