//! CLI command implementations.

pub mod process;
pub mod simulate;

use serde::de::DeserializeOwned;
use std::path::Path;

/// Reads a JSON document from a file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path).map_err(|e| format!("Failed to read {:?}: {}", path, e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| format!("Invalid JSON in {:?}: {}", path, e).into())
}
