// Module: Loader
// Reads suite, environment, and schedule definitions from JSON files.

use std::path::Path;

use anyhow::{Context, Result};

use crate::model::{Environment, RunSchedule, TestSuite};

pub fn load_suite<P: AsRef<Path>>(path: P) -> Result<TestSuite> {
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read suite file {:?}", path.as_ref()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse suite JSON {:?}", path.as_ref()))
}

pub fn load_environment<P: AsRef<Path>>(path: P) -> Result<Environment> {
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read environment file {:?}", path.as_ref()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse environment JSON {:?}", path.as_ref()))
}

pub fn load_schedules<P: AsRef<Path>>(path: P) -> Result<Vec<RunSchedule>> {
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read schedules file {:?}", path.as_ref()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse schedules JSON {:?}", path.as_ref()))
}
