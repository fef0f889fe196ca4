//! JSON dump of the run's custom statistics.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::{ProfResult, fsutil};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for StatValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for StatValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for StatValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for StatValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for StatValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Statistics the engine collected for the whole run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    #[serde(default)]
    pub custom: BTreeMap<String, StatValue>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<StatValue>) -> &mut Self {
        self.custom.insert(key.into(), value.into());
        self
    }
}

/// Writes `stats.custom` as pretty JSON to `path` (made absolute against the
/// working directory). Returns the absolute path written.
pub fn dump_run_stats(stats: &RunStats, path: &Path) -> ProfResult<PathBuf> {
    let path = std::path::absolute(path)?;
    if let Some(parent) = path.parent()
        && !parent.is_dir()
        && let Err(err) = std::fs::create_dir_all(parent)
    {
        tracing::debug!("could not create {}: {err}", parent.display());
    }
    fsutil::write_json(&path, &stats.custom)?;
    tracing::info!(path = %path.display(), entries = stats.custom.len(), "run statistics written");
    Ok(path)
}
