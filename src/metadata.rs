//! Snapshot metadata sidecar (`*.snapshot.json.meta.json`).

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use std::path::{Path, PathBuf};

use crate::{ProfError, ProfResult, fsutil};

pub const META_FORMAT: &str = "profmerge-snapshot-meta";
pub const META_VERSION: u32 = 1;
pub const SNAPSHOT_SUFFIX: &str = ".snapshot.json";
pub const META_SUFFIX: &str = ".meta.json";

/// Identity of the unit of work a worker is executing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitInfo {
    pub execution_unit_id: String,
    pub task_name: String,
    pub task_id: String,
    pub group_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub format: String,
    pub version: u32,
    pub execution_unit_id: String,
    pub task_name: String,
    pub task_id: String,
    pub group_name: String,
    pub pid: u32,
    /// Nanoseconds since the Unix epoch; strictly increasing within one process.
    pub timestamp: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
    pub entry_point: String,
    pub snapshot_blake3: String,
}

impl SnapshotMeta {
    pub fn new(
        unit: UnitInfo,
        entry_point: &str,
        pid: u32,
        timestamp: u64,
        recorded_at: OffsetDateTime,
        snapshot_bytes: &[u8],
    ) -> Self {
        Self {
            format: META_FORMAT.to_string(),
            version: META_VERSION,
            execution_unit_id: unit.execution_unit_id,
            task_name: unit.task_name,
            task_id: unit.task_id,
            group_name: unit.group_name,
            pid,
            timestamp,
            recorded_at,
            entry_point: entry_point.to_string(),
            snapshot_blake3: blake3::hash(snapshot_bytes).to_hex().to_string(),
        }
    }

    pub fn unit(&self) -> UnitInfo {
        UnitInfo {
            execution_unit_id: self.execution_unit_id.clone(),
            task_name: self.task_name.clone(),
            task_id: self.task_id.clone(),
            group_name: self.group_name.clone(),
        }
    }

    pub fn matches_snapshot(&self, snapshot_bytes: &[u8]) -> bool {
        blake3::hash(snapshot_bytes).to_hex().as_str() == self.snapshot_blake3
    }

    pub fn write_json(&self, path: &Path) -> ProfResult<()> {
        fsutil::write_atomic(path, &serde_json::to_vec_pretty(self)?)
    }

    pub fn read_json(path: &Path) -> ProfResult<Self> {
        let bytes = std::fs::read(path)?;
        let meta: SnapshotMeta = serde_json::from_slice(&bytes)?;
        if meta.format != META_FORMAT || meta.version != META_VERSION {
            return Err(ProfError::Snapshot(format!(
                "unsupported metadata {} v{} in {}",
                meta.format,
                meta.version,
                path.display()
            )));
        }
        Ok(meta)
    }
}

/// `<dir>/<snapshot file name>.meta.json`
pub fn sidecar_path(snapshot: &Path) -> PathBuf {
    let mut name = snapshot.as_os_str().to_os_string();
    name.push(META_SUFFIX);
    PathBuf::from(name)
}

/// Inverse of [`sidecar_path`].
pub fn snapshot_path_for_sidecar(sidecar: &Path) -> Option<PathBuf> {
    let s = sidecar.to_str()?;
    s.strip_suffix(META_SUFFIX).map(PathBuf::from)
}

/// Keeps a name usable as a single file name component.
pub fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '+') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '_' || c == '.');
    if trimmed.is_empty() {
        "entry".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> UnitInfo {
        UnitInfo {
            execution_unit_id: "web-1".to_string(),
            task_name: "install packages".to_string(),
            task_id: "t-42".to_string(),
            group_name: "site".to_string(),
        }
    }

    #[test]
    fn sidecar_round_trips_and_checks_digest() {
        let dir = fsutil::temp_dir("meta");
        let meta = SnapshotMeta::new(
            unit(),
            "engine::worker::run",
            99,
            1_700_000_000_000_000_001,
            time::macros::datetime!(2026-01-01 00:00:00 UTC),
            b"payload",
        );
        let path = dir.join("x.snapshot.json.meta.json");
        meta.write_json(&path).expect("write");
        let loaded = SnapshotMeta::read_json(&path).expect("read");
        assert_eq!(loaded, meta);
        assert_eq!(loaded.unit(), unit());
        assert!(loaded.matches_snapshot(b"payload"));
        assert!(!loaded.matches_snapshot(b"payload2"));
    }

    #[test]
    fn sidecar_paths_are_inverse() {
        let snap = PathBuf::from("/tmp/s/run-1-2.snapshot.json");
        let side = sidecar_path(&snap);
        assert_eq!(side, PathBuf::from("/tmp/s/run-1-2.snapshot.json.meta.json"));
        assert_eq!(snapshot_path_for_sidecar(&side), Some(snap));
    }

    #[test]
    fn sanitize_component_replaces_path_separators() {
        assert_eq!(sanitize_component("engine::worker::run"), "engine__worker__run");
        assert_eq!(sanitize_component("a/b c"), "a_b_c");
        assert_eq!(sanitize_component("::"), "entry");
    }
}
