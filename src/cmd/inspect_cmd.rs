//! Single snapshot inspection (`profmerge inspect ...`).

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};

use crate::metadata::{META_SUFFIX, SnapshotMeta, sidecar_path, snapshot_path_for_sidecar};
use crate::{ProfError, ProfResult, codec, nanos_to_secs};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectOutcome {
    pub snapshot: PathBuf,
    pub meta: SnapshotMeta,
    pub digest_matches: bool,
    pub sites: usize,
    pub total_calls: u64,
    pub primitive_calls: u64,
    /// Seconds.
    pub total_time: f64,
}

/// Accepts either the snapshot or its sidecar path.
pub fn inspect_command(path: &Path) -> ProfResult<InspectOutcome> {
    let is_sidecar = path.to_str().is_some_and(|s| s.ends_with(META_SUFFIX));
    let snapshot = if is_sidecar {
        snapshot_path_for_sidecar(path).ok_or_else(|| {
            ProfError::InvalidArgument(format!("not a snapshot sidecar: {}", path.display()))
        })?
    } else {
        path.to_path_buf()
    };
    if !snapshot.is_file() {
        return Err(ProfError::InvalidArgument(format!(
            "snapshot {} does not exist",
            snapshot.display()
        )));
    }

    let meta = SnapshotMeta::read_json(&sidecar_path(&snapshot))?;
    let bytes = std::fs::read(&snapshot)?;
    let digest_matches = meta.matches_snapshot(&bytes);
    if !digest_matches {
        tracing::warn!("{} does not match the digest in its metadata", snapshot.display());
    }
    let profile = codec::decode(&bytes)?;

    Ok(InspectOutcome {
        snapshot,
        meta,
        digest_matches,
        sites: profile.len(),
        total_calls: profile.total_calls_sum(),
        primitive_calls: profile.primitive_calls_sum(),
        total_time: nanos_to_secs(profile.total_time_sum()),
    })
}
