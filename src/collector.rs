//! Discovery and loading of snapshot + sidecar pairs from a scratch directory.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::metadata::{META_SUFFIX, SNAPSHOT_SUFFIX, SnapshotMeta, sidecar_path, snapshot_path_for_sidecar};
use crate::{Profile, ProfError, codec, fsutil};

#[derive(Debug, Clone)]
pub struct LoadedSnapshot {
    pub path: PathBuf,
    pub profile: Profile,
    pub meta: SnapshotMeta,
}

/// A snapshot or sidecar that could not be paired and loaded.
#[derive(Debug)]
pub struct SnapshotIssue {
    pub path: PathBuf,
    pub reason: String,
}

impl fmt::Display for SnapshotIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "skipping {}: {}", self.path.display(), self.reason)
    }
}

#[derive(Debug, Default)]
pub struct Collected {
    pub snapshots: Vec<LoadedSnapshot>,
    pub issues: Vec<SnapshotIssue>,
}

/// Restartable view over a scratch directory. Every [`Discovery::iter`] re-globs.
#[derive(Debug, Clone)]
pub struct Discovery {
    dir: PathBuf,
}

pub fn discover(scratch_dir: &Path) -> Discovery {
    Discovery {
        dir: scratch_dir.to_path_buf(),
    }
}

impl Discovery {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn iter(&self) -> SnapshotIter {
        let snapshot_glob = format!("*{SNAPSHOT_SUFFIX}");
        let sidecar_glob = format!("*{SNAPSHOT_SUFFIX}{META_SUFFIX}");
        let mut pending = Vec::new();

        let snapshots = match fsutil::find_matching_files(&self.dir, &[snapshot_glob.as_str()]) {
            Ok(found) => found,
            Err(err) => {
                pending.push(Pending::Broken(SnapshotIssue {
                    path: self.dir.clone(),
                    reason: format!("cannot list scratch directory: {err}"),
                }));
                Vec::new()
            }
        };
        let sidecars = fsutil::find_matching_files(&self.dir, &[sidecar_glob.as_str()])
            .unwrap_or_default();

        let known: BTreeSet<&PathBuf> = snapshots.iter().collect();
        for sidecar in &sidecars {
            let orphan = snapshot_path_for_sidecar(sidecar).is_none_or(|snap| !known.contains(&snap));
            if orphan {
                pending.push(Pending::Broken(SnapshotIssue {
                    path: sidecar.clone(),
                    reason: "metadata sidecar has no snapshot".to_string(),
                }));
            }
        }
        pending.extend(snapshots.into_iter().map(Pending::Snapshot));

        SnapshotIter {
            pending: pending.into_iter(),
        }
    }

    /// Successfully loaded snapshots only; every issue is logged as a warning.
    pub fn loaded(&self) -> impl Iterator<Item = LoadedSnapshot> {
        self.iter().filter_map(|item| match item {
            Ok(snapshot) => Some(snapshot),
            Err(issue) => {
                tracing::warn!("{issue}");
                None
            }
        })
    }

    pub fn collect_all(&self) -> Collected {
        let mut out = Collected::default();
        for item in self.iter() {
            match item {
                Ok(snapshot) => out.snapshots.push(snapshot),
                Err(issue) => out.issues.push(issue),
            }
        }
        out
    }
}

impl IntoIterator for &Discovery {
    type Item = Result<LoadedSnapshot, SnapshotIssue>;
    type IntoIter = SnapshotIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

enum Pending {
    Snapshot(PathBuf),
    Broken(SnapshotIssue),
}

/// Loads lazily, one pair per `next`.
pub struct SnapshotIter {
    pending: std::vec::IntoIter<Pending>,
}

impl Iterator for SnapshotIter {
    type Item = Result<LoadedSnapshot, SnapshotIssue>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(match self.pending.next()? {
            Pending::Broken(issue) => Err(issue),
            Pending::Snapshot(path) => load_pair(path),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.pending.size_hint()
    }
}

fn load_pair(path: PathBuf) -> Result<LoadedSnapshot, SnapshotIssue> {
    let issue = |reason: String| SnapshotIssue {
        path: path.clone(),
        reason,
    };
    let meta_path = sidecar_path(&path);
    let meta = match SnapshotMeta::read_json(&meta_path) {
        Ok(meta) => meta,
        Err(ProfError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(issue("missing metadata sidecar".to_string()));
        }
        Err(err) => return Err(issue(format!("unreadable metadata sidecar: {err}"))),
    };
    let bytes = std::fs::read(&path).map_err(|err| issue(format!("unreadable snapshot: {err}")))?;
    if !meta.matches_snapshot(&bytes) {
        return Err(issue("snapshot digest does not match its metadata".to_string()));
    }
    let profile = codec::decode(&bytes).map_err(|err| issue(format!("corrupt snapshot: {err}")))?;
    Ok(LoadedSnapshot {
        path,
        profile,
        meta,
    })
}
