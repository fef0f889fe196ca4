//! Small filesystem utilities.

use globset::{Glob, GlobSet, GlobSetBuilder};

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::{ProfError, ProfResult};

/// Files directly inside `dir` whose name matches any pattern, sorted by file name.
pub fn find_matching_files(dir: &Path, patterns: &[&str]) -> ProfResult<Vec<PathBuf>> {
    let set = compile_globset(patterns)?;
    let mut out = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            let msg = e.to_string();
            ProfError::Io(e.into_io_error().unwrap_or_else(|| std::io::Error::other(msg)))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        if set.is_match(entry.file_name()) {
            out.push(entry.into_path());
        }
    }
    Ok(out)
}

fn compile_globset(patterns: &[&str]) -> ProfResult<GlobSet> {
    let mut b = GlobSetBuilder::new();
    for p in patterns {
        let g = Glob::new(p)
            .map_err(|e| ProfError::InvalidArgument(format!("invalid glob {p:?}: {e}")))?;
        b.add(g);
    }
    b.build()
        .map_err(|e| ProfError::InvalidArgument(format!("invalid globset: {e}")))
}

/// Writes `bytes` to a hidden sibling temp file and renames it over `path`,
/// so readers never observe a partially written file under the final name.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> ProfResult<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ProfError::InvalidArgument(format!("not a file path: {}", path.display())))?;
    let tmp = parent.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));
    if let Err(err) = std::fs::write(&tmp, bytes) {
        let _ = std::fs::remove_file(&tmp);
        return Err(err.into());
    }
    if let Err(err) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

/// Fails unless `dir` is an existing directory we can create files in.
pub fn ensure_writable_dir(dir: &Path) -> ProfResult<()> {
    if !dir.is_dir() {
        return Err(ProfError::InvalidArgument(format!(
            "{} is not a directory",
            dir.display()
        )));
    }
    let probe = dir.join(format!(".probe-{}", uuid::Uuid::new_v4()));
    std::fs::write(&probe, b"")?;
    std::fs::remove_file(&probe)?;
    Ok(())
}

pub fn write_json(path: &Path, value: &impl serde::Serialize) -> ProfResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_vec_pretty(value)?)?;
    Ok(())
}

pub fn write_text(path: &Path, value: &str) -> ProfResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, value)?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("profmerge-{name}-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("mkdir");
    dir
}
