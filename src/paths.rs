//! Common path-prefix stripping for readable reports.

use crate::Profile;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathNormalizer {
    framework_root: Option<String>,
}

impl PathNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps the last component of `root` visible whenever the stripped prefix
    /// would otherwise swallow it.
    pub fn with_framework_root(root: impl Into<String>) -> Self {
        let root = root.into();
        let root = root.trim_end_matches('/');
        Self {
            framework_root: (!root.is_empty()).then(|| root.to_string()),
        }
    }

    pub fn framework_root(&self) -> Option<&str> {
        self.framework_root.as_deref()
    }

    /// Strips the longest common directory from every absolute path in
    /// `profile` (site keys and caller keys). With `hints`, the prefix comes
    /// from the hints' directories instead of the profile. Returns the
    /// stripped prefix, with a trailing `/`, or `None` when no key changed.
    pub fn strip_common_prefix(&self, profile: &mut Profile, hints: Option<&[String]>) -> Option<String> {
        let dirs: Vec<&str> = match hints {
            Some(hints) if !hints.is_empty() => hints
                .iter()
                .map(String::as_str)
                .filter(|h| h.starts_with('/'))
                .map(dirname)
                .collect(),
            _ => profile
                .sites()
                .filter(|s| s.file.starts_with('/'))
                .map(|s| dirname(&s.file))
                .collect(),
        };
        let mut prefix = common_dir(&dirs)?;
        if let Some(widened) = self.widen(&prefix) {
            prefix = widened;
        }
        if prefix == "/" {
            return None;
        }
        let prefix = format!("{prefix}/");
        let mut changed = false;
        profile.rekey(|site| {
            let renamed = site
                .file
                .strip_prefix(prefix.as_str())
                .map(|rest| site.with_file(rest));
            changed |= renamed.is_some();
            renamed
        });
        if !changed {
            return None;
        }
        tracing::debug!(prefix = %prefix, "stripped common path prefix");
        Some(prefix)
    }

    fn widen(&self, prefix: &str) -> Option<String> {
        let root = self.framework_root.as_deref()?;
        let below = prefix == root
            || prefix
                .strip_prefix(root)
                .is_some_and(|rest| rest.starts_with('/'));
        if !below {
            return None;
        }
        Some(dirname(root).to_string())
    }
}

/// Directory part of a `/`-separated path. A trailing slash names the
/// directory itself, so `/app/` gives `/app`.
fn dirname(path: &str) -> &str {
    let Some(idx) = path.rfind('/') else {
        return "";
    };
    let head = &path[..=idx];
    let trimmed = head.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

/// Component-wise common directory of absolute paths; `None` when empty.
/// Components are compared verbatim (`.` and empty segments included) so the
/// result is a textual prefix of every input.
fn common_dir(dirs: &[&str]) -> Option<String> {
    let (first, rest) = dirs.split_first()?;
    let mut common: Vec<&str> = components(first).collect();
    for dir in rest {
        let shared = common
            .iter()
            .zip(components(dir))
            .take_while(|(a, b)| **a == *b)
            .count();
        common.truncate(shared);
    }
    Some(format!("/{}", common.join("/")))
}

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.strip_prefix('/').unwrap_or(path).split('/')
}
