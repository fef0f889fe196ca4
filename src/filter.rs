//! Inclusion filters over call sites.
//!
//! A site survives if any rule matches it, or if there are no rules at all.
//! Removing a site takes exactly its own primitive calls, total calls and total
//! time off the profile aggregates. Cumulative time of surviving ancestors
//! still contains the time of removed descendants, so after filtering
//! `total_time_sum` undercounts the time attributable to what is left. That is
//! fine for ranking and inspection, not for exact accounting.

use std::path::{Path, PathBuf};

use crate::{CallSite, Profile, ProfError, ProfResult};

/// Spec strings that select the native marker.
pub const NATIVE_MARKERS: [&str; 2] = ["<native>", "~"];
/// Prefix of a spec string that selects by unqualified function name.
pub const FUNCTION_MARKER_PREFIX: &str = "fn:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterRule {
    /// Source path starts with this string.
    PathPrefix(String),
    /// Every call site without a source location.
    Native,
    /// Exact unqualified function name, any path.
    Function(String),
}

impl FilterRule {
    pub fn matches(&self, site: &CallSite) -> bool {
        match self {
            Self::PathPrefix(prefix) => site.file.starts_with(prefix.as_str()),
            Self::Native => site.is_native(),
            Self::Function(name) => site.unqualified_name() == name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterRules {
    rules: Vec<FilterRule>,
}

impl FilterRules {
    pub fn new(rules: Vec<FilterRule>) -> Self {
        Self { rules }
    }

    /// Parses spec strings. Module names are looked up under `roots`.
    pub fn resolve(specs: &[String], roots: &[PathBuf]) -> ProfResult<Self> {
        let mut rules = Vec::new();
        for spec in specs {
            let spec = spec.trim();
            if spec.is_empty() {
                continue;
            }
            rules.push(resolve_spec(spec, roots)?);
        }
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    pub fn retains(&self, site: &CallSite) -> bool {
        self.rules.is_empty() || self.rules.iter().any(|r| r.matches(site))
    }

    /// Path-prefix rules, used as hints for prefix stripping.
    pub fn path_hints(&self) -> Vec<String> {
        self.rules
            .iter()
            .filter_map(|r| match r {
                FilterRule::PathPrefix(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }
}

fn resolve_spec(spec: &str, roots: &[PathBuf]) -> ProfResult<FilterRule> {
    if NATIVE_MARKERS.contains(&spec) {
        return Ok(FilterRule::Native);
    }
    if let Some(name) = spec.strip_prefix(FUNCTION_MARKER_PREFIX) {
        let name = name.trim();
        if name.is_empty() {
            return Err(ProfError::Config(format!(
                "invalid filter {spec:?}: missing function name"
            )));
        }
        return Ok(FilterRule::Function(name.to_string()));
    }
    if Path::new(spec).is_absolute() {
        return Ok(FilterRule::PathPrefix(spec.to_string()));
    }
    match find_module(spec, roots) {
        Some(path) => Ok(FilterRule::PathPrefix(path.to_string_lossy().to_string())),
        None => Err(ProfError::Config(format!(
            "invalid filter {spec:?}: no module found under {}",
            describe_roots(roots)
        ))),
    }
}

/// `a.b.c` or `a::b::c` → `root/a/b/c` if it is a directory, else a file in
/// `root/a/b` whose stem is `c`. First root wins.
fn find_module(name: &str, roots: &[PathBuf]) -> Option<PathBuf> {
    let parts: Vec<&str> = name
        .split("::")
        .flat_map(|p| p.split('.'))
        .collect();
    if parts.iter().any(|p| p.is_empty() || *p == "..") {
        return None;
    }
    let (last, parents) = parts.split_last()?;
    for root in roots {
        let mut dir = root.clone();
        dir.extend(parents);
        let as_dir = dir.join(last);
        if as_dir.is_dir() {
            return Some(as_dir);
        }
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.file_stem().and_then(|s| s.to_str()) == Some(*last))
            .collect();
        files.sort();
        if let Some(file) = files.into_iter().next() {
            return Some(file);
        }
    }
    None
}

fn describe_roots(roots: &[PathBuf]) -> String {
    if roots.is_empty() {
        return "any filter root (none configured)".to_string();
    }
    roots
        .iter()
        .map(|r| r.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Drops every site no rule retains. Returns how many were removed.
pub fn apply_filters(profile: &mut Profile, rules: &FilterRules) -> usize {
    if rules.is_empty() {
        return 0;
    }
    let doomed: Vec<CallSite> = profile
        .sites()
        .filter(|site| !rules.retains(site))
        .cloned()
        .collect();
    for site in &doomed {
        profile.remove_site(site);
    }
    doomed.len()
}
