//! `profmerge.toml` config loading, environment overrides and resolution.

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};

use crate::filter::FilterRules;
use crate::report::{SortKey, normalize_limit, parse_sort_keys};
use crate::{ProfError, ProfResult};

pub const DEFAULT_CONFIG_FILE: &str = "profmerge.toml";

pub const ENV_FILTERS: &str = "PROFMERGE_FILTERS";
pub const ENV_SORT: &str = "PROFMERGE_SORT";
pub const ENV_STRIP_DIRS: &str = "PROFMERGE_STRIP_DIRS";
pub const ENV_PER_GROUP: &str = "PROFMERGE_PER_GROUP";
pub const ENV_PROFILE_FORKS: &str = "PROFMERGE_PROFILE_FORKS";
pub const ENV_LIMIT: &str = "PROFMERGE_LIMIT";
pub const ENV_OUTPUT: &str = "PROFMERGE_OUTPUT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct ProfileConfig {
    /// Inclusion filter specs; empty keeps every call site.
    #[serde(default)]
    pub filters: Vec<String>,

    /// Sort keys, most significant first.
    #[serde(default = "default_sort")]
    pub sort: Vec<String>,

    #[serde(default = "default_true")]
    pub strip_dirs: bool,

    /// One report section per (group, task, execution unit).
    #[serde(default)]
    pub per_group: bool,

    #[serde(default)]
    pub limit: Option<i64>,

    /// Report file. Unset writes to the caller's sink.
    #[serde(default)]
    pub output_target: Option<PathBuf>,

    /// Record a snapshot for every worker entry point invocation.
    #[serde(default = "default_true")]
    pub profile_forks: bool,

    /// JSON file receiving the run's custom statistics.
    #[serde(default)]
    pub dump_stats: Option<PathBuf>,

    #[serde(default)]
    pub framework_root: Option<PathBuf>,

    /// Directories searched when a filter names a module.
    #[serde(default)]
    pub filter_roots: Vec<PathBuf>,

    /// Parent of the per-run scratch directory. Defaults to the system temp dir.
    #[serde(default)]
    pub scratch_root: Option<PathBuf>,
}

fn default_sort() -> Vec<String> {
    vec![SortKey::CumulativeTime.as_str().to_string()]
}

fn default_true() -> bool {
    true
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            sort: default_sort(),
            strip_dirs: true,
            per_group: false,
            limit: None,
            output_target: None,
            profile_forks: true,
            dump_stats: None,
            framework_root: None,
            filter_roots: Vec::new(),
            scratch_root: None,
        }
    }
}

impl ProfileConfig {
    /// Missing file gives defaults; an unreadable or malformed one is logged and ignored.
    pub fn load_optional(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => match toml::from_str::<ProfileConfig>(&s) {
                Ok(cfg) => cfg,
                Err(err) => {
                    tracing::warn!("failed to parse config {}: {err}", path.display());
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("failed to read config {}: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn load(path: &Path) -> ProfResult<Self> {
        let s = std::fs::read_to_string(path)
            .map_err(|err| ProfError::Config(format!("failed to read config {}: {err}", path.display())))?;
        toml::from_str(&s)
            .map_err(|err| ProfError::Config(format!("failed to parse config {}: {err}", path.display())))
    }

    pub fn apply_env(&mut self) -> ProfResult<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Overrides fields from `lookup` (an environment accessor).
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> ProfResult<()> {
        if let Some(v) = lookup(ENV_FILTERS) {
            self.filters = split_list(&v);
        }
        if let Some(v) = lookup(ENV_SORT) {
            self.sort = split_list(&v);
        }
        if let Some(v) = lookup(ENV_STRIP_DIRS) {
            self.strip_dirs = parse_bool(ENV_STRIP_DIRS, &v)?;
        }
        if let Some(v) = lookup(ENV_PER_GROUP) {
            self.per_group = parse_bool(ENV_PER_GROUP, &v)?;
        }
        if let Some(v) = lookup(ENV_PROFILE_FORKS) {
            self.profile_forks = parse_bool(ENV_PROFILE_FORKS, &v)?;
        }
        if let Some(v) = lookup(ENV_LIMIT) {
            let v = v.trim();
            self.limit = if v.is_empty() {
                None
            } else {
                Some(v.parse::<i64>().map_err(|_| {
                    ProfError::Config(format!("{ENV_LIMIT}={v:?} is not an integer"))
                })?)
            };
        }
        if let Some(v) = lookup(ENV_OUTPUT) {
            let v = v.trim();
            self.output_target = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        Ok(())
    }

    /// Validates sort keys and filter specs before any profiling starts.
    pub fn resolve(&self) -> ProfResult<ResolvedConfig> {
        let sort_keys = parse_sort_keys(&self.sort)?;
        let filters = FilterRules::resolve(&self.filters, &self.filter_roots)?;
        Ok(ResolvedConfig {
            filters,
            sort_keys,
            strip_dirs: self.strip_dirs,
            per_group: self.per_group,
            limit: normalize_limit(self.limit),
            output_target: self.output_target.clone(),
            profile_forks: self.profile_forks,
            dump_stats: self.dump_stats.clone(),
            framework_root: self.framework_root.clone(),
            scratch_root: self
                .scratch_root
                .clone()
                .unwrap_or_else(std::env::temp_dir),
        })
    }
}

/// Validated configuration consumed by the session and the report command.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub filters: FilterRules,
    pub sort_keys: Vec<SortKey>,
    pub strip_dirs: bool,
    pub per_group: bool,
    pub limit: Option<usize>,
    pub output_target: Option<PathBuf>,
    pub profile_forks: bool,
    pub dump_stats: Option<PathBuf>,
    pub framework_root: Option<PathBuf>,
    pub scratch_root: PathBuf,
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_bool(name: &str, value: &str) -> ProfResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ProfError::Config(format!("{name}={other:?} is not a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsutil;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ProfileConfig::default();
        assert_eq!(cfg.sort, vec!["cumulative_time"]);
        assert!(cfg.strip_dirs && cfg.profile_forks && !cfg.per_group);
        let resolved = cfg.resolve().expect("resolve");
        assert!(resolved.filters.is_empty());
        assert_eq!(resolved.sort_keys, vec![SortKey::CumulativeTime]);
        assert_eq!(resolved.limit, None);
        assert_eq!(resolved.scratch_root, std::env::temp_dir());
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let dir = fsutil::temp_dir("config");
        let path = dir.join(DEFAULT_CONFIG_FILE);
        std::fs::write(
            &path,
            "sort = [\"tottime\", \"calls\"]\nper_group = true\nlimit = 25\nfilters = [\"/srv/app\"]\n",
        )
        .expect("write");
        let cfg = ProfileConfig::load(&path).expect("load");
        assert!(cfg.per_group);
        assert!(cfg.strip_dirs);
        let resolved = cfg.resolve().expect("resolve");
        assert_eq!(resolved.sort_keys, vec![SortKey::TotalTime, SortKey::TotalCalls]);
        assert_eq!(resolved.limit, Some(25));
        assert_eq!(resolved.filters.path_hints(), vec!["/srv/app".to_string()]);
    }

    #[test]
    fn malformed_file_is_strict_error_but_optional_default() {
        let dir = fsutil::temp_dir("config-bad");
        let path = dir.join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "per_group = \"maybe\"\n").expect("write");
        assert!(matches!(ProfileConfig::load(&path), Err(ProfError::Config(_))));
        assert_eq!(ProfileConfig::load_optional(&path), ProfileConfig::default());
        assert_eq!(
            ProfileConfig::load_optional(&dir.join("absent.toml")),
            ProfileConfig::default()
        );
    }

    #[test]
    fn environment_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_SORT, "calls, name"),
            (ENV_FILTERS, "<native>,fn:run"),
            (ENV_STRIP_DIRS, "off"),
            (ENV_LIMIT, "-1"),
            (ENV_OUTPUT, "/tmp/report.txt"),
        ]);
        let mut cfg = ProfileConfig::default();
        cfg.apply_env_from(|k| env.get(k).map(ToString::to_string))
            .expect("env");
        assert_eq!(cfg.sort, vec!["calls", "name"]);
        assert!(!cfg.strip_dirs);
        assert_eq!(cfg.limit, Some(-1));
        let resolved = cfg.resolve().expect("resolve");
        assert_eq!(resolved.limit, None);
        assert_eq!(resolved.filters.rules().len(), 2);
        assert_eq!(resolved.output_target, Some(PathBuf::from("/tmp/report.txt")));
    }

    #[test]
    fn invalid_values_fail_fast_naming_the_value() {
        let mut cfg = ProfileConfig::default();
        let err = cfg
            .apply_env_from(|k| (k == ENV_PER_GROUP).then(|| "sometimes".to_string()))
            .expect_err("bad bool");
        assert!(err.to_string().contains("sometimes"));

        cfg.sort = vec!["cumulative".to_string(), "fastest".to_string()];
        let err = cfg.resolve().expect_err("bad sort");
        assert!(matches!(&err, ProfError::Config(msg) if msg.contains("fastest")));
    }
}
