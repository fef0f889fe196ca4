//! Call-graph profile data model.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::fmt;

/// File marker used for call sites that have no source location.
pub const NATIVE_FILE: &str = "~";

/// A measured location: (file, line, function). Unique key within a profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallSite {
    pub file: String,
    pub line: u32,
    pub function: String,
}

impl CallSite {
    pub fn new(file: impl Into<String>, line: u32, function: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            function: function.into(),
        }
    }

    pub fn native(function: impl Into<String>) -> Self {
        Self::new(NATIVE_FILE, 0, function)
    }

    pub fn is_native(&self) -> bool {
        self.file == NATIVE_FILE
    }

    /// Last path segment of the function name (`a::b::run` and `a.b.run` both give `run`).
    pub fn unqualified_name(&self) -> &str {
        let tail = self
            .function
            .rsplit_once("::")
            .map_or(self.function.as_str(), |(_, t)| t);
        tail.rsplit_once('.').map_or(tail, |(_, t)| t)
    }

    pub fn with_file(&self, file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: self.line,
            function: self.function.clone(),
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_native() {
            write!(f, "{{{}}}", self.function)
        } else {
            write!(f, "{}:{}({})", self.file, self.line, self.function)
        }
    }
}

/// Nanoseconds per second. Times are stored as whole nanoseconds so sums are exact.
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Converts stored nanoseconds to seconds for display.
pub fn nanos_to_secs(nanos: u64) -> f64 {
    nanos as f64 / NANOS_PER_SEC as f64
}

/// Calls and time a call site received from one particular caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CallerStats {
    pub primitive_calls: u64,
    pub total_calls: u64,
    /// Nanoseconds.
    pub total_time: u64,
    /// Nanoseconds.
    pub cumulative_time: u64,
}

impl CallerStats {
    pub fn absorb(&mut self, other: &CallerStats) {
        self.primitive_calls += other.primitive_calls;
        self.total_calls += other.total_calls;
        self.total_time += other.total_time;
        self.cumulative_time += other.cumulative_time;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CallSiteStats {
    pub primitive_calls: u64,
    pub total_calls: u64,
    /// Own time in nanoseconds, excluding callees.
    pub total_time: u64,
    /// Nanoseconds including callees, primitive calls only.
    pub cumulative_time: u64,
    #[serde(default)]
    pub callers: BTreeMap<CallSite, CallerStats>,
}

impl CallSiteStats {
    pub fn new(primitive_calls: u64, total_calls: u64, total_time: u64, cumulative_time: u64) -> Self {
        Self {
            primitive_calls,
            total_calls,
            total_time,
            cumulative_time,
            callers: BTreeMap::new(),
        }
    }

    pub fn with_caller(mut self, caller: CallSite, stats: CallerStats) -> Self {
        self.callers.entry(caller).or_default().absorb(&stats);
        self
    }

    /// Element-wise sum, caller maps merged by caller key.
    pub fn absorb(&mut self, other: &CallSiteStats) {
        self.primitive_calls += other.primitive_calls;
        self.total_calls += other.total_calls;
        self.total_time += other.total_time;
        self.cumulative_time += other.cumulative_time;
        for (caller, stats) in &other.callers {
            self.callers.entry(caller.clone()).or_default().absorb(stats);
        }
    }
}

/// Call-site stats plus aggregate counters that always equal the sums over `sites`.
#[derive(Debug, Clone, Default)]
pub struct Profile {
    sites: BTreeMap<CallSite, CallSiteStats>,
    total_calls_sum: u64,
    primitive_calls_sum: u64,
    total_time_sum: u64,
}

// The counters are derived from the sites, so equality only looks at the sites.
impl PartialEq for Profile {
    fn eq(&self, other: &Self) -> bool {
        self.sites == other.sites
    }
}

impl Profile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sites(sites: impl IntoIterator<Item = (CallSite, CallSiteStats)>) -> Self {
        let mut profile = Self::new();
        for (site, stats) in sites {
            profile
                .sites
                .entry(site)
                .and_modify(|existing| existing.absorb(&stats))
                .or_insert(stats);
        }
        profile.recompute_totals();
        profile
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn get(&self, site: &CallSite) -> Option<&CallSiteStats> {
        self.sites.get(site)
    }

    pub fn contains(&self, site: &CallSite) -> bool {
        self.sites.contains_key(site)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CallSite, &CallSiteStats)> {
        self.sites.iter()
    }

    pub fn sites(&self) -> impl Iterator<Item = &CallSite> {
        self.sites.keys()
    }

    pub fn total_calls_sum(&self) -> u64 {
        self.total_calls_sum
    }

    pub fn primitive_calls_sum(&self) -> u64 {
        self.primitive_calls_sum
    }

    /// Nanoseconds.
    pub fn total_time_sum(&self) -> u64 {
        self.total_time_sum
    }

    /// Adds `stats` under `site`, summing into an existing entry.
    pub fn add_site(&mut self, site: CallSite, stats: CallSiteStats) {
        self.total_calls_sum += stats.total_calls;
        self.primitive_calls_sum += stats.primitive_calls;
        self.total_time_sum += stats.total_time;
        match self.sites.get_mut(&site) {
            Some(existing) => existing.absorb(&stats),
            None => {
                self.sites.insert(site, stats);
            }
        }
    }

    /// Removes a site and takes exactly its own counters off the aggregates.
    pub fn remove_site(&mut self, site: &CallSite) -> Option<CallSiteStats> {
        let stats = self.sites.remove(site)?;
        self.total_calls_sum -= stats.total_calls;
        self.primitive_calls_sum -= stats.primitive_calls;
        self.total_time_sum -= stats.total_time;
        Some(stats)
    }

    /// Merges every site of `other` into `self` and recomputes the aggregates.
    pub fn absorb(&mut self, other: Profile) {
        for (site, stats) in other.sites {
            match self.sites.get_mut(&site) {
                Some(existing) => existing.absorb(&stats),
                None => {
                    self.sites.insert(site, stats);
                }
            }
        }
        self.recompute_totals();
    }

    /// Rebuilds every key through `rename`, summing stats of keys that collide.
    pub(crate) fn rekey(&mut self, mut rename: impl FnMut(&CallSite) -> Option<CallSite>) {
        let old = std::mem::take(&mut self.sites);
        for (site, mut stats) in old {
            if stats.callers.keys().any(|c| rename(c).is_some()) {
                let callers = std::mem::take(&mut stats.callers);
                for (caller, cs) in callers {
                    let key = rename(&caller).unwrap_or(caller);
                    stats.callers.entry(key).or_default().absorb(&cs);
                }
            }
            let key = rename(&site).unwrap_or(site);
            match self.sites.get_mut(&key) {
                Some(existing) => existing.absorb(&stats),
                None => {
                    self.sites.insert(key, stats);
                }
            }
        }
        self.recompute_totals();
    }

    pub fn recompute_totals(&mut self) {
        self.total_calls_sum = self.sites.values().map(|s| s.total_calls).sum();
        self.primitive_calls_sum = self.sites.values().map(|s| s.primitive_calls).sum();
        self.total_time_sum = self.sites.values().map(|s| s.total_time).sum();
    }

    /// Whether the aggregates equal the per-site sums.
    pub fn totals_consistent(&self) -> bool {
        let calls: u64 = self.sites.values().map(|s| s.total_calls).sum();
        let prims: u64 = self.sites.values().map(|s| s.primitive_calls).sum();
        let time: u64 = self.sites.values().map(|s| s.total_time).sum();
        calls == self.total_calls_sum && prims == self.primitive_calls_sum && time == self.total_time_sum
    }
}

impl FromIterator<(CallSite, CallSiteStats)> for Profile {
    fn from_iter<T: IntoIterator<Item = (CallSite, CallSiteStats)>>(iter: T) -> Self {
        Self::from_sites(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unqualified_name_strips_rust_and_dotted_paths() {
        assert_eq!(CallSite::new("/a.rs", 1, "engine::worker::run").unqualified_name(), "run");
        assert_eq!(CallSite::new("/a.py", 1, "Worker.run").unqualified_name(), "run");
        assert_eq!(CallSite::new("/a.py", 1, "run").unqualified_name(), "run");
    }

    #[test]
    fn display_uses_braces_for_native_sites() {
        assert_eq!(CallSite::native("sleep").to_string(), "{sleep}");
        assert_eq!(CallSite::new("/app/x.py", 10, "f").to_string(), "/app/x.py:10(f)");
    }

    #[test]
    fn add_and_remove_keep_counters_consistent() {
        let mut p = Profile::new();
        p.add_site(CallSite::new("/a", 1, "f"), CallSiteStats::new(2, 3, 500_000_000, 1_000_000_000));
        p.add_site(CallSite::new("/a", 1, "f"), CallSiteStats::new(1, 1, 250_000_000, 250_000_000));
        p.add_site(CallSite::new("/b", 2, "g"), CallSiteStats::new(4, 4, 100_000_001, 100_000_001));
        assert_eq!(p.len(), 2);
        assert_eq!(p.total_calls_sum(), 8);
        assert_eq!(p.primitive_calls_sum(), 7);
        assert_eq!(p.total_time_sum(), 850_000_001);

        let removed = p.remove_site(&CallSite::new("/b", 2, "g")).expect("present");
        assert_eq!(removed.total_calls, 4);
        assert_eq!(p.total_calls_sum(), 4);
        assert_eq!(p.total_time_sum(), 750_000_000);
        assert!(p.totals_consistent());
    }

    #[test]
    fn rekey_merges_colliding_sites_and_callers() {
        let caller = CallSite::new("/abs/main.rs", 1, "main");
        let mut p = Profile::from_sites([
            (
                CallSite::new("/abs/x.rs", 3, "f"),
                CallSiteStats::new(1, 1, 500, 500).with_caller(
                    caller.clone(),
                    CallerStats { primitive_calls: 1, total_calls: 1, total_time: 500, cumulative_time: 500 },
                ),
            ),
            (CallSite::new("x.rs", 3, "f"), CallSiteStats::new(2, 2, 250, 250)),
        ]);
        p.rekey(|s| s.file.strip_prefix("/abs/").map(|rest| s.with_file(rest)));
        assert_eq!(p.len(), 1);
        let stats = p.get(&CallSite::new("x.rs", 3, "f")).expect("merged");
        assert_eq!(stats.total_calls, 3);
        assert_eq!(stats.total_time, 750);
        assert!(stats.callers.contains_key(&CallSite::new("main.rs", 1, "main")));
        assert!(p.totals_consistent());
    }

    #[test]
    fn nanos_convert_to_seconds_for_display() {
        assert_eq!(nanos_to_secs(1_500_000_000), 1.5);
        assert_eq!(nanos_to_secs(0), 0.0);
    }
}
