//! Sorting, truncation and pstats-style text rendering.

use serde::{Deserialize, Serialize};

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::{CallSite, CallSiteStats, Profile, ProfError, ProfResult, nanos_to_secs};

/// Width of the `title ****` banner line above every section.
pub const BANNER_WIDTH: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    CumulativeTime,
    TotalTime,
    TotalCalls,
    PrimitiveCalls,
    File,
    Line,
    Name,
    Nfl,
}

impl SortKey {
    pub const ALL: [SortKey; 8] = [
        Self::CumulativeTime,
        Self::TotalTime,
        Self::TotalCalls,
        Self::PrimitiveCalls,
        Self::File,
        Self::Line,
        Self::Name,
        Self::Nfl,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CumulativeTime => "cumulative_time",
            Self::TotalTime => "total_time",
            Self::TotalCalls => "total_calls",
            Self::PrimitiveCalls => "primitive_calls",
            Self::File => "file",
            Self::Line => "line",
            Self::Name => "name",
            Self::Nfl => "nfl",
        }
    }

    /// Wording used on the `Ordered by:` line.
    pub fn description(self) -> &'static str {
        match self {
            Self::CumulativeTime => "cumulative time",
            Self::TotalTime => "internal time",
            Self::TotalCalls => "call count",
            Self::PrimitiveCalls => "primitive call count",
            Self::File => "file name",
            Self::Line => "line number",
            Self::Name => "function name",
            Self::Nfl => "name/file/line",
        }
    }

    fn compare(self, a: (&CallSite, &CallSiteStats), b: (&CallSite, &CallSiteStats)) -> Ordering {
        let (sa, xa) = a;
        let (sb, xb) = b;
        match self {
            Self::CumulativeTime => xb.cumulative_time.cmp(&xa.cumulative_time),
            Self::TotalTime => xb.total_time.cmp(&xa.total_time),
            Self::TotalCalls => xb.total_calls.cmp(&xa.total_calls),
            Self::PrimitiveCalls => xb.primitive_calls.cmp(&xa.primitive_calls),
            Self::File => sa.file.cmp(&sb.file),
            Self::Line => sa.line.cmp(&sb.line),
            Self::Name => sa.function.cmp(&sb.function),
            Self::Nfl => sa
                .function
                .cmp(&sb.function)
                .then_with(|| sa.file.cmp(&sb.file))
                .then_with(|| sa.line.cmp(&sb.line)),
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortKey {
    type Err = ProfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = match s.trim() {
            "cumulative_time" | "cumulative" | "cumtime" => Self::CumulativeTime,
            "total_time" | "tottime" | "time" => Self::TotalTime,
            "total_calls" | "calls" | "ncalls" => Self::TotalCalls,
            "primitive_calls" | "pcalls" => Self::PrimitiveCalls,
            "file" | "filename" | "module" => Self::File,
            "line" => Self::Line,
            "name" => Self::Name,
            "nfl" | "stdname" => Self::Nfl,
            other => {
                let valid: Vec<&str> = Self::ALL.iter().map(|k| k.as_str()).collect();
                return Err(ProfError::Config(format!(
                    "invalid sort key {other:?} (expected one of: {})",
                    valid.join(", ")
                )));
            }
        };
        Ok(key)
    }
}

impl clap::ValueEnum for SortKey {
    fn value_variants<'a>() -> &'a [Self] {
        &Self::ALL
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        let value = clap::builder::PossibleValue::new(self.as_str());
        Some(match self {
            Self::CumulativeTime => value.aliases(["cumulative", "cumtime"]),
            Self::TotalTime => value.aliases(["tottime", "time"]),
            Self::TotalCalls => value.aliases(["calls", "ncalls"]),
            Self::PrimitiveCalls => value.alias("pcalls"),
            Self::File => value.aliases(["filename", "module"]),
            Self::Nfl => value.alias("stdname"),
            Self::Line | Self::Name => value,
        })
    }
}

/// Parses every key, failing on the first invalid one. Empty input means the default.
pub fn parse_sort_keys<S: AsRef<str>>(keys: &[S]) -> ProfResult<Vec<SortKey>> {
    let parsed = keys
        .iter()
        .map(|k| k.as_ref())
        .filter(|k| !k.trim().is_empty())
        .map(SortKey::from_str)
        .collect::<ProfResult<Vec<_>>>()?;
    if parsed.is_empty() {
        return Ok(vec![SortKey::CumulativeTime]);
    }
    Ok(parsed)
}

/// `None` or a non-positive value means no limit.
pub fn normalize_limit(limit: Option<i64>) -> Option<usize> {
    limit
        .filter(|n| *n > 0)
        .map(|n| usize::try_from(n).unwrap_or(usize::MAX))
}

/// Entries ordered by `keys`, ties broken by call-site order, truncated to `limit`.
pub fn sorted_entries<'a>(
    profile: &'a Profile,
    keys: &[SortKey],
    limit: Option<usize>,
) -> Vec<(&'a CallSite, &'a CallSiteStats)> {
    let mut entries: Vec<_> = profile.iter().collect();
    entries.sort_by(|a, b| {
        keys.iter()
            .fold(Ordering::Equal, |acc, key| acc.then_with(|| key.compare(*a, *b)))
            .then_with(|| a.0.cmp(b.0))
    });
    if let Some(limit) = limit {
        entries.truncate(limit);
    }
    entries
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub title: String,
    pub profile: Profile,
}

impl Section {
    pub fn new(title: impl Into<String>, profile: Profile) -> Self {
        Self {
            title: title.into(),
            profile,
        }
    }
}

/// Sections rendered in order, one banner each.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    pub sections: Vec<Section>,
}

impl Report {
    pub fn single(title: impl Into<String>, profile: Profile) -> Self {
        Self {
            sections: vec![Section::new(title, profile)],
        }
    }

    pub fn push(&mut self, title: impl Into<String>, profile: Profile) {
        self.sections.push(Section::new(title, profile));
    }

    pub fn profiles_mut(&mut self) -> impl Iterator<Item = &mut Profile> {
        self.sections.iter_mut().map(|s| &mut s.profile)
    }
}

pub fn banner(title: &str) -> String {
    let title = title.trim();
    let stars = BANNER_WIDTH.saturating_sub(title.chars().count() + 1).max(3);
    format!("{title} {}", "*".repeat(stars))
}

pub fn render(report: &Report, keys: &[SortKey], limit: Option<usize>) -> String {
    let mut out = String::new();
    for section in &report.sections {
        out.push_str(&banner(&section.title));
        out.push_str("\n\n");
        out.push_str(&render_profile(&section.profile, keys, limit));
        out.push('\n');
    }
    out
}

/// One profile in the classic `ncalls tottime percall cumtime percall` layout.
pub fn render_profile(profile: &Profile, keys: &[SortKey], limit: Option<usize>) -> String {
    let mut out = String::new();
    let calls = profile.total_calls_sum();
    let prims = profile.primitive_calls_sum();
    out.push_str(&format!("         {calls} function calls"));
    if calls != prims {
        out.push_str(&format!(" ({prims} primitive calls)"));
    }
    out.push_str(&format!(" in {} seconds\n", format_seconds(profile.total_time_sum())));
    out.push('\n');

    if !keys.is_empty() {
        let ordered: Vec<&str> = keys.iter().map(|k| k.description()).collect();
        out.push_str(&format!("   Ordered by: {}\n", ordered.join(", ")));
    }
    let entries = sorted_entries(profile, keys, limit);
    if let Some(limit) = limit
        && entries.len() < profile.len()
    {
        out.push_str(&format!(
            "   List reduced from {} to {} due to restriction <{limit}>\n",
            profile.len(),
            entries.len()
        ));
    }
    out.push('\n');
    if entries.is_empty() {
        return out;
    }

    out.push_str("   ncalls  tottime  percall  cumtime  percall filename:lineno(function)\n");
    for (site, stats) in entries {
        let ncalls = if stats.total_calls == stats.primitive_calls {
            stats.total_calls.to_string()
        } else {
            format!("{}/{}", stats.total_calls, stats.primitive_calls)
        };
        out.push_str(&format!(
            "{ncalls:>9} {:>8} {:>8} {:>8} {:>8} {site}\n",
            format_seconds(stats.total_time),
            format_percall(stats.total_time, stats.total_calls),
            format_seconds(stats.cumulative_time),
            format_percall(stats.cumulative_time, stats.primitive_calls),
        ));
    }
    out
}

fn format_seconds(nanos: u64) -> String {
    format!("{:.3}", nanos_to_secs(nanos))
}

fn format_percall(nanos: u64, calls: u64) -> String {
    if calls == 0 {
        return "0.000".to_string();
    }
    format!("{:.3}", nanos_to_secs(nanos) / calls as f64)
}
