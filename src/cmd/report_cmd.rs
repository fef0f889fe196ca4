//! Offline aggregation of a scratch directory (`profmerge report ...`).

use clap::Args;
use serde::{Deserialize, Serialize};

use std::path::PathBuf;

use crate::collector;
use crate::config::ProfileConfig;
use crate::report::{self, SortKey};
use crate::session::build_report;
use crate::{ProfError, ProfResult, fsutil};

#[derive(Debug, Clone, Default, Args)]
pub struct ReportArgs {
    /// Scratch directory holding `*.snapshot.json` files and their sidecars
    #[arg(long, value_name = "DIR")]
    pub scratch: PathBuf,
    /// Sort key (repeatable, most significant first)
    #[arg(long = "sort", value_enum, value_name = "KEY")]
    pub sort: Vec<SortKey>,
    /// Inclusion filter: absolute path prefix, `<native>`, `fn:NAME`, or module name
    #[arg(long = "filter", value_name = "SPEC")]
    pub filters: Vec<String>,
    /// One section per group, task and execution unit
    #[arg(long)]
    pub per_group: bool,
    /// Keep at most N entries per section (0 or negative: unlimited)
    #[arg(long, allow_negative_numbers = true)]
    pub limit: Option<i64>,
    /// Print full paths instead of stripping the common prefix
    #[arg(long)]
    pub no_strip_dirs: bool,
    /// Write the report to this file instead of stdout
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportOutcome {
    pub scratch: PathBuf,
    pub snapshots: usize,
    pub skipped: Vec<String>,
    pub sections: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    pub content: String,
}

/// Command-line flags override `config`; the scratch directory is left in place.
pub fn report_command(config: &ProfileConfig, args: &ReportArgs) -> ProfResult<ReportOutcome> {
    if !args.scratch.is_dir() {
        return Err(ProfError::InvalidArgument(format!(
            "scratch directory {} does not exist",
            args.scratch.display()
        )));
    }
    let mut config = config.clone();
    if !args.sort.is_empty() {
        config.sort = args.sort.iter().map(ToString::to_string).collect();
    }
    if !args.filters.is_empty() {
        config.filters = args.filters.clone();
    }
    config.per_group |= args.per_group;
    if args.limit.is_some() {
        config.limit = args.limit;
    }
    config.strip_dirs &= !args.no_strip_dirs;
    if args.out.is_some() {
        config.output_target = args.out.clone();
    }
    let resolved = config.resolve()?;

    let collected = collector::discover(&args.scratch).collect_all();
    for issue in &collected.issues {
        tracing::warn!("{issue}");
    }
    let snapshots = collected.snapshots.len();
    let report = build_report(None, collected.snapshots, &resolved);
    let content = report::render(&report, &resolved.sort_keys, resolved.limit);
    if let Some(path) = &resolved.output_target {
        fsutil::write_text(path, &content).map_err(|err| {
            ProfError::Report(format!("failed to write report {}: {err}", path.display()))
        })?;
    }

    Ok(ReportOutcome {
        scratch: args.scratch.clone(),
        snapshots,
        skipped: collected.issues.iter().map(ToString::to_string).collect(),
        sections: report.sections.iter().map(|s| s.title.clone()).collect(),
        output: resolved.output_target,
        content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::UnitInfo;
    use crate::{CallSite, CallSiteStats, Profile, Recorder};

    fn unit(host: &str) -> UnitInfo {
        UnitInfo {
            execution_unit_id: host.to_string(),
            task_name: "restart".to_string(),
            task_id: "t-3".to_string(),
            group_name: "web".to_string(),
        }
    }

    fn populated_scratch(name: &str) -> PathBuf {
        let dir = fsutil::temp_dir(name);
        let recorder = Recorder::new(&dir).expect("recorder");
        for (host, calls) in [("h1", 3), ("h2", 2)] {
            let profile = Profile::from_sites([
                (CallSite::new("/opt/app/svc/a.rs", 10, "handle"), CallSiteStats::new(calls, calls, 300_000_000, 600_000_000)),
                (CallSite::new("/usr/lib/std/io.rs", 4, "write"), CallSiteStats::new(1, 1, 100_000_000, 100_000_000)),
            ]);
            recorder.persist("run", unit(host), &profile).expect("persist");
        }
        dir
    }

    #[test]
    fn aggregates_filters_and_leaves_scratch_in_place() {
        let dir = populated_scratch("report-cmd");
        let args = ReportArgs {
            scratch: dir.clone(),
            filters: vec!["/opt/app/".to_string()],
            ..ReportArgs::default()
        };
        let outcome = report_command(&ProfileConfig::default(), &args).expect("report");
        assert_eq!(outcome.snapshots, 2);
        assert!(outcome.skipped.is_empty());
        assert_eq!(outcome.sections, vec!["Profile"]);
        assert!(outcome.content.contains("5 function calls in 0.600 seconds"));
        assert!(outcome.content.contains("svc/a.rs:10(handle)"));
        assert!(!outcome.content.contains("io.rs"));
        assert!(dir.is_dir());
    }

    #[test]
    fn per_group_without_control_and_output_file() {
        let dir = populated_scratch("report-cmd-groups");
        let out = dir.join("report.txt");
        let args = ReportArgs {
            scratch: dir.clone(),
            per_group: true,
            sort: vec![SortKey::TotalCalls],
            limit: Some(1),
            no_strip_dirs: true,
            out: Some(out.clone()),
            ..ReportArgs::default()
        };
        let outcome = report_command(&ProfileConfig::default(), &args).expect("report");
        assert_eq!(outcome.sections, vec!["web - restart - h1", "web - restart - h2"]);
        assert_eq!(std::fs::read_to_string(&out).expect("out"), outcome.content);
        assert!(outcome.content.contains("/opt/app/svc/a.rs:10(handle)"));
        assert!(outcome.content.contains("List reduced from 2 to 1 due to restriction <1>"));
    }

    #[test]
    fn missing_scratch_is_invalid_argument() {
        let args = ReportArgs {
            scratch: fsutil::temp_dir("report-cmd-missing").join("gone"),
            ..ReportArgs::default()
        };
        let err = report_command(&ProfileConfig::default(), &args).expect_err("must fail");
        assert!(matches!(err, ProfError::InvalidArgument(_)));
    }
}
