//! Engine-facing lifecycle: init, worker-entry hook, run-complete aggregation.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::capture::{self, Capture, Clock, MonotonicClock};
use crate::collector::{self, LoadedSnapshot};
use crate::config::{ProfileConfig, ResolvedConfig};
use crate::filter::apply_filters;
use crate::lifecycle::{UnitContext, WorkerEntry};
use crate::merge::{merge_global, merge_grouped};
use crate::paths::PathNormalizer;
use crate::report::{self, Report};
use crate::stats_dump::{RunStats, dump_run_stats};
use crate::{Profile, ProfError, ProfResult, Recorder, fsutil};

pub const GLOBAL_SECTION_TITLE: &str = "Profile";
pub const CONTROL_SECTION_TITLE: &str = "Control";

/// Decided once when the session starts.
#[derive(Clone)]
pub struct SessionOptions {
    /// Some other capture already covers this process, so no control capture is started.
    pub already_active: bool,
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("already_active", &self.already_active)
            .finish_non_exhaustive()
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            already_active: false,
            clock: Arc::new(MonotonicClock::new()),
        }
    }
}

impl SessionOptions {
    pub fn detect() -> Self {
        Self::detect_with(capture::is_active)
    }

    pub fn detect_with(probe: impl FnOnce() -> bool) -> Self {
        Self {
            already_active: probe(),
            ..Self::default()
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Per-run scratch directory, removed once the report is written.
#[derive(Debug)]
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create(root: &Path) -> ProfResult<Self> {
        let path = root.join(format!("profmerge-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path).map_err(|err| {
            ProfError::Config(format!(
                "cannot create scratch directory {}: {err}",
                path.display()
            ))
        })?;
        Ok(Self { path })
    }

    fn remove(self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "scratch directory removed"),
            Err(err) => tracing::debug!("failed to remove {}: {err}", self.path.display()),
        }
    }
}

/// One profiled run of the engine. Bound to the orchestrating thread while
/// the control capture is running.
pub struct ProfilingSession {
    config: ResolvedConfig,
    scratch: ScratchDir,
    recorder: Arc<Recorder>,
    control: Option<Capture>,
}

impl std::fmt::Debug for ProfilingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfilingSession")
            .field("scratch", &self.scratch.path)
            .field("control", &self.control.is_some())
            .finish_non_exhaustive()
    }
}

impl ProfilingSession {
    /// Resolves `config` before touching the filesystem, so a bad sort key or
    /// filter fails before any work starts.
    pub fn init(config: &ProfileConfig, options: SessionOptions) -> ProfResult<Self> {
        let config = config.resolve()?;
        let scratch = ScratchDir::create(&config.scratch_root)?;
        let recorder = match Recorder::with_clock(&scratch.path, Arc::clone(&options.clock)) {
            Ok(recorder) => Arc::new(recorder),
            Err(err) => {
                scratch.remove();
                return Err(err);
            }
        };
        let control = if options.already_active {
            tracing::info!("a capture is already active; skipping the control capture");
            None
        } else {
            Some(Capture::start(Arc::clone(&options.clock)))
        };
        tracing::info!(
            scratch = %scratch.path.display(),
            profile_forks = config.profile_forks,
            per_group = config.per_group,
            "profiling session started"
        );
        Ok(Self {
            config,
            scratch,
            recorder,
            control,
        })
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch.path
    }

    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.recorder
    }

    /// Wraps `entry` with the recorder when worker profiling is enabled.
    pub fn on_worker_entry<W, R>(&self, entry: WorkerEntry<W, R>) -> WorkerEntry<W, R>
    where
        W: UnitContext + 'static,
        R: 'static,
    {
        if !self.config.profile_forks {
            return entry;
        }
        entry.around(&self.recorder)
    }

    /// Aggregates every snapshot, writes the report to `output_target` or
    /// `sink`, dumps run statistics when configured, and removes the scratch
    /// directory. Returns the rendered report.
    pub fn on_run_complete(mut self, stats: &RunStats, sink: &mut dyn Write) -> ProfResult<String> {
        let control = self.control.take().map(Capture::stop);
        let discovery = collector::discover(&self.scratch.path);
        let report = build_report(control, discovery.loaded(), &self.config);
        let text = report::render(&report, &self.config.sort_keys, self.config.limit);

        let outcome = self.deliver(&text, stats, sink);
        self.scratch.remove();
        outcome.map(|()| text)
    }

    fn deliver(&self, text: &str, stats: &RunStats, sink: &mut dyn Write) -> ProfResult<()> {
        match &self.config.output_target {
            Some(path) => {
                fsutil::write_text(path, text).map_err(|err| {
                    ProfError::Report(format!("failed to write report {}: {err}", path.display()))
                })?;
                tracing::info!(path = %path.display(), "profile report written");
            }
            None => {
                sink.write_all(text.as_bytes())?;
                sink.flush()?;
            }
        }
        if let Some(path) = &self.config.dump_stats {
            dump_run_stats(stats, path)?;
        }
        Ok(())
    }
}

/// Merges, filters and strips `snapshots` (plus `control`) into report sections.
///
/// Global mode yields one `Profile` section. Per-group mode yields a `Control`
/// section when `control` is present, then one section per
/// `group - task - unit` in key order.
pub fn build_report<I>(control: Option<Profile>, snapshots: I, config: &ResolvedConfig) -> Report
where
    I: IntoIterator<Item = LoadedSnapshot>,
{
    let mut report = Report::default();
    if config.per_group {
        if let Some(control) = control {
            report.push(CONTROL_SECTION_TITLE, control);
        }
        for (key, profile) in merge_grouped(snapshots) {
            report.push(key.to_string(), profile);
        }
    } else {
        let merged = merge_global(control, snapshots.into_iter().map(|s| s.profile));
        report.push(GLOBAL_SECTION_TITLE, merged);
    }

    let normalizer = config
        .framework_root
        .as_ref()
        .map(|root| PathNormalizer::with_framework_root(root.to_string_lossy()))
        .unwrap_or_default();
    let hints = config.filters.path_hints();
    let hints = (!hints.is_empty()).then_some(hints.as_slice());
    for profile in report.profiles_mut() {
        let removed = apply_filters(profile, &config.filters);
        if removed > 0 {
            tracing::debug!(removed, "filtered call sites");
        }
        if config.strip_dirs {
            normalizer.strip_common_prefix(profile, hints);
        }
    }
    report
}
