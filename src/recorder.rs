//! Per-invocation snapshot recording for worker entry points.

use time::OffsetDateTime;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::capture::{Capture, Clock, MonotonicClock};
use crate::lifecycle::{AroundHook, UnitContext, WorkerEntry};
use crate::metadata::{SNAPSHOT_SUFFIX, SnapshotMeta, UnitInfo, sanitize_component, sidecar_path};
use crate::{ProfError, ProfResult, codec, fsutil};

/// Writes one snapshot plus sidecar into the scratch directory per wrapped call.
pub struct Recorder {
    scratch_dir: PathBuf,
    clock: Arc<dyn Clock>,
    last_timestamp: AtomicU64,
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("scratch_dir", &self.scratch_dir)
            .finish_non_exhaustive()
    }
}

impl Recorder {
    /// Validates the scratch directory once; later write failures surface per call.
    pub fn new(scratch_dir: impl Into<PathBuf>) -> ProfResult<Self> {
        Self::with_clock(scratch_dir, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(scratch_dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> ProfResult<Self> {
        let scratch_dir = scratch_dir.into();
        fsutil::ensure_writable_dir(&scratch_dir).map_err(|err| {
            ProfError::Config(format!(
                "scratch directory {} is not usable: {err}",
                scratch_dir.display()
            ))
        })?;
        Ok(Self {
            scratch_dir,
            clock,
            last_timestamp: AtomicU64::new(0),
        })
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Wraps `entry` so every call is captured and persisted independently.
    pub fn wrap<W, R>(self: &Arc<Self>, entry: WorkerEntry<W, R>) -> WorkerEntry<W, R>
    where
        W: UnitContext + 'static,
        R: 'static,
    {
        let recorder = Arc::clone(self);
        let name = entry.name().to_string();
        WorkerEntry::new(name.clone(), move |worker: &W| {
            recorder.record(&name, worker, |w| entry.call(w))
        })
    }

    fn record<W, R>(
        &self,
        name: &str,
        worker: &W,
        run: impl FnOnce(&W) -> anyhow::Result<R>,
    ) -> anyhow::Result<R>
    where
        W: UnitContext,
    {
        let mut in_flight = InFlight {
            recorder: self,
            name,
            unit: worker.unit_info(),
            capture: Some(Capture::start(Arc::clone(&self.clock))),
        };
        let result = run(worker);
        let persisted = in_flight.finish();
        match (result, persisted) {
            (Ok(value), Ok(_)) => Ok(value),
            (Ok(_), Err(err)) => Err(err.into()),
            (Err(err), Ok(_)) => Err(err),
            (Err(err), Err(write_err)) => {
                tracing::error!("entry point {name} failed and its snapshot was lost: {write_err}");
                Err(err)
            }
        }
    }

    fn next_timestamp(&self) -> u64 {
        let now = u64::try_from(OffsetDateTime::now_utc().unix_timestamp_nanos()).unwrap_or(0);
        let mut last = self.last_timestamp.load(Ordering::Relaxed);
        loop {
            let next = now.max(last.saturating_add(1));
            match self.last_timestamp.compare_exchange_weak(
                last,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }

    /// Writes the snapshot, then its sidecar. Returns the snapshot path.
    pub fn persist(&self, entry_point: &str, unit: UnitInfo, profile: &crate::Profile) -> ProfResult<PathBuf> {
        let pid = std::process::id();
        let timestamp = self.next_timestamp();
        let file_name = format!(
            "{}-{pid}-{timestamp}{SNAPSHOT_SUFFIX}",
            sanitize_component(entry_point)
        );
        let snapshot_path = self.scratch_dir.join(file_name);
        let bytes = codec::encode(profile)?;
        let meta = SnapshotMeta::new(unit, entry_point, pid, timestamp, OffsetDateTime::now_utc(), &bytes);

        fsutil::write_atomic(&snapshot_path, &bytes).map_err(|err| {
            ProfError::Record(format!(
                "failed to write snapshot {}: {err}",
                snapshot_path.display()
            ))
        })?;
        let meta_path = sidecar_path(&snapshot_path);
        meta.write_json(&meta_path).map_err(|err| {
            ProfError::Record(format!(
                "failed to write snapshot metadata {}: {err}",
                meta_path.display()
            ))
        })?;
        tracing::debug!(
            snapshot = %snapshot_path.display(),
            sites = profile.len(),
            "snapshot recorded"
        );
        Ok(snapshot_path)
    }
}

impl AroundHook for Arc<Recorder> {
    fn around<W, R>(&self, entry: WorkerEntry<W, R>) -> WorkerEntry<W, R>
    where
        W: UnitContext + 'static,
        R: 'static,
    {
        self.wrap(entry)
    }
}

/// Capture in progress for one call. Persists from `Drop` if the call unwinds.
struct InFlight<'a> {
    recorder: &'a Recorder,
    name: &'a str,
    unit: UnitInfo,
    capture: Option<Capture>,
}

impl InFlight<'_> {
    fn finish(&mut self) -> ProfResult<PathBuf> {
        let Some(capture) = self.capture.take() else {
            return Err(ProfError::Record(format!("snapshot for {} already taken", self.name)));
        };
        let profile = capture.stop();
        self.recorder
            .persist(self.name, self.unit.clone(), &profile)
            .inspect_err(|err| tracing::error!("{err}"))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.capture.is_some() {
            tracing::warn!("entry point {} unwound; recording partial snapshot", self.name);
            let _ = self.finish();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ManualClock, enter};
    use crate::{CallSite, collector};

    use std::time::Duration;

    struct Worker {
        unit: UnitInfo,
    }

    impl UnitContext for Worker {
        fn unit_info(&self) -> UnitInfo {
            self.unit.clone()
        }
    }

    fn worker(host: &str) -> Worker {
        Worker {
            unit: UnitInfo {
                execution_unit_id: host.to_string(),
                task_name: "gather facts".to_string(),
                task_id: "t-1".to_string(),
                group_name: "site".to_string(),
            },
        }
    }

    fn work_entry(clock: Arc<ManualClock>) -> WorkerEntry<Worker, String> {
        WorkerEntry::new("engine::worker::run", move |w: &Worker| {
            let _g = enter(CallSite::new("/app/worker.rs", 12, "run"));
            clock.advance(Duration::from_millis(500));
            Ok(w.unit.execution_unit_id.clone())
        })
    }

    #[test]
    fn each_call_writes_a_snapshot_and_sidecar() {
        let dir = fsutil::temp_dir("recorder");
        let clock = Arc::new(ManualClock::new());
        let recorder = Arc::new(Recorder::with_clock(&dir, clock.clone()).expect("recorder"));
        let entry = work_entry(clock).around(&recorder);

        assert_eq!(entry.call(&worker("web-1")).expect("call"), "web-1");
        assert_eq!(entry.call(&worker("web-2")).expect("call"), "web-2");

        let collected = collector::discover(&dir).collect_all();
        assert!(collected.issues.is_empty(), "issues: {:?}", collected.issues);
        assert_eq!(collected.snapshots.len(), 2);
        let units: Vec<_> = collected
            .snapshots
            .iter()
            .map(|s| s.meta.execution_unit_id.clone())
            .collect();
        assert!(units.contains(&"web-1".to_string()));
        assert!(units.contains(&"web-2".to_string()));
        for snap in &collected.snapshots {
            assert_eq!(snap.meta.pid, std::process::id());
            assert_eq!(snap.meta.entry_point, "engine::worker::run");
            let stats = snap
                .profile
                .get(&CallSite::new("/app/worker.rs", 12, "run"))
                .expect("site");
            assert_eq!(stats.cumulative_time, 500_000_000);
        }
    }

    #[test]
    fn entry_errors_propagate_and_still_record() {
        let dir = fsutil::temp_dir("recorder-err");
        let recorder = Arc::new(Recorder::new(&dir).expect("recorder"));
        let entry: WorkerEntry<Worker, ()> =
            WorkerEntry::new("fails", |_| Err(anyhow::anyhow!("task failed"))).around(&recorder);
        let err = entry.call(&worker("db-1")).expect_err("must fail");
        assert_eq!(err.to_string(), "task failed");
        assert_eq!(collector::discover(&dir).collect_all().snapshots.len(), 1);
    }

    #[test]
    fn panicking_entry_still_records() {
        let dir = fsutil::temp_dir("recorder-panic");
        let recorder = Arc::new(Recorder::new(&dir).expect("recorder"));
        let entry: WorkerEntry<Worker, ()> =
            WorkerEntry::new("panics", |_| panic!("worker crashed")).around(&recorder);
        let w = worker("db-2");
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| entry.call(&w)));
        assert!(outcome.is_err());
        assert_eq!(collector::discover(&dir).collect_all().snapshots.len(), 1);
    }

    #[test]
    fn write_failure_after_validation_is_a_record_error() {
        let dir = fsutil::temp_dir("recorder-gone");
        let recorder = Arc::new(Recorder::new(&dir).expect("recorder"));
        std::fs::remove_dir_all(&dir).expect("remove scratch");
        let entry: WorkerEntry<Worker, u8> = WorkerEntry::new("ok", |_| Ok(7)).around(&recorder);
        let err = entry.call(&worker("web-3")).expect_err("must fail");
        match err.downcast_ref::<ProfError>() {
            Some(ProfError::Record(msg)) => assert!(msg.contains("failed to write snapshot")),
            other => panic!("expected record error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_missing_scratch_directory() {
        let dir = fsutil::temp_dir("recorder-missing").join("nope");
        let err = Recorder::new(&dir).expect_err("must fail");
        assert!(matches!(err, ProfError::Config(_)));
    }

    #[test]
    fn timestamps_are_strictly_increasing() {
        let dir = fsutil::temp_dir("recorder-ts");
        let recorder = Recorder::new(&dir).expect("recorder");
        let a = recorder.next_timestamp();
        let b = recorder.next_timestamp();
        let c = recorder.next_timestamp();
        assert!(a < b && b < c);
    }
}
