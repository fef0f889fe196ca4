//! In-process call-graph capture.
//!
//! A [`Capture`] owns a slot on a thread-local stack of active captures.
//! Instrumented code calls [`enter`] (or [`profile_scope!`](crate::profile_scope))
//! and holds the returned [`SpanGuard`] for the duration of the call; the
//! innermost active capture receives the measurement when the guard drops.
//! With no capture active, guards are inert.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{CallSite, CallSiteStats, Profile};

/// Source of timestamps in nanoseconds. Only differences are used.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.now.fetch_add(nanos, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

struct Frame {
    site: CallSite,
    start: u64,
    children: u64,
    recursive: bool,
}

struct CaptureState {
    id: u64,
    clock: Arc<dyn Clock>,
    frames: Vec<Frame>,
    sites: BTreeMap<CallSite, CallSiteStats>,
}

impl CaptureState {
    fn push(&mut self, site: CallSite) -> usize {
        let recursive = self.frames.iter().any(|f| f.site == site);
        let depth = self.frames.len();
        self.frames.push(Frame {
            site,
            start: self.clock.now(),
            children: 0,
            recursive,
        });
        depth
    }

    fn unwind_to(&mut self, depth: usize) {
        if self.frames.len() <= depth {
            return;
        }
        let now = self.clock.now();
        while self.frames.len() > depth {
            self.close_top(now);
        }
    }

    fn close_top(&mut self, now: u64) {
        let Some(frame) = self.frames.pop() else {
            return;
        };
        let elapsed = now.saturating_sub(frame.start);
        let own = elapsed.saturating_sub(frame.children);
        let caller = self.frames.last_mut().map(|parent| {
            parent.children += elapsed;
            parent.site.clone()
        });

        let stats = self.sites.entry(frame.site).or_default();
        stats.total_calls += 1;
        stats.total_time += own;
        if !frame.recursive {
            stats.primitive_calls += 1;
            stats.cumulative_time += elapsed;
        }
        if let Some(caller) = caller {
            let cs = stats.callers.entry(caller).or_default();
            cs.total_calls += 1;
            cs.total_time += own;
            if !frame.recursive {
                cs.primitive_calls += 1;
                cs.cumulative_time += elapsed;
            }
        }
    }
}

thread_local! {
    static ACTIVE: RefCell<Vec<CaptureState>> = const { RefCell::new(Vec::new()) };
}

static NEXT_CAPTURE_ID: AtomicU64 = AtomicU64::new(1);

/// A running capture bound to the current thread.
#[must_use = "a capture records nothing useful unless it is stopped"]
pub struct Capture {
    id: u64,
    stopped: bool,
    _thread_bound: PhantomData<*const ()>,
}

impl Capture {
    pub fn start(clock: Arc<dyn Clock>) -> Self {
        let id = NEXT_CAPTURE_ID.fetch_add(1, Ordering::Relaxed);
        ACTIVE.with(|active| {
            active.borrow_mut().push(CaptureState {
                id,
                clock,
                frames: Vec::new(),
                sites: BTreeMap::new(),
            });
        });
        tracing::trace!(capture = id, "capture started");
        Self {
            id,
            stopped: false,
            _thread_bound: PhantomData,
        }
    }

    /// Stops the capture, closing any frames still open at the current time.
    pub fn stop(mut self) -> Profile {
        self.stopped = true;
        let state = take_state(self.id);
        let Some(mut state) = state else {
            return Profile::new();
        };
        state.unwind_to(0);
        tracing::trace!(capture = self.id, sites = state.sites.len(), "capture stopped");
        Profile::from_sites(state.sites)
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        if !self.stopped {
            let _ = take_state(self.id);
        }
    }
}

fn take_state(id: u64) -> Option<CaptureState> {
    ACTIVE
        .try_with(|active| {
            let mut active = active.try_borrow_mut().ok()?;
            let idx = active.iter().position(|s| s.id == id)?;
            Some(active.remove(idx))
        })
        .ok()
        .flatten()
}

/// Closes its frame in the capture that was innermost when it was created.
#[must_use = "dropping the guard immediately records a zero-length call; bind it with `let _guard = ...`"]
pub struct SpanGuard {
    slot: Option<(u64, usize)>,
    _thread_bound: PhantomData<*const ()>,
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        let Some((id, depth)) = self.slot else {
            return;
        };
        let _ = ACTIVE.try_with(|active| {
            if let Ok(mut active) = active.try_borrow_mut()
                && let Some(state) = active.iter_mut().find(|s| s.id == id)
            {
                state.unwind_to(depth);
            }
        });
    }
}

/// Opens a frame for `site` in the innermost active capture.
pub fn enter(site: CallSite) -> SpanGuard {
    let slot = ACTIVE
        .try_with(|active| {
            let mut active = active.try_borrow_mut().ok()?;
            let state = active.last_mut()?;
            let depth = state.push(site);
            Some((state.id, depth))
        })
        .ok()
        .flatten();
    SpanGuard {
        slot,
        _thread_bound: PhantomData,
    }
}

pub fn enter_native(function: impl Into<String>) -> SpanGuard {
    enter(CallSite::native(function))
}

/// Whether a capture is already running on this thread.
pub fn is_active() -> bool {
    ACTIVE
        .try_with(|active| active.try_borrow().is_ok_and(|a| !a.is_empty()))
        .unwrap_or(false)
}

/// Records the enclosing block as a call of `$name` at the current file and line.
#[macro_export]
macro_rules! profile_scope {
    ($name:expr) => {
        let _profile_scope_guard =
            $crate::capture::enter($crate::CallSite::new(file!(), line!(), $name));
    };
}
