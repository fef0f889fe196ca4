//! profmerge core library: per-worker call-graph capture, snapshot handoff
//! through a scratch directory, and merged reporting after the run.

pub mod capture;
pub mod codec;
pub mod collector;
pub mod filter;
pub mod fsutil;
pub mod merge;
pub mod metadata;
pub mod report;

mod cmd;
mod config;
mod error;
mod lifecycle;
mod paths;
mod profile;
mod recorder;
mod session;
mod stats_dump;

pub use capture::{Capture, Clock, ManualClock, MonotonicClock, SpanGuard};
pub use cmd::*;
pub use collector::{Discovery, LoadedSnapshot, SnapshotIssue, discover};
pub use config::*;
pub use error::*;
pub use filter::{FilterRule, FilterRules, apply_filters};
pub use lifecycle::*;
pub use merge::{GroupKey, GroupedProfiles, merge, merge_global, merge_grouped};
pub use metadata::{SnapshotMeta, UnitInfo};
pub use paths::*;
pub use profile::*;
pub use recorder::*;
pub use report::{Report, Section, SortKey};
pub use session::*;
pub use stats_dump::*;
