//! Merging of profiles, globally or per (group, task, execution unit).

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;
use std::fmt;

use crate::{LoadedSnapshot, Profile};

/// Partition key for per-group reports. Field order is the sort order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub group_name: String,
    pub task_name: String,
    pub execution_unit_id: String,
}

impl GroupKey {
    pub fn of(snapshot: &LoadedSnapshot) -> Self {
        Self {
            group_name: snapshot.meta.group_name.clone(),
            task_name: snapshot.meta.task_name.clone(),
            execution_unit_id: snapshot.meta.execution_unit_id.clone(),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} - {}",
            self.group_name, self.task_name, self.execution_unit_id
        )
    }
}

pub type GroupedProfiles = BTreeMap<GroupKey, Profile>;

/// Element-wise sum of all inputs; aggregates are recomputed from the result.
pub fn merge<I>(profiles: I) -> Profile
where
    I: IntoIterator<Item = Profile>,
{
    let mut out = Profile::new();
    for profile in profiles {
        out.absorb(profile);
    }
    out.recompute_totals();
    out
}

/// Everything in one profile, plus the orchestrator's own capture when present.
pub fn merge_global<I>(control: Option<Profile>, profiles: I) -> Profile
where
    I: IntoIterator<Item = Profile>,
{
    merge(control.into_iter().chain(profiles))
}

pub fn merge_grouped<I>(snapshots: I) -> GroupedProfiles
where
    I: IntoIterator<Item = LoadedSnapshot>,
{
    let mut out = GroupedProfiles::new();
    for snapshot in snapshots {
        let key = GroupKey::of(&snapshot);
        out.entry(key).or_default().absorb(snapshot.profile);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{SnapshotMeta, UnitInfo};
    use crate::{CallSite, CallSiteStats, CallerStats};

    fn x() -> CallSite {
        CallSite::new("/app/x.py", 10, "f")
    }

    fn profile_a() -> Profile {
        Profile::from_sites([
            (x(), CallSiteStats::new(3, 3, 100_000_000, 300_000_000)),
            (CallSite::new("/app/y.py", 4, "g"), CallSiteStats::new(1, 2, 200_000_000, 200_000_000)),
        ])
    }

    fn profile_b() -> Profile {
        Profile::from_sites([(x(), CallSiteStats::new(2, 2, 200_000_000, 400_000_000))])
    }

    fn profile_c() -> Profile {
        Profile::from_sites([
            (
                x(),
                CallSiteStats::new(1, 1, 300_000_000, 300_000_000).with_caller(
                    CallSite::new("/app/main.py", 1, "main"),
                    CallerStats { primitive_calls: 1, total_calls: 1, total_time: 300_000_000, cumulative_time: 300_000_000 },
                ),
            ),
            (CallSite::native("len"), CallSiteStats::new(9, 9, 70_000_000, 70_000_000)),
        ])
    }

    #[test]
    fn two_snapshots_of_the_same_site_sum() {
        let merged = merge([profile_a(), profile_b()]);
        let stats = merged.get(&x()).expect("site");
        assert_eq!(stats.primitive_calls, 5);
        assert_eq!(stats.total_calls, 5);
        assert_eq!(stats.total_time, 300_000_000);
        assert_eq!(stats.cumulative_time, 700_000_000);
        assert!(merged.totals_consistent());
        assert_eq!(merged.total_calls_sum(), 7);
    }

    #[test]
    fn merge_is_commutative_and_associative() {
        let abc = merge([profile_a(), profile_b(), profile_c()]);
        let cba = merge([profile_c(), profile_b(), profile_a()]);
        let a_bc = merge([profile_a(), merge([profile_b(), profile_c()])]);
        assert_eq!(abc, cba);
        assert_eq!(abc, a_bc);
        assert_eq!(abc.total_time_sum(), cba.total_time_sum());
        assert_eq!(abc.total_time_sum(), a_bc.total_time_sum());
    }

    #[test]
    fn tenth_of_a_second_times_sum_exactly_in_any_order() {
        let one = |nanos: u64| Profile::from_sites([(x(), CallSiteStats::new(1, 1, nanos, nanos))]);
        let forward = merge([one(100_000_000), one(200_000_000), one(300_000_000)]);
        let backward = merge([one(300_000_000), one(200_000_000), one(100_000_000)]);
        assert_eq!(forward, backward);
        assert_eq!(forward.total_time_sum(), 600_000_000);
        assert_eq!(backward.total_time_sum(), 600_000_000);
        assert!(forward.totals_consistent());
        assert!(backward.totals_consistent());
    }

    #[test]
    fn merging_with_empty_is_identity() {
        assert_eq!(merge([profile_a(), Profile::new()]), profile_a());
        assert_eq!(merge([Profile::new(), profile_c()]), profile_c());
        assert!(merge(Vec::<Profile>::new()).is_empty());
    }

    #[test]
    fn merged_callers_sum_by_caller_key() {
        let merged = merge([profile_c(), profile_c()]);
        let callers = &merged.get(&x()).expect("site").callers;
        let main = callers
            .get(&CallSite::new("/app/main.py", 1, "main"))
            .expect("caller");
        assert_eq!(main.total_calls, 2);
        assert_eq!(main.cumulative_time, 600_000_000);
    }

    #[test]
    fn global_merge_includes_control() {
        let merged = merge_global(Some(profile_b()), [profile_b()]);
        assert_eq!(merged.get(&x()).expect("site").total_calls, 4);
        assert_eq!(merge_global(None, [profile_b()]), profile_b());
    }

    fn snapshot(group: &str, task: &str, host: &str, profile: Profile) -> LoadedSnapshot {
        LoadedSnapshot {
            path: format!("/scratch/{host}.snapshot.json").into(),
            profile,
            meta: SnapshotMeta::new(
                UnitInfo {
                    execution_unit_id: host.to_string(),
                    task_name: task.to_string(),
                    task_id: "t".to_string(),
                    group_name: group.to_string(),
                },
                "run",
                1,
                1,
                time::OffsetDateTime::UNIX_EPOCH,
                b"",
            ),
        }
    }

    #[test]
    fn grouped_merge_partitions_by_key_in_sorted_order() {
        let grouped = merge_grouped([
            snapshot("web", "deploy", "h2", profile_a()),
            snapshot("db", "backup", "h1", profile_b()),
            snapshot("web", "deploy", "h2", profile_b()),
        ]);
        let keys: Vec<String> = grouped.keys().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["db - backup - h1", "web - deploy - h2"]);
        let web = grouped.values().nth(1).expect("web");
        assert_eq!(web.get(&x()).expect("site").total_calls, 5);
    }
}
