//! Snapshot file format (`*.snapshot.json`) read/write.

use serde::{Deserialize, Serialize};

use std::path::Path;

use crate::{CallSite, CallSiteStats, CallerStats, Profile, ProfError, ProfResult, fsutil};

pub const SNAPSHOT_FORMAT: &str = "profmerge-snapshot";
pub const SNAPSHOT_VERSION: u32 = 2;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotDoc {
    format: String,
    version: u32,
    sites: Vec<SiteRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SiteRecord {
    file: String,
    line: u32,
    function: String,
    primitive_calls: u64,
    total_calls: u64,
    total_time_ns: u64,
    cumulative_time_ns: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    callers: Vec<CallerRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CallerRecord {
    file: String,
    line: u32,
    function: String,
    primitive_calls: u64,
    total_calls: u64,
    total_time_ns: u64,
    cumulative_time_ns: u64,
}

pub fn encode(profile: &Profile) -> ProfResult<Vec<u8>> {
    let sites = profile
        .iter()
        .map(|(site, stats)| SiteRecord {
            file: site.file.clone(),
            line: site.line,
            function: site.function.clone(),
            primitive_calls: stats.primitive_calls,
            total_calls: stats.total_calls,
            total_time_ns: stats.total_time,
            cumulative_time_ns: stats.cumulative_time,
            callers: stats
                .callers
                .iter()
                .map(|(caller, cs)| CallerRecord {
                    file: caller.file.clone(),
                    line: caller.line,
                    function: caller.function.clone(),
                    primitive_calls: cs.primitive_calls,
                    total_calls: cs.total_calls,
                    total_time_ns: cs.total_time,
                    cumulative_time_ns: cs.cumulative_time,
                })
                .collect(),
        })
        .collect();
    let doc = SnapshotDoc {
        format: SNAPSHOT_FORMAT.to_string(),
        version: SNAPSHOT_VERSION,
        sites,
    };
    Ok(serde_json::to_vec(&doc)?)
}

pub fn decode(bytes: &[u8]) -> ProfResult<Profile> {
    let doc: SnapshotDoc = serde_json::from_slice(bytes)?;
    if doc.format != SNAPSHOT_FORMAT {
        return Err(ProfError::Snapshot(format!(
            "unexpected snapshot format {:?} (expected {SNAPSHOT_FORMAT:?})",
            doc.format
        )));
    }
    if doc.version != SNAPSHOT_VERSION {
        return Err(ProfError::Snapshot(format!(
            "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
            doc.version
        )));
    }
    let sites = doc.sites.into_iter().map(|r| {
        let mut stats =
            CallSiteStats::new(r.primitive_calls, r.total_calls, r.total_time_ns, r.cumulative_time_ns);
        for c in r.callers {
            stats = stats.with_caller(
                CallSite::new(c.file, c.line, c.function),
                CallerStats {
                    primitive_calls: c.primitive_calls,
                    total_calls: c.total_calls,
                    total_time: c.total_time_ns,
                    cumulative_time: c.cumulative_time_ns,
                },
            );
        }
        (CallSite::new(r.file, r.line, r.function), stats)
    });
    Ok(Profile::from_sites(sites))
}

pub fn dump(profile: &Profile, path: &Path) -> ProfResult<()> {
    fsutil::write_atomic(path, &encode(profile)?)
}

pub fn load(path: &Path) -> ProfResult<Profile> {
    let bytes = std::fs::read(path)?;
    decode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_profile() -> Profile {
        let main = CallSite::new("/app/main.rs", 1, "engine::main");
        Profile::from_sites([
            (main.clone(), CallSiteStats::new(1, 1, 100_000_000, 333_333_333)),
            (
                CallSite::new("/app/x.rs", 10, "engine::f"),
                CallSiteStats::new(3, 5, 123_456_789, 200).with_caller(
                    main,
                    CallerStats {
                        primitive_calls: 3,
                        total_calls: 5,
                        total_time: 123_456_789,
                        cumulative_time: 200,
                    },
                ),
            ),
            (CallSite::native("sleep"), CallSiteStats::new(7, 7, 1, u64::MAX / 4)),
        ])
    }

    #[test]
    fn dump_then_load_is_exact() {
        let dir = fsutil::temp_dir("codec");
        let path = dir.join("p.snapshot.json");
        let p = sample_profile();
        dump(&p, &path).expect("dump");
        let loaded = load(&path).expect("load");
        assert_eq!(loaded, p);
        assert_eq!(loaded.total_calls_sum(), p.total_calls_sum());
        assert_eq!(loaded.primitive_calls_sum(), p.primitive_calls_sum());
        assert_eq!(loaded.total_time_sum(), 223_456_790);
        assert!(loaded.totals_consistent());
        let f = loaded
            .get(&CallSite::new("/app/x.rs", 10, "engine::f"))
            .expect("site");
        assert_eq!(f.total_time, 123_456_789);
        assert_eq!(f.callers.len(), 1);
    }

    #[test]
    fn empty_profile_round_trips() {
        let bytes = encode(&Profile::new()).expect("encode");
        assert!(decode(&bytes).expect("decode").is_empty());
    }

    #[test]
    fn decode_rejects_unknown_version() {
        let bytes = br#"{"format":"profmerge-snapshot","version":9,"sites":[]}"#;
        match decode(bytes).expect_err("must fail") {
            ProfError::Snapshot(msg) => assert!(msg.contains("version 9"), "message: {msg}"),
            other => panic!("expected snapshot error, got {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_fractional_or_null_times() {
        for time in ["0.5", "null", "-1"] {
            let doc = format!(
                r#"{{"format":"profmerge-snapshot","version":2,"sites":[{{"file":"/a.rs","line":1,"function":"f","primitive_calls":1,"total_calls":1,"total_time_ns":{time},"cumulative_time_ns":1}}]}}"#
            );
            let err = decode(doc.as_bytes()).expect_err("must fail");
            assert!(matches!(err, ProfError::Json(_)), "time {time}: {err:?}");
        }
    }

    #[test]
    fn decode_rejects_truncated_file() {
        let bytes = encode(&sample_profile()).expect("encode");
        let err = decode(&bytes[..bytes.len() / 2]).expect_err("must fail");
        assert!(matches!(err, ProfError::Json(_)));
    }
}
