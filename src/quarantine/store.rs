//! Persisted quarantine document.
//!
//! Small JSON file, symbols sorted by key, written via write-then-rename
//! so readers never observe a torn document.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const REASON_NOT_TRADABLE: &str = "JUP_TOKEN_NOT_TRADABLE";
pub const REASON_NO_ROUTE: &str = "JUP_NO_ROUTE";
pub const REASON_WS_STALE: &str = "WS_STALE";
pub const REASON_BAD_TOKEN_CFG: &str = "BAD_TOKEN_CFG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineEntry {
    pub reason: String,
    /// Unix seconds after which the entry expires.
    pub until: i64,
}

pub type QuarantineMap = BTreeMap<String, QuarantineEntry>;

#[derive(Debug, Serialize, Deserialize)]
struct QuarantineFile {
    version: u32,
    updated_at_ts: i64,
    #[serde(default)]
    symbols: QuarantineMap,
}

pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Missing or unparsable files read as empty; the caller keeps whatever
/// in-memory state it already has.
pub fn load_quarantine(path: &Path) -> QuarantineMap {
    let Ok(text) = fs::read_to_string(path) else {
        return QuarantineMap::new();
    };
    match serde_json::from_str::<QuarantineFile>(&text) {
        Ok(file) => file.symbols,
        Err(_) => QuarantineMap::new(),
    }
}

pub fn save_quarantine(path: &Path, map: &QuarantineMap) -> Result<()> {
    let doc = QuarantineFile {
        version: 1,
        updated_at_ts: now_ts(),
        symbols: map.clone(),
    };
    let json = serde_json::to_string_pretty(&doc).context("serialize quarantine")?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}

pub fn prune_expired(map: QuarantineMap, ts: i64) -> QuarantineMap {
    map.into_iter().filter(|(_, e)| e.until > ts).collect()
}

pub fn file_mtime(path: &Path) -> Option<std::time::SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(reason: &str, until: i64) -> QuarantineEntry {
        QuarantineEntry {
            reason: reason.to_string(),
            until,
        }
    }

    #[test]
    fn missing_file_reads_empty() {
        assert!(load_quarantine(Path::new("/nonexistent/q.json")).is_empty());
    }

    #[test]
    fn save_then_load_round_trips_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quarantine.json");

        let mut map = QuarantineMap::new();
        map.insert("ZZZUSDT".to_string(), entry(REASON_WS_STALE, now_ts() + 100));
        map.insert("AAAUSDT".to_string(), entry(REASON_NO_ROUTE, now_ts() + 100));
        save_quarantine(&path, &map).unwrap();

        let loaded = load_quarantine(&path);
        assert_eq!(loaded, map);
        // BTreeMap serialization keeps keys sorted in the document.
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.find("AAAUSDT").unwrap() < text.find("ZZZUSDT").unwrap());
        assert!(text.contains("\"version\": 1"));
    }

    #[test]
    fn corrupt_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quarantine.json");
        fs::write(&path, "{not json").unwrap();
        assert!(load_quarantine(&path).is_empty());
    }

    #[test]
    fn prune_drops_expired_only() {
        let mut map = QuarantineMap::new();
        map.insert("OLD".to_string(), entry(REASON_NO_ROUTE, 100));
        map.insert("LIVE".to_string(), entry(REASON_NO_ROUTE, 300));
        let pruned = prune_expired(map, 200);
        assert_eq!(pruned.len(), 1);
        assert!(pruned.contains_key("LIVE"));
    }
}
