//! Quarantine manager.
//!
//! Owns the in-memory quarantined set and the derived active view
//! (symbol list, token map, merged denylist). The file on disk is the
//! durable ground truth; memory is a cache kept in sync under a
//! file gate (disk I/O) plus a state lock (set + derived view). Every
//! transition rebuilds the derived view from the canonical watchlist
//! instead of patching it in place.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tracing::{info, warn};

use super::store::{
    file_mtime, load_quarantine, now_ts, prune_expired, save_quarantine, QuarantineEntry,
    QuarantineMap, REASON_BAD_TOKEN_CFG,
};
use crate::arbitrage::denylist::Denylist;
use crate::types::TokenConfig;

/// Minimum seconds between file writes for the same symbol.
const WRITE_DEBOUNCE_SEC: i64 = 15;
/// An existing entry with at least this long left is only refreshed in
/// memory, not rewritten.
const REFRESH_SKIP_REMAINING_SEC: i64 = 30 * 60;
const BAD_TOKEN_CFG_TTL_SEC: i64 = 24 * 3600;

/// Canonical full configuration the active view is rebuilt from.
#[derive(Debug, Clone, Default)]
pub struct Watchlist {
    pub symbols: Vec<String>,
    pub tokens: BTreeMap<String, TokenConfig>,
    pub denylist_symbols: Vec<String>,
    pub denylist_regex: Vec<String>,
}

/// Watchlist minus whatever is quarantined right now.
pub struct ActiveSet {
    pub symbols: Vec<String>,
    pub tokens: BTreeMap<String, TokenConfig>,
    pub denylist: Denylist,
}

struct Inner {
    quarantined: HashSet<String>,
    active: Arc<ActiveSet>,
}

pub struct QuarantineManager {
    path: PathBuf,
    watchlist: Watchlist,
    inner: StdRwLock<Inner>,
    /// Serializes disk I/O between add, sync and the verifier.
    file_gate: AsyncMutex<()>,
    last_write: StdMutex<HashMap<String, i64>>,
    changed_tx: mpsc::Sender<()>,
}

impl QuarantineManager {
    pub fn new(path: PathBuf, watchlist: Watchlist, changed_tx: mpsc::Sender<()>) -> Arc<Self> {
        let active = Arc::new(build_active(&watchlist, &HashSet::new()));
        Arc::new(Self {
            path,
            watchlist,
            inner: StdRwLock::new(Inner {
                quarantined: HashSet::new(),
                active,
            }),
            file_gate: AsyncMutex::new(()),
            last_write: StdMutex::new(HashMap::new()),
            changed_tx,
        })
    }

    /// Load the persisted state and quarantine tokens whose config is
    /// unusable. Called once before the pipelines start.
    pub fn load_initial(&self) {
        let mut q = prune_expired(load_quarantine(&self.path), now_ts());

        let mut bad_added = false;
        for (token_key, t) in &self.watchlist.tokens {
            let ok = !t.mint.is_empty()
                && !t.bybit_symbol.is_empty()
                && t.decimals > 0
                && t.decimals <= 18;
            if ok {
                continue;
            }
            if t.bybit_symbol.is_empty() {
                warn!(token_key = %token_key, "unusable token config without a symbol, cannot quarantine");
                continue;
            }
            if !q.contains_key(&t.bybit_symbol) {
                q.insert(
                    t.bybit_symbol.clone(),
                    QuarantineEntry {
                        reason: REASON_BAD_TOKEN_CFG.to_string(),
                        until: now_ts() + BAD_TOKEN_CFG_TTL_SEC,
                    },
                );
                bad_added = true;
                warn!(
                    token_key = %token_key,
                    symbol = %t.bybit_symbol,
                    mint = %t.mint,
                    decimals = t.decimals,
                    "bad token config, quarantined"
                );
            }
        }

        if bad_added {
            if let Err(e) = save_quarantine(&self.path, &q) {
                warn!(error = %e, "failed to persist startup quarantine");
            }
        }

        let set: HashSet<String> = q.keys().cloned().collect();
        self.apply_set(set.clone());
        if set.is_empty() {
            info!(file = %self.path.display(), "quarantine empty");
        } else {
            warn!(
                disabled = set.len(),
                file = %self.path.display(),
                "quarantine enabled at startup"
            );
        }
    }

    /// Current active view; cheap to take per tick.
    pub fn active(&self) -> Arc<ActiveSet> {
        self.read_inner().active.clone()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.read_inner().quarantined.contains(symbol)
    }

    pub fn quarantined_count(&self) -> usize {
        self.read_inner().quarantined.len()
    }

    pub fn full_tokens(&self) -> &BTreeMap<String, TokenConfig> {
        &self.watchlist.tokens
    }

    /// Quarantine a symbol for `ttl_sec`.
    pub async fn add(&self, symbol: &str, reason: &str, ttl_sec: u64) {
        if symbol.is_empty() {
            return;
        }

        let now = now_ts();
        {
            let _io = self.file_gate.lock().await;
            {
                let mut last = self.last_write.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(prev) = last.get(symbol) {
                    if now - prev < WRITE_DEBOUNCE_SEC {
                        return;
                    }
                }
                last.insert(symbol.to_string(), now);
            }

            let mut q = prune_expired(load_quarantine(&self.path), now);
            let long_lived = q
                .get(symbol)
                .map_or(false, |prev| prev.until > now + REFRESH_SKIP_REMAINING_SEC);

            if !long_lived {
                q.insert(
                    symbol.to_string(),
                    QuarantineEntry {
                        reason: reason.to_string(),
                        until: now + ttl_sec as i64,
                    },
                );
                if let Err(e) = save_quarantine(&self.path, &q) {
                    warn!(symbol, error = %e, "quarantine write failed, will retry on next trigger");
                }
            }
        }

        let changed = {
            let mut inner = self.write_inner();
            let inserted = inner.quarantined.insert(symbol.to_string());
            if inserted {
                inner.active = Arc::new(build_active(&self.watchlist, &inner.quarantined));
            }
            inserted
        };
        if changed {
            self.emit_changed();
        }

        warn!(symbol, reason, ttl_sec, file = %self.path.display(), "auto-quarantine");
    }

    /// Drop recovered symbols from the file and the in-memory set.
    pub async fn remove_recovered(&self, symbols: &[String]) {
        if symbols.is_empty() {
            return;
        }
        {
            let _io = self.file_gate.lock().await;
            let mut q = prune_expired(load_quarantine(&self.path), now_ts());
            for s in symbols {
                q.remove(s);
            }
            if let Err(e) = save_quarantine(&self.path, &q) {
                warn!(error = %e, "failed to persist quarantine recovery");
            }
        }

        {
            let mut inner = self.write_inner();
            for s in symbols {
                inner.quarantined.remove(s);
            }
            inner.active = Arc::new(build_active(&self.watchlist, &inner.quarantined));
        }
        self.emit_changed();
        info!(recovered = symbols.len(), "quarantine symbols recovered");
    }

    /// Current on-disk entries, pruned. Used by the verifier.
    pub async fn snapshot_file(&self) -> QuarantineMap {
        let _io = self.file_gate.lock().await;
        prune_expired(load_quarantine(&self.path), now_ts())
    }

    /// Re-read the file and apply the diff to memory. Returns true when
    /// anything changed.
    pub async fn sync_from_file(&self) -> bool {
        let new_set: HashSet<String> = {
            let _io = self.file_gate.lock().await;
            let loaded = load_quarantine(&self.path);
            let pruned = prune_expired(loaded.clone(), now_ts());
            if pruned.len() != loaded.len() {
                if let Err(e) = save_quarantine(&self.path, &pruned) {
                    warn!(error = %e, "failed to persist pruned quarantine");
                }
            }
            pruned.keys().cloned().collect()
        };

        let (added, removed) = {
            let mut inner = self.write_inner();
            let added = new_set.difference(&inner.quarantined).count();
            let removed = inner.quarantined.difference(&new_set).count();
            if added + removed > 0 {
                inner.quarantined = new_set;
                inner.active = Arc::new(build_active(&self.watchlist, &inner.quarantined));
            }
            (added, removed)
        };

        if added + removed == 0 {
            return false;
        }
        self.emit_changed();
        warn!(
            added,
            removed,
            active = self.active().symbols.len(),
            quarantined = self.quarantined_count(),
            "quarantine sync applied"
        );
        true
    }

    /// Watch the file for external edits (or TTL expiry pruning) and
    /// apply changes.
    pub async fn sync_loop(
        self: Arc<Self>,
        poll: Duration,
        mut stop: watch::Receiver<bool>,
    ) {
        let mut last_mtime: Option<SystemTime> = None;
        loop {
            if *stop.borrow() {
                return;
            }

            let mtime = file_mtime(&self.path);
            let changed = match (mtime, last_mtime) {
                (Some(m), Some(prev)) => m > prev,
                (Some(_), None) => true,
                _ => false,
            };
            if let Some(m) = mtime {
                last_mtime = Some(last_mtime.map_or(m, |prev| prev.max(m)));
            }

            if changed {
                self.sync_from_file().await;
            }

            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = stop.changed() => {}
            }
        }
    }

    fn apply_set(&self, set: HashSet<String>) {
        let mut inner = self.write_inner();
        inner.quarantined = set;
        inner.active = Arc::new(build_active(&self.watchlist, &inner.quarantined));
    }

    fn emit_changed(&self) {
        // Capacity-1 channel: a pending event already covers this change.
        let _ = self.changed_tx.try_send(());
    }

    fn read_inner(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_inner(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn build_active(watchlist: &Watchlist, quarantined: &HashSet<String>) -> ActiveSet {
    let symbols: Vec<String> = watchlist
        .symbols
        .iter()
        .filter(|s| !quarantined.contains(*s))
        .cloned()
        .collect();
    let tokens: BTreeMap<String, TokenConfig> = watchlist
        .tokens
        .iter()
        .filter(|(_, t)| !quarantined.contains(&t.bybit_symbol))
        .map(|(k, t)| (k.clone(), t.clone()))
        .collect();

    let mut deny_symbols = watchlist.denylist_symbols.clone();
    deny_symbols.extend(quarantined.iter().cloned());
    let denylist = Denylist::build(&deny_symbols, &watchlist.denylist_regex);

    ActiveSet {
        symbols,
        tokens,
        denylist,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quarantine::store::REASON_WS_STALE;

    fn token(symbol: &str, mint: &str, decimals: u32) -> TokenConfig {
        TokenConfig {
            bybit_symbol: symbol.to_string(),
            mint: mint.to_string(),
            decimals,
        }
    }

    fn watchlist() -> Watchlist {
        let mut tokens = BTreeMap::new();
        tokens.insert("WIF".to_string(), token("WIFUSDT", "MintWif", 6));
        tokens.insert("BONK".to_string(), token("BONKUSDT", "MintBonk", 5));
        Watchlist {
            symbols: vec!["WIFUSDT".to_string(), "BONKUSDT".to_string()],
            tokens,
            denylist_symbols: vec![],
            denylist_regex: vec![],
        }
    }

    fn manager(watchlist: Watchlist) -> (Arc<QuarantineManager>, mpsc::Receiver<()>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quarantine.json");
        let (tx, rx) = mpsc::channel(1);
        (QuarantineManager::new(path, watchlist, tx), rx, dir)
    }

    #[tokio::test]
    async fn add_converges_set_and_active_view() {
        let (m, mut rx, _dir) = manager(watchlist());
        m.load_initial();

        m.add("WIFUSDT", REASON_WS_STALE, 3600).await;

        assert!(m.contains("WIFUSDT"));
        let active = m.active();
        assert_eq!(active.symbols, vec!["BONKUSDT"]);
        assert!(!active.tokens.contains_key("WIF"));
        assert!(active.denylist.is_denied("WIF", "WIFUSDT"));
        assert!(rx.try_recv().is_ok());

        // Persisted too.
        let on_disk = m.snapshot_file().await;
        assert_eq!(on_disk["WIFUSDT"].reason, REASON_WS_STALE);
    }

    #[tokio::test]
    async fn add_is_debounced_per_symbol() {
        let (m, _rx, _dir) = manager(watchlist());
        m.load_initial();

        m.add("WIFUSDT", REASON_WS_STALE, 100).await;
        let first = m.snapshot_file().await["WIFUSDT"].clone();

        // Second write inside the debounce window leaves the file alone.
        m.add("WIFUSDT", "OTHER_REASON", 99999).await;
        let second = m.snapshot_file().await["WIFUSDT"].clone();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn long_lived_entry_is_not_rewritten() {
        let (m, _rx, _dir) = manager(watchlist());
        m.load_initial();

        // Seed an entry with > 30 min remaining directly on disk.
        let mut q = QuarantineMap::new();
        q.insert(
            "WIFUSDT".to_string(),
            QuarantineEntry {
                reason: "SEED".to_string(),
                until: now_ts() + 2 * 3600,
            },
        );
        save_quarantine(&m.path, &q).unwrap();

        m.add("WIFUSDT", REASON_WS_STALE, 60).await;
        // File keeps the original entry; memory still quarantines.
        let on_disk = m.snapshot_file().await;
        assert_eq!(on_disk["WIFUSDT"].reason, "SEED");
        assert!(m.contains("WIFUSDT"));
    }

    #[tokio::test]
    async fn load_initial_quarantines_bad_token_config() {
        let mut wl = watchlist();
        wl.tokens
            .insert("BROKEN".to_string(), token("BROKENUSDT", "", 6));
        wl.symbols.push("BROKENUSDT".to_string());

        let (m, _rx, _dir) = manager(wl);
        m.load_initial();

        assert!(m.contains("BROKENUSDT"));
        let on_disk = m.snapshot_file().await;
        assert_eq!(on_disk["BROKENUSDT"].reason, REASON_BAD_TOKEN_CFG);
        assert!(!m.active().symbols.contains(&"BROKENUSDT".to_string()));
    }

    #[tokio::test]
    async fn sync_from_file_applies_external_changes() {
        let (m, mut rx, _dir) = manager(watchlist());
        m.load_initial();

        let mut q = QuarantineMap::new();
        q.insert(
            "BONKUSDT".to_string(),
            QuarantineEntry {
                reason: REASON_WS_STALE.to_string(),
                until: now_ts() + 600,
            },
        );
        save_quarantine(&m.path, &q).unwrap();

        assert!(m.sync_from_file().await);
        assert!(m.contains("BONKUSDT"));
        assert!(rx.try_recv().is_ok());

        // No further change: no event.
        assert!(!m.sync_from_file().await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn remove_recovered_restores_active_view() {
        let (m, mut rx, _dir) = manager(watchlist());
        m.load_initial();
        m.add("WIFUSDT", REASON_WS_STALE, 3600).await;
        let _ = rx.try_recv();

        m.remove_recovered(&["WIFUSDT".to_string()]).await;
        assert!(!m.contains("WIFUSDT"));
        assert!(m.active().symbols.contains(&"WIFUSDT".to_string()));
        assert!(m.snapshot_file().await.is_empty());
        assert!(rx.try_recv().is_ok());
    }
}
