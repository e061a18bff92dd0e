//! Per-session read/write locking: a `DashMap`-backed lazily-populated
//! lock table, one `Arc<RwLock<()>>` allocated per session id on first
//! use and never removed.
//!
//! Entries are never removed: removing a mutex that could be held by a
//! deferred unlock is unsafe, so a session that's deleted simply leaves
//! an unused `Arc<RwLock<()>>` behind for the lifetime of the process.
//! That's a bounded, small cost (one lock per session id ever seen)
//! traded for never racing a lock's own removal.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Lazily-allocated per-session-id `RwLock` table.
#[derive(Default)]
pub struct SessionLockMap {
    locks: DashMap<String, Arc<RwLock<()>>>,
}

impl SessionLockMap {
    pub fn new() -> Self {
        Self { locks: DashMap::new() }
    }

    fn entry(&self, session_id: &str) -> Arc<RwLock<()>> {
        self.locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    pub async fn read(&self, session_id: &str) -> OwnedRwLockReadGuard<()> {
        self.entry(session_id).read_owned().await
    }

    pub async fn write(&self, session_id: &str) -> OwnedRwLockWriteGuard<()> {
        self.entry(session_id).write_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn concurrent_readers_do_not_block_each_other() {
        let locks = SessionLockMap::new();
        let _g1 = locks.read("s1").await;
        let _g2 = locks.read("s1").await;
    }

    #[tokio::test]
    async fn writer_excludes_readers() {
        let locks = SessionLockMap::new();
        let guard = locks.write("s1").await;
        drop(guard);
        let _r = locks.read("s1").await;
    }
}
