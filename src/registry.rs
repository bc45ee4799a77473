//! The live session table (§3, §4.E): every currently-connected session,
//! keyed by its case-insensitive id.

use crate::session::{Session, SessionId};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::Arc;

/// Concurrent map of every connected session. Reads (lookups, iteration
/// for broadcast) never block writers and vice versa (§9 design note,
/// grounded on the same lock-free-read session table shape used by
/// real-time connection-oriented servers).
///
/// Alongside the live map, an immutable `snapshot` array is published on
/// a timer (§4.I) so that, once enabled, enumeration-heavy consumers
/// (the idle sweep, `get_sessions`/`get_all_sessions`, stats) never touch
/// the map's internal shards at all — they just load an `Arc` that the
/// last snapshot tick installed.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    snapshot: ArcSwap<Vec<Arc<Session>>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self { sessions: DashMap::new(), snapshot: ArcSwap::from_pointee(Vec::new()) }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Inserts a new session. Returns `false` without replacing the
    /// existing entry if `id` is already registered (§6 session-id
    /// collision handling: the new connection is rejected, not the old
    /// one evicted).
    pub fn insert(&self, session: Arc<Session>) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.sessions.entry(session.id().clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(session);
                true
            }
        }
    }

    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Live, uncached view of every connected session.
    fn live_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Replaces the published snapshot with the map's current contents
    /// (§4.I). Called by the snapshot maintenance loop on its own timer;
    /// never invoked from the request path.
    pub fn publish_snapshot(&self) {
        self.snapshot.store(Arc::new(self.live_sessions()));
    }

    /// Every connected session (§4.F `get_all_sessions`). Reads the last
    /// published snapshot when `use_snapshot` is set, otherwise walks the
    /// live map directly (§4.I: "this trades seconds-scale staleness for
    /// zero per-query locking").
    pub fn get_all_sessions(&self, use_snapshot: bool) -> Vec<Arc<Session>> {
        if use_snapshot {
            (**self.snapshot.load()).clone()
        } else {
            self.live_sessions()
        }
    }

    /// Sessions matching an application predicate (§4.F `get_sessions(pred)`,
    /// used for selective broadcast/lookup), over the snapshot or the live
    /// map per `use_snapshot`.
    pub fn get_sessions(
        &self,
        use_snapshot: bool,
        mut pred: impl FnMut(&Session) -> bool,
    ) -> Vec<Arc<Session>> {
        self.get_all_sessions(use_snapshot).into_iter().filter(|s| pred(s)).collect()
    }

    /// Every session idle for longer than `timeout`, relative to `now`
    /// (§4.E maintenance sweep), read from the snapshot or the live map
    /// per `use_snapshot`. Connected-state is not altered here; the
    /// caller closes each returned session with `CloseReason::TimeOut`.
    pub fn idle_sessions(
        &self,
        use_snapshot: bool,
        now: std::time::Instant,
        timeout: std::time::Duration,
    ) -> Vec<Arc<Session>> {
        self.get_all_sessions(use_snapshot)
            .into_iter()
            .filter(|s| now.saturating_duration_since(s.last_active()) >= timeout)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;
    use std::net::SocketAddr;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn insert_rejects_duplicate_id_case_insensitively() {
        let registry = SessionRegistry::new();
        let a = Session::new(SessionId::new("Sess-1"), addr(), 8, true);
        let b = Session::new(SessionId::new("sess-1"), addr(), 8, true);
        assert!(registry.insert(a));
        assert!(!registry.insert(b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_returns_the_session() {
        let registry = SessionRegistry::new();
        let id = SessionId::new("sess-2");
        let session = Session::new(id.clone(), addr(), 8, true);
        registry.insert(session);
        assert!(registry.remove(&id).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn get_sessions_filters_by_predicate() {
        let registry = SessionRegistry::new();
        registry.insert(Session::new(SessionId::new("a"), addr(), 8, true));
        registry.insert(Session::new(SessionId::new("b"), addr(), 8, true));
        let matches = registry.get_sessions(false, |s| s.id().as_str() == "a");
        assert_eq!(matches.len(), 1);
    }

    #[test]
    fn snapshot_is_stale_until_published() {
        let registry = SessionRegistry::new();
        registry.insert(Session::new(SessionId::new("a"), addr(), 8, true));
        assert!(registry.get_all_sessions(true).is_empty());
        registry.publish_snapshot();
        assert_eq!(registry.get_all_sessions(true).len(), 1);

        registry.insert(Session::new(SessionId::new("b"), addr(), 8, true));
        assert_eq!(registry.get_all_sessions(true).len(), 1, "snapshot unaffected by insert until republished");
        assert_eq!(registry.get_all_sessions(false).len(), 2, "live view sees it immediately");
    }
}
