//! Session lifecycle management.
//!
//! The manager owns the working set of live sessions. `resolve_or_create`
//! is called once per inbound message; `evict_idle` is driven by an external
//! scheduler, not the loop. Idle sessions are persisted then dropped from
//! working memory; a later message reloads them through the store as
//! `Resumed`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use talon_domain::config::SessionsConfig;
use talon_domain::error::Result;
use talon_domain::trace::{EventSink, TraceEvent};

use crate::session::{Session, SessionState};
use crate::store::SessionStore;

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    config: SessionsConfig,
    /// Live sessions by session key. The copy here is authoritative between
    /// runs; the store is the source of truth across restarts.
    working: RwLock<HashMap<String, Session>>,
    sink: Arc<dyn EventSink>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        config: SessionsConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            config,
            working: RwLock::new(HashMap::new()),
            sink,
        }
    }

    /// Resolve the session for a key, creating or resuming as needed.
    /// Returns `(session, is_new)`. The caller must hold the per-session
    /// run lock before mutating the returned session.
    pub fn resolve_or_create(&self, session_key: &str) -> Result<(Session, bool)> {
        if let Some(session) = self.working.read().get(session_key) {
            return Ok((session.clone(), false));
        }

        // Not in working memory: either idle (reload from store) or new.
        if let Some(mut session) = self.store.load(session_key)? {
            session.state = SessionState::Resumed;
            session.touch();
            self.sink.emit(&TraceEvent::SessionResumed {
                session_key: session_key.to_owned(),
                session_id: session.id.clone(),
            });
            tracing::info!(
                session_key = %session_key,
                session_id = %session.id,
                messages = session.message_count(),
                "session resumed from store"
            );
            self.working
                .write()
                .insert(session_key.to_owned(), session.clone());
            return Ok((session, false));
        }

        let session = Session::new(session_key);
        self.store.save(&session)?;
        self.sink.emit(&TraceEvent::SessionResolved {
            session_key: session_key.to_owned(),
            session_id: session.id.clone(),
            is_new: true,
        });
        self.working
            .write()
            .insert(session_key.to_owned(), session.clone());
        Ok((session, true))
    }

    /// Write a session back after a run: it becomes `Active`, the working
    /// copy is replaced, and the store is updated.
    pub fn commit(&self, mut session: Session) -> Result<()> {
        session.state = SessionState::Active;
        self.store.save(&session)?;
        self.working
            .write()
            .insert(session.session_key.clone(), session);
        Ok(())
    }

    /// Persist and evict sessions idle past the configured timeout. Returns
    /// the evicted session keys.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let idle_cutoff = self.config.idle_minutes as i64;

        let stale: Vec<Session> = {
            let working = self.working.read();
            working
                .values()
                .filter(|s| s.idle_minutes(now) >= idle_cutoff)
                .cloned()
                .collect()
        };

        let mut evicted = Vec::with_capacity(stale.len());
        for mut session in stale {
            let idle = session.idle_minutes(now);
            session.state = SessionState::Idle;
            self.store.save(&session)?;
            self.working.write().remove(&session.session_key);

            self.sink.emit(&TraceEvent::SessionIdle {
                session_key: session.session_key.clone(),
                session_id: session.id.clone(),
                idle_minutes: idle,
            });
            tracing::info!(
                session_key = %session.session_key,
                idle_minutes = idle,
                "session idle, persisted and evicted"
            );
            evicted.push(session.session_key);
        }
        Ok(evicted)
    }

    /// Archive a session: drop it from working memory and move it aside in
    /// the store. Destruction is always an explicit external policy.
    pub fn archive(&self, session_key: &str) -> Result<()> {
        self.working.write().remove(session_key);
        self.store.archive(session_key)
    }

    /// Start over for a key: archive the old session and hand out a fresh
    /// one under the same key. The next message continues with no history.
    pub fn reset(&self, session_key: &str) -> Result<Session> {
        let old_id = self
            .working
            .write()
            .remove(session_key)
            .map(|s| s.id)
            .or_else(|| {
                self.store
                    .load(session_key)
                    .ok()
                    .flatten()
                    .map(|s| s.id)
            })
            .unwrap_or_default();
        self.store.archive(session_key)?;

        let session = Session::new(session_key);
        self.store.save(&session)?;
        self.working
            .write()
            .insert(session_key.to_owned(), session.clone());

        self.sink.emit(&TraceEvent::SessionReset {
            session_key: session_key.to_owned(),
            old_session_id: old_id,
            new_session_id: session.id.clone(),
        });
        tracing::info!(
            session_key = %session_key,
            new_session_id = %session.id,
            "session reset"
        );
        Ok(session)
    }

    /// Number of sessions currently in working memory.
    pub fn live_count(&self) -> usize {
        self.working.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talon_domain::message::Message;
    use talon_domain::trace::RecordingSink;

    use crate::store::MemorySessionStore;

    fn manager(store: Arc<MemorySessionStore>) -> SessionManager {
        SessionManager::new(store, SessionsConfig::default(), Arc::new(RecordingSink::new()))
    }

    #[test]
    fn first_message_creates_session() {
        let mgr = manager(Arc::new(MemorySessionStore::new()));
        let (session, is_new) = mgr.resolve_or_create("agent:b:dm:alice").unwrap();
        assert!(is_new);
        assert_eq!(session.state, SessionState::Created);
        assert_eq!(mgr.live_count(), 1);
    }

    #[test]
    fn second_resolve_reuses_working_copy() {
        let mgr = manager(Arc::new(MemorySessionStore::new()));
        let (first, _) = mgr.resolve_or_create("k").unwrap();
        let (second, is_new) = mgr.resolve_or_create("k").unwrap();
        assert!(!is_new);
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn idle_session_is_persisted_evicted_then_resumed() {
        let store = Arc::new(MemorySessionStore::new());
        let mgr = manager(store.clone());

        let (mut session, _) = mgr.resolve_or_create("k").unwrap();
        session.append_messages([Message::user("hi")]);
        mgr.commit(session.clone()).unwrap();

        // Past the 30 minute default.
        let later = Utc::now() + chrono::Duration::minutes(31);
        let evicted = mgr.evict_idle(later).unwrap();
        assert_eq!(evicted, vec!["k".to_string()]);
        assert_eq!(mgr.live_count(), 0);
        assert_eq!(
            store.load("k").unwrap().unwrap().state,
            SessionState::Idle
        );

        // Next message resumes with history intact and the same id.
        let (resumed, is_new) = mgr.resolve_or_create("k").unwrap();
        assert!(!is_new);
        assert_eq!(resumed.state, SessionState::Resumed);
        assert_eq!(resumed.id, session.id);
        assert_eq!(resumed.message_count(), 1);
    }

    #[test]
    fn fresh_sessions_survive_eviction_sweep() {
        let mgr = manager(Arc::new(MemorySessionStore::new()));
        mgr.resolve_or_create("k").unwrap();
        let evicted = mgr.evict_idle(Utc::now()).unwrap();
        assert!(evicted.is_empty());
        assert_eq!(mgr.live_count(), 1);
    }

    #[test]
    fn reset_archives_and_starts_fresh() {
        let store = Arc::new(MemorySessionStore::new());
        let mgr = manager(store.clone());

        let (mut session, _) = mgr.resolve_or_create("k").unwrap();
        session.append_messages([Message::user("remember this")]);
        mgr.commit(session.clone()).unwrap();

        let fresh = mgr.reset("k").unwrap();
        assert_ne!(fresh.id, session.id);
        assert_eq!(fresh.message_count(), 0);
        assert_eq!(store.archived_keys(), vec!["k".to_string()]);

        // The next resolve sees the fresh session, not the old history.
        let (next, is_new) = mgr.resolve_or_create("k").unwrap();
        assert!(!is_new);
        assert_eq!(next.id, fresh.id);
    }

    #[test]
    fn commit_activates_session() {
        let store = Arc::new(MemorySessionStore::new());
        let mgr = manager(store.clone());
        let (session, _) = mgr.resolve_or_create("k").unwrap();
        mgr.commit(session).unwrap();
        assert_eq!(
            store.load("k").unwrap().unwrap().state,
            SessionState::Active
        );
    }
}
