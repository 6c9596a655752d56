//! Durable session storage.
//!
//! The loop saves after every atomic message append, so a crash loses at
//! most the in-flight iteration. The file-backed store keeps a write-through
//! cache and one JSON file per session under the configured state path;
//! archival moves the file aside rather than deleting it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use talon_domain::error::{Error, Result};

use crate::session::Session;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store capability
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session persistence, keyed by session key.
pub trait SessionStore: Send + Sync {
    fn load(&self, session_key: &str) -> Result<Option<Session>>;
    fn save(&self, session: &Session) -> Result<()>;
    fn archive(&self, session_key: &str) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// File-backed store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One JSON file per session under `state_path/sessions/`, with archived
/// sessions moved to `state_path/sessions/archive/`.
pub struct FileSessionStore {
    sessions_dir: PathBuf,
    archive_dir: PathBuf,
    cache: RwLock<HashMap<String, Session>>,
}

impl FileSessionStore {
    pub fn new(state_path: &Path) -> Result<Self> {
        let sessions_dir = state_path.join("sessions");
        let archive_dir = sessions_dir.join("archive");
        std::fs::create_dir_all(&archive_dir).map_err(Error::Io)?;

        tracing::info!(path = %sessions_dir.display(), "session store ready");

        Ok(Self {
            sessions_dir,
            archive_dir,
            cache: RwLock::new(HashMap::new()),
        })
    }

    fn path_for(&self, session_key: &str) -> PathBuf {
        self.sessions_dir
            .join(format!("{}.json", sanitize_key(session_key)))
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self, session_key: &str) -> Result<Option<Session>> {
        if let Some(session) = self.cache.read().get(session_key) {
            return Ok(Some(session.clone()));
        }

        let path = self.path_for(session_key);
        if !path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
        let session: Session = serde_json::from_str(&raw)
            .map_err(|e| Error::Store(format!("corrupt session file {}: {e}", path.display())))?;

        self.cache
            .write()
            .insert(session_key.to_owned(), session.clone());
        Ok(Some(session))
    }

    fn save(&self, session: &Session) -> Result<()> {
        let json = serde_json::to_string_pretty(session)?;
        std::fs::write(self.path_for(&session.session_key), json).map_err(Error::Io)?;
        self.cache
            .write()
            .insert(session.session_key.clone(), session.clone());
        Ok(())
    }

    fn archive(&self, session_key: &str) -> Result<()> {
        self.cache.write().remove(session_key);

        let path = self.path_for(session_key);
        if !path.exists() {
            return Ok(());
        }
        let dest = self
            .archive_dir
            .join(format!("{}.json", sanitize_key(session_key)));
        std::fs::rename(&path, &dest).map_err(Error::Io)?;

        tracing::info!(session_key = %session_key, "session archived");
        Ok(())
    }
}

/// Session keys contain `:` separators; flatten them for filenames.
fn sanitize_key(session_key: &str) -> String {
    session_key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Map-backed store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    archived: RwLock<Vec<String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn archived_keys(&self) -> Vec<String> {
        self.archived.read().clone()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, session_key: &str) -> Result<Option<Session>> {
        Ok(self.sessions.read().get(session_key).cloned())
    }

    fn save(&self, session: &Session) -> Result<()> {
        self.sessions
            .write()
            .insert(session.session_key.clone(), session.clone());
        Ok(())
    }

    fn archive(&self, session_key: &str) -> Result<()> {
        self.sessions.write().remove(session_key);
        self.archived.write().push(session_key.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use talon_domain::message::Message;

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).unwrap();

        let mut session = Session::new("agent:bot:dm:alice");
        session.append_messages([Message::user("hello")]);
        store.save(&session).unwrap();

        // A fresh store instance reads from disk, not the cache.
        let store2 = FileSessionStore::new(dir.path()).unwrap();
        let loaded = store2.load("agent:bot:dm:alice").unwrap().unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.message_count(), 1);
    }

    #[test]
    fn missing_session_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).unwrap();
        assert!(store.load("agent:bot:dm:nobody").unwrap().is_none());
    }

    #[test]
    fn archive_moves_file_aside() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path()).unwrap();

        let session = Session::new("agent:bot:dm:alice");
        store.save(&session).unwrap();
        store.archive("agent:bot:dm:alice").unwrap();

        assert!(store.load("agent:bot:dm:alice").unwrap().is_none());
        let archived = dir
            .path()
            .join("sessions/archive")
            .join(format!("{}.json", sanitize_key("agent:bot:dm:alice")));
        assert!(archived.exists());
    }

    #[test]
    fn key_sanitization_is_stable() {
        assert_eq!(sanitize_key("agent:bot:dm:alice"), "agent_bot_dm_alice");
        assert_eq!(sanitize_key("plain-key_1"), "plain-key_1");
    }
}
