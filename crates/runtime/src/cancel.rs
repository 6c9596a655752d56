//! Per-session run cancellation.
//!
//! Each running loop registers a token keyed by session key. Cancelling
//! aborts the in-flight LLM call and any outstanding tool or sub-agent
//! futures at the loop's next await point; completed work is already
//! committed, so the log never holds a partial append.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

pub struct RunCancelMap {
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl Default for RunCancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl RunCancelMap {
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Create and register a token for a session's run.
    pub fn register(&self, session_key: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens
            .lock()
            .insert(session_key.to_owned(), token.clone());
        token
    }

    /// Cancel the running loop for a session. Returns whether one was found.
    pub fn cancel(&self, session_key: &str) -> bool {
        match self.tokens.lock().get(session_key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the token when the run completes.
    pub fn remove(&self, session_key: &str) {
        self.tokens.lock().remove(session_key);
    }

    /// Whether a run is currently in flight for the session.
    pub fn is_running(&self, session_key: &str) -> bool {
        self.tokens.lock().contains_key(session_key)
    }
}
