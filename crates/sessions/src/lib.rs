//! Session management for the Talon core.
//!
//! Stable session routing from inbound metadata, the
//! Created/Active/Idle/Resumed lifecycle, durable storage behind the
//! [`SessionStore`] capability, and the per-session run lock that keeps at
//! most one agent loop in flight per conversation.

pub mod lifecycle;
pub mod lock;
pub mod session;
pub mod session_key;
pub mod store;

pub use lifecycle::SessionManager;
pub use lock::SessionLockMap;
pub use session::{Session, SessionOverrides, SessionState, ThinkingLevel};
pub use session_key::{compute_session_key, should_process, InboundMetadata};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
