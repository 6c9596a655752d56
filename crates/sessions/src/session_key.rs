//! Session routing.
//!
//! Key templates:
//! - `agent:<agentId>:dm:<peerId>`                 (direct messages)
//! - `agent:<agentId>:<channel>:group:<groupId>`   (group chats, shared by
//!   all members)
//!
//! The gateway computes the key and evaluates the group gate before the
//! loop is invoked; the loop assumes every call is worth processing.

use serde::{Deserialize, Serialize};

use talon_domain::config::GroupGate;

/// Normalized metadata from an inbound message, supplied by the channel
/// adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundMetadata {
    /// Transport channel name (`"cli"`, `"matrix"`, ...).
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub peer_id: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    pub is_direct: bool,
    /// Whether the message addresses the agent explicitly.
    #[serde(default)]
    pub is_mention: bool,
}

/// Compute the stable session key for an inbound message. Direct messages
/// key on sender identity; group messages key on group identity.
pub fn compute_session_key(agent_id: &str, meta: &InboundMetadata) -> String {
    let base = format!("agent:{agent_id}");

    if meta.is_direct {
        let peer = meta.peer_id.as_deref().unwrap_or("unknown");
        return format!("{base}:dm:{peer}");
    }

    let ch = meta.channel.as_deref().unwrap_or("default");
    let group = meta.group_id.as_deref().unwrap_or("unknown");
    format!("{base}:{ch}:group:{group}")
}

/// Whether the gateway should invoke the loop for this message. Direct
/// messages always pass; group messages pass per the configured gate.
pub fn should_process(meta: &InboundMetadata, gate: GroupGate) -> bool {
    if meta.is_direct {
        return true;
    }
    match gate {
        GroupGate::Mention => meta.is_mention,
        GroupGate::Always => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dm(peer: &str) -> InboundMetadata {
        InboundMetadata {
            peer_id: Some(peer.into()),
            is_direct: true,
            ..Default::default()
        }
    }

    fn group(channel: &str, group_id: &str, is_mention: bool) -> InboundMetadata {
        InboundMetadata {
            channel: Some(channel.into()),
            group_id: Some(group_id.into()),
            is_direct: false,
            is_mention,
            ..Default::default()
        }
    }

    #[test]
    fn dm_keys_on_sender() {
        assert_eq!(
            compute_session_key("bot1", &dm("alice")),
            "agent:bot1:dm:alice"
        );
    }

    #[test]
    fn group_keys_on_group_identity() {
        assert_eq!(
            compute_session_key("bot1", &group("matrix", "room42", false)),
            "agent:bot1:matrix:group:room42"
        );
    }

    #[test]
    fn same_group_same_key_for_all_members() {
        let a = group("matrix", "room42", false);
        let mut b = a.clone();
        b.peer_id = Some("bob".into());
        assert_eq!(
            compute_session_key("bot1", &a),
            compute_session_key("bot1", &b)
        );
    }

    #[test]
    fn mention_gate() {
        assert!(should_process(&dm("alice"), GroupGate::Mention));
        assert!(!should_process(&group("matrix", "g", false), GroupGate::Mention));
        assert!(should_process(&group("matrix", "g", true), GroupGate::Mention));
        assert!(should_process(&group("matrix", "g", false), GroupGate::Always));
    }
}
