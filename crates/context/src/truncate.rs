//! Budget-fitting truncation.
//!
//! An assistant message carrying tool calls and the tool message(s) carrying
//! its results are one unit: dropping half of the pair produces a request
//! the provider rejects as structurally invalid. Truncation therefore works
//! on units of messages, oldest first, and never touches system messages.

use std::collections::HashSet;

use talon_domain::message::{Message, Role};

use crate::tokens::estimate_message_tokens;

/// A run of consecutive message indices that must survive or go together.
#[derive(Debug)]
struct Unit {
    range: std::ops::Range<usize>,
    tokens: u32,
    pinned: bool,
}

/// Group a message slice into atomic units. An assistant message with tool
/// calls absorbs every immediately-following tool message that answers one
/// of its calls.
fn units(messages: &[Message]) -> Vec<Unit> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < messages.len() {
        let start = i;
        let msg = &messages[i];
        i += 1;

        if msg.role == Role::Assistant && !msg.tool_calls.is_empty() {
            let ids: HashSet<&str> = msg.call_ids().collect();
            while i < messages.len()
                && messages[i].role == Role::Tool
                && messages[i].call_ids().any(|id| ids.contains(id))
            {
                i += 1;
            }
        }

        let range = start..i;
        out.push(Unit {
            tokens: messages[range.clone()]
                .iter()
                .map(estimate_message_tokens)
                .sum(),
            pinned: messages[start].role == Role::System,
            range,
        });
    }
    out
}

/// Drop the oldest droppable units until the estimate fits `budget_tokens`.
/// System messages always survive, even when they alone exceed the budget.
pub fn truncate_to_fit(messages: &[Message], budget_tokens: u32) -> Vec<Message> {
    let units = units(messages);
    let mut total: u32 = units.iter().map(|u| u.tokens).sum();

    let mut dropped: HashSet<usize> = HashSet::new();
    for (idx, unit) in units.iter().enumerate() {
        if total <= budget_tokens {
            break;
        }
        if unit.pinned {
            continue;
        }
        dropped.insert(idx);
        total -= unit.tokens;
    }

    if !dropped.is_empty() {
        tracing::debug!(
            units_dropped = dropped.len(),
            remaining_tokens = total,
            budget_tokens,
            "truncated history to fit budget"
        );
    }

    units
        .iter()
        .enumerate()
        .filter(|(idx, _)| !dropped.contains(idx))
        .flat_map(|(_, unit)| messages[unit.range.clone()].iter().cloned())
        .collect()
}

/// Adjust a split index so it never lands between an assistant message with
/// tool calls and its results. The returned index is `at` or earlier.
pub fn pair_safe_split(messages: &[Message], at: usize) -> usize {
    let units = units(messages);
    for unit in &units {
        if unit.range.start < at && at < unit.range.end {
            return unit.range.start;
        }
    }
    at
}

#[cfg(test)]
mod tests {
    use super::*;
    use talon_domain::message::{ToolCall, ToolResult};

    fn pair(call_id: &str, output: &str) -> [Message; 2] {
        let call = ToolCall {
            call_id: call_id.into(),
            tool_name: "file_list".into(),
            arguments: serde_json::json!({}),
        };
        [
            Message::assistant_with_calls("", vec![call]),
            Message::tool_results(vec![ToolResult::ok(call_id, output)]),
        ]
    }

    fn assert_pairs_intact(messages: &[Message]) {
        let mut open: HashSet<String> = HashSet::new();
        for msg in messages {
            for call in &msg.tool_calls {
                open.insert(call.call_id.clone());
            }
            for result in &msg.tool_results {
                assert!(
                    open.remove(&result.call_id),
                    "tool result {} without its assistant call",
                    result.call_id
                );
            }
        }
        assert!(open.is_empty(), "tool calls without results: {open:?}");
    }

    #[test]
    fn pair_survives_or_goes_together() {
        let mut messages = vec![Message::user("old question")];
        messages.extend(pair("c1", &"x".repeat(2_000)));
        messages.push(Message::user("new question"));
        messages.extend(pair("c2", "short"));

        // Tight budget forces drops; whatever remains must be pair-intact.
        let kept = truncate_to_fit(&messages, 100);
        assert!(kept.len() < messages.len());
        assert_pairs_intact(&kept);
    }

    #[test]
    fn system_messages_never_dropped() {
        let mut messages = vec![Message::system("you are talon")];
        for i in 0..20 {
            messages.push(Message::user(format!("message {i} {}", "y".repeat(400))));
        }

        let kept = truncate_to_fit(&messages, 50);
        assert!(kept.iter().any(|m| m.role == Role::System));
    }

    #[test]
    fn within_budget_is_untouched() {
        let messages = vec![Message::user("hi"), Message::assistant("hello")];
        let kept = truncate_to_fit(&messages, 10_000);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn oldest_dropped_first() {
        let messages = vec![
            Message::user(format!("oldest {}", "z".repeat(400))),
            Message::user("newer"),
            Message::user("newest"),
        ];
        let kept = truncate_to_fit(&messages, 30);
        assert!(kept.iter().all(|m| !m.content.starts_with("oldest")));
        assert!(kept.iter().any(|m| m.content == "newest"));
    }

    #[test]
    fn split_moves_off_a_pair_boundary() {
        let mut messages = vec![Message::user("q")];
        messages.extend(pair("c1", "out"));
        // Index 2 would separate the assistant call (1) from its result (2).
        assert_eq!(pair_safe_split(&messages, 2), 1);
        assert_eq!(pair_safe_split(&messages, 1), 1);
        assert_eq!(pair_safe_split(&messages, 3), 3);
    }
}
