//! Token estimation.
//!
//! Heuristic: roughly 4 characters per token, padded by a 20% safety margin
//! because code and non-Latin text pack more tokens per character than prose.
//! Budget checks must over-estimate rather than under-estimate; a rejected
//! over-long request is a hard failure, a slightly early compression is not.

use talon_domain::message::Message;

const CHARS_PER_TOKEN: f64 = 4.0;
const SAFETY_MARGIN: f64 = 1.2;

/// Estimate the token count of a piece of text.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count() as f64;
    ((chars / CHARS_PER_TOKEN).ceil() * SAFETY_MARGIN).ceil() as u32
}

/// Estimate one message, including its tool payloads and per-message
/// framing overhead.
pub fn estimate_message_tokens(message: &Message) -> u32 {
    let mut total = estimate_tokens(&message.content) + 4;
    for call in &message.tool_calls {
        total += estimate_tokens(&call.tool_name);
        total += estimate_tokens(&call.arguments.to_string());
    }
    for result in &message.tool_results {
        total += estimate_tokens(&result.output);
    }
    total
}

/// Estimate a whole message log.
pub fn estimate_history_tokens(messages: &[Message]) -> u32 {
    messages.iter().map(estimate_message_tokens).sum()
}
