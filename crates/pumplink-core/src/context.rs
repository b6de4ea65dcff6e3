//! Bounded prompt assembly.
//!
//! Pure functions only: the history bound is enforced by the caller via
//! `load_recent_messages`' limit, and no truncation happens here.

use pumplink_types::conversation::Message;

/// Label used when rendering a historical turn into the prompt.
fn author_label(message: &Message) -> &'static str {
    if message.is_assistant { "Assistant" } else { "User" }
}

/// Render recent history and a new utterance into a single prompt.
///
/// Each historical message becomes `"<User|Assistant>: <text>"` in
/// chronological order, joined with newlines, followed by the new
/// utterance and the trailing `Assistant:` marker. With no history the
/// prompt is just the utterance plus the marker.
pub fn build_prompt(history: &[Message], utterance: &str) -> String {
    let mut lines: Vec<String> = history
        .iter()
        .map(|m| format!("{}: {}", author_label(m), m.text))
        .collect();
    lines.push(utterance.to_string());
    format!("{}\nAssistant:", lines.join("\n"))
}
