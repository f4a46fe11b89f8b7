//! Plain-text rendering for sessions and transcripts.

use threadkeep_core::format::format_relative_time_opt;
use threadkeep_core::{Message, Role, SessionMetadata};

/// Role prefix for transcript rows.
pub fn role_prefix(msg: &Message) -> &'static str {
    match msg.role {
        Role::User => "[user]",
        Role::Assistant => "[assistant]",
        Role::Tool => "[tool]",
    }
}

/// Displayable body of a transcript message.
///
/// Tool rows show the tool name with its pretty-printed input, then the
/// result when one was captured.
pub fn detail_content(msg: &Message) -> String {
    let Some(tool) = &msg.tool else {
        return msg.content.clone();
    };

    let mut out = String::new();
    if !msg.content.is_empty() {
        out.push_str(&msg.content);
        out.push('\n');
    }
    out.push_str(&format!("-> {}", tool.name));
    if !tool.input.is_null() {
        let input = serde_json::to_string_pretty(&tool.input)
            .unwrap_or_else(|_| "[invalid tool input]".to_string());
        out.push('\n');
        out.push_str(&input);
    }
    if let Some(result) = &tool.result {
        if !result.is_empty() && *result != msg.content {
            out.push('\n');
            out.push_str(result);
        }
    }
    out
}

/// One-line summary row for session listings.
pub fn session_row(meta: &SessionMetadata) -> String {
    let label = meta
        .nickname
        .as_deref()
        .map(|n| format!(" ({n})"))
        .unwrap_or_default();
    let project = meta.project_name.as_deref().unwrap_or("-");
    let tags = if meta.tags.is_empty() {
        String::new()
    } else {
        let joined: Vec<&str> = meta.tags.iter().map(String::as_str).collect();
        format!(" [{}]", joined.join(", "))
    };
    let preview = truncate_preview(meta.preview.as_deref().unwrap_or(""), 60);

    format!(
        "{}{}  {}  {} msgs  {}{}  {}",
        meta.id,
        label,
        project,
        meta.message_count,
        format_relative_time_opt(meta.created_at),
        tags,
        preview
    )
}

pub fn truncate_preview(input: &str, max_chars: usize) -> &str {
    if input.chars().count() <= max_chars {
        return input;
    }
    input
        .char_indices()
        .nth(max_chars)
        .map(|(idx, _)| &input[..idx])
        .unwrap_or(input)
}
