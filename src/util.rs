//! Small helpers shared across the gateway and webhook modules.

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Uses character boundaries rather than byte indices so multi-byte UTF-8
/// content (emoji, CJK, accented characters) never splits mid-character.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let truncated = &s[..idx];
            format!("{}...", truncated.trim_end())
        }
        None => s.to_string(),
    }
}

/// Conversation title derived from the first user message: messages over
/// 50 characters are cut at 47 and given an ellipsis.
pub fn conversation_title(first_message: &str) -> String {
    if first_message.chars().count() > 50 {
        truncate_with_ellipsis(first_message, 47)
    } else {
        first_message.to_string()
    }
}
