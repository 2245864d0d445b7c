//! Injected block formatting and truncation.
//!
//! Sections carry machine-inspectable delimiters so a transcript reader
//! can tell injected context from conversation.

use bv_domain::config::{RecallTruncation, Zone};

use crate::tokens::chars_for_tokens;

/// Format one zone's content with delimiters.
pub fn format_zone_section(zone: Zone, content: &str) -> String {
    let tag = zone.to_string().to_uppercase();
    format!("=== {tag} ===\n{content}\n=== END_{tag} ===\n")
}

/// Cut `content` down to a token budget, keeping the head.
///
/// Returns `(text, truncated)`; truncation lands on a char boundary
/// and appends a marker.
pub fn truncate_head(content: &str, max_tokens: usize) -> (String, bool) {
    let max_chars = chars_for_tokens(max_tokens);
    if content.len() <= max_chars {
        return (content.to_owned(), false);
    }
    let boundary = floor_char_boundary(content, max_chars);
    let mut result = content[..boundary].to_owned();
    result.push_str("\n[TRUNCATED]");
    (result, true)
}

/// Cut a recall block per the configured strategy.
pub fn truncate_recall(
    content: &str,
    max_tokens: usize,
    strategy: RecallTruncation,
) -> (String, bool) {
    let max_chars = chars_for_tokens(max_tokens);
    if content.len() <= max_chars {
        return (content.to_owned(), false);
    }
    match strategy {
        // Keep the newest (trailing) recall lines.
        RecallTruncation::Tail => {
            let start = content.len() - max_chars;
            let boundary = ceil_char_boundary(content, start);
            (format!("[TRUNCATED]\n{}", &content[boundary..]), true)
        }
        // Keep the first line of each recall entry.
        RecallTruncation::Summarize => {
            let mut kept = String::new();
            for line in content.lines() {
                if line.starts_with("- ") || kept.is_empty() {
                    if kept.len() + line.len() + 1 > max_chars {
                        break;
                    }
                    kept.push_str(line);
                    kept.push('\n');
                }
            }
            kept.push_str("[SUMMARIZED]");
            (kept, true)
        }
        RecallTruncation::DropEntry => (String::new(), true),
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(s: &str, mut index: usize) -> usize {
    while index < s.len() && !s.is_char_boundary(index) {
        index += 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_is_delimited() {
        let section = format_zone_section(Zone::TaskState, "item 1: open");
        assert!(section.starts_with("=== TASK_STATE ===\n"));
        assert!(section.ends_with("=== END_TASK_STATE ===\n"));
    }

    #[test]
    fn head_truncation_marks_and_bounds() {
        let content = "abcd".repeat(10);
        let (text, truncated) = truncate_head(&content, 5);
        assert!(truncated);
        assert!(text.starts_with("abcdabcdabcdabcdabcd"));
        assert!(text.ends_with("[TRUNCATED]"));

        let (text, truncated) = truncate_head("short", 5);
        assert!(!truncated);
        assert_eq!(text, "short");
    }

    #[test]
    fn tail_strategy_keeps_newest() {
        let content = format!("{}{}", "old ".repeat(20), "newest");
        let (text, truncated) = truncate_recall(&content, 4, RecallTruncation::Tail);
        assert!(truncated);
        assert!(text.ends_with("newest"));
        assert!(text.starts_with("[TRUNCATED]"));
    }

    #[test]
    fn drop_entry_strategy_empties() {
        let (text, truncated) =
            truncate_recall(&"x".repeat(100), 4, RecallTruncation::DropEntry);
        assert!(truncated);
        assert!(text.is_empty());
    }

    #[test]
    fn truncation_respects_utf8_boundaries() {
        let content = "é".repeat(40);
        let (text, truncated) = truncate_head(&content, 5);
        assert!(truncated);
        assert!(text.contains('é'));
    }
}
