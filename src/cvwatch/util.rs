use anyhow::Result;
use std::time::{SystemTime, UNIX_EPOCH};

/// Return the current Unix epoch in seconds.
pub fn now_epoch_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Collapse every run of whitespace to a single space and trim both ends.
pub fn collapse_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut prev_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !out.is_empty() && !prev_space {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(ch);
            prev_space = false;
        }
    }
    if prev_space && out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Keep at most `max_chars` Unicode characters of `input`.
pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    input.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapse_whitespace_trims_and_joins() {
        assert_eq!(collapse_whitespace("  2024-06-01 \n\t 10:00  "), "2024-06-01 10:00");
        assert_eq!(collapse_whitespace("\u{3000}広告\u{3000}A\u{3000}"), "広告 A");
        assert_eq!(collapse_whitespace("   "), "");
    }

    #[test]
    fn truncate_chars_counts_characters_not_bytes() {
        assert_eq!(truncate_chars("広告名テスト", 2), "広告");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
