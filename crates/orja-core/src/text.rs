//! Character-safe text shortening.

const ELLIPSIS: &str = "...";

/// Cut `text` to at most `limit` characters, ending in `...` when cut.
pub fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let keep = limit.saturating_sub(ELLIPSIS.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Collapse whitespace and fit `text` into `width` characters on a word
/// boundary, appending `...` when words had to be dropped.
pub fn shorten(text: &str, width: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let collapsed = words.join(" ");
    if collapsed.chars().count() <= width {
        return collapsed;
    }

    let budget = width.saturating_sub(ELLIPSIS.len());
    let mut out = String::new();
    for word in words {
        let extra = if out.is_empty() { 0 } else { 1 } + word.chars().count();
        if out.chars().count() + extra > budget {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out.push_str(ELLIPSIS);
    out
}

/// First `limit` characters of `text`.
pub fn prefix_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_text_untouched() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("", 10), "");
    }

    #[test]
    fn test_truncate_respects_limit() {
        let out = truncate("abcdefghij", 8);
        assert_eq!(out, "abcde...");
        assert_eq!(out.chars().count(), 8);
    }

    #[test]
    fn test_truncate_multibyte() {
        let out = truncate("äöäöäöäöäö", 6);
        assert_eq!(out, "äöä...");
    }

    #[test]
    fn test_shorten_on_word_boundary() {
        assert_eq!(shorten("Hello   world", 20), "Hello world");
        assert_eq!(shorten("Hello world foo", 12), "Hello...");
    }

    #[test]
    fn test_prefix_chars() {
        assert_eq!(prefix_chars("kellonaika", 5), "kello");
        assert_eq!(prefix_chars("abc", 10), "abc");
    }
}
