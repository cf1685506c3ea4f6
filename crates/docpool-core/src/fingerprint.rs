//! Text cleaning, three-part slicing and content fingerprints.
//!
//! A document's identity is the SHA-256 of its *text slice*, not of the
//! raw file bytes, so the same content saved as `.docx` and `.pdf`
//! collapses to one document. The slice is the cleaned text when short,
//! otherwise its head, middle and tail blocks joined by
//! [`SLICE_SEPARATOR`].
//!
//! ```text
//! cleaned.len() <= 3 * block   →  cleaned
//! otherwise                    →  head ++ SEP ++ middle ++ SEP ++ tail
//! ```

use sha2::{Digest, Sha256};

/// Default block size in characters.
pub const DEFAULT_BLOCK_CHARS: usize = 2048;

/// Joins the head, middle and tail blocks of a long text.
pub const SLICE_SEPARATOR: &str = "\n...\n";

const KEPT_PUNCTUATION: &[char] = &[',', '.', '!', '?', ';', ':', '(', ')', '"', '\'', '[', ']'];

/// Normalize raw extracted text.
///
/// Letters and digits of any script survive, along with a small set of
/// sentence punctuation. Everything else becomes a space, and whitespace
/// runs collapse to a single space.
pub fn clean_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;
    for c in raw.chars() {
        if c.is_alphanumeric() || KEPT_PUNCTUATION.contains(&c) {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        } else {
            pending_space = true;
        }
    }
    out
}

/// Sample `cleaned` into head/middle/tail blocks of `block_chars` characters.
///
/// Texts of at most three blocks are returned whole.
pub fn three_part_slice(cleaned: &str, block_chars: usize) -> String {
    let total = cleaned.chars().count();
    if block_chars == 0 || total <= 3 * block_chars {
        return cleaned.to_string();
    }

    let head = char_range(cleaned, 0, block_chars);
    let middle_start = (total - block_chars) / 2;
    let middle = char_range(cleaned, middle_start, middle_start + block_chars);
    let tail = char_range(cleaned, total - block_chars, total);

    let mut slice =
        String::with_capacity(head.len() + middle.len() + tail.len() + 2 * SLICE_SEPARATOR.len());
    slice.push_str(head);
    slice.push_str(SLICE_SEPARATOR);
    slice.push_str(middle);
    slice.push_str(SLICE_SEPARATOR);
    slice.push_str(tail);
    slice
}

/// Lowercase hex SHA-256 of a text slice.
pub fn fingerprint(text_slice: &str) -> String {
    let digest = Sha256::digest(text_slice.as_bytes());
    format!("{:x}", digest)
}

/// Substring by character positions `[start, end)`.
fn char_range(s: &str, start: usize, end: usize) -> &str {
    let byte_at = |pos: usize| {
        s.char_indices()
            .nth(pos)
            .map(|(i, _)| i)
            .unwrap_or(s.len())
    };
    &s[byte_at(start)..byte_at(end)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_collapses_whitespace_and_drops_symbols() {
        let raw = "  Quarterly\treport #3 ~~ revenue\n\n up 12%!  ";
        assert_eq!(clean_text(raw), "Quarterly report 3 revenue up 12 !");
    }

    #[test]
    fn clean_text_keeps_cjk_and_punctuation() {
        assert_eq!(clean_text("数据,分析 (草稿)"), "数据,分析 (草稿)");
    }

    #[test]
    fn clean_text_of_symbols_only_is_empty() {
        assert_eq!(clean_text("### --- @@@"), "");
    }

    #[test]
    fn short_text_is_returned_whole() {
        let text = "a".repeat(30);
        assert_eq!(three_part_slice(&text, 10), text);
    }

    #[test]
    fn long_text_is_sampled_in_three_blocks() {
        let text: String = ('a'..='z').cycle().take(100).collect();
        let slice = three_part_slice(&text, 10);
        let parts: Vec<&str> = slice.split(SLICE_SEPARATOR).collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], &text[..10]);
        assert_eq!(parts[1], &text[45..55]);
        assert_eq!(parts[2], &text[90..]);
    }

    #[test]
    fn slicing_counts_characters_not_bytes() {
        let text = "数".repeat(40);
        let slice = three_part_slice(&text, 10);
        let parts: Vec<&str> = slice.split(SLICE_SEPARATOR).collect();
        assert!(parts.iter().all(|p| p.chars().count() == 10));
    }

    #[test]
    fn fingerprint_is_lowercase_sha256_hex() {
        assert_eq!(
            fingerprint(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(fingerprint("same text"), fingerprint("same text"));
        assert_ne!(fingerprint("same text"), fingerprint("other text"));
    }
}
