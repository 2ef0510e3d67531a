//! Chunk + rolling buffer types for one vault (spec §3, §4.2).

use crate::types::Role;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Target chunk size, in estimated tokens.
pub const TARGET_TOKENS: usize = 300;
/// Characters-per-token approximation used throughout the truncator/vault.
pub const CHARS_PER_TOKEN: usize = 4;
pub const TARGET_CHARS: usize = TARGET_TOKENS * CHARS_PER_TOKEN;
/// Sentence-boundary search window, as a fraction of TARGET_CHARS.
pub const CUT_WINDOW_LOW_FRAC: f64 = 0.8;
pub const CUT_WINDOW_HIGH_FRAC: f64 = 1.1;
/// Trailing characters carried into the next buffer so consecutive chunks
/// share context. The name mirrors the spec's "OVERLAP_TOKENS" constant,
/// but the unit is characters, matching the spec's literal wording.
pub const OVERLAP_TOKENS: usize = 30;
/// Records larger than this multiple of TARGET_TOKENS are split on import
/// (spec §4.2 "Normalisation on bulk import").
pub const SPLIT_MULTIPLE: f64 = 1.5;

/// Number of most-recent inserts checked for a duplicate content-hash.
/// Not bounded by the spec; chosen small enough to stay O(1) per insert
/// while catching the common case of an upstream retry re-sending the
/// same assistant turn.
pub const DEDUP_WINDOW: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Monotonic within its vault, strictly increasing by insertion order.
    pub id: u64,
    pub role: Role,
    pub content: String,
    /// First 8 bytes of SHA-256(content), hex-encoded (16 hex chars).
    pub content_hash: String,
    /// Unix-ms creation timestamp.
    pub created_at_ms: i64,
    pub model: String,
    pub request_id: String,
    pub embedding: Vec<f32>,
}

pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

/// Per-vault rolling text accumulator (spec §3 Buffer, §4.2 `storeChunked`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Buffer {
    pub text: String,
    pub role: Option<Role>,
    pub last_update_ms: i64,
}

impl Buffer {
    pub fn estimated_tokens(&self) -> usize {
        self.text.len().div_ceil(CHARS_PER_TOKEN)
    }
}

/// Append `content` to `buffer`, cutting off complete chunks whenever the
/// accumulated estimate crosses `TARGET_TOKENS`. Returns the cut prefixes the
/// caller must now embed and store — the buffer keeps only the trailing
/// overlap plus whatever text did not yet reach a cut point.
pub fn accumulate(buffer: &mut Buffer, content: &str, role: Role, now_ms: i64) -> Vec<String> {
    buffer.text.push_str(content);
    buffer.role = Some(role);
    buffer.last_update_ms = now_ms;

    let mut emitted = Vec::new();
    while buffer.estimated_tokens() >= TARGET_TOKENS {
        let Some(cut_at) = find_cut_point(&buffer.text) else {
            break;
        };
        let prefix: String = buffer.text[..cut_at].to_string();
        let rest = buffer.text[cut_at..].to_string();

        let overlap_start = prefix.len().saturating_sub(OVERLAP_TOKENS);
        let mut overlap_start = overlap_start;
        while overlap_start < prefix.len() && !prefix.is_char_boundary(overlap_start) {
            overlap_start += 1;
        }
        let overlap = &prefix[overlap_start..];

        buffer.text = format!("{overlap}{rest}");
        emitted.push(prefix);
    }
    emitted
}

/// Find a cut index within `[0.8*TARGET_CHARS, 1.1*TARGET_CHARS]`, preferring
/// a sentence-ending punctuation (`. ! ?`) followed by whitespace; falling
/// back to the last plain space in the window; falling back to the window's
/// upper edge if no whitespace exists at all (spec §4.2).
pub fn find_cut_point(text: &str) -> Option<usize> {
    let low = ((TARGET_CHARS as f64) * CUT_WINDOW_LOW_FRAC) as usize;
    let high = ((TARGET_CHARS as f64) * CUT_WINDOW_HIGH_FRAC) as usize;
    if text.len() < low {
        return None;
    }
    let high = high.min(text.len());
    let bytes = text.as_bytes();

    // Prefer the last `[.!?]` followed by whitespace within the window.
    let mut best_sentence: Option<usize> = None;
    for i in low..high.saturating_sub(1) {
        if i >= bytes.len() {
            break;
        }
        let c = bytes[i];
        if (c == b'.' || c == b'!' || c == b'?') && bytes.get(i + 1).is_some_and(|b| b.is_ascii_whitespace()) {
            best_sentence = Some(i + 1);
        }
    }
    if let Some(idx) = best_sentence {
        return Some(idx);
    }

    // Else the last plain space in the window.
    let mut best_space: Option<usize> = None;
    for i in low..high.min(bytes.len()) {
        if bytes[i] == b' ' {
            best_space = Some(i + 1);
        }
    }
    if let Some(idx) = best_space {
        return Some(idx.min(text.len()));
    }

    // No whitespace anywhere in the window — cut at the upper edge,
    // backing up to a valid char boundary.
    let mut idx = high.min(text.len());
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    Some(idx)
}

/// Split a bulk-import record larger than `SPLIT_MULTIPLE * TARGET_TOKENS`
/// into TARGET_TOKENS-ish pieces using the same sentence-boundary rule.
pub fn split_oversized(content: &str) -> Vec<String> {
    let max_chars = (TARGET_TOKENS as f64 * SPLIT_MULTIPLE * CHARS_PER_TOKEN as f64) as usize;
    if content.len() <= max_chars {
        return vec![content.to_string()];
    }
    let mut pieces = Vec::new();
    let mut rest = content.to_string();
    while rest.len() > max_chars {
        match find_cut_point(&rest) {
            Some(cut) if cut > 0 && cut < rest.len() => {
                pieces.push(rest[..cut].to_string());
                rest = rest[cut..].to_string();
            }
            _ => break,
        }
    }
    pieces.push(rest);
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_16_hex_chars() {
        let h = content_hash("hello");
        assert_eq!(h.len(), 16);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn accumulate_emits_nothing_under_threshold() {
        let mut buf = Buffer::default();
        let emitted = accumulate(&mut buf, "short text", Role::User, 0);
        assert!(emitted.is_empty());
        assert_eq!(buf.text, "short text");
    }

    #[test]
    fn accumulate_cuts_at_threshold() {
        let mut buf = Buffer::default();
        // Build a long text of complete sentences well past TARGET_CHARS.
        let sentence = "The quick brown fox jumps over the lazy dog. ";
        let long_text = sentence.repeat(40); // ~1880 chars
        let emitted = accumulate(&mut buf, &long_text, Role::Assistant, 1000);
        assert!(!emitted.is_empty());
        // Buffer keeps only an overlap-sized remainder (plus whatever trails).
        assert!(buf.text.len() < long_text.len());
    }

    #[test]
    fn split_oversized_keeps_small_records_whole() {
        let short = "a short record";
        assert_eq!(split_oversized(short), vec![short.to_string()]);
    }

    #[test]
    fn split_oversized_splits_large_records() {
        let sentence = "Lorem ipsum dolor sit amet consectetur adipiscing elit. ";
        let big = sentence.repeat(60);
        let pieces = split_oversized(&big);
        assert!(pieces.len() > 1);
        assert_eq!(pieces.concat(), big);
    }
}
