//! Oracle client and the shared decoding rules for its responses.
//!
//! Oracle output is expected to be JSON but arrives with formatting noise
//! (code fences, prose around the payload). Decoding tries the whole
//! response first, then exactly one salvage pass over the first balanced
//! bracket region. Anything else is `OracleError::Malformed`.

pub mod claude;

pub use claude::ClaudeOracle;

use serde::de::DeserializeOwned;

use crate::error::OracleError;

const EXCERPT_BYTES: usize = 200;

/// Truncate a string to at most `max_bytes` bytes at a character boundary.
pub fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    &s[..end]
}

/// Strip a surrounding markdown code fence.
pub fn strip_code_blocks(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// First balanced `open`…`close` region of `text`. Brackets inside JSON
/// string literals do not count.
pub fn first_balanced_region(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    let end = start + i + c.len_utf8();
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Decode oracle output into `T`, salvaging the first `open`…`close` region
/// when the response as a whole does not parse.
pub fn decode_json<T: DeserializeOwned>(raw: &str, open: char, close: char) -> Result<T, OracleError> {
    let stripped = strip_code_blocks(raw);
    if let Ok(value) = serde_json::from_str::<T>(stripped) {
        return Ok(value);
    }

    first_balanced_region(stripped, open, close)
        .and_then(|region| serde_json::from_str::<T>(region).ok())
        .ok_or_else(|| OracleError::Malformed {
            excerpt: truncate_to_char_boundary(raw.trim(), EXCERPT_BYTES).to_string(),
        })
}

/// Decode a JSON array, salvaging the first `[`…`]` region.
pub fn decode_json_array<T: DeserializeOwned>(raw: &str) -> Result<Vec<T>, OracleError> {
    decode_json(raw, '[', ']')
}
