//! Census text decoding

use std::borrow::Cow;

/// Decode bytes as UTF-8, falling back to Latin-1
///
/// Returns the text and whether the fallback was needed. Census names such
/// as "Cataño" or "Doña Ana" are Latin-1 encoded in some releases.
pub fn decode_census_text(bytes: &[u8]) -> (Cow<'_, str>, bool) {
    match std::str::from_utf8(bytes) {
        Ok(text) => (Cow::Borrowed(text), false),
        Err(_) => (Cow::Owned(bytes.iter().map(|&b| b as char).collect()), true),
    }
}

/// Decode one field, trimming surrounding whitespace
pub fn decode_field(bytes: &[u8]) -> String {
    decode_census_text(bytes).0.trim().to_string()
}
