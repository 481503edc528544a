//! Placeholder tokens standing in for secret values
//!
//! An agent only ever sees `CLAW_SE_<NAME>`; the egress proxy swaps the token
//! for the real value on the way out. Scanning is a plain prefix search
//! followed by the longest run of `[A-Z0-9_]`.

use std::collections::HashSet;
use std::ops::Range;

pub const PLACEHOLDER_PREFIX: &str = "CLAW_SE_";

/// The placeholder token for a secret name
pub fn placeholder_for(name: &str) -> String {
    format!("{}{}", PLACEHOLDER_PREFIX, name.to_ascii_uppercase())
}

pub(crate) fn is_name_byte(byte: u8) -> bool {
    byte.is_ascii_uppercase() || byte.is_ascii_digit() || byte == b'_'
}

/// Byte ranges of every placeholder token in `bytes` (prefix included)
///
/// The token alphabet is ASCII, so this works on header values that are not
/// valid UTF-8 as well as on text.
fn placeholder_spans(bytes: &[u8]) -> Vec<Range<usize>> {
    let prefix = PLACEHOLDER_PREFIX.as_bytes();
    let mut spans = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = bytes[cursor..]
        .windows(prefix.len())
        .position(|window| window == prefix)
    {
        let start = cursor + offset;
        let name_start = start + prefix.len();
        let mut end = name_start;
        while end < bytes.len() && is_name_byte(bytes[end]) {
            end += 1;
        }

        if end > name_start {
            spans.push(start..end);
            cursor = end;
        } else {
            cursor = name_start;
        }
    }

    spans
}

fn span_name(bytes: &[u8], span: &Range<usize>) -> String {
    // Name bytes are ASCII.
    String::from_utf8_lossy(&bytes[span.start + PLACEHOLDER_PREFIX.len()..span.end]).into_owned()
}

/// Secret names referenced in `text`, de-duplicated in first-seen order
pub fn scan_for_placeholders(text: &str) -> Vec<String> {
    scan_bytes_for_placeholders(text.as_bytes())
}

/// Like [`scan_for_placeholders`], for raw bytes such as header values
pub fn scan_bytes_for_placeholders(bytes: &[u8]) -> Vec<String> {
    let mut seen = HashSet::new();
    placeholder_spans(bytes)
        .iter()
        .map(|span| span_name(bytes, span))
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Replace every placeholder whose name `lookup` knows; others are left as-is
pub fn replace_placeholders<'a, F>(text: &str, lookup: F) -> String
where
    F: FnMut(&str) -> Option<&'a str>,
{
    let replaced = replace_placeholders_in_bytes(text.as_bytes(), lookup);
    // Only ASCII spans inside valid UTF-8 were swapped for UTF-8 values.
    String::from_utf8(replaced)
        .unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned())
}

/// Like [`replace_placeholders`], for raw bytes such as header values
pub fn replace_placeholders_in_bytes<'a, F>(bytes: &[u8], mut lookup: F) -> Vec<u8>
where
    F: FnMut(&str) -> Option<&'a str>,
{
    let mut output = Vec::with_capacity(bytes.len());
    let mut last = 0;

    for span in placeholder_spans(bytes) {
        let name = span_name(bytes, &span);
        if let Some(value) = lookup(&name) {
            output.extend_from_slice(&bytes[last..span.start]);
            output.extend_from_slice(value.as_bytes());
            last = span.end;
        }
    }

    output.extend_from_slice(&bytes[last..]);
    output
}
