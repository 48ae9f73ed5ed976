//! `Content-Range` header parsing.

use crate::error::{LoaderError, LoaderResult};

/// Parsed `Content-Range: bytes <first>-<last>/<size-or-*>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContentRange {
    pub first: u64,
    /// Inclusive.
    pub last: u64,
    /// `None` for `*`.
    pub instance_size: Option<u64>,
}

impl ContentRange {
    /// Bytes carried by the response.
    pub fn byte_count(&self) -> u64 {
        self.last - self.first + 1
    }
}

/// Parse a `Content-Range` value.
///
/// # Errors
///
/// [`LoaderError::InvalidContentRange`] when the unit is not `bytes`, a field
/// is not numeric, `last < first`, or a known size does not exceed `last`.
pub fn parse_content_range(value: &str) -> LoaderResult<ContentRange> {
    let invalid = || LoaderError::InvalidContentRange(value.to_string());

    let spec = value.trim();
    let (unit, rest) = spec.split_once(char::is_whitespace).ok_or_else(invalid)?;
    if !unit.eq_ignore_ascii_case("bytes") {
        return Err(invalid());
    }
    let (range, size) = rest.trim().split_once('/').ok_or_else(invalid)?;
    let (first, last) = range.trim().split_once('-').ok_or_else(invalid)?;

    let first = parse_number(first).ok_or_else(invalid)?;
    let last = parse_number(last).ok_or_else(invalid)?;
    if last < first {
        return Err(invalid());
    }

    let instance_size = match size.trim() {
        "*" => None,
        size => {
            let size = parse_number(size).ok_or_else(invalid)?;
            if size <= last {
                return Err(invalid());
            }
            Some(size)
        }
    };

    Ok(ContentRange {
        first,
        last,
        instance_size,
    })
}

fn parse_number(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
