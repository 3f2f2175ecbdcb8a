//! `Range: bytes=...` parsing for single ranges.

use axum::http::{header, HeaderMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=a-b`, both inclusive.
    FromTo(u64, u64),
    /// `bytes=a-`
    From(u64),
    /// `bytes=-n`, the last n bytes.
    Suffix(u64),
}

/// The range does not overlap the representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unsatisfiable;

impl ByteRange {
    /// `None` for anything malformed, including multi-range requests; the
    /// caller then serves the full body.
    pub fn parse<S: AsRef<str>>(s: S) -> Option<ByteRange> {
        let v = s.as_ref().trim().strip_prefix("bytes=")?;
        if v.contains(',') {
            return None;
        }

        let (start, end) = v.split_once('-')?;
        let (start, end) = (start.trim(), end.trim());
        let number = |s: &str| -> Option<u64> {
            if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            s.parse::<u64>().ok()
        };

        match (start.is_empty(), end.is_empty()) {
            (true, true) => None,
            (true, false) => number(end).map(ByteRange::Suffix),
            (false, true) => number(start).map(ByteRange::From),
            (false, false) => {
                let (start, end) = (number(start)?, number(end)?);
                if end < start {
                    return None;
                }
                Some(ByteRange::FromTo(start, end))
            }
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<ByteRange> {
        headers
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(ByteRange::parse)
    }

    /// Inclusive `(start, end)` within a body of `size` bytes.
    pub fn resolve(&self, size: u64) -> Result<(u64, u64), Unsatisfiable> {
        if size == 0 {
            return Err(Unsatisfiable);
        }
        let last = size - 1;
        match *self {
            ByteRange::FromTo(start, end) if start <= last => Ok((start, end.min(last))),
            ByteRange::From(start) if start <= last => Ok((start, last)),
            ByteRange::Suffix(n) if n > 0 => Ok((size - n.min(size), last)),
            _ => Err(Unsatisfiable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_byte_range(s: &str, expected: ByteRange) {
        assert_eq!(ByteRange::parse(s), Some(expected));
    }

    fn assert_no_byte_range(s: &str) {
        assert_eq!(ByteRange::parse(s), None);
    }

    #[test]
    fn parses_byte_range() {
        assert_no_byte_range("asd");
        assert_no_byte_range("bytes=");
        assert_no_byte_range("bytes=-");
        assert_no_byte_range("bytes=5-2");
        assert_no_byte_range("bytes=0-1,4-5");
        assert_no_byte_range("bytes=a-b");
        assert_no_byte_range("items=0-1");
        assert_byte_range("bytes=11-", ByteRange::From(11));
        assert_byte_range("bytes=-111", ByteRange::Suffix(111));
        assert_byte_range("bytes=11-111", ByteRange::FromTo(11, 111));
    }

    #[test]
    fn resolves_against_size() {
        assert_eq!(ByteRange::FromTo(2, 5).resolve(8), Ok((2, 5)));
        assert_eq!(ByteRange::FromTo(2, 100).resolve(8), Ok((2, 7)));
        assert_eq!(ByteRange::From(7).resolve(8), Ok((7, 7)));
        assert_eq!(ByteRange::Suffix(3).resolve(8), Ok((5, 7)));
        assert_eq!(ByteRange::Suffix(30).resolve(8), Ok((0, 7)));
    }

    #[test]
    fn unsatisfiable_ranges() {
        assert_eq!(ByteRange::From(8).resolve(8), Err(Unsatisfiable));
        assert_eq!(ByteRange::FromTo(9, 10).resolve(8), Err(Unsatisfiable));
        assert_eq!(ByteRange::Suffix(0).resolve(8), Err(Unsatisfiable));
        assert_eq!(ByteRange::From(0).resolve(0), Err(Unsatisfiable));
    }
}
