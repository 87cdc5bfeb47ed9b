use std::fmt;

/// Inclusive byte interval `[start, end]` resolved against a file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` value for this range of a `size`-byte file.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{size}", self.start, self.end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Outcome of interpreting a `Range` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeRequest {
    /// No usable byte-range request; send the whole file.
    Full,
    /// One or more satisfiable ranges, in request order.
    Ranges(Vec<ByteRange>),
    /// 416 Requested Range Not Satisfiable.
    Unsatisfiable,
}

/// Interprets a `Range` header value against a file of `size` bytes.
///
/// Headers using a unit other than `bytes` are ignored. Any malformed or
/// unsatisfiable range makes the whole request unsatisfiable.
pub fn parse_range_header(header: Option<&str>, size: u64) -> RangeRequest {
    let Some(header) = header.map(str::trim) else {
        return RangeRequest::Full;
    };

    let Some((unit, specs)) = header.split_once('=') else {
        return RangeRequest::Unsatisfiable;
    };
    if !unit.trim().eq_ignore_ascii_case("bytes") {
        return RangeRequest::Full;
    }

    let mut ranges = Vec::new();
    for spec in specs.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match resolve_spec(spec, size) {
            Some(range) => ranges.push(range),
            None => return RangeRequest::Unsatisfiable,
        }
    }

    if ranges.is_empty() {
        RangeRequest::Unsatisfiable
    } else {
        RangeRequest::Ranges(ranges)
    }
}

fn resolve_spec(spec: &str, size: u64) -> Option<ByteRange> {
    let (first, last) = spec.split_once('-')?;
    let (first, last) = (first.trim(), last.trim());
    let last_byte = size.checked_sub(1)?;

    let (start, end) = match (first.is_empty(), last.is_empty()) {
        // -N: the final N bytes
        (true, false) => {
            let suffix: u64 = last.parse().ok()?;
            if suffix == 0 {
                return None;
            }
            (size.saturating_sub(suffix), last_byte)
        }
        // N-: from N to EOF
        (false, true) => (first.parse().ok()?, last_byte),
        (false, false) => {
            let start: u64 = first.parse().ok()?;
            let end: u64 = last.parse().ok()?;
            if end < start {
                return None;
            }
            (start, end.min(last_byte))
        }
        (true, true) => return None,
    };

    (start <= end).then_some(ByteRange { start, end })
}
