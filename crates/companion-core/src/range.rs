//! `Range` header parsing and byte window computation.

use thiserror::Error;

/// One range as written by the client, before it is checked against a size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedRange {
    /// `start-` or `start-end`.
    From { start: u64, end: Option<u64> },
    /// `-len`: the trailing `len` bytes.
    Suffix { len: u64 },
}

/// Inclusive byte window `[start, end]` of a resource of `total` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSpec {
    pub start: u64,
    pub end: u64,
    pub total: u64,
    /// Whether the client asked for a range at all.
    pub partial: bool,
}

impl RangeSpec {
    pub fn full(total: u64) -> Result<Self, RangeError> {
        if total == 0 {
            return Err(RangeError::Empty);
        }
        Ok(Self {
            start: 0,
            end: total - 1,
            total,
            partial: false,
        })
    }

    /// Number of bytes in the window.
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for the `Content-Range` header.
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.total)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("malformed range header: {0}")]
    Malformed(String),
    #[error("range starting at {start} is not satisfiable for {total} bytes")]
    Unsatisfiable { start: u64, total: u64 },
    #[error("resource is empty")]
    Empty,
}

/// Parse a `bytes=` header value into its list of ranges.
pub fn parse_range_header(value: &str) -> Result<Vec<RequestedRange>, RangeError> {
    let trimmed = value.trim();
    let spec = trimmed
        .strip_prefix("bytes=")
        .ok_or_else(|| RangeError::Malformed(trimmed.to_string()))?;

    let mut ranges = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (start_token, end_token) = part
            .split_once('-')
            .ok_or_else(|| RangeError::Malformed(part.to_string()))?;
        let start_token = start_token.trim();
        let end_token = end_token.trim();
        let bad = || RangeError::Malformed(part.to_string());

        if start_token.is_empty() {
            let len: u64 = end_token.parse().map_err(|_| bad())?;
            ranges.push(RequestedRange::Suffix { len });
        } else {
            let start: u64 = start_token.parse().map_err(|_| bad())?;
            let end = if end_token.is_empty() {
                None
            } else {
                Some(end_token.parse::<u64>().map_err(|_| bad())?)
            };
            ranges.push(RequestedRange::From { start, end });
        }
    }
    if ranges.is_empty() {
        return Err(RangeError::Malformed(trimmed.to_string()));
    }
    Ok(ranges)
}

/// Resolve the requested ranges against a resource of `total` bytes.
///
/// Only the first range is honoured. No ranges means the whole resource
/// with `partial == false`. An end past the resource is clamped.
pub fn compute_range(requested: &[RequestedRange], total: u64) -> Result<RangeSpec, RangeError> {
    let Some(first) = requested.first() else {
        return RangeSpec::full(total);
    };
    if total == 0 {
        return Err(RangeError::Empty);
    }

    let (start, end) = match *first {
        RequestedRange::Suffix { len: 0 } => {
            return Err(RangeError::Malformed("bytes=-0".into()));
        }
        RequestedRange::Suffix { len } => (total - len.min(total), total - 1),
        RequestedRange::From { start, end } => {
            if start >= total {
                return Err(RangeError::Unsatisfiable { start, total });
            }
            match end {
                None => (start, total - 1),
                Some(end) if end < start => {
                    return Err(RangeError::Malformed(format!("bytes={start}-{end}")));
                }
                Some(end) => (start, end.min(total - 1)),
            }
        }
    };

    Ok(RangeSpec {
        start,
        end,
        total,
        partial: true,
    })
}

/// Parse an optional header value and resolve it in one step.
pub fn range_for_header(value: Option<&str>, total: u64) -> Result<RangeSpec, RangeError> {
    match value {
        None => compute_range(&[], total),
        Some(raw) => compute_range(&parse_range_header(raw)?, total),
    }
}
