use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::StreamConfig;

/// How a suffix range (`bytes=-500`) is interpreted.
///
/// The historic behaviour treats the empty start field as byte zero, turning
/// the request into a prefix range. Many deployed clients were written against
/// that quirk, so it stays the default; RFC 9110 semantics are opt-in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuffixPolicy {
    /// `bytes=-N` is read as `bytes=0-N`.
    #[default]
    Legacy,
    /// `bytes=-N` serves the final N bytes.
    Rfc,
}

/// A concrete byte window resolved from a `Range` header and a total size.
///
/// `start` and `end` are inclusive. The window may be empty (`len() == 0`)
/// when the request lies beyond the file; callers send nothing in that case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start: u64,
    pub end: u64,
    pub total_size: u64,
    pub is_partial: bool,
}

impl ResolvedRange {
    /// Number of bytes the response body will carry.
    pub fn len(&self) -> u64 {
        if self.total_size == 0 {
            return 0;
        }
        (self.end + 1).saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status(&self) -> StatusCode {
        if self.is_partial {
            StatusCode::PARTIAL_CONTENT
        } else {
            StatusCode::OK
        }
    }
}

/// Resolves a raw `Range` header value against the total file size.
///
/// Pure function: the same inputs always produce the same window. It never
/// fails; headers that don't match the lenient `bytes=<start>-<end>` shape
/// fall back to the full file, and out-of-bounds requests degrade to a
/// zero-length window.
///
/// An open-ended range (`bytes=100-`) does not run to end of file: it is
/// capped at one `chunk_size` from the start. A window whose end reaches the
/// file's last byte is served as a `200` full-content response even when a
/// range was requested.
pub fn resolve(header: Option<&str>, total_size: u64, config: &StreamConfig) -> ResolvedRange {
    let full = ResolvedRange {
        start: 0,
        end: total_size.saturating_sub(1),
        total_size,
        is_partial: false,
    };

    if total_size == 0 {
        return full;
    }

    let Some((start, end)) = header.and_then(match_bytes_range) else {
        return full;
    };

    if start.is_none() && config.suffix_policy == SuffixPolicy::Rfc {
        return resolve_suffix(end, total_size, full);
    }

    let start = start.unwrap_or(0);
    let end = match end {
        // only a start given: one chunk from there, capped at the last byte
        None => start
            .saturating_add(config.chunk_size.saturating_sub(1))
            .min(total_size - 1),
        Some(end) => end.min(total_size - 1),
    };

    ResolvedRange {
        start,
        end,
        total_size,
        is_partial: start <= end && end < total_size - 1,
    }
}

fn resolve_suffix(suffix_len: Option<u64>, total_size: u64, full: ResolvedRange) -> ResolvedRange {
    match suffix_len {
        // "bytes=-" carries no length at all
        None | Some(0) => full,
        // a suffix longer than the file means the whole file
        Some(n) if n >= total_size => full,
        Some(n) => ResolvedRange {
            start: total_size - n,
            end: total_size - 1,
            total_size,
            is_partial: true,
        },
    }
}

/// Matches the first `bytes <start> - <end>` unit in a header value.
///
/// Mirrors the lenient shape `bytes\s*=?\s*(\d*)\s*-\s*(\d*)`: searched
/// anywhere in the value, case-insensitive, the `=` optional, either digit
/// group allowed to be empty. Anything after the first range unit (further
/// comma-separated ranges included) is ignored. Digit runs too large for a
/// `u64` are treated as no match.
fn match_bytes_range(header: &str) -> Option<(Option<u64>, Option<u64>)> {
    let at = header.to_ascii_lowercase().find("bytes")?;
    let rest = header[at + "bytes".len()..].trim_start();
    let rest = rest.strip_prefix('=').unwrap_or(rest).trim_start();

    let (start, rest) = take_number(rest)?;
    let rest = rest.trim_start().strip_prefix('-')?;
    let (end, _) = take_number(rest.trim_start())?;

    Some((start, end))
}

fn take_number(s: &str) -> Option<(Option<u64>, &str)> {
    let digits = s.len() - s.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return Some((None, s));
    }
    let value = s[..digits].parse::<u64>().ok()?;
    Some((Some(value), &s[digits..]))
}
