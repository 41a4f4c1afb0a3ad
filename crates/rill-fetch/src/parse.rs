//! Response-header parsing helpers.

/// Total resource length from a `Content-Range` value (`bytes A-B/TOTAL`).
///
/// Only the part after the final slash matters; it must parse as a complete
/// decimal integer (`*` totals are rejected).
pub(crate) fn content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.rsplit_once('/')?;
    total.parse().ok()
}

/// Livestream sequence header value: a complete decimal integer.
pub(crate) fn sequence_number(value: &str) -> Option<i64> {
    value.parse().ok()
}
