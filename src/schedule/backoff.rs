//! Declarative backoff ladders.
//!
//! Two independent ladders exist: the ingress-level `retryIfError` list,
//! indexed by the message's retry iterator, and the notification-level
//! `onErrorTryResendAfter` list, resolved once into absolute due dates.
//! Delays are written as `<n><unit>` with unit `s`, `m`, `h` or `d`.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::{Error, Result};

/// Parse a delay such as `"30s"`, `"5m"`, `"1h"` or `"2d"`.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let s = raw.trim();
    if s.len() < 2 || !s.is_char_boundary(s.len() - 1) {
        return Err(Error::InvalidSchema(format!("invalid duration: '{raw}'")));
    }
    let (num, unit) = s.split_at(s.len() - 1);
    let n: u64 = num
        .parse()
        .map_err(|_| Error::InvalidSchema(format!("invalid duration number: '{raw}'")))?;
    let scale: u64 = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 60 * 60 * 24,
        _ => return Err(Error::InvalidSchema(format!("invalid duration unit: '{raw}'"))),
    };
    n.checked_mul(scale)
        .map(Duration::from_secs)
        .ok_or_else(|| Error::InvalidSchema(format!("duration out of range: '{raw}'")))
}

/// `start + offset`, or `InvalidSchema` when the result leaves chrono's range.
pub fn offset_from(start: DateTime<Utc>, offset: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(offset)
        .ok()
        .and_then(|d| start.checked_add_signed(d))
        .ok_or_else(|| Error::InvalidSchema(format!("offset {offset:?} from {start} out of range")))
}

pub fn parse_ladder<S: AsRef<str>>(raw: &[S]) -> Result<Vec<Duration>> {
    raw.iter().map(|s| parse_duration(s.as_ref())).collect()
}

/// Ingress-level retry ladder (`retryIfError`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryLadder {
    delays: Vec<Duration>,
}

impl RetryLadder {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Delay before redelivering a message that failed at `attempt`
    /// (zero-based). `None` once the ladder is exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        self.delays.get(attempt as usize).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }
}

/// Notification-level resend ladder (`onErrorTryResendAfter`), with the
/// immediate attempt prepended.
#[derive(Debug, Clone, PartialEq)]
pub struct ResendLadder {
    offsets: Vec<Duration>,
}

impl ResendLadder {
    pub fn new(resend_after: Vec<Duration>) -> Self {
        let mut offsets = Vec::with_capacity(resend_after.len() + 1);
        offsets.push(Duration::ZERO);
        offsets.extend(resend_after);
        Self { offsets }
    }

    /// Absolute due dates, first one being `start` itself.
    pub fn resolve(&self, start: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>> {
        self.offsets
            .iter()
            .map(|offset| offset_from(start, *offset))
            .collect()
    }
}
