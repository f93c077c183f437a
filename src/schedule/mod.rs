//! Retry timing for ingress redelivery and notification resends.

pub mod backoff;

pub use backoff::{ResendLadder, RetryLadder, offset_from, parse_duration};
