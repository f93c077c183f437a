//! Due-event claiming and stale-claim recovery.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Event, EventKind};
use crate::store::EventStore;
use crate::telemetry::metrics;

/// A batch of events owned by one claim token.
#[derive(Debug, Clone)]
pub struct Claim {
    pub token: Uuid,
    pub events: Vec<Event>,
}

pub struct Claimer {
    store: Arc<dyn EventStore>,
    stale_after: Duration,
}

impl Claimer {
    pub fn new(store: Arc<dyn EventStore>, stale_after: Duration) -> Self {
        Self { store, stale_after }
    }

    /// Claim every due, unclaimed, unfinished event of `kind` under a
    /// fresh token. Concurrent claimers get disjoint batches.
    pub async fn claim(&self, kind: EventKind, now: DateTime<Utc>) -> Result<Claim> {
        let token = Uuid::new_v4();
        let events = self.store.claim_due(kind, token, now).await?;
        if !events.is_empty() {
            metrics::events_claimed().add(
                events.len() as u64,
                &[KeyValue::new("type", kind.as_str())],
            );
            debug!(%token, kind = %kind, count = events.len(), "claimed due events");
        }
        Ok(Claim { token, events })
    }

    /// Release claims older than the stale threshold so another tick can
    /// pick the events up again.
    pub async fn reap(&self, now: DateTime<Utc>) -> Result<u64> {
        let stale_after = chrono::Duration::from_std(self.stale_after)
            .map_err(|e| Error::Config(format!("stale lock threshold out of range: {e}")))?;
        let reaped = self.store.reap_stale_claims(now - stale_after).await?;
        if reaped > 0 {
            metrics::claims_reaped().add(reaped, &[]);
            info!(reaped, "released stale claims");
        }
        Ok(reaped)
    }
}
