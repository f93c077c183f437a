//! `delay`: park the event until a computed due date.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::{EventHandler, HandlerContext, ResultContext};
use crate::error::Result;
use crate::schedule::{offset_from, parse_duration};

/// Either `"5m"`, `{"after": "5m"}` or `{"until": "<rfc3339>"}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DelaySection {
    Offset(String),
    After { after: String },
    Until { until: DateTime<Utc> },
}

pub struct DelayHandler;

#[async_trait]
impl EventHandler for DelayHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> Result<ResultContext> {
        let due = match ctx.section::<DelaySection>()? {
            DelaySection::Offset(raw) | DelaySection::After { after: raw } => {
                offset_from(ctx.now, parse_duration(&raw)?)?
            }
            DelaySection::Until { until } => until,
        };

        Ok(ResultContext::completed()
            .with("delay", json!({ "dueDate": due }))
            .pending_until(Some(due)))
    }
}
