//! Read-through cache for event templates.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::Result;
use crate::model::EventTemplate;
use crate::store::EventStore;

/// Templates are cached for `ttl` after each load; a zero TTL disables
/// caching entirely.
pub struct TemplateCache {
    store: Arc<dyn EventStore>,
    ttl: Duration,
    entries: RwLock<HashMap<Uuid, (Instant, Arc<EventTemplate>)>>,
}

impl TemplateCache {
    pub fn new(store: Arc<dyn EventStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Arc<EventTemplate>> {
        if let Some((loaded_at, template)) = self.entries.read().await.get(&id) {
            if loaded_at.elapsed() < self.ttl {
                return Ok(Arc::clone(template));
            }
        }

        let template = Arc::new(self.store.get_template(id).await?);
        if !self.ttl.is_zero() {
            self.entries
                .write()
                .await
                .insert(id, (Instant::now(), Arc::clone(&template)));
        }
        Ok(template)
    }

    pub async fn invalidate(&self, id: Uuid) {
        self.entries.write().await.remove(&id);
    }
}
