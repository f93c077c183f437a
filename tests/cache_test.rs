use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;
use workflow_events::engine::TemplateCache;
use workflow_events::error::Error;
use workflow_events::model::{EventKind, EventTemplate};
use workflow_events::store::memory::MemoryStore;

fn template(id: Uuid, name: &str) -> EventTemplate {
    EventTemplate {
        id,
        name: name.to_string(),
        kind: EventKind::Delay,
        schema: r#"{"delay":"5m"}"#.to_string(),
        status_rules: Vec::new(),
    }
}

#[tokio::test(start_paused = true)]
async fn cached_template_is_served_until_ttl_expires() {
    let store = Arc::new(MemoryStore::new());
    let id = Uuid::new_v4();
    store.put_template(template(id, "v1"));
    let cache = TemplateCache::new(store.clone(), Duration::from_secs(60));

    assert_eq!(cache.get(id).await.unwrap().name, "v1");
    store.put_template(template(id, "v2"));
    assert_eq!(cache.get(id).await.unwrap().name, "v1");

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(cache.get(id).await.unwrap().name, "v2");
}

#[tokio::test]
async fn invalidate_forces_a_reload() {
    let store = Arc::new(MemoryStore::new());
    let id = Uuid::new_v4();
    store.put_template(template(id, "v1"));
    let cache = TemplateCache::new(store.clone(), Duration::from_secs(60));

    cache.get(id).await.unwrap();
    store.put_template(template(id, "v2"));
    cache.invalidate(id).await;

    assert_eq!(cache.get(id).await.unwrap().name, "v2");
}

#[tokio::test]
async fn zero_ttl_always_reads_through() {
    let store = Arc::new(MemoryStore::new());
    let id = Uuid::new_v4();
    store.put_template(template(id, "v1"));
    let cache = TemplateCache::new(store.clone(), Duration::ZERO);

    cache.get(id).await.unwrap();
    store.put_template(template(id, "v2"));

    assert_eq!(cache.get(id).await.unwrap().name, "v2");
}

#[tokio::test]
async fn missing_template_is_not_found() {
    let cache = TemplateCache::new(Arc::new(MemoryStore::new()), Duration::from_secs(60));
    let err = cache.get(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}
