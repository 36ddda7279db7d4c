use crate::config::env_u64;
use crate::models::SubmitResponse;
use chrono::{DateTime, Duration, Utc};
use redis::AsyncCommands;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

pub fn ttl_secs() -> u64 {
    env_u64("IDEMPOTENCY_TTL_SECS").filter(|v| *v > 0).unwrap_or(3600)
}

/// Cache key for a submit replay. A key only ever replays the wizard it was
/// first sent with, and never crosses members.
pub fn cache_key(user_id: &str, wizard_id: &str, idempotency_key: &str) -> String {
    format!("barter:submit:{user_id}:{wizard_id}:{idempotency_key}")
}

pub async fn redis_get(client: &redis::Client, key: &str) -> Option<SubmitResponse> {
    let mut conn = client.get_multiplexed_async_connection().await.ok()?;
    let cached: Option<String> = conn.get(key).await.ok()?;
    cached.and_then(|v| serde_json::from_str(&v).ok())
}

pub async fn redis_set(client: &redis::Client, key: &str, value: &SubmitResponse, ttl_secs: u64) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await
        && let Ok(json) = serde_json::to_string(value)
    {
        let _: Result<(), _> = conn.set_ex(key, json, ttl_secs).await;
    }
}

/// In-process fallback when no Redis is configured. Entries expire after the
/// same TTL Redis would apply.
#[derive(Clone)]
pub struct MemoryReplayCache {
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, (DateTime<Utc>, SubmitResponse)>>>,
}

impl MemoryReplayCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl: Duration::seconds(ttl_secs.min(i64::MAX as u64) as i64),
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn get(&self, key: &str, now: DateTime<Utc>) -> Option<SubmitResponse> {
        let guard = self.entries.lock().await;
        guard
            .get(key)
            .filter(|(stored_at, _)| now - *stored_at < self.ttl)
            .map(|(_, response)| response.clone())
    }

    pub async fn insert(&self, key: String, response: SubmitResponse, now: DateTime<Utc>) {
        let mut guard = self.entries.lock().await;
        guard.retain(|_, (stored_at, _)| now - *stored_at < self.ttl);
        guard.insert(key, (now, response));
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::service::{CreatedProduct, ProductId};

    fn response(id: u64) -> SubmitResponse {
        SubmitResponse {
            product: CreatedProduct {
                id: ProductId::Number(id),
                slug: None,
            },
            navigate_to: format!("/dashboard?created={id}"),
            notices: Vec::new(),
            stages: Vec::new(),
        }
    }

    #[test]
    fn keys_are_scoped_per_member_and_wizard() {
        assert_ne!(cache_key("ana", "w1", "abc"), cache_key("bo", "w1", "abc"));
        assert_ne!(cache_key("ana", "w1", "abc"), cache_key("ana", "w2", "abc"));
        assert_eq!(cache_key("ana", "w1", "abc"), "barter:submit:ana:w1:abc");
    }

    #[tokio::test]
    async fn memory_entries_expire_after_ttl() {
        let cache = MemoryReplayCache::new(60);
        let start = Utc::now();
        cache.insert("k1".into(), response(1), start).await;
        assert!(cache.get("k1", start + Duration::seconds(59)).await.is_some());
        assert!(cache.get("k1", start + Duration::seconds(60)).await.is_none());

        cache
            .insert("k2".into(), response(2), start + Duration::seconds(61))
            .await;
        assert_eq!(cache.len().await, 1, "expired entries are pruned on insert");
    }
}
