use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::counter;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{Result, ServiceError};
use crate::recommend::types::{RecommendationResponse, Urgency};

/// Cache key: hashed message content plus the identity/urgency axes that can
/// change what gets recommended.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    content_hash: u64,
    user_id: String,
    workspace_id: String,
    urgency: Urgency,
}

impl CacheKey {
    pub fn new(content: &str, user_id: &str, workspace_id: &str, urgency: Urgency) -> Self {
        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        Self {
            content_hash: hasher.finish(),
            user_id: user_id.to_string(),
            workspace_id: workspace_id.to_string(),
            urgency,
        }
    }
}

struct CachedRecommendation {
    response: RecommendationResponse,
    inserted: Instant,
    access_count: AtomicU64,
}

/// Recommendation cache owned by the session service. Expired entries are
/// never served; they are evicted on read or by the sweep.
pub struct RecommendationCache {
    entries: RwLock<HashMap<CacheKey, CachedRecommendation>>,
    ttl: Duration,
    max_entries: usize,
}

impl RecommendationCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_entries,
        }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<RecommendationResponse> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(key) {
                if entry.inserted.elapsed() < self.ttl {
                    entry.access_count.fetch_add(1, Ordering::Relaxed);
                    counter!("recommendation_cache_hits_total").increment(1);
                    return Some(entry.response.clone());
                }
            } else {
                counter!("recommendation_cache_misses_total").increment(1);
                return None;
            }
        }
        // present but expired
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(key) {
            if entry.inserted.elapsed() >= self.ttl {
                entries.remove(key);
            }
        }
        counter!("recommendation_cache_misses_total").increment(1);
        None
    }

    /// Store a bundle. Empty recommendation sets are not cached. When the
    /// cache is at capacity the oldest entry is evicted first.
    pub async fn insert(&self, key: CacheKey, response: RecommendationResponse) -> Result<()> {
        if response.recommendations.is_empty() {
            return Ok(());
        }
        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    entries.remove(&k);
                }
                None => return Err(ServiceError::CacheExhausted),
            }
        }
        entries.insert(
            key,
            CachedRecommendation {
                response,
                inserted: Instant::now(),
                access_count: AtomicU64::new(0),
            },
        );
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn sweep(&self) {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.inserted.elapsed() < self.ttl);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = entries.len(), "swept expired recommendation cache entries");
        }
    }

    #[cfg(test)]
    pub async fn access_count(&self, key: &CacheKey) -> Option<u64> {
        let entries = self.entries.read().await;
        entries.get(key).map(|e| e.access_count.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn bundle(n_recs: usize) -> RecommendationResponse {
        use crate::recommend::types::ToolRecommendation;
        RecommendationResponse {
            bundle_id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            recommendations: (0..n_recs)
                .map(|i| ToolRecommendation {
                    id: Uuid::new_v4(),
                    tool_id: format!("tool-{i}"),
                    tool_name: format!("Tool {i}"),
                    confidence: 0.8,
                    reasoning: "test".into(),
                    quick_actions: vec![],
                    workflow_relevance: None,
                    stage_alignment: None,
                })
                .collect(),
            contextual_explanation: "test".into(),
            confidence: 0.8,
            generated_at: Utc::now(),
            expires_at: Utc::now(),
            fallback: false,
        }
    }

    fn key(content: &str) -> CacheKey {
        CacheKey::new(content, "u1", "w1", Urgency::Normal)
    }

    #[tokio::test]
    async fn hit_returns_same_bundle_and_counts_access() {
        let cache = RecommendationCache::new(Duration::from_secs(60), 16);
        let k = key("analyze csv");
        let b = bundle(2);
        let id = b.bundle_id;
        cache.insert(k.clone(), b).await.unwrap();

        let first = cache.get(&k).await.unwrap();
        let second = cache.get(&k).await.unwrap();
        assert_eq!(first.bundle_id, id);
        assert_eq!(second.bundle_id, id);
        assert_eq!(cache.access_count(&k).await, Some(2));
    }

    #[tokio::test]
    async fn expired_entry_not_served() {
        let cache = RecommendationCache::new(Duration::from_millis(10), 16);
        let k = key("analyze csv");
        cache.insert(k.clone(), bundle(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get(&k).await.is_none());
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn empty_bundles_not_cached() {
        let cache = RecommendationCache::new(Duration::from_secs(60), 16);
        let k = key("nothing matched");
        cache.insert(k.clone(), bundle(0)).await.unwrap();
        assert!(cache.get(&k).await.is_none());
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn distinct_urgency_distinct_keys() {
        let a = CacheKey::new("same", "u1", "w1", Urgency::Normal);
        let b = CacheKey::new("same", "u1", "w1", Urgency::High);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let cache = RecommendationCache::new(Duration::from_secs(60), 2);
        let k1 = key("first");
        let k2 = key("second");
        let k3 = key("third");
        cache.insert(k1.clone(), bundle(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.insert(k2.clone(), bundle(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.insert(k3.clone(), bundle(1)).await.unwrap();

        assert_eq!(cache.len().await, 2);
        assert!(cache.get(&k1).await.is_none());
        assert!(cache.get(&k2).await.is_some());
        assert!(cache.get(&k3).await.is_some());
    }

    #[tokio::test]
    async fn sweep_removes_expired() {
        let cache = RecommendationCache::new(Duration::from_millis(10), 16);
        cache.insert(key("a"), bundle(1)).await.unwrap();
        cache.insert(key("b"), bundle(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.sweep().await;
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn zero_capacity_surfaces_exhaustion() {
        let cache = RecommendationCache::new(Duration::from_secs(60), 0);
        let err = cache.insert(key("a"), bundle(1)).await.unwrap_err();
        assert_eq!(err.code(), "cache_exhausted");
    }
}
