use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::settings::ServiceConfig;

use super::types::ConversationContext;

/// Map entry. The context itself sits behind a per-conversation mutex so
/// analyze/append for one conversation is serialized; the touch timestamp is
/// kept outside it so the maintenance sweep never contends with analysis.
pub struct ContextEntry {
    pub context: Mutex<ConversationContext>,
    touched_ms: AtomicI64,
}

impl ContextEntry {
    fn new(context: ConversationContext) -> Self {
        Self {
            context: Mutex::new(context),
            touched_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    pub fn touch(&self) {
        self.touched_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn touched_ms(&self) -> i64 {
        self.touched_ms.load(Ordering::Relaxed)
    }
}

/// Single owner of all conversation contexts. Other components read snapshots
/// through it; only the analyzer mutates the contexts.
pub struct ContextStore {
    entries: RwLock<HashMap<Uuid, Arc<ContextEntry>>>,
    retention_ms: i64,
    max_conversations: usize,
}

impl ContextStore {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            retention_ms: config.context_retention().as_millis() as i64,
            max_conversations: config.max_conversations,
        }
    }

    pub async fn get_or_create(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        workspace_id: &str,
    ) -> Arc<ContextEntry> {
        {
            let entries = self.entries.read().await;
            if let Some(e) = entries.get(&conversation_id) {
                return Arc::clone(e);
            }
        }
        let mut entries = self.entries.write().await;
        Arc::clone(entries.entry(conversation_id).or_insert_with(|| {
            Arc::new(ContextEntry::new(ConversationContext::new(
                conversation_id,
                user_id,
                workspace_id,
            )))
        }))
    }

    pub async fn get(&self, conversation_id: Uuid) -> Option<Arc<ContextEntry>> {
        let entries = self.entries.read().await;
        entries.get(&conversation_id).cloned()
    }

    /// Read-only snapshot of one context.
    pub async fn snapshot(&self, conversation_id: Uuid) -> Option<ConversationContext> {
        let entry = self.get(conversation_id).await?;
        let ctx = entry.context.lock().await;
        Some(ctx.clone())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Evict contexts idle past the retention window, then enforce the
    /// conversation ceiling oldest-idle-first.
    pub async fn maintain(&self) {
        let now_ms = Utc::now().timestamp_millis();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| now_ms - e.touched_ms() < self.retention_ms);
        if entries.len() > self.max_conversations {
            let mut by_age: Vec<(Uuid, i64)> = entries
                .iter()
                .map(|(id, e)| (*id, e.touched_ms()))
                .collect();
            by_age.sort_by_key(|(_, t)| *t);
            let excess = entries.len() - self.max_conversations;
            for (id, _) in by_age.into_iter().take(excess) {
                entries.remove(&id);
            }
        }
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = entries.len(), "evicted idle conversation contexts");
        }
    }
}
