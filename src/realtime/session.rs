use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use crate::settings::{PreferencesPatch, SessionPreferences};

use super::events::{OutboundEvent, SessionMetrics};

/// Bundle delivered most recently to a session; tracked so expiry can be
/// announced to the client.
#[derive(Debug, Clone)]
pub struct DeliveredBundle {
    pub bundle_id: Uuid,
    pub recommendation_ids: Vec<Uuid>,
    pub expires_at: DateTime<Utc>,
}

/// Server-side representative of one connected client. The session holds a
/// reference to its conversation by id only; conversation lifetime is owned
/// by the context store.
#[derive(Debug)]
pub struct SessionHandle {
    pub id: Uuid,
    pub user_id: String,
    pub workspace_id: String,
    pub conversation_id: Uuid,
    pub created_at: DateTime<Utc>,
    preferences: Mutex<SessionPreferences>,
    metrics: Mutex<SessionMetrics>,
    last_bundle: Mutex<Option<DeliveredBundle>>,
    last_activity_ms: AtomicI64,
    consecutive_errors: AtomicU32,
    outbound: mpsc::Sender<OutboundEvent>,
}

impl SessionHandle {
    pub fn new(
        user_id: &str,
        workspace_id: &str,
        conversation_id: Uuid,
        outbound: mpsc::Sender<OutboundEvent>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            workspace_id: workspace_id.to_string(),
            conversation_id,
            created_at: Utc::now(),
            preferences: Mutex::new(SessionPreferences::default()),
            metrics: Mutex::new(SessionMetrics::default()),
            last_bundle: Mutex::new(None),
            last_activity_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            consecutive_errors: AtomicU32::new(0),
            outbound,
        }
    }

    pub fn touch(&self) {
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> Duration {
        let idle_ms = Utc::now().timestamp_millis() - self.last_activity_ms.load(Ordering::Relaxed);
        Duration::from_millis(idle_ms.max(0) as u64)
    }

    pub async fn preferences(&self) -> SessionPreferences {
        self.preferences.lock().await.clone()
    }

    pub async fn apply_preferences(&self, patch: PreferencesPatch) -> SessionPreferences {
        let mut prefs = self.preferences.lock().await;
        prefs.apply_patch(patch);
        prefs.clone()
    }

    pub async fn metrics(&self) -> SessionMetrics {
        self.metrics.lock().await.clone()
    }

    pub async fn with_metrics(&self, f: impl FnOnce(&mut SessionMetrics)) {
        let mut m = self.metrics.lock().await;
        f(&mut m);
    }

    pub async fn set_last_bundle(&self, bundle: DeliveredBundle) {
        *self.last_bundle.lock().await = Some(bundle);
    }

    pub async fn take_expired_bundle(&self, now: DateTime<Utc>) -> Option<DeliveredBundle> {
        let mut guard = self.last_bundle.lock().await;
        if guard.as_ref().is_some_and(|b| b.expires_at <= now) {
            guard.take()
        } else {
            None
        }
    }

    /// Queue an event to the socket writer. Returns false when the channel is
    /// closed or full; the caller decides whether that matters.
    pub fn send(&self, event: OutboundEvent) -> bool {
        self.outbound.try_send(event).is_ok()
    }

    pub fn record_error(&self) -> u32 {
        self.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn clear_errors(&self) {
        self.consecutive_errors.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (SessionHandle, mpsc::Receiver<OutboundEvent>) {
        let (tx, rx) = mpsc::channel(8);
        (SessionHandle::new("u1", "w1", Uuid::new_v4(), tx), rx)
    }

    #[tokio::test]
    async fn handle_is_debug_printable() {
        let (session, _rx) = handle();
        let rendered = format!("{session:?}");
        assert!(rendered.contains("SessionHandle"));
    }

    #[tokio::test]
    async fn send_reaches_receiver() {
        let (session, mut rx) = handle();
        assert!(session.send(OutboundEvent::RecommendationReceived {
            bundle_id: Uuid::new_v4(),
        }));
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn send_fails_after_receiver_dropped() {
        let (session, rx) = handle();
        drop(rx);
        assert!(!session.send(OutboundEvent::RecommendationReceived {
            bundle_id: Uuid::new_v4(),
        }));
    }

    #[tokio::test]
    async fn preferences_patch_round_trip() {
        let (session, _rx) = handle();
        let prefs = session
            .apply_preferences(PreferencesPatch {
                auto_recommend: Some(false),
                confidence_threshold: Some(0.8),
                max_recommendations: None,
            })
            .await;
        assert!(!prefs.auto_recommend);
        assert_eq!(prefs.confidence_threshold, 0.8);
        assert_eq!(session.preferences().await, prefs);
    }

    #[tokio::test]
    async fn error_counter_tracks_consecutive_failures() {
        let (session, _rx) = handle();
        assert_eq!(session.record_error(), 1);
        assert_eq!(session.record_error(), 2);
        session.clear_errors();
        assert_eq!(session.record_error(), 1);
    }

    #[tokio::test]
    async fn expired_bundle_taken_once() {
        let (session, _rx) = handle();
        session
            .set_last_bundle(DeliveredBundle {
                bundle_id: Uuid::new_v4(),
                recommendation_ids: vec![Uuid::new_v4()],
                expires_at: Utc::now() - chrono::Duration::seconds(1),
            })
            .await;
        assert!(session.take_expired_bundle(Utc::now()).await.is_some());
        assert!(session.take_expired_bundle(Utc::now()).await.is_none());
    }

    #[tokio::test]
    async fn fresh_bundle_not_taken() {
        let (session, _rx) = handle();
        session
            .set_last_bundle(DeliveredBundle {
                bundle_id: Uuid::new_v4(),
                recommendation_ids: vec![],
                expires_at: Utc::now() + chrono::Duration::seconds(60),
            })
            .await;
        assert!(session.take_expired_bundle(Utc::now()).await.is_none());
    }
}
