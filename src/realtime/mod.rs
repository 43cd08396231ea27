pub mod cache;
pub mod events;
pub mod session;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{Duration as ChronoDuration, Utc};
use metrics::counter;
use serde::Serialize;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::ContextAnalyzer;
use crate::context::types::{ConversationContext, IntentCategory};
use crate::error::{Result, ServiceError};
use crate::recommend::RecommendationOrchestrator;
use crate::recommend::types::{
    FeedbackEvent, RecommendationRequest, RecommendationResponse, SelectionEvent,
    ToolRecommendation, Urgency,
};
use crate::settings::ServiceConfig;
use crate::workflow::{WorkflowAdvisor, WorkflowState};

use cache::{CacheKey, RecommendationCache};
use events::{InboundEvent, OutboundEvent};
use session::{DeliveredBundle, SessionHandle};

const FALLBACK_CONFIDENCE: f64 = 0.3;

enum Delivery {
    Sent,
    /// Channel closed or full; the client is not keeping up.
    Dropped,
    /// Session already removed; result is discarded, not an error.
    SessionGone,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub service_health: String,
    pub active_sessions: usize,
    pub active_conversations: usize,
    pub cache_entries: usize,
    pub error_rate: f64,
    /// Mean wall-clock time of non-cached generations.
    pub avg_generation_ms: u64,
    pub uptime_secs: u64,
}

/// Outermost component: owns sessions and the recommendation cache,
/// multiplexes inbound events into the analyzer and orchestrator, and pushes
/// results back to clients.
pub struct SessionService {
    config: ServiceConfig,
    analyzer: Arc<ContextAnalyzer>,
    orchestrator: Arc<RecommendationOrchestrator>,
    advisor: Arc<WorkflowAdvisor>,
    cache: RecommendationCache,
    sessions: RwLock<HashMap<Uuid, Arc<SessionHandle>>>,
    started: Instant,
    events_total: AtomicU64,
    events_failed: AtomicU64,
    generation_ms_total: AtomicU64,
    generation_count: AtomicU64,
}

impl SessionService {
    pub fn new(
        config: ServiceConfig,
        analyzer: Arc<ContextAnalyzer>,
        orchestrator: Arc<RecommendationOrchestrator>,
        advisor: Arc<WorkflowAdvisor>,
    ) -> Self {
        let cache = RecommendationCache::new(config.cache_timeout(), config.max_cache_entries);
        Self {
            config,
            analyzer,
            orchestrator,
            advisor,
            cache,
            sessions: RwLock::new(HashMap::new()),
            started: Instant::now(),
            events_total: AtomicU64::new(0),
            events_failed: AtomicU64::new(0),
            generation_ms_total: AtomicU64::new(0),
            generation_count: AtomicU64::new(0),
        }
    }

    /// Handshake. Both identity claims are required and the per-user session
    /// cap is enforced before the session enters the active map.
    pub async fn connect(
        &self,
        user_id: &str,
        workspace_id: &str,
        conversation_id: Option<Uuid>,
        outbound: mpsc::Sender<OutboundEvent>,
    ) -> Result<Arc<SessionHandle>> {
        if user_id.trim().is_empty() || workspace_id.trim().is_empty() {
            counter!("sessions_rejected_total").increment(1);
            return Err(ServiceError::AuthenticationRequired);
        }
        let mut sessions = self.sessions.write().await;
        let per_user = sessions.values().filter(|s| s.user_id == user_id).count();
        if per_user >= self.config.max_sessions_per_user {
            counter!("sessions_rejected_total").increment(1);
            return Err(ServiceError::SessionLimitExceeded {
                user_id: user_id.to_string(),
            });
        }
        let session = Arc::new(SessionHandle::new(
            user_id,
            workspace_id,
            conversation_id.unwrap_or_else(Uuid::new_v4),
            outbound,
        ));
        sessions.insert(session.id, Arc::clone(&session));
        info!(session_id = %session.id, user_id, workspace_id, "session connected");
        Ok(session)
    }

    pub async fn disconnect(&self, session_id: Uuid) {
        let removed = self.sessions.write().await.remove(&session_id);
        if removed.is_some() {
            info!(%session_id, "session disconnected");
        }
    }

    pub async fn is_active(&self, session_id: Uuid) -> bool {
        self.sessions.read().await.contains_key(&session_id)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Entry point for the per-session consumer loop. One call per inbound
    /// event, processed sequentially per session.
    pub async fn handle_event(&self, session: &Arc<SessionHandle>, event: InboundEvent) {
        self.events_total.fetch_add(1, Ordering::Relaxed);
        match self.dispatch(session, event).await {
            Ok(()) => session.clear_errors(),
            Err(e) => {
                self.events_failed.fetch_add(1, Ordering::Relaxed);
                session.with_metrics(|m| m.errors += 1).await;
                warn!(session_id = %session.id, error = %e, code = e.code(), "event handling failed");
                session.send(OutboundEvent::Error {
                    error: e.to_string(),
                    code: e.code().into(),
                });
                let consecutive = session.record_error();
                if consecutive >= self.config.error_disconnect_threshold {
                    warn!(
                        session_id = %session.id,
                        consecutive,
                        "error threshold exceeded, disconnecting session"
                    );
                    self.disconnect(session.id).await;
                }
            }
        }
    }

    async fn dispatch(&self, session: &Arc<SessionHandle>, event: InboundEvent) -> Result<()> {
        match event {
            InboundEvent::UserMessage { content, message_id } => {
                session.touch();
                session.with_metrics(|m| m.messages_handled += 1).await;
                debug!(session_id = %session.id, ?message_id, "user message received");
                let context = self
                    .analyzer
                    .analyze(
                        &content,
                        session.conversation_id,
                        &session.user_id,
                        &session.workspace_id,
                        session.id,
                        message_id,
                    )
                    .await;
                let prefs = session.preferences().await;
                if context.timing.optimal && prefs.auto_recommend {
                    self.recommend(session, Some(content), Some(context), Urgency::Normal, None, None, None, false, None)
                        .await?;
                }
                Ok(())
            }
            InboundEvent::RequestRecommendations {
                request_id,
                context,
                urgency,
                include_workflow,
                workflow,
                max_recommendations,
                category,
            } => {
                session.touch();
                self.recommend(
                    session,
                    context,
                    None,
                    urgency,
                    request_id,
                    max_recommendations,
                    category,
                    include_workflow,
                    workflow,
                )
                .await
            }
            InboundEvent::SelectRecommendation {
                recommendation_id,
                confidence,
            } => {
                session.touch();
                self.orchestrator
                    .record_selection(SelectionEvent {
                        recommendation_id,
                        session_id: session.id,
                        confidence: confidence.unwrap_or(0.5).clamp(0.0, 1.0),
                        dismissed: false,
                        reason: None,
                        created_at: Utc::now(),
                    })
                    .await;
                Ok(())
            }
            InboundEvent::DismissRecommendation {
                recommendation_id,
                reason,
            } => {
                session.touch();
                self.orchestrator
                    .record_selection(SelectionEvent {
                        recommendation_id,
                        session_id: session.id,
                        confidence: 0.0,
                        dismissed: true,
                        reason,
                        created_at: Utc::now(),
                    })
                    .await;
                Ok(())
            }
            InboundEvent::ProvideFeedback {
                feedback_id,
                recommendation_id,
                feedback_type,
                value,
            } => {
                session.touch();
                self.orchestrator
                    .record_feedback(FeedbackEvent {
                        feedback_id: feedback_id.unwrap_or_else(Uuid::new_v4),
                        recommendation_id,
                        session_id: session.id,
                        feedback_type,
                        value: value.unwrap_or(0.5).clamp(0.0, 1.0),
                        created_at: Utc::now(),
                    })
                    .await;
                session.send(OutboundEvent::RecommendationUpdate {
                    recommendation_id,
                    update: serde_json::json!({ "feedback_recorded": true }),
                });
                Ok(())
            }
            InboundEvent::UpdatePreferences { patch } => {
                session.touch();
                let prefs = session.apply_preferences(patch).await;
                debug!(session_id = %session.id, ?prefs, "preferences updated");
                Ok(())
            }
            InboundEvent::Heartbeat {} => {
                session.touch();
                let metrics = session.metrics().await;
                session.send(OutboundEvent::PerformanceMetrics { metrics });
                Ok(())
            }
        }
    }

    /// Generate (or serve from cache) a bundle and push it to the session.
    /// Failures and budget overruns degrade to the fallback bundle; the
    /// client always receives a bundle or a typed error.
    #[allow(clippy::too_many_arguments)]
    async fn recommend(
        &self,
        session: &Arc<SessionHandle>,
        message: Option<String>,
        analyzed: Option<ConversationContext>,
        urgency: Urgency,
        request_id: Option<Uuid>,
        max_override: Option<usize>,
        category: Option<IntentCategory>,
        include_workflow: bool,
        workflow: Option<WorkflowState>,
    ) -> Result<()> {
        let prefs = session.preferences().await;
        let key_content = message
            .clone()
            .unwrap_or_else(|| session.conversation_id.to_string());
        let key = CacheKey::new(&key_content, &session.user_id, &session.workspace_id, urgency);

        let mut from_cache = true;
        let mut degraded: Option<ServiceError> = None;
        let response = match self.cache.get(&key).await {
            Some(cached) => cached,
            None => {
                from_cache = false;
                let request = RecommendationRequest {
                    conversation_id: session.conversation_id,
                    session_id: session.id,
                    user_id: session.user_id.clone(),
                    workspace_id: session.workspace_id.clone(),
                    // skip re-analysis when the message was already analyzed
                    message: if analyzed.is_some() { None } else { message },
                    context: analyzed,
                    urgency,
                    category_filter: category,
                    max_recommendations: max_override
                        .unwrap_or(prefs.max_recommendations)
                        .clamp(1, 10),
                    confidence_threshold: prefs.confidence_threshold,
                };
                let started = Instant::now();
                let generated = tokio::time::timeout(
                    self.config.generation_budget(),
                    self.orchestrator.request_recommendations(&request),
                )
                .await;
                self.generation_ms_total
                    .fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);
                self.generation_count.fetch_add(1, Ordering::Relaxed);
                match generated {
                    Ok(Ok(response)) => {
                        if let Err(e) = self.cache.insert(key, response.clone()).await {
                            warn!(error = %e, "failed to cache recommendation bundle");
                            session.send(OutboundEvent::Error {
                                error: e.to_string(),
                                code: e.code().into(),
                            });
                        }
                        response
                    }
                    Ok(Err(e)) => {
                        warn!(session_id = %session.id, error = %e, "generation failed, serving fallback");
                        counter!("recommendation_fallbacks_total").increment(1);
                        degraded = Some(ServiceError::GenerationFailed(e.to_string()));
                        self.fallback_bundle(session.conversation_id)
                    }
                    Err(_) => {
                        warn!(session_id = %session.id, "generation exceeded budget, serving fallback");
                        counter!("recommendation_fallbacks_total").increment(1);
                        degraded = Some(ServiceError::GenerationTimeout);
                        self.fallback_bundle(session.conversation_id)
                    }
                }
            }
        };

        let augmentation = match (include_workflow, workflow) {
            (true, Some(state)) => {
                let context = self
                    .analyzer
                    .store()
                    .snapshot(session.conversation_id)
                    .await
                    .unwrap_or_else(|| {
                        ConversationContext::new(
                            session.conversation_id,
                            &session.user_id,
                            &session.workspace_id,
                        )
                    });
                Some(self.advisor.augment(&context, Some(&state)).await)
            }
            _ => None,
        };

        let bundle = DeliveredBundle {
            bundle_id: response.bundle_id,
            recommendation_ids: response.recommendations.iter().map(|r| r.id).collect(),
            expires_at: response.expires_at,
        };
        let is_fallback = response.fallback;
        let bundle_id = response.bundle_id;
        let event = OutboundEvent::RecommendationsAvailable {
            bundle_id,
            recommendations: response.recommendations,
            contextual_explanation: response.contextual_explanation,
            confidence: response.confidence,
            expires_at: response.expires_at,
            request_id,
            workflow: augmentation,
        };

        match self.deliver(session.id, event).await {
            Delivery::Sent => {
                session.set_last_bundle(bundle).await;
                session
                    .with_metrics(|m| {
                        m.recommendations_served += 1;
                        if from_cache {
                            m.cache_hits += 1;
                        }
                        if is_fallback {
                            m.fallbacks_served += 1;
                        }
                    })
                    .await;
                self.deliver(session.id, OutboundEvent::RecommendationReceived { bundle_id })
                    .await;
                Ok(())
            }
            Delivery::SessionGone => {
                debug!(session_id = %session.id, %bundle_id, "discarding bundle for disconnected session");
                Ok(())
            }
            // the client gets the degraded-generation error if there was one,
            // otherwise the delivery failure itself
            Delivery::Dropped => Err(degraded.unwrap_or_else(|| {
                ServiceError::Internal(anyhow::anyhow!("outbound channel rejected bundle delivery"))
            })),
        }
    }

    /// Degraded generic bundle. Built without I/O so this path cannot fail.
    fn fallback_bundle(&self, conversation_id: Uuid) -> RecommendationResponse {
        let now = Utc::now();
        let generic = [
            (
                "workspace-search",
                "Workspace Search",
                "Search can usually move things forward while suggestions recover",
            ),
            (
                "task-runner",
                "Task Runner",
                "Run a routine task while tailored suggestions are unavailable",
            ),
        ];
        RecommendationResponse {
            bundle_id: Uuid::new_v4(),
            conversation_id,
            recommendations: generic
                .iter()
                .map(|(id, name, why)| ToolRecommendation {
                    id: Uuid::new_v4(),
                    tool_id: (*id).into(),
                    tool_name: (*name).into(),
                    confidence: FALLBACK_CONFIDENCE,
                    reasoning: (*why).into(),
                    quick_actions: Vec::new(),
                    workflow_relevance: None,
                    stage_alignment: None,
                })
                .collect(),
            contextual_explanation:
                "Tailored suggestions are temporarily unavailable; here are general-purpose options."
                    .into(),
            confidence: FALLBACK_CONFIDENCE,
            generated_at: now,
            expires_at: now + ChronoDuration::seconds(self.config.fallback_ttl_secs as i64),
            fallback: true,
        }
    }

    async fn deliver(&self, session_id: Uuid, event: OutboundEvent) -> Delivery {
        let sessions = self.sessions.read().await;
        match sessions.get(&session_id) {
            Some(s) => {
                if s.send(event) {
                    Delivery::Sent
                } else {
                    Delivery::Dropped
                }
            }
            None => Delivery::SessionGone,
        }
    }

    /// Background sweep: expired cache entries, idle contexts, idle sessions,
    /// and expired delivered bundles. Bounded work per pass.
    pub async fn maintain(&self) {
        self.cache.sweep().await;
        self.analyzer.store().maintain().await;

        let idle: Vec<Uuid> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|s| s.idle_for() > self.config.connection_timeout())
                .map(|s| s.id)
                .collect()
        };
        for id in idle {
            info!(session_id = %id, "heartbeat timeout, disconnecting idle session");
            self.disconnect(id).await;
        }

        let now = Utc::now();
        let sessions: Vec<Arc<SessionHandle>> =
            self.sessions.read().await.values().cloned().collect();
        for session in &sessions {
            if let Some(expired) = session.take_expired_bundle(now).await {
                for recommendation_id in expired.recommendation_ids {
                    session.send(OutboundEvent::RecommendationExpired { recommendation_id });
                }
            }
        }

        let status = self.status().await;
        for session in &sessions {
            session.send(OutboundEvent::SystemStatus {
                service_health: status.service_health.clone(),
                response_time_ms: status.avg_generation_ms,
                error_rate: status.error_rate,
                active_connections: status.active_sessions,
            });
        }
    }

    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(service.config.maintenance_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                service.maintain().await;
            }
        })
    }

    pub async fn status(&self) -> ServiceStatus {
        let total = self.events_total.load(Ordering::Relaxed);
        let failed = self.events_failed.load(Ordering::Relaxed);
        let error_rate = if total == 0 {
            0.0
        } else {
            failed as f64 / total as f64
        };
        let generations = self.generation_count.load(Ordering::Relaxed);
        let avg_generation_ms = if generations == 0 {
            0
        } else {
            self.generation_ms_total.load(Ordering::Relaxed) / generations
        };
        ServiceStatus {
            service_health: if error_rate < 0.1 { "ok" } else { "degraded" }.into(),
            active_sessions: self.session_count().await,
            active_conversations: self.analyzer.store().len().await,
            cache_entries: self.cache.len().await,
            error_rate,
            avg_generation_ms,
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{StaticCatalog, ToolCatalog, UnavailableCatalog};
    use crate::context::ContextStore;
    use crate::learning::NullLearningStore;
    use crate::nlu::LexiconNlu;
    use crate::settings::PreferencesPatch;
    use crate::workflow::{StageStatus, WorkflowStage};

    fn service_with(catalog: Arc<dyn ToolCatalog>, config: ServiceConfig) -> Arc<SessionService> {
        let store = Arc::new(ContextStore::new(&config));
        let nlu = Arc::new(LexiconNlu);
        let analyzer = Arc::new(ContextAnalyzer::new(store, nlu.clone(), nlu, &config));
        let orchestrator = Arc::new(RecommendationOrchestrator::new(
            Arc::clone(&analyzer),
            Arc::clone(&catalog),
            Arc::new(NullLearningStore),
            &config,
        ));
        let advisor = Arc::new(WorkflowAdvisor::new(catalog, &config));
        Arc::new(SessionService::new(config, analyzer, orchestrator, advisor))
    }

    fn service() -> Arc<SessionService> {
        service_with(
            Arc::new(StaticCatalog::with_default_tools()),
            ServiceConfig::default(),
        )
    }

    async fn connected(
        service: &Arc<SessionService>,
    ) -> (Arc<SessionHandle>, mpsc::Receiver<OutboundEvent>) {
        let (tx, rx) = mpsc::channel(32);
        let session = service.connect("u1", "w1", None, tx).await.unwrap();
        (session, rx)
    }

    fn request_event(request_id: Uuid, message: &str) -> InboundEvent {
        InboundEvent::RequestRecommendations {
            request_id: Some(request_id),
            context: Some(message.into()),
            urgency: Urgency::Normal,
            include_workflow: false,
            workflow: None,
            max_recommendations: None,
            category: None,
        }
    }

    async fn next_bundle(rx: &mut mpsc::Receiver<OutboundEvent>) -> (Uuid, Option<Uuid>, f64, String) {
        loop {
            match rx.recv().await.expect("event") {
                OutboundEvent::RecommendationsAvailable {
                    bundle_id,
                    request_id,
                    confidence,
                    contextual_explanation,
                    ..
                } => return (bundle_id, request_id, confidence, contextual_explanation),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn handshake_requires_both_identities() {
        let service = service();
        let (tx, _rx) = mpsc::channel(8);
        let err = service.connect("", "w1", None, tx.clone()).await.unwrap_err();
        assert_eq!(err.code(), "auth_required");
        let err = service.connect("u1", " ", None, tx).await.unwrap_err();
        assert_eq!(err.code(), "auth_required");
    }

    #[tokio::test]
    async fn per_user_session_cap_enforced() {
        let config = ServiceConfig {
            max_sessions_per_user: 2,
            ..ServiceConfig::default()
        };
        let service = service_with(Arc::new(StaticCatalog::with_default_tools()), config);
        let (tx, _rx) = mpsc::channel(8);
        service.connect("u1", "w1", None, tx.clone()).await.unwrap();
        service.connect("u1", "w1", None, tx.clone()).await.unwrap();
        let err = service.connect("u1", "w1", None, tx.clone()).await.unwrap_err();
        assert_eq!(err.code(), "session_limit");
        // other users unaffected
        service.connect("u2", "w1", None, tx).await.unwrap();
    }

    #[tokio::test]
    async fn request_recommendations_delivers_bundle_and_ack() {
        let service = service();
        let (session, mut rx) = connected(&service).await;
        let req_id = Uuid::new_v4();
        service
            .handle_event(&session, request_event(req_id, "analyze the csv and create a report"))
            .await;
        let (bundle_id, request_id, confidence, _) = next_bundle(&mut rx).await;
        assert_eq!(request_id, Some(req_id));
        assert!(confidence > 0.0);
        match rx.recv().await.unwrap() {
            OutboundEvent::RecommendationReceived { bundle_id: acked } => {
                assert_eq!(acked, bundle_id)
            }
            other => panic!("expected ack, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn identical_request_within_ttl_returns_same_bundle() {
        let service = service();
        let (session, mut rx) = connected(&service).await;
        let msg = "analyze the quarterly csv data";
        service
            .handle_event(&session, request_event(Uuid::new_v4(), msg))
            .await;
        let (first, ..) = next_bundle(&mut rx).await;
        service
            .handle_event(&session, request_event(Uuid::new_v4(), msg))
            .await;
        let (second, ..) = next_bundle(&mut rx).await;
        assert_eq!(first, second);
        let metrics = session.metrics().await;
        assert_eq!(metrics.cache_hits, 1);
        assert_eq!(metrics.recommendations_served, 2);
    }

    #[tokio::test]
    async fn expired_cache_entry_regenerates() {
        let config = ServiceConfig {
            cache_timeout_secs: 0,
            ..ServiceConfig::default()
        };
        let service = service_with(Arc::new(StaticCatalog::with_default_tools()), config);
        let (session, mut rx) = connected(&service).await;
        let msg = "analyze the csv";
        service
            .handle_event(&session, request_event(Uuid::new_v4(), msg))
            .await;
        let (first, ..) = next_bundle(&mut rx).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        service
            .handle_event(&session, request_event(Uuid::new_v4(), msg))
            .await;
        let (second, ..) = next_bundle(&mut rx).await;
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn catalog_outage_serves_fallback_not_error() {
        let service = service_with(Arc::new(UnavailableCatalog), ServiceConfig::default());
        let (session, mut rx) = connected(&service).await;
        service
            .handle_event(&session, request_event(Uuid::new_v4(), "analyze the csv"))
            .await;
        let (_, _, confidence, explanation) = next_bundle(&mut rx).await;
        assert!(confidence <= 0.5);
        assert!(!explanation.is_empty());
        assert_eq!(session.metrics().await.fallbacks_served, 1);
    }

    #[tokio::test]
    async fn auto_recommend_fires_on_optimal_moment() {
        let service = service();
        let (session, mut rx) = connected(&service).await;
        service
            .handle_event(
                &session,
                InboundEvent::UserMessage {
                    content: "urgent: run the export tool now, then share with the team".into(),
                    message_id: None,
                },
            )
            .await;
        let (_, request_id, ..) = next_bundle(&mut rx).await;
        assert_eq!(request_id, None);
    }

    #[tokio::test]
    async fn auto_recommend_respects_preference_toggle() {
        let service = service();
        let (session, mut rx) = connected(&service).await;
        service
            .handle_event(
                &session,
                InboundEvent::UpdatePreferences {
                    patch: PreferencesPatch {
                        auto_recommend: Some(false),
                        ..PreferencesPatch::default()
                    },
                },
            )
            .await;
        service
            .handle_event(
                &session,
                InboundEvent::UserMessage {
                    content: "urgent: run the export tool now, then share with the team".into(),
                    message_id: None,
                },
            )
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn workflow_augmentation_included_when_requested() {
        let service = service();
        let (session, mut rx) = connected(&service).await;
        let state = WorkflowState {
            workflow_id: Uuid::new_v4(),
            stages: vec![
                WorkflowStage {
                    name: "analyze".into(),
                    status: StageStatus::Active,
                    progress: 0.5,
                },
                WorkflowStage {
                    name: "report".into(),
                    status: StageStatus::Pending,
                    progress: 0.0,
                },
            ],
            current_stage: "analyze".into(),
            data_quality: 0.9,
            resource_availability: 0.9,
            efficiency: 0.8,
        };
        service
            .handle_event(
                &session,
                InboundEvent::RequestRecommendations {
                    request_id: Some(Uuid::new_v4()),
                    context: Some("analyze the csv data".into()),
                    urgency: Urgency::High,
                    include_workflow: true,
                    workflow: Some(state),
                    max_recommendations: None,
                    category: None,
                },
            )
            .await;
        loop {
            match rx.recv().await.unwrap() {
                OutboundEvent::RecommendationsAvailable { workflow, .. } => {
                    let augmentation = workflow.expect("workflow augmentation");
                    assert!(!augmentation.recommendations.is_empty());
                    break;
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn ten_concurrent_sessions_each_get_their_own_response() {
        let service = service();
        let mut handles = Vec::new();
        for i in 0..10 {
            let service = Arc::clone(&service);
            handles.push(tokio::spawn(async move {
                let (tx, mut rx) = mpsc::channel(32);
                let session = service
                    .connect(&format!("user-{i}"), "w1", None, tx)
                    .await
                    .unwrap();
                let req_id = Uuid::new_v4();
                service
                    .handle_event(&session, request_event(req_id, &format!("analyze dataset {i}")))
                    .await;
                let (_, request_id, ..) = next_bundle(&mut rx).await;
                assert_eq!(request_id, Some(req_id));
                // nothing else was routed here for another session
                (req_id, session.id)
            }));
        }
        let budget = service.config().generation_budget() * 2;
        let all = tokio::time::timeout(budget, futures::future::join_all(handles))
            .await
            .expect("all sessions served within budget");
        let mut session_ids: Vec<Uuid> = all.into_iter().map(|r| r.unwrap().1).collect();
        session_ids.sort();
        session_ids.dedup();
        assert_eq!(session_ids.len(), 10);
    }

    #[tokio::test]
    async fn disconnect_discards_in_flight_result() {
        let service = service();
        let (session, mut rx) = connected(&service).await;
        service.disconnect(session.id).await;
        assert!(!service.is_active(session.id).await);
        // a result completing after disconnect is discarded, not delivered
        service
            .handle_event(&session, request_event(Uuid::new_v4(), "analyze the csv"))
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn idle_session_swept_after_timeout() {
        let config = ServiceConfig {
            connection_timeout_secs: 0,
            ..ServiceConfig::default()
        };
        let service = service_with(Arc::new(StaticCatalog::with_default_tools()), config);
        let (_session, _rx) = connected(&service).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        service.maintain().await;
        assert_eq!(service.session_count().await, 0);
    }

    #[tokio::test]
    async fn heartbeat_touches_and_reports_metrics() {
        let service = service();
        let (session, mut rx) = connected(&service).await;
        service
            .handle_event(&session, InboundEvent::Heartbeat {})
            .await;
        match rx.recv().await.unwrap() {
            OutboundEvent::PerformanceMetrics { metrics } => {
                assert_eq!(metrics.messages_handled, 0);
            }
            other => panic!("expected metrics, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unresponsive_client_disconnected_after_error_threshold() {
        let config = ServiceConfig {
            error_disconnect_threshold: 2,
            ..ServiceConfig::default()
        };
        let service = service_with(Arc::new(StaticCatalog::with_default_tools()), config);
        let (tx, rx) = mpsc::channel(1);
        let session = service.connect("u1", "w1", None, tx).await.unwrap();
        drop(rx);
        for _ in 0..2 {
            service
                .handle_event(&session, request_event(Uuid::new_v4(), "analyze the csv"))
                .await;
        }
        assert!(!service.is_active(session.id).await);
    }

    #[tokio::test]
    async fn feedback_and_selection_events_are_side_effect_only() {
        let service = service();
        let (session, mut rx) = connected(&service).await;
        service
            .handle_event(
                &session,
                InboundEvent::SelectRecommendation {
                    recommendation_id: Uuid::new_v4(),
                    confidence: None,
                },
            )
            .await;
        service
            .handle_event(
                &session,
                InboundEvent::DismissRecommendation {
                    recommendation_id: Uuid::new_v4(),
                    reason: Some("not relevant".into()),
                },
            )
            .await;
        service
            .handle_event(
                &session,
                InboundEvent::ProvideFeedback {
                    feedback_id: None,
                    recommendation_id: Uuid::new_v4(),
                    feedback_type: crate::recommend::types::FeedbackType::Helpful,
                    value: None,
                },
            )
            .await;
        // only the feedback confirmation is pushed; nothing errored
        match rx.recv().await.unwrap() {
            OutboundEvent::RecommendationUpdate { update, .. } => {
                assert_eq!(update["feedback_recorded"], true);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(service.is_active(session.id).await);
    }

    #[tokio::test]
    async fn expired_delivered_bundle_announced() {
        let config = ServiceConfig {
            cache_timeout_secs: 0,
            ..ServiceConfig::default()
        };
        let service = service_with(Arc::new(StaticCatalog::with_default_tools()), config);
        let (session, mut rx) = connected(&service).await;
        service
            .handle_event(&session, request_event(Uuid::new_v4(), "analyze the csv"))
            .await;
        let _ = next_bundle(&mut rx).await;
        let _ = rx.recv().await; // ack
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        service.maintain().await;
        match rx.recv().await.unwrap() {
            OutboundEvent::RecommendationExpired { .. } => {}
            other => panic!("expected expiry notice, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn maintenance_broadcasts_system_status() {
        let service = service();
        let (_session, mut rx) = connected(&service).await;
        service.maintain().await;
        match rx.recv().await.unwrap() {
            OutboundEvent::SystemStatus {
                service_health,
                active_connections,
                ..
            } => {
                assert_eq!(service_health, "ok");
                assert_eq!(active_connections, 1);
            }
            other => panic!("expected status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_reflects_active_sessions() {
        let service = service();
        let (_session, _rx) = connected(&service).await;
        let status = service.status().await;
        assert_eq!(status.active_sessions, 1);
        assert_eq!(status.service_health, "ok");
    }
}
