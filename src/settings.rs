use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Service-wide tunables. The timing and bottleneck thresholds are heuristics
/// carried as configuration until empirically validated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    /// How long a cached recommendation bundle may be served.
    pub cache_timeout_secs: u64,
    /// Idle time after which a conversation context is evicted.
    pub context_retention_secs: u64,
    /// Ceiling on concurrently tracked conversations.
    pub max_conversations: usize,
    /// Heartbeat timeout; sessions idle longer are disconnected.
    pub connection_timeout_secs: u64,
    /// Concurrent session cap per user identity.
    pub max_sessions_per_user: usize,
    /// Wall-clock budget for one recommendation generation.
    pub generation_budget_ms: u64,
    /// Interval for the background maintenance sweep.
    pub maintenance_interval_secs: u64,
    /// Consecutive unexpected errors before a session is force-disconnected.
    pub error_disconnect_threshold: u32,
    /// Cues scoring below this relevance are discarded.
    pub cue_relevance_threshold: f64,
    /// Timing scores at or above this mark an optimal recommendation moment.
    pub optimal_timing_threshold: f64,
    /// Resource availability below this flags a workflow bottleneck.
    pub bottleneck_resource_threshold: f64,
    /// Data-quality score below this flags a workflow bottleneck.
    pub bottleneck_quality_threshold: f64,
    /// Expiry for degraded fallback bundles.
    pub fallback_ttl_secs: u64,
    /// Ceiling on cached recommendation bundles.
    pub max_cache_entries: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cache_timeout_secs: 300,
            context_retention_secs: 1800,
            max_conversations: 1000,
            connection_timeout_secs: 90,
            max_sessions_per_user: 5,
            generation_budget_ms: 5000,
            maintenance_interval_secs: 30,
            error_disconnect_threshold: 5,
            cue_relevance_threshold: 0.3,
            optimal_timing_threshold: 0.65,
            bottleneck_resource_threshold: 0.2,
            bottleneck_quality_threshold: 0.6,
            fallback_ttl_secs: 60,
            max_cache_entries: 4096,
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_conversations == 0 {
            anyhow::bail!("max_conversations must be positive");
        }
        if self.max_sessions_per_user == 0 {
            anyhow::bail!("max_sessions_per_user must be positive");
        }
        if self.generation_budget_ms == 0 {
            anyhow::bail!("generation_budget_ms must be positive");
        }
        for (name, v) in [
            ("cue_relevance_threshold", self.cue_relevance_threshold),
            ("optimal_timing_threshold", self.optimal_timing_threshold),
            ("bottleneck_resource_threshold", self.bottleneck_resource_threshold),
            ("bottleneck_quality_threshold", self.bottleneck_quality_threshold),
        ] {
            if !(0.0..=1.0).contains(&v) {
                anyhow::bail!("{} must be within [0,1], got {}", name, v);
            }
        }
        Ok(())
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_timeout_secs)
    }

    pub fn context_retention(&self) -> Duration {
        Duration::from_secs(self.context_retention_secs)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn generation_budget(&self) -> Duration {
        Duration::from_millis(self.generation_budget_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionPreferences {
    pub auto_recommend: bool,
    pub confidence_threshold: f64,
    pub max_recommendations: usize,
}

impl Default for SessionPreferences {
    fn default() -> Self {
        Self {
            auto_recommend: true,
            confidence_threshold: 0.5,
            max_recommendations: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PreferencesPatch {
    pub auto_recommend: Option<bool>,
    pub confidence_threshold: Option<f64>,
    pub max_recommendations: Option<usize>,
}

impl SessionPreferences {
    /// Field-wise overlay. Out-of-range values are clamped, not rejected.
    pub fn apply_patch(&mut self, patch: PreferencesPatch) {
        if let Some(auto) = patch.auto_recommend {
            self.auto_recommend = auto;
        }
        if let Some(t) = patch.confidence_threshold {
            self.confidence_threshold = t.clamp(0.0, 1.0);
        }
        if let Some(n) = patch.max_recommendations {
            self.max_recommendations = n.clamp(1, 10);
        }
    }
}
