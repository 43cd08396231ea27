use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    Pool, Row, Sqlite,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous},
};
use uuid::Uuid;

use crate::recommend::types::{FeedbackEvent, RecommendationResponse, SelectionEvent};

/// Append-only store feeding the scoring pipeline's historical-effectiveness
/// signal. Events are audit records and are never mutated.
#[async_trait]
pub trait LearningStore: Send + Sync {
    async fn record_response(&self, response: &RecommendationResponse) -> anyhow::Result<()>;
    async fn record_selection(&self, event: SelectionEvent) -> anyhow::Result<()>;
    async fn record_feedback(&self, event: FeedbackEvent) -> anyhow::Result<()>;
    /// Rolling average of feedback values for a tool, in [0, 1]. `None` when
    /// the tool has no feedback yet.
    async fn effectiveness(&self, tool_id: &str) -> anyhow::Result<Option<f64>>;
}

#[derive(Clone)]
pub struct SqliteLearningStore {
    pool: Pool<Sqlite>,
}

impl SqliteLearningStore {
    pub async fn initialize(database_url: Option<String>) -> anyhow::Result<Self> {
        let url = match database_url {
            Some(u) => u,
            None => resolve_default_db_url()?,
        };
        let options = url
            .parse::<SqliteConnectOptions>()?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);
        let pool = Pool::<Sqlite>::connect_with(options).await?;
        sqlx::query("PRAGMA busy_timeout = 5000;").execute(&pool).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

fn resolve_default_db_url() -> anyhow::Result<String> {
    let base = std::env::var("XDG_DATA_HOME")
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
            PathBuf::from(home).join(".local").join("share")
        });
    let dir = base.join("toolpilot");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("learning.db");
    Ok(format!("sqlite://{}", path.to_string_lossy()))
}

#[async_trait]
impl LearningStore for SqliteLearningStore {
    async fn record_response(&self, response: &RecommendationResponse) -> anyhow::Result<()> {
        let now: DateTime<Utc> = Utc::now();
        for rec in &response.recommendations {
            sqlx::query(
                "INSERT INTO recommendation_log (id, bundle_id, conversation_id, tool_id, confidence, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .bind(rec.id.to_string())
            .bind(response.bundle_id.to_string())
            .bind(response.conversation_id.to_string())
            .bind(&rec.tool_id)
            .bind(rec.confidence)
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn record_selection(&self, event: SelectionEvent) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO selection_events (id, recommendation_id, session_id, confidence, dismissed, reason, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(event.recommendation_id.to_string())
        .bind(event.session_id.to_string())
        .bind(event.confidence.clamp(0.0, 1.0))
        .bind(event.dismissed as i64)
        .bind(event.reason)
        .bind(event.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_feedback(&self, event: FeedbackEvent) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO feedback_events (id, recommendation_id, session_id, feedback_type, value, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(event.feedback_id.to_string())
        .bind(event.recommendation_id.to_string())
        .bind(event.session_id.to_string())
        .bind(serde_json::to_string(&event.feedback_type)?.trim_matches('"').to_string())
        .bind(event.value.clamp(0.0, 1.0))
        .bind(event.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn effectiveness(&self, tool_id: &str) -> anyhow::Result<Option<f64>> {
        let row = sqlx::query(
            "SELECT AVG(f.value) AS avg_value, COUNT(*) AS n \
             FROM feedback_events f \
             JOIN recommendation_log r ON r.id = f.recommendation_id \
             WHERE r.tool_id = ?1",
        )
        .bind(tool_id)
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.get("n");
        if n == 0 {
            return Ok(None);
        }
        let avg: f64 = row.get("avg_value");
        Ok(Some(avg.clamp(0.0, 1.0)))
    }
}

/// Learning store that keeps nothing; serves as the disabled-learning mode.
pub struct NullLearningStore;

#[async_trait]
impl LearningStore for NullLearningStore {
    async fn record_response(&self, _response: &RecommendationResponse) -> anyhow::Result<()> {
        Ok(())
    }

    async fn record_selection(&self, _event: SelectionEvent) -> anyhow::Result<()> {
        Ok(())
    }

    async fn record_feedback(&self, _event: FeedbackEvent) -> anyhow::Result<()> {
        Ok(())
    }

    async fn effectiveness(&self, _tool_id: &str) -> anyhow::Result<Option<f64>> {
        Ok(None)
    }
}
