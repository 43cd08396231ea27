use thiserror::Error;

/// Failure taxonomy for the recommendation service. Each variant carries a
/// stable machine-readable code so clients can react without parsing text.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("user and workspace identity are required")]
    AuthenticationRequired,

    #[error("session limit reached for user {user_id}")]
    SessionLimitExceeded { user_id: String },

    #[error("malformed event payload: {0}")]
    MalformedEvent(String),

    #[error("tool catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("recommendation generation failed: {0}")]
    GenerationFailed(String),

    #[error("recommendation generation exceeded its budget")]
    GenerationTimeout,

    #[error("recommendation cache is full")]
    CacheExhausted,

    #[error("no conversation context for {0}")]
    ConversationNotFound(uuid::Uuid),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthenticationRequired => "auth_required",
            Self::SessionLimitExceeded { .. } => "session_limit",
            Self::MalformedEvent(_) => "malformed_event",
            Self::CatalogUnavailable(_) => "catalog_unavailable",
            Self::GenerationFailed(_) => "generation_failed",
            Self::GenerationTimeout => "generation_timeout",
            Self::CacheExhausted => "cache_exhausted",
            Self::ConversationNotFound(_) => "conversation_not_found",
            Self::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
