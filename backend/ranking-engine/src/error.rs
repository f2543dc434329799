/// Error types for the ranking engine
///
/// Almost every failure inside the engine degrades instead of propagating:
/// configuration problems resolve to defaults and fact-load problems fall
/// back to unranked passthrough. The only hard error a caller can observe
/// is an expired deadline.
use thiserror::Error;

/// Result type for ranking-engine operations
pub type Result<T> = std::result::Result<T, RankingError>;

#[derive(Debug, Error)]
pub enum RankingError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("ranking deadline exceeded")]
    DeadlineExceeded,
}
