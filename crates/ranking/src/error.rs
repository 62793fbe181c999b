use thiserror::Error;

#[derive(Debug, Error)]
pub enum RankingError {
    /// Snapshot read/write failed; never retried.
    #[error("ranking snapshot persistence failed: {0}")]
    Persistence(String),
}
