use crate::pipeline::Stage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Source timed out: {0}")]
    SourceTimeout(String),

    #[error("Source rejected request with HTTP {status}: {body}")]
    SourceRejected { status: u16, body: String },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Sink rejected batch: {0}")]
    SinkRejected(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Input missing: {0}")]
    InputMissing(String),

    #[error("No locations were extracted ({attempted} attempted)")]
    NoLocationsExtracted { attempted: usize },

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<AppError>,
    },
}

impl AppError {
    /// Whether a retry has a chance of succeeding.
    ///
    /// Connection faults, timeouts, server-side (5xx) and throttling (429)
    /// rejections and sink rejections are transient. Client-side rejections,
    /// malformed payloads and local failures are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::SourceUnavailable(_) | AppError::SourceTimeout(_) => true,
            AppError::SourceRejected { status, .. } => *status >= 500 || *status == 429,
            AppError::SinkRejected(_) => true,
            AppError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }

    pub(crate) fn in_stage(self, stage: Stage) -> Self {
        AppError::Stage {
            stage,
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
