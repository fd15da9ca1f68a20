use crate::payload::PayloadError;

/// Errors that abort a whole batch. Anything that goes wrong for a single
/// device is reported as an [UpdateOutcome](crate::client::UpdateOutcome)
/// instead and never shows up here.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("{0}")]
    Configuration(String),

    #[error("Failed to read batch input at row {row}: {source}")]
    Input {
        row: usize,
        #[source]
        source: csv::Error,
    },

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl BatchError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
