use thiserror::Error;

/// Failure taxonomy for a single record's update pipeline.
///
/// Network and decoding failures travel as `anyhow::Error`; these variants are
/// the outcomes the orchestrator classifies (via `downcast_ref`) when it turns
/// a failed record into a report entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateError {
    #[error("malformed template: {0}")]
    MalformedTemplate(String),
    #[error("no {0} found on page")]
    NotFound(String),
    #[error("page does not exist: {0}")]
    PageNotFound(String),
    #[error("ignore flag present on page")]
    IgnoreFlagPresent,
    #[error("record not present in upstream data: {0}")]
    MissingRecord(String),
    #[error("upstream feed unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("edit rejected: {0}")]
    EditRejected(String),
    #[error("batch cancelled")]
    Cancelled,
}

impl UpdateError {
    /// Skips are expected opt-outs, reported separately from failures.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::IgnoreFlagPresent)
    }
}

/// Find an [`UpdateError`] anywhere in an anyhow chain.
pub fn classify(error: &anyhow::Error) -> Option<&UpdateError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<UpdateError>())
}
