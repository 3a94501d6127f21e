use thiserror::Error;

/// Errors surfaced by a page backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend not ready. Launch it first.")]
    NotReady,

    #[error("Navigation error: {0}")]
    Navigation(String),

    /// The page was mid-navigation or its script context was torn down.
    /// Callers should settle and retry, not fail the run.
    #[error("Transient page state: {0}")]
    TransientPageState(String),

    #[error("Script error: {0}")]
    Script(String),

    /// The target element never became actionable within the bound.
    #[error("Action timed out: {0}")]
    ActionTimeout(String),

    #[error("Not supported by this backend: {0}")]
    NotSupported(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Other(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::TransientPageState(_))
    }
}

/// Errors from the decision oracle adapter.
#[derive(Debug, Error)]
pub enum OracleError {
    /// The oracle returned something that does not conform to the
    /// ActionDecision shape. Recoverable: the loop retries with a
    /// corrective note.
    #[error("Oracle contract violation: {0}")]
    Contract(String),

    #[error("Oracle request failed: {0}")]
    Http(String),

    #[error("Oracle response could not be decoded: {0}")]
    Decode(String),
}

/// Terminal workflow failures. Recoverable conditions (resolution misses,
/// transient extraction, malformed decisions) are retried inside the loop
/// and only reach this enum once a budget is exhausted.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("No interactive elements found on the page")]
    EmptyElementSet,

    #[error("Retry budget exhausted after {attempts} attempts on the same step")]
    RetryBudgetExhausted { attempts: u32 },

    #[error("Iteration cap of {0} reached")]
    IterationCapReached(u32),

    #[error("Oracle aborted the task")]
    OracleAbort,

    #[error("Timed out waiting for an oracle decision")]
    DecisionTimeout,

    #[error("Run cancelled")]
    Cancelled,

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Oracle(#[from] OracleError),
}
