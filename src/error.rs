use crate::process::StepIndex;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the persistence substrate underneath a
/// [`ProcessStore`](crate::ProcessStore).
#[derive(Error, Debug)]
pub enum StorageError {
    /// Reading or writing a persisted record failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File the operation was targeting
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The key cannot be mapped onto the substrate (e.g. path separators).
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
}

/// Errors returned by the workflow engine.
///
/// Business rejections (wrong handling unit, nothing found, backend error
/// codes) are *not* errors: they surface as
/// [`Transition::Rejected`](crate::Transition::Rejected) and are shown to the
/// operator. `FlowError` covers programming mistakes and substrate failures.
///
/// # Non-Exhaustive
///
/// ```
/// use scanflow::{FlowError, StepIndex};
///
/// fn describe(error: &FlowError) -> String {
///     match error {
///         FlowError::UnknownStep { process, step } => format!("{process} has no step {step}"),
///         FlowError::Storage(e) => format!("storage: {e}"),
///         _ => error.to_string(),
///     }
/// }
///
/// let error = FlowError::UnknownStep { process: "boxChecking", step: StepIndex::new(99) };
/// assert_eq!(describe(&error), "boxChecking has no step 99");
/// ```
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FlowError {
    /// The step is not part of the process schema.
    #[error("Step {step} is not declared by process '{process}'")]
    UnknownStep {
        /// Process name
        process: &'static str,
        /// Offending step
        step: StepIndex,
    },

    /// A payload was committed to a step it does not belong to.
    #[error("Payload for step {payload_step} committed to step {step} of '{process}'")]
    PayloadMismatch {
        /// Process name
        process: &'static str,
        /// Step the commit targeted
        step: StepIndex,
        /// Step the payload variant belongs to
        payload_step: StepIndex,
    },

    /// A record could not be serialized for persistence.
    #[error("Failed to serialize process '{process}': {source}")]
    Serialization {
        /// Process name
        process: &'static str,
        /// Underlying serde error
        source: serde_json::Error,
    },

    /// The persistence substrate failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Invalid engine configuration.
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}
