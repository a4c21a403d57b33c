//! Error types for Trellis.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Structural errors, reported before anything dispatches
    #[error("Unknown dependency `{dependency}` declared by job `{job}`")]
    UnknownDependency { job: String, dependency: String },

    #[error("Cyclic dependency: {0}")]
    CyclicDependency(String),

    #[error("Duplicate job name: {0}")]
    DuplicateJob(String),

    #[error("Pipeline has no jobs")]
    EmptyPipeline,

    #[error("Invalid pipeline definition: {0}")]
    InvalidDefinition(String),

    // Gate-check failures
    #[error("Version mismatch: expected `{expected}`, extracted `{actual}`")]
    VersionMismatch { expected: String, actual: String },

    #[error("No reference value available for the version consistency check")]
    MissingVersionReference,

    // Runtime failures
    #[error("Step `{step}` failed with exit code {exit_code}")]
    StepFailed { step: String, exit_code: i32 },

    #[error("Step `{step}` timed out after {seconds} seconds")]
    StepTimeout { step: String, seconds: u64 },

    #[error("Run cancelled")]
    Cancelled,

    // Credentials
    #[error("Credential environment variable `{0}` is not set")]
    MissingCredential(String),

    // Infrastructure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
