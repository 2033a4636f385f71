//! User-facing failures that block a pipeline action.
//!
//! These never abort the process: the CLI prints them inline and the action
//! can be retried once the missing input or credential is supplied.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// An earlier step has not produced the artifact this action needs.
    #[error("{action}: {needs} first")]
    MissingPrerequisite { action: String, needs: String },

    /// The selected model's provider has no credential in the environment.
    #[error("{provider} credential missing: set {}", .env_keys.join(" or "))]
    MissingCredential {
        provider: String,
        env_keys: Vec<String>,
    },

    /// A line starts like an act header but does not read `ACT <number>`.
    #[error("malformed act header on line {line}: {text:?}")]
    MalformedActHeader { line: usize, text: String },

    #[error("act label {label} appears more than once")]
    DuplicateActLabel { label: String },

    /// Acts or scores on disk no longer describe the current script.
    #[error("acts or scores are out of date for the current script; split and score again")]
    StaleActs,

    /// A rewritten act changed the act structure of the script.
    #[error("replacement for {label} altered the act headers")]
    MalformedReplacement { label: String },

    #[error("candidate {index} out of range (1..={available})")]
    CandidateIndexOutOfRange { index: usize, available: usize },

    #[error("research returned no candidate cases")]
    NoCandidates,

    #[error("invalid thumbnail image: {0}")]
    InvalidImage(String),

    #[error("no provider registered as '{provider}' for model {model}")]
    UnknownProvider { provider: String, model: String },
}

impl PipelineError {
    pub fn missing(action: &str, needs: &str) -> Self {
        PipelineError::MissingPrerequisite {
            action: action.to_string(),
            needs: needs.to_string(),
        }
    }
}
