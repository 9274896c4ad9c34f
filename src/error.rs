//! Error types for failures callers need to tell apart

use thiserror::Error;

/// Pipeline failures that carry meaning beyond "the run aborted".
///
/// Everything else is plain `anyhow` context; these are wrapped in
/// `anyhow::Error` too and can be recovered with `downcast_ref`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{path}: missing required column(s): {}", .missing.join(", "))]
    MissingColumns { path: String, missing: Vec<String> },

    #[error("{0}: no rows to process")]
    EmptyInput(String),

    #[error("customer '{customer_id}' has no value for {feature}")]
    NullFeature {
        customer_id: String,
        feature: &'static str,
    },

    #[error("need at least {required} customers to form {required} risk groups, found {found}")]
    TooFewCustomers { required: usize, found: usize },

    #[error("unknown risk label '{0}'")]
    UnknownLabel(String),

    #[error("encoded label {0} is outside the encoder's classes")]
    UnknownCode(usize),

    #[error("model and label encoder do not match: {0}")]
    SchemaMismatch(String),

    #[error("unrecognised invoice date '{0}'")]
    InvalidDate(String),
}
