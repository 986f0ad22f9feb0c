use std::fmt::{Display, Formatter};

/// Why a configuration could not be resolved for a test.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConfigMissReason {
    /// The suite document loaded, but neither the variable scope nor the
    /// common scope defines the test.
    TestAbsent,
    /// Neither the bundled source nor the fallback directory produced a
    /// usable document.
    NoSource,
}

impl Display for ConfigMissReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TestAbsent => write!(f, "test absent from variable and common scope"),
            Self::NoSource => write!(f, "no configuration source available"),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum DecodeError {
    #[error("flag code {0} is outside the recognized vocabulary 1..=4")]
    UnknownFlagCode(i64),
    #[error("packed truth contains invalid level marker {0:?} at level {1}")]
    InvalidTruthMarker(char, usize),
    #[error("stored decision {0:?} is not a recognized boolean encoding")]
    InvalidStoredDecision(String),
    #[error("stored decision is null")]
    NullDecision,
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum QcError {
    #[error("configuration not found for test `{test}` in suite `{suite}`: {reason}")]
    ConfigNotFound { suite: String, test: String, reason: ConfigMissReason },
    #[error("test `{0}` not found in evaluated results")]
    TestNotFound(String),
    #[error("QC engine evaluation failed: {0}")]
    EvaluationFailed(String),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("column `{column}` already exists on table `{table}`")]
    SchemaConflict { table: String, column: String },
    #[error(
        "column `{column}` was added to `{table}` but only {written} of {total} rows were \
         written: {message}"
    )]
    PersistencePartialFailure {
        table: String,
        column: String,
        written: usize,
        total: usize,
        message: String,
    },
    #[error("unknown test `{0}` referenced in discriminator expression")]
    UnknownTest(String),
    #[error("invalid discriminator expression `{0}`")]
    InvalidExpression(String),
    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),
    #[error("row {0} has no truth value")]
    MissingTruth(String),
    #[error("category assignment {0} has no integer uid to key the update")]
    MissingUid(usize),
}

/// Failure reported by a [`crate::QcEngine`] implementation.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
#[error("{0}")]
pub struct EngineError(pub String);

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ConfigLoadError {
    #[error("configuration `{0}` not found")]
    NotFound(String),
    #[error("configuration `{name}` is not valid JSON: {message}")]
    Parse { name: String, message: String },
    #[error("failed to read configuration `{name}`: {message}")]
    Io { name: String, message: String },
}
