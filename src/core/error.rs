use thiserror::Error;

/// Fatal plan problems. Everything else the engine reports as data.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlanError {
    #[error("retirementAge ({retirement}) must be >= currentAge ({current})")]
    InvertedAges { current: u32, retirement: u32 },
    #[error("terminalAge ({terminal}) must be between currentAge ({current}) and {max}")]
    InvalidHorizon { current: u32, terminal: u32, max: u32 },
    #[error("{field} must be a finite number")]
    NonFinite { field: String },
    #[error("{field} must be >= 0")]
    Negative { field: String },
    #[error("{field} ({age}) must be between {min} and {max}")]
    InvalidAge { field: String, age: u32, min: u32, max: u32 },
    #[error("{field} must be > -100%")]
    InvalidRate { field: String },
    #[error("duplicate account id: {0}")]
    DuplicateAccount(String),
    #[error("unknown account id: {0}")]
    UnknownAccount(String),
    #[error("unknown move id: {0}")]
    UnknownMove(String),
    #[error("invalid goal settings: {0}")]
    InvalidGoal(String),
    #[error("unsupported schema version {found}; newest supported is {supported}")]
    UnsupportedVersion { found: u64, supported: u32 },
    #[error("schema v{version}: missing required field `{field}`")]
    MissingField { version: u32, field: String },
    #[error("malformed plan: {0}")]
    Malformed(String),
}

impl PlanError {
    pub(crate) fn non_finite(field: impl Into<String>) -> Self {
        Self::NonFinite {
            field: field.into(),
        }
    }

    pub(crate) fn negative(field: impl Into<String>) -> Self {
        Self::Negative {
            field: field.into(),
        }
    }
}

impl From<serde_json::Error> for PlanError {
    fn from(value: serde_json::Error) -> Self {
        Self::Malformed(value.to_string())
    }
}
