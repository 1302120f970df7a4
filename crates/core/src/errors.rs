use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("unknown stage name `{0}`")]
    UnknownStage(String),
    #[error("missing required fields: {fields:?}")]
    MissingFields { fields: Vec<String> },
    #[error("malformed sequence code `{0}`")]
    MalformedCode(String),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

impl DomainError {
    pub fn missing(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::MissingFields { fields: fields.into_iter().map(Into::into).collect() }
    }
}
