use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("domain validation failed: {message}")]
    Validation { message: String },
    #[error("reserved template variable `{key}` cannot be supplied by the caller")]
    ReservedKey { key: String },
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn reserved_key(key: impl Into<String>) -> Self {
        Self::ReservedKey { key: key.into() }
    }
}
