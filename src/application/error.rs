use std::error::Error as StdError;

use axum::{http::StatusCode, response::Response};
use thiserror::Error;

use crate::{
    application::render::{FatalRenderError, PipelineError},
    domain::error::DomainError,
    infra::error::InfraError,
};

/// Diagnostic chain attached to error responses for the logging middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Domain(_)
            | AppError::Validation(_)
            | AppError::Pipeline(PipelineError::InvalidTemplate(_)) => StatusCode::BAD_REQUEST,
            AppError::Pipeline(PipelineError::Render(_)) => StatusCode::BAD_GATEWAY,
            AppError::Pipeline(_) | AppError::Infra(_) | AppError::Unexpected(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn presentation_message(&self) -> &'static str {
        match self {
            AppError::Domain(_) | AppError::Validation(_) => "Request could not be processed",
            AppError::Pipeline(PipelineError::Render(FatalRenderError::Exhausted { .. })) => {
                "PDF renderer unavailable"
            }
            AppError::Pipeline(PipelineError::Render(_)) => "PDF renderer rejected the report",
            AppError::Pipeline(PipelineError::Template(_)) => "Report template failed to render",
            AppError::Pipeline(PipelineError::InvalidTemplate(_)) => "Report template is invalid",
            AppError::Pipeline(PipelineError::Merge(_)) => "Rendered PDF could not be assembled",
            AppError::Pipeline(PipelineError::Worker(_)) | AppError::Unexpected(_) => {
                "Unexpected error occurred"
            }
            AppError::Infra(InfraError::Io(_)) => "I/O failure during request",
            AppError::Infra(InfraError::Telemetry(_)) => "Logging subsystem could not start",
            AppError::Infra(InfraError::Configuration { .. }) => "Service misconfigured",
        }
    }
}
