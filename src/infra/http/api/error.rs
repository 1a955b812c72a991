use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::error::{AppError, ErrorReport};
use crate::application::render::PipelineError;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

pub mod codes {
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const RENDER: &str = "render_error";
    pub const TEMPLATE: &str = "template_error";
    pub const MERGE: &str = "merge_error";
    pub const INTERNAL: &str = "internal_error";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
    report: ErrorReport,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        let report = ErrorReport::from_message(
            "infra::http::api",
            status,
            format!("{code}: {}", hint.as_deref().unwrap_or(message)),
        );
        Self {
            status,
            code,
            message,
            hint,
            report,
        }
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::INVALID_INPUT, message, hint)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<AppError> for ApiError {
    fn from(error: AppError) -> Self {
        let status = error.status_code();
        let code = match &error {
            AppError::Domain(_)
            | AppError::Validation(_)
            | AppError::Pipeline(PipelineError::InvalidTemplate(_)) => codes::INVALID_INPUT,
            AppError::Pipeline(PipelineError::Render(_)) => codes::RENDER,
            AppError::Pipeline(PipelineError::Template(_)) => codes::TEMPLATE,
            AppError::Pipeline(PipelineError::Merge(_)) => codes::MERGE,
            AppError::Pipeline(PipelineError::Worker(_))
            | AppError::Infra(_)
            | AppError::Unexpected(_) => codes::INTERNAL,
        };
        // Internal failures keep their detail in the logs only.
        let hint = (code != codes::INTERNAL).then(|| error.to_string());

        Self {
            status,
            code,
            message: error.presentation_message(),
            hint,
            report: ErrorReport::from_error("infra::http::api", status, &error),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        self.report.attach(&mut response);
        response
    }
}
