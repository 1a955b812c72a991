use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::application::error::AppError;
use crate::domain::report::{ReportRequest, TemplateSource};

use super::error::ApiError;
use super::models::CreateReportBody;
use super::state::ApiState;

pub async fn create_report(
    State(state): State<ApiState>,
    body: Result<Json<CreateReportBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body.map_err(|rejection| {
        ApiError::bad_request("Malformed report request", Some(rejection.body_text()))
    })?;

    let request = match (body.template, body.template_name) {
        (Some(encoded), _) => ReportRequest::with_template(
            TemplateSource::decode_inline(&encoded).map_err(AppError::from)?,
            body.template_vars,
            body.generate_page_number,
            body.chunk_size,
        ),
        (None, Some(name)) => ReportRequest::parse(
            name,
            body.template_vars,
            body.generate_page_number,
            body.chunk_size,
        ),
        (None, None) => {
            return Err(ApiError::bad_request(
                "Malformed report request",
                Some("either `templateName` or `template` is required".to_string()),
            ));
        }
    }
    .map_err(AppError::from)?;
    let disposition = format!("inline; filename=\"{}.pdf\"", request.kind);

    let pdf = state
        .pipeline
        .create_report(request)
        .await
        .map_err(AppError::from)?;

    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/pdf")],
        pdf,
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

pub async fn health() -> &'static str {
    "ok"
}
