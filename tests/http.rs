mod common;

use std::sync::{Arc, atomic::Ordering};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use report_press::infra::http::{ApiState, build_router};
use serde_json::{Value, json};
use tower::ServiceExt;

use common::{FakeRenderer, pipeline, settings, statement_vars};

const BODY_LIMIT: usize = 8 * 1024 * 1024;

const ROWS_TEMPLATE: &str = "<table>{% for group in groupedInvoices %}\
    {% for txn in group.transactions %}<tr class=\"txn\"><td>{{ txn.label }}</td></tr>{% endfor %}\
    {% endfor %}</table>";

fn router(renderer: FakeRenderer) -> Router {
    router_with(Arc::new(renderer))
}

fn router_with(renderer: Arc<FakeRenderer>) -> Router {
    let pipeline = pipeline(renderer, settings(3, 200, 2));
    build_router(ApiState { pipeline }, BODY_LIMIT)
}

fn post_report(body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/reports")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .expect("request")
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn health_reports_ok() {
    let response = router(FakeRenderer::new())
        .oneshot(
            Request::builder()
                .uri("/api/v1/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn create_report_returns_pdf() {
    let body = json!({
        "templateName": "statement_report",
        "templateVars": statement_vars(&[5]),
        "generatePageNumber": true,
        "chunkSize": 2
    });

    let response = router(FakeRenderer::new())
        .oneshot(post_report(body.to_string()))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("application/pdf")
    );
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok()),
        Some("inline; filename=\"statement_report.pdf\"")
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    assert!(bytes.starts_with(b"%PDF-"));
    assert_eq!(common::page_texts(&bytes).len(), 5);
}

#[tokio::test]
async fn reserved_variables_are_rejected() {
    let body = json!({
        "templateName": "statement_report",
        "templateVars": { "total_pages": 4 }
    });

    let response = router(FakeRenderer::new())
        .oneshot(post_report(body.to_string()))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "invalid_input");
    assert!(body["error"]["hint"]
        .as_str()
        .is_some_and(|hint| hint.contains("total_pages")));
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let response = router(FakeRenderer::new())
        .oneshot(post_report("{\"templateName\":".to_string()))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "invalid_input");
}

#[tokio::test]
async fn zero_chunk_size_is_a_bad_request() {
    let body = json!({
        "templateName": "statement_report",
        "templateVars": statement_vars(&[2]),
        "chunkSize": 0
    });

    let response = router(FakeRenderer::new())
        .oneshot(post_report(body.to_string()))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn renderer_failure_maps_to_bad_gateway() {
    let body = json!({
        "templateName": "statement_report",
        "templateVars": statement_vars(&[4])
    });

    let response = router(FakeRenderer::failing_on("g1-r2"))
        .oneshot(post_report(body.to_string()))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "render_error");
    assert_eq!(body["error"]["message"], "PDF renderer rejected the report");
}

#[tokio::test]
async fn inline_statement_template_is_rendered_in_chunks() {
    let mut vars = statement_vars(&[3]);
    vars["reportName"] = json!("statement_report");
    let body = json!({
        "template": STANDARD.encode(ROWS_TEMPLATE),
        "templateVars": vars,
        "chunkSize": 2
    });
    let renderer = Arc::new(FakeRenderer::new());

    let response = router_with(Arc::clone(&renderer))
        .oneshot(post_report(body.to_string()))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let pages = common::page_texts(&bytes);
    assert_eq!(pages.len(), 3);
    assert!(pages[2].contains("g1-r3"));
    assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn inline_receipt_template_is_numbered() {
    let body = json!({
        "template": STANDARD.encode("<p>{{ reportName }} for {{ payer }}</p>"),
        "templateVars": { "reportName": "payment_receipt", "payer": "A&B" }
    });
    let renderer = Arc::new(FakeRenderer::new());

    let response = router_with(Arc::clone(&renderer))
        .oneshot(post_report(body.to_string()))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);
    let documents = renderer.documents.lock().expect("documents");
    assert!(documents
        .iter()
        .any(|html| html.contains("<p>payment_receipt for A&amp;B</p>")));
}

#[tokio::test]
async fn undecodable_inline_template_is_rejected() {
    let body = json!({
        "template": "not base64 at all!",
        "templateVars": {}
    });

    let response = router(FakeRenderer::new())
        .oneshot(post_report(body.to_string()))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "invalid_input");
}

#[tokio::test]
async fn inline_template_syntax_error_is_rejected_before_rendering() {
    let body = json!({
        "template": STANDARD.encode("{% for row in rows %}<p>{{ row }}</p>"),
        "templateVars": { "rows": [1, 2] }
    });
    let renderer = Arc::new(FakeRenderer::new());

    let response = router_with(Arc::clone(&renderer))
        .oneshot(post_report(body.to_string()))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "invalid_input");
    assert_eq!(renderer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn request_without_any_template_is_rejected() {
    let body = json!({ "templateVars": statement_vars(&[1]) });

    let response = router(FakeRenderer::new())
        .oneshot(post_report(body.to_string()))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "invalid_input");
}
