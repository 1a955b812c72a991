//! HTTP client for the HTML→PDF conversion service.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use metrics::counter;
use reqwest::{
    StatusCode, Url,
    multipart::{Form, Part},
};
use tracing::{debug, warn};

use super::error::{FatalRenderError, TransientRenderError};

const CONVERT_PATH: &str = "forms/chromium/convert/html";
const FORM_FIELD: &str = "files";
const DOCUMENT_NAME: &str = "index.html";
const DEFAULT_TIMEOUT_SECS: u64 = 500;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_BASE_MS: u64 = 500;

/// Converts one HTML document into PDF bytes.
#[async_trait]
pub trait PdfRenderer: Send + Sync {
    async fn render(&self, html: &str) -> Result<Bytes, FatalRenderError>;
}

/// Exponential backoff: attempt `n` (0-based) waits `base * 2^n` before retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2_u32.saturating_pow(attempt))
    }
}

#[derive(Debug, Clone)]
pub struct RenderClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl RenderClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&crate::config::RendererSettings> for RenderClientConfig {
    fn from(settings: &crate::config::RendererSettings) -> Self {
        Self {
            base_url: settings.url.clone(),
            timeout: settings.timeout,
            retry: RetryPolicy {
                max_retries: settings.max_retries,
                backoff_base: settings.backoff_base,
            },
        }
    }
}

/// Conversion service client. Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct RenderClient {
    http: reqwest::Client,
    endpoint: Url,
    retry: RetryPolicy,
}

enum AttemptError {
    Transient(TransientRenderError),
    Fatal(FatalRenderError),
}

impl RenderClient {
    pub fn new(config: &RenderClientConfig) -> Result<Self, FatalRenderError> {
        let base = format!("{}/", config.base_url.trim_end_matches('/'));
        let endpoint = Url::parse(&base)
            .and_then(|base| base.join(CONVERT_PATH))
            .map_err(|err| {
                FatalRenderError::Client(format!("invalid renderer url `{}`: {err}", config.base_url))
            })?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("report-press/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| FatalRenderError::Client(err.to_string()))?;

        Ok(Self {
            http,
            endpoint,
            retry: config.retry,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn attempt(&self, payload: &Bytes) -> Result<Bytes, AttemptError> {
        let part = Part::stream_with_length(payload.clone(), payload.len() as u64)
            .file_name(DOCUMENT_NAME)
            .mime_str("text/html")
            .map_err(|err| AttemptError::Fatal(FatalRenderError::Client(err.to_string())))?;
        let form = Form::new().part(FORM_FIELD, part);

        let response = self
            .http
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|err| transport(&err))?;

        let status = response.status();
        if status == StatusCode::OK {
            return response.bytes().await.map_err(|err| transport(&err));
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::BAD_GATEWAY {
            Err(AttemptError::Transient(TransientRenderError::BadGateway {
                body,
            }))
        } else {
            Err(AttemptError::Fatal(FatalRenderError::Rejected {
                status: status.as_u16(),
                body,
            }))
        }
    }
}

fn transport(err: &reqwest::Error) -> AttemptError {
    AttemptError::Transient(TransientRenderError::Transport(err.to_string()))
}

#[async_trait]
impl PdfRenderer for RenderClient {
    async fn render(&self, html: &str) -> Result<Bytes, FatalRenderError> {
        let payload = Bytes::copy_from_slice(html.as_bytes());
        let mut attempt: u32 = 0;

        loop {
            counter!("report_press_render_attempts_total").increment(1);
            match self.attempt(&payload).await {
                Ok(pdf) => {
                    debug!(
                        target = "report_press::render::client",
                        attempt,
                        bytes = pdf.len(),
                        "document converted"
                    );
                    return Ok(pdf);
                }
                Err(AttemptError::Fatal(err)) => {
                    counter!("report_press_render_failures_total").increment(1);
                    warn!(
                        target = "report_press::render::client",
                        attempt,
                        error = %err,
                        "renderer rejected document"
                    );
                    return Err(err);
                }
                Err(AttemptError::Transient(err)) => {
                    if attempt >= self.retry.max_retries {
                        counter!("report_press_render_failures_total").increment(1);
                        warn!(
                            target = "report_press::render::client",
                            attempts = attempt + 1,
                            error = %err,
                            "renderer retries exhausted"
                        );
                        return Err(FatalRenderError::Exhausted {
                            attempts: attempt + 1,
                            last: err,
                        });
                    }

                    let delay = self.retry.delay_for(attempt);
                    counter!("report_press_render_retries_total").increment(1);
                    warn!(
                        target = "report_press::render::client",
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient renderer failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
    }

    #[test]
    fn endpoint_is_joined_onto_base_url() {
        let client = RenderClient::new(&RenderClientConfig::new("http://gotenberg:3000/"))
            .expect("client");
        assert_eq!(
            client.endpoint().as_str(),
            "http://gotenberg:3000/forms/chromium/convert/html"
        );

        let nested = RenderClient::new(&RenderClientConfig::new("http://proxy/gotenberg"))
            .expect("client");
        assert_eq!(
            nested.endpoint().as_str(),
            "http://proxy/gotenberg/forms/chromium/convert/html"
        );
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let err = RenderClient::new(&RenderClientConfig::new("not a url")).expect_err("invalid");
        assert!(matches!(err, FatalRenderError::Client(_)));
    }
}
