use thiserror::Error;

/// Failures the render client retries on its own.
#[derive(Debug, Clone, Error)]
pub enum TransientRenderError {
    #[error("transport failure talking to the renderer: {0}")]
    Transport(String),
    #[error("renderer answered 502 Bad Gateway: {body}")]
    BadGateway { body: String },
}

/// Failures that abort the current rendering phase.
#[derive(Debug, Clone, Error)]
pub enum FatalRenderError {
    #[error("renderer rejected the document with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("renderer still failing after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: TransientRenderError,
    },
    #[error("renderer client could not be built: {0}")]
    Client(String),
    #[error("render task aborted: {0}")]
    Aborted(String),
}

/// Corrupt intermediate documents or inconsistent page accounting.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("intermediate PDF could not be processed: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("temporary artifact i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("intermediate PDF is encrypted")]
    Encrypted,
    #[error("intermediate PDF is malformed: {0}")]
    Malformed(String),
    #[error("footer batch {batch_id} split into {actual} pages, expected {expected}")]
    PageCountMismatch {
        batch_id: u32,
        expected: usize,
        actual: usize,
    },
}

impl MergeError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}

/// Non-fatal problem while stamping a footer onto one page.
#[derive(Debug, Error)]
pub enum OverlayWarning {
    #[error("no footer was rendered for page {page}")]
    MissingFooter { page: usize },
    #[error("footer for page {page} is unreadable: {reason}")]
    UnreadableFooter { page: usize, reason: String },
    #[error("footer for page {page} has no pages")]
    EmptyFooter { page: usize },
    #[error("footer could not be overlaid on page {page}: {reason}")]
    Overlay { page: usize, reason: String },
}

#[derive(Debug, Error)]
#[error("template `{template}` failed to render: {message}")]
pub struct TemplateError {
    pub template: String,
    pub message: String,
}

impl TemplateError {
    pub fn new(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            message: message.into(),
        }
    }
}

/// Anything that aborts a report invocation. No partial document escapes.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("caller template is invalid: {0}")]
    InvalidTemplate(#[source] TemplateError),
    #[error(transparent)]
    Render(#[from] FatalRenderError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error("pipeline worker failed: {0}")]
    Worker(String),
}
