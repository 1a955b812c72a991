//! Report rendering pipeline.
//!
//! HTML is produced by [`templates`] (or [`inline`] for caller templates), converted to PDF by an external service
//! through [`client`], fanned out by [`pool`], reassembled by [`merge`] and,
//! when page numbers are wanted, footered by [`paginate`] and [`compose`].
//! [`pipeline`] sequences the stages for one request.

pub mod chunk;
pub mod client;
pub mod compose;
pub mod error;
pub mod inline;
pub mod merge;
pub mod paginate;
pub mod pdf;
pub mod pipeline;
pub mod pool;
pub mod templates;

pub use chunk::{ChunkMode, ChunkPlanner, ChunkPosition, RenderUnit};
pub use client::{PdfRenderer, RenderClient, RenderClientConfig, RetryPolicy};
pub use compose::{Composed, FooterComposer};
pub use error::{
    FatalRenderError, MergeError, OverlayWarning, PipelineError, TemplateError,
    TransientRenderError,
};
pub use inline::InlineTemplates;
pub use merge::Merger;
pub use paginate::{FooterBatch, Paginator};
pub use pdf::{Document, DocumentBuilder, PageRef};
pub use pipeline::{PipelineSettings, PipelineStage, ReportPipeline, Route};
pub use pool::{RenderedFragment, RendererPool};
pub use templates::{AskamaTemplates, FooterPage, ReportTemplates, TemplateContext};
