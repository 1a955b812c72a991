//! Report orchestration.
//!
//! One invocation walks a fixed sequence of stages:
//!
//! ```text
//! Planning → RenderingContent → Merging → [PageCounting → PlanningFooter →
//!     RenderingFooter → Splitting → Composing] → Done
//! ```
//!
//! The bracketed stages only run when page numbers are requested. Any fatal
//! error moves the invocation to `Failed`; nothing produced up to that point
//! is returned. Scratch files live inside the stage that created them and are
//! gone before the next stage starts.

use std::{
    collections::BTreeMap,
    num::NonZeroUsize,
    path::PathBuf,
    sync::Arc,
    time::Instant,
};

use metrics::histogram;
use tracing::{Instrument, Span, error, info, info_span};
use uuid::Uuid;

use crate::domain::report::{ReportRequest, TemplateSource};

use super::{
    chunk::{ChunkPlanner, DEFAULT_CHUNK_SIZE},
    client::PdfRenderer,
    compose::FooterComposer,
    error::PipelineError,
    inline::InlineTemplates,
    merge::Merger,
    paginate::{DEFAULT_FOOTER_BATCH_SIZE, Paginator},
    pdf::Document,
    pool::{DEFAULT_CONCURRENCY, RendererPool},
    templates::ReportTemplates,
};

const DEFAULT_STATEMENT_KIND: &str = "statement_report";
const DEFAULT_NUMBERED_KINDS: &[&str] = &["routing_slip_report", "payment_receipt"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Planning,
    RenderingContent,
    Merging,
    PageCounting,
    PlanningFooter,
    RenderingFooter,
    Splitting,
    Composing,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Planning => "planning",
            PipelineStage::RenderingContent => "rendering_content",
            PipelineStage::Merging => "merging",
            PipelineStage::PageCounting => "page_counting",
            PipelineStage::PlanningFooter => "planning_footer",
            PipelineStage::RenderingFooter => "rendering_footer",
            PipelineStage::Splitting => "splitting",
            PipelineStage::Composing => "composing",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        }
    }
}

/// How a request is turned into content pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Grouped records are chunked and rendered in parallel.
    Chunked,
    /// The whole document is rendered in one conversion call.
    Direct,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub chunk_size: NonZeroUsize,
    pub footer_batch_size: NonZeroUsize,
    pub concurrency: NonZeroUsize,
    /// Kind family routed through the chunked path.
    pub statement_kind: String,
    /// Kind families that always receive page numbers on the direct path.
    pub numbered_kinds: Vec<String>,
    pub scratch_dir: Option<PathBuf>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let non_zero = |value: usize| NonZeroUsize::new(value).unwrap_or(NonZeroUsize::MIN);
        Self {
            chunk_size: non_zero(DEFAULT_CHUNK_SIZE),
            footer_batch_size: non_zero(DEFAULT_FOOTER_BATCH_SIZE),
            concurrency: non_zero(DEFAULT_CONCURRENCY),
            statement_kind: DEFAULT_STATEMENT_KIND.to_string(),
            numbered_kinds: DEFAULT_NUMBERED_KINDS
                .iter()
                .map(|kind| kind.to_string())
                .collect(),
            scratch_dir: None,
        }
    }
}

impl From<&crate::config::Settings> for PipelineSettings {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            chunk_size: settings.pipeline.chunk_size,
            footer_batch_size: settings.pipeline.footer_batch_size,
            concurrency: settings.renderer.concurrency,
            statement_kind: settings.pipeline.statement_kind.clone(),
            numbered_kinds: settings.pipeline.numbered_kinds.clone(),
            scratch_dir: settings.pipeline.scratch_dir.clone(),
        }
    }
}

/// Logs each stage transition with the time spent in the stage being left.
struct StageClock {
    stage: PipelineStage,
    entered: Instant,
}

impl StageClock {
    fn start() -> Self {
        info!(
            target = "report_press::pipeline",
            stage = PipelineStage::Planning.as_str(),
            "stage entered"
        );
        Self {
            stage: PipelineStage::Planning,
            entered: Instant::now(),
        }
    }

    fn advance(&mut self, next: PipelineStage) {
        info!(
            target = "report_press::pipeline",
            from = self.stage.as_str(),
            stage = next.as_str(),
            elapsed_ms = self.entered.elapsed().as_millis() as u64,
            "stage entered"
        );
        self.stage = next;
        self.entered = Instant::now();
    }
}

#[derive(Clone)]
pub struct ReportPipeline {
    templates: Arc<dyn ReportTemplates>,
    renderer: Arc<dyn PdfRenderer>,
    settings: Arc<PipelineSettings>,
}

impl ReportPipeline {
    pub fn new(
        templates: Arc<dyn ReportTemplates>,
        renderer: Arc<dyn PdfRenderer>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            templates,
            renderer,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn route(&self, request: &ReportRequest) -> Route {
        if request.kind.belongs_to(&self.settings.statement_kind)
            && request.variables.has_grouped_records()
        {
            Route::Chunked
        } else {
            Route::Direct
        }
    }

    /// Chunked reports are numbered only on request; direct reports are also
    /// numbered when their kind is in a numbered family.
    pub fn wants_page_numbers(&self, request: &ReportRequest, route: Route) -> bool {
        match route {
            Route::Chunked => request.generate_page_numbers,
            Route::Direct => {
                request.generate_page_numbers
                    || request.kind.belongs_to_any(&self.settings.numbered_kinds)
            }
        }
    }

    /// Produce the final PDF for `request`. On error no partial document is
    /// returned and all scratch state has been released.
    pub async fn create_report(&self, request: ReportRequest) -> Result<Vec<u8>, PipelineError> {
        let report_id = Uuid::new_v4();
        let span = info_span!(
            "report",
            %report_id,
            kind = %request.kind,
        );
        let started = Instant::now();

        let result = self.run(request).instrument(span.clone()).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        histogram!("report_press_report_ms").record(elapsed_ms as f64);
        span.in_scope(|| match &result {
            Ok(pdf) => info!(
                target = "report_press::pipeline",
                stage = PipelineStage::Done.as_str(),
                elapsed_ms,
                bytes = pdf.len(),
                "report completed"
            ),
            Err(err) => error!(
                target = "report_press::pipeline",
                stage = PipelineStage::Failed.as_str(),
                elapsed_ms,
                error = %err,
                "report failed"
            ),
        });
        result
    }

    async fn run(&self, request: ReportRequest) -> Result<Vec<u8>, PipelineError> {
        let request = Arc::new(request);
        let route = self.route(&request);
        let numbered = self.wants_page_numbers(&request, route);
        info!(
            target = "report_press::pipeline",
            route = ?route,
            numbered,
            groups = request.variables.grouped_invoices.len(),
            "report accepted"
        );

        let mut clock = StageClock::start();
        let templates = self.templates_for(&request)?;
        let document = match route {
            Route::Chunked => self.render_chunked(&templates, &request, &mut clock).await?,
            Route::Direct => self.render_direct(&templates, &request, &mut clock).await?,
        };

        let document = if numbered {
            self.number_pages(&templates, &request, document, &mut clock)
                .await?
        } else {
            document
        };

        clock.advance(PipelineStage::Done);
        blocking(move || document.into_bytes()).await
    }

    /// Stored templates, or the caller's template compiled for this request.
    fn templates_for(
        &self,
        request: &ReportRequest,
    ) -> Result<Arc<dyn ReportTemplates>, PipelineError> {
        match &request.template {
            TemplateSource::Stored => Ok(Arc::clone(&self.templates)),
            TemplateSource::Inline(source) => {
                let compiled = InlineTemplates::compile(source, Arc::clone(&self.templates))
                    .map_err(PipelineError::InvalidTemplate)?;
                info!(
                    target = "report_press::pipeline",
                    bytes = source.len(),
                    "caller template compiled"
                );
                Ok(Arc::new(compiled))
            }
        }
    }

    async fn render_chunked(
        &self,
        templates: &Arc<dyn ReportTemplates>,
        request: &Arc<ReportRequest>,
        clock: &mut StageClock,
    ) -> Result<Document, PipelineError> {
        let planner = ChunkPlanner::new(request.chunk_size.unwrap_or(self.settings.chunk_size));
        let templates = Arc::clone(templates);
        let planned = Arc::clone(request);
        let units = blocking(move || {
            planner.plan(templates.as_ref(), &planned.kind, &planned.variables)
        })
        .await?;
        info!(
            target = "report_press::pipeline",
            units = units.len(),
            chunk_size = planner.chunk_size().get(),
            "content planned"
        );

        clock.advance(PipelineStage::RenderingContent);
        let fragments = self.pool().render_all(units).await?;

        clock.advance(PipelineStage::Merging);
        let merger = Merger::new(self.settings.scratch_dir.clone());
        blocking(move || merger.merge(fragments)).await
    }

    async fn render_direct(
        &self,
        templates: &Arc<dyn ReportTemplates>,
        request: &Arc<ReportRequest>,
        clock: &mut StageClock,
    ) -> Result<Document, PipelineError> {
        let html = templates.render_report(&request.kind, &request.variables, None)?;

        clock.advance(PipelineStage::RenderingContent);
        let pdf = self.renderer.render(&html).await?;
        drop(html);

        clock.advance(PipelineStage::Merging);
        blocking(move || Document::from_bytes(&pdf)).await
    }

    async fn number_pages(
        &self,
        templates: &Arc<dyn ReportTemplates>,
        request: &Arc<ReportRequest>,
        document: Document,
        clock: &mut StageClock,
    ) -> Result<Document, PipelineError> {
        clock.advance(PipelineStage::PageCounting);
        let total_pages = document.page_count();

        clock.advance(PipelineStage::PlanningFooter);
        let paginator = Paginator::new(self.settings.footer_batch_size);
        let templates = Arc::clone(templates);
        let planned = Arc::clone(request);
        let batches = blocking(move || {
            paginator.plan(
                templates.as_ref(),
                &planned.kind,
                &planned.variables,
                total_pages,
            )
        })
        .await?;
        let expected: Vec<(u32, usize)> = batches
            .iter()
            .map(|batch| (batch.batch_id, batch.page_count()))
            .collect();
        info!(
            target = "report_press::pipeline",
            total_pages,
            batches = batches.len(),
            "footers planned"
        );

        clock.advance(PipelineStage::RenderingFooter);
        let units = batches.into_iter().map(|batch| batch.into_unit()).collect();
        let fragments = self.pool().render_all(units).await?;

        clock.advance(PipelineStage::Splitting);
        let footers = blocking(move || {
            let mut footers = BTreeMap::new();
            let mut next_page = 0;
            for (fragment, (batch_id, pages)) in fragments.into_iter().zip(expected) {
                for page in paginator.split(batch_id, &fragment.bytes, pages)? {
                    footers.insert(next_page, page);
                    next_page += 1;
                }
            }
            Ok::<_, PipelineError>(footers)
        })
        .await?;

        clock.advance(PipelineStage::Composing);
        let composed = blocking(move || {
            Ok::<_, PipelineError>(FooterComposer.compose(document, &footers))
        })
        .await?;
        info!(
            target = "report_press::pipeline",
            stamped = composed.stamped,
            warnings = composed.warnings.len(),
            "footers composed"
        );
        Ok(composed.document)
    }

    fn pool(&self) -> RendererPool {
        RendererPool::new(Arc::clone(&self.renderer), self.settings.concurrency)
    }
}

/// Run CPU- or disk-bound work off the async workers, inside the current span.
async fn blocking<T, E, F>(task: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<PipelineError> + Send + 'static,
{
    let span = Span::current();
    tokio::task::spawn_blocking(move || span.in_scope(task))
        .await
        .map_err(|err| PipelineError::Worker(err.to_string()))?
        .map_err(Into::into)
}
