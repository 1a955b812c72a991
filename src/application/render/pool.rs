//! Bounded-concurrency fan-out of render units.

use std::{num::NonZeroUsize, sync::Arc};

use bytes::Bytes;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{Instrument, debug, warn};

use super::{chunk::RenderUnit, client::PdfRenderer, error::FatalRenderError};

pub const DEFAULT_CONCURRENCY: usize = 5;

/// PDF bytes for one render unit.
#[derive(Debug, Clone)]
pub struct RenderedFragment {
    pub order_id: u64,
    pub bytes: Bytes,
}

#[derive(Clone)]
pub struct RendererPool {
    renderer: Arc<dyn PdfRenderer>,
    width: NonZeroUsize,
}

impl RendererPool {
    pub fn new(renderer: Arc<dyn PdfRenderer>, width: NonZeroUsize) -> Self {
        Self { renderer, width }
    }

    pub fn width(&self) -> NonZeroUsize {
        self.width
    }

    /// Render every unit with at most `width` conversions in flight.
    ///
    /// The result is sorted by `order_id` regardless of completion order. The
    /// first fatal failure cancels the remaining work and is returned as is.
    pub async fn render_all(
        &self,
        units: Vec<RenderUnit>,
    ) -> Result<Vec<RenderedFragment>, FatalRenderError> {
        let total = units.len();
        let permits = Arc::new(Semaphore::new(self.width.get()));
        let mut tasks = JoinSet::new();

        for unit in units {
            let renderer = Arc::clone(&self.renderer);
            let permits = Arc::clone(&permits);
            tasks.spawn(
                async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|err| FatalRenderError::Aborted(err.to_string()))?;
                    let bytes = renderer.render(&unit.html).await?;
                    Ok::<_, FatalRenderError>(RenderedFragment {
                        order_id: unit.order_id,
                        bytes,
                    })
                }
                .in_current_span(),
            );
        }

        let mut fragments = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined
                .map_err(|err| FatalRenderError::Aborted(err.to_string()))
                .and_then(|result| result);
            match outcome {
                Ok(fragment) => fragments.push(fragment),
                Err(err) => {
                    tasks.abort_all();
                    warn!(
                        target = "report_press::render::pool",
                        completed = fragments.len(),
                        total,
                        error = %err,
                        "render pool aborted"
                    );
                    return Err(err);
                }
            }
        }

        fragments.sort_by_key(|fragment| fragment.order_id);
        debug!(
            target = "report_press::render::pool",
            total,
            width = self.width.get(),
            "render pool finished"
        );
        Ok(fragments)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::application::render::chunk::{ChunkMode, ChunkPosition};

    /// Echoes the HTML back as bytes; earlier units take longer to finish.
    struct SlowEcho {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        fail_on: Option<String>,
    }

    impl SlowEcho {
        fn new(fail_on: Option<&str>) -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                fail_on: fail_on.map(str::to_string),
            }
        }
    }

    #[async_trait]
    impl PdfRenderer for SlowEcho {
        async fn render(&self, html: &str) -> Result<Bytes, FatalRenderError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let index: u64 = html.parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(40_u64.saturating_sub(index * 4))).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_on.as_deref() == Some(html) {
                return Err(FatalRenderError::Rejected {
                    status: 400,
                    body: "bad document".into(),
                });
            }
            Ok(Bytes::from(html.to_string()))
        }
    }

    fn units(count: u64) -> Vec<RenderUnit> {
        (0..count)
            .map(|order_id| RenderUnit {
                order_id,
                html: order_id.to_string(),
                position: ChunkPosition {
                    mode: ChunkMode::Content,
                    group_index: 1,
                    chunk_index: order_id as usize + 1,
                    slice_start: 1,
                    slice_end: 1,
                    total_chunks_in_group: None,
                    opens_document: order_id == 0,
                },
            })
            .collect()
    }

    fn pool(renderer: Arc<SlowEcho>, width: usize) -> RendererPool {
        RendererPool::new(renderer, NonZeroUsize::new(width).expect("non-zero"))
    }

    #[tokio::test]
    async fn results_are_ordered_by_order_id() {
        let renderer = Arc::new(SlowEcho::new(None));
        let fragments = pool(renderer, 4).render_all(units(10)).await.expect("rendered");

        let ids: Vec<u64> = fragments.iter().map(|f| f.order_id).collect();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
        for fragment in &fragments {
            assert_eq!(fragment.bytes, Bytes::from(fragment.order_id.to_string()));
        }
    }

    #[tokio::test]
    async fn never_exceeds_pool_width() {
        let renderer = Arc::new(SlowEcho::new(None));
        pool(Arc::clone(&renderer), 3)
            .render_all(units(9))
            .await
            .expect("rendered");
        let peak = renderer.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak in-flight {peak} exceeded width");
        assert!(peak >= 1);
    }

    #[tokio::test]
    async fn first_fatal_failure_aborts_the_batch() {
        let renderer = Arc::new(SlowEcho::new(Some("2")));
        let err = pool(renderer, 2)
            .render_all(units(6))
            .await
            .expect_err("must fail");
        assert!(matches!(err, FatalRenderError::Rejected { status: 400, .. }));
    }

    #[tokio::test]
    async fn empty_input_renders_nothing() {
        let renderer = Arc::new(SlowEcho::new(None));
        let fragments = pool(renderer, 5).render_all(Vec::new()).await.expect("ok");
        assert!(fragments.is_empty());
    }
}
