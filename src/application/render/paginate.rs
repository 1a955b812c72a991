//! Footer pagination: plans batches of per-page footers and splits rendered
//! batches back into one PDF per page.
//!
//! Footers are rendered in batches because a single conversion call for every
//! page would be too large and one call per page far too slow. Each batch is
//! an HTML document with one page-sized block per printed page, so the
//! converted batch must come back with exactly one page per block.

use std::{num::NonZeroUsize, ops::RangeInclusive};

use crate::domain::report::{ReportKind, ReportVariables};

use super::{
    chunk::{ChunkMode, ChunkPosition, RenderUnit},
    error::{MergeError, TemplateError},
    pdf::Document,
    templates::{FooterPage, ReportTemplates},
};

pub const DEFAULT_FOOTER_BATCH_SIZE: usize = 200;

/// A contiguous run of footers rendered in one conversion call.
/// Page numbers are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FooterBatch {
    pub batch_id: u32,
    pub page_range_start: usize,
    pub page_range_end: usize,
    pub html: String,
}

impl FooterBatch {
    pub fn page_count(&self) -> usize {
        self.page_range_end + 1 - self.page_range_start
    }

    /// Render unit for this batch; `order_id` is the batch id.
    pub fn into_unit(self) -> RenderUnit {
        let position = ChunkPosition {
            mode: ChunkMode::Footer,
            group_index: 1,
            chunk_index: self.batch_id as usize + 1,
            slice_start: self.page_range_start,
            slice_end: self.page_range_end,
            total_chunks_in_group: None,
            opens_document: self.batch_id == 0,
        };
        RenderUnit {
            order_id: u64::from(self.batch_id),
            html: self.html,
            position,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Paginator {
    batch_size: NonZeroUsize,
}

impl Default for Paginator {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_FOOTER_BATCH_SIZE).unwrap_or(NonZeroUsize::MIN))
    }
}

impl Paginator {
    pub fn new(batch_size: NonZeroUsize) -> Self {
        Self { batch_size }
    }

    /// Page ranges covering `1..=total_pages` exactly once, in order.
    pub fn ranges(&self, total_pages: usize) -> Vec<RangeInclusive<usize>> {
        let size = self.batch_size.get();
        (0..total_pages.div_ceil(size))
            .map(|batch| {
                let start = batch * size + 1;
                let end = ((batch + 1) * size).min(total_pages);
                start..=end
            })
            .collect()
    }

    pub fn plan(
        &self,
        templates: &dyn ReportTemplates,
        kind: &ReportKind,
        variables: &ReportVariables,
        total_pages: usize,
    ) -> Result<Vec<FooterBatch>, TemplateError> {
        let mut batches = Vec::new();
        for (range, batch_id) in self.ranges(total_pages).into_iter().zip(0_u32..) {
            let mut html = String::from("<!DOCTYPE html><html><head>");
            html.push_str(templates.footer_style());
            html.push_str("</head><body>");
            for current in range.clone() {
                let footer = templates.render_footer(
                    kind,
                    variables,
                    FooterPage {
                        current,
                        total: total_pages,
                    },
                )?;
                html.push_str(&format!(
                    r#"<div class="footer-page" id="footer-page-{current}"><div class="footer-anchor">{footer}</div></div>"#
                ));
            }
            html.push_str("</body></html>");

            batches.push(FooterBatch {
                batch_id,
                page_range_start: *range.start(),
                page_range_end: *range.end(),
                html,
            });
        }
        Ok(batches)
    }

    /// Split a rendered batch into single-page documents. A page count that
    /// does not match the batch range is fatal.
    pub fn split(
        &self,
        batch_id: u32,
        batch_pdf: &[u8],
        expected_pages: usize,
    ) -> Result<Vec<Vec<u8>>, MergeError> {
        let document = Document::from_bytes(batch_pdf)?;
        let actual = document.page_count();
        if actual != expected_pages {
            return Err(MergeError::PageCountMismatch {
                batch_id,
                expected: expected_pages,
                actual,
            });
        }
        document.split_pages()
    }
}
