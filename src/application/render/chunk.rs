//! Splits grouped records into bounded render units.

use std::num::NonZeroUsize;

use crate::domain::report::{InvoiceGroup, ReportKind, ReportVariables};

use super::{error::TemplateError, templates::ReportTemplates};

/// Records per render unit unless the caller overrides it. Large enough to
/// amortise per-call overhead, small enough to keep a single conversion fast.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMode {
    Content,
    Footer,
}

impl ChunkMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkMode::Content => "content",
            ChunkMode::Footer => "footer",
        }
    }
}

/// Where a render unit sits in the input. Descriptive only: reassembly is
/// driven by `order_id`, never by these fields.
///
/// Indices and slice bounds are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPosition {
    pub mode: ChunkMode,
    pub group_index: usize,
    pub chunk_index: usize,
    pub slice_start: usize,
    pub slice_end: usize,
    pub total_chunks_in_group: Option<usize>,
    /// Set on the first unit of the document, which carries the report summary.
    pub opens_document: bool,
}

impl ChunkPosition {
    pub fn len(&self) -> usize {
        self.slice_end + 1 - self.slice_start
    }

    pub fn is_empty(&self) -> bool {
        self.slice_end < self.slice_start
    }
}

/// One HTML document to convert.
#[derive(Debug, Clone)]
pub struct RenderUnit {
    pub order_id: u64,
    pub html: String,
    pub position: ChunkPosition,
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkPlanner {
    chunk_size: NonZeroUsize,
}

impl Default for ChunkPlanner {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroUsize::MIN))
    }
}

impl ChunkPlanner {
    pub fn new(chunk_size: NonZeroUsize) -> Self {
        Self { chunk_size }
    }

    pub fn chunk_size(&self) -> NonZeroUsize {
        self.chunk_size
    }

    /// Slice positions in group-then-slice order. Empty groups contribute
    /// nothing, so the unit opening the document may belong to any group.
    pub fn positions(&self, groups: &[InvoiceGroup]) -> Vec<ChunkPosition> {
        let size = self.chunk_size.get();
        let mut positions = Vec::new();

        for (group_offset, group) in groups.iter().enumerate() {
            let records = group.transactions.len();
            if records == 0 {
                continue;
            }
            let total_chunks = records.div_ceil(size);
            let mut start = 0;
            while start < records {
                let end = (start + size).min(records);
                positions.push(ChunkPosition {
                    mode: ChunkMode::Content,
                    group_index: group_offset + 1,
                    chunk_index: start / size + 1,
                    slice_start: start + 1,
                    slice_end: end,
                    total_chunks_in_group: Some(total_chunks),
                    opens_document: positions.is_empty(),
                });
                start = end;
            }
        }

        positions
    }

    /// Render every slice to HTML and assign strictly increasing order ids.
    pub fn plan(
        &self,
        templates: &dyn ReportTemplates,
        kind: &ReportKind,
        variables: &ReportVariables,
    ) -> Result<Vec<RenderUnit>, TemplateError> {
        self.positions(&variables.grouped_invoices)
            .into_iter()
            .zip(0_u64..)
            .map(|(position, order_id)| {
                let group = &variables.grouped_invoices[position.group_index - 1];
                let rows = &group.transactions[position.slice_start - 1..position.slice_end];
                let scoped = variables.scoped_to(group.with_transactions(rows));
                let html = templates.render_report(kind, &scoped, Some(&position))?;
                Ok(RenderUnit {
                    order_id,
                    html,
                    position,
                })
            })
            .collect()
    }
}
