//! Concatenates ordered PDF fragments into one document.

use std::{io::Write, path::PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use super::{
    error::MergeError,
    pdf::{Document, DocumentBuilder},
    pool::RenderedFragment,
};

const FRAGMENT_PREFIX: &str = "report-press-fragment-";

/// Stages each fragment in a temporary file before appending it, so raw
/// fragment bytes can be released as soon as they are on disk.
#[derive(Debug, Clone, Default)]
pub struct Merger {
    scratch_dir: Option<PathBuf>,
}

impl Merger {
    pub fn new(scratch_dir: Option<PathBuf>) -> Self {
        Self { scratch_dir }
    }

    /// Merge fragments in ascending `order_id`. Every temporary artifact is
    /// removed before this returns, on success and on failure.
    pub fn merge(&self, mut fragments: Vec<RenderedFragment>) -> Result<Document, MergeError> {
        fragments.sort_by_key(|fragment| fragment.order_id);

        let mut staged = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            let mut file = self.stage_file()?;
            file.write_all(&fragment.bytes)?;
            file.flush()?;
            staged.push((fragment.order_id, file));
        }

        let mut builder = DocumentBuilder::new();
        for (order_id, file) in &staged {
            let document = Document::open(file.path())?;
            let added = builder.append(document)?;
            debug!(
                target = "report_press::render::merge",
                order_id,
                pages = added,
                "fragment appended"
            );
        }

        for (_, file) in staged {
            file.close()?;
        }
        Ok(builder.finish())
    }

    fn stage_file(&self) -> Result<NamedTempFile, MergeError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(FRAGMENT_PREFIX).suffix(".pdf");
        let file = match self.scratch_dir.as_deref() {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        Ok(file)
    }
}
