//! Stamps per-page footer documents onto the merged content document.

use std::collections::BTreeMap;

use metrics::counter;
use tracing::warn;

use super::{
    error::OverlayWarning,
    pdf::{Document, PageRef},
};

/// Outcome of a compose pass. Warnings never abort the report.
#[derive(Debug)]
pub struct Composed {
    pub document: Document,
    pub stamped: usize,
    pub warnings: Vec<OverlayWarning>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FooterComposer;

impl FooterComposer {
    /// Overlay `footers[i]` onto page `i` (zero based). Pages without a
    /// usable footer are emitted unchanged; page count and order are kept.
    pub fn compose(&self, mut main: Document, footers: &BTreeMap<usize, Vec<u8>>) -> Composed {
        let mut stamped = 0;
        let mut warnings = Vec::new();

        for target in main.pages() {
            let page = target.number;
            let outcome = match footers.get(&(page - 1)) {
                None => Err(OverlayWarning::MissingFooter { page }),
                Some(bytes) => stamp(&mut main, target, bytes),
            };

            match outcome {
                Ok(()) => stamped += 1,
                Err(warning) => {
                    counter!("report_press_overlay_warnings_total").increment(1);
                    warn!(
                        target = "report_press::render::compose",
                        page,
                        warning = %warning,
                        "footer skipped"
                    );
                    warnings.push(warning);
                }
            }
        }

        Composed {
            document: main,
            stamped,
            warnings,
        }
    }
}

fn stamp(main: &mut Document, target: PageRef, footer: &[u8]) -> Result<(), OverlayWarning> {
    let page = target.number;
    let footer = Document::from_bytes(footer).map_err(|err| OverlayWarning::UnreadableFooter {
        page,
        reason: err.to_string(),
    })?;
    if footer.page_count() == 0 {
        return Err(OverlayWarning::EmptyFooter { page });
    }
    main.overlay_page(target, &footer)
        .map_err(|reason| OverlayWarning::Overlay { page, reason })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::render::pdf::fixtures::{labelled_pdf, labels};

    fn content(doc: &Document, index: usize) -> String {
        String::from_utf8_lossy(&doc.page_content(index).expect("page")).into_owned()
    }

    #[test]
    fn missing_footer_leaves_page_unstamped() {
        let main = Document::from_bytes(&labelled_pdf(&labels("body", 10))).expect("main");
        let footers: BTreeMap<usize, Vec<u8>> = (0..10)
            .filter(|index| *index != 4)
            .map(|index| (index, labelled_pdf(&[format!("footer-{}", index + 1)])))
            .collect();

        let composed = FooterComposer.compose(main, &footers);

        assert_eq!(composed.document.page_count(), 10);
        assert_eq!(composed.stamped, 9);
        assert!(matches!(
            composed.warnings.as_slice(),
            [OverlayWarning::MissingFooter { page: 5 }]
        ));
        assert!(!content(&composed.document, 4).contains(" Do"));
        assert!(content(&composed.document, 4).contains("body-5"));
        assert!(content(&composed.document, 0).contains("/RpFooter1 Do"));
    }

    #[test]
    fn unreadable_footer_is_a_warning() {
        let main = Document::from_bytes(&labelled_pdf(&labels("body", 2))).expect("main");
        let mut footers = BTreeMap::new();
        footers.insert(0, b"garbage".to_vec());
        footers.insert(1, labelled_pdf(&labels("footer", 1)));

        let composed = FooterComposer.compose(main, &footers);

        assert_eq!(composed.stamped, 1);
        assert!(matches!(
            composed.warnings.as_slice(),
            [OverlayWarning::UnreadableFooter { page: 1, .. }]
        ));
    }
}
