#![allow(dead_code)]

use std::num::NonZeroUsize;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lopdf::{Document as LoDocument, Object, Stream, dictionary};
use report_press::application::render::{
    AskamaTemplates, FatalRenderError, PdfRenderer, PipelineSettings, ReportPipeline,
    TemplateContext,
};

/// Stands in for the conversion service: every `<tr class="txn">` row (or
/// footer block) becomes one page labelled with the row's first cell (or the
/// footer's page number).
#[derive(Default)]
pub struct FakeRenderer {
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub peak: AtomicUsize,
    fail_on_label: Option<String>,
    short_footers: bool,
    pub documents: Mutex<Vec<String>>,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(label: &str) -> Self {
        Self {
            fail_on_label: Some(label.to_string()),
            ..Self::default()
        }
    }

    pub fn with_short_footers() -> Self {
        Self {
            short_footers: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl PdfRenderer for FakeRenderer {
    async fn render(&self, html: &str) -> Result<Bytes, FatalRenderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Ok(mut documents) = self.documents.lock() {
            documents.push(html.to_string());
        }

        let is_footer = html.contains(r#"class="footer-page""#);
        let mut labels = if is_footer {
            footer_labels(html)
        } else {
            row_labels(html)
        };
        if labels.is_empty() {
            labels.push("document".to_string());
        }
        if is_footer && self.short_footers {
            labels.pop();
        }

        // Scramble completion order across concurrent calls.
        let delay = (call * 7 + labels.len() * 3) % 17;
        tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(fail) = self.fail_on_label.as_deref() {
            if labels.iter().any(|label| label == fail) {
                return Err(FatalRenderError::Rejected {
                    status: 500,
                    body: format!("cannot render {fail}"),
                });
            }
        }
        Ok(Bytes::from(labelled_pdf(&labels)))
    }
}

fn row_labels(html: &str) -> Vec<String> {
    const ROW: &str = r#"<tr class="txn"><td>"#;
    html.match_indices(ROW)
        .filter_map(|(start, _)| {
            let rest = &html[start + ROW.len()..];
            rest.find("</td>").map(|end| rest[..end].to_string())
        })
        .collect()
}

fn footer_labels(html: &str) -> Vec<String> {
    const BLOCK: &str = r#"id="footer-page-"#;
    html.match_indices(BLOCK)
        .filter_map(|(start, _)| {
            let rest = &html[start + BLOCK.len()..];
            rest.find('"')
                .map(|end| format!("footer-{}", &rest[..end]))
        })
        .collect()
}

/// Build a PDF with one page per label; each page shows its label.
pub fn labelled_pdf(labels: &[String]) -> Vec<u8> {
    let mut doc = LoDocument::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let mut kids = Vec::with_capacity(labels.len());
    for label in labels {
        let content = format!("BT /F1 12 Tf 72 720 Td ({label}) Tj ET");
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(595),
                Object::Integer(842),
            ],
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).expect("save fixture pdf");
    out
}

/// Decoded content stream of every page, in page order.
pub fn page_texts(pdf: &[u8]) -> Vec<String> {
    let doc = LoDocument::load_mem(pdf).expect("load output pdf");
    doc.get_pages()
        .into_values()
        .map(|page_id| {
            String::from_utf8_lossy(&doc.get_page_content(page_id).expect("page content"))
                .into_owned()
        })
        .collect()
}

/// Content of the footer form drawn on each page, `None` when unstamped.
pub fn footer_texts(pdf: &[u8]) -> Vec<Option<String>> {
    let doc = LoDocument::load_mem(pdf).expect("load output pdf");
    doc.get_pages()
        .into_values()
        .enumerate()
        .map(|(index, page_id)| {
            let name = format!("RpFooter{}", index + 1);
            let page = doc.get_dictionary(page_id).ok()?;
            let resources = doc.dereference(page.get(b"Resources").ok()?).ok()?.1;
            let xobjects = doc
                .dereference(resources.as_dict().ok()?.get(b"XObject").ok()?)
                .ok()?
                .1;
            let form_id = xobjects
                .as_dict()
                .ok()?
                .get(name.as_bytes())
                .ok()?
                .as_reference()
                .ok()?;
            let stream = doc.get_object(form_id).ok()?.as_stream().ok()?;
            let content = stream
                .decompressed_content()
                .unwrap_or_else(|_| stream.content.clone());
            Some(String::from_utf8_lossy(&content).into_owned())
        })
        .collect()
}

pub fn settings(chunk_size: usize, footer_batch_size: usize, concurrency: usize) -> PipelineSettings {
    let non_zero = |value: usize| NonZeroUsize::new(value).expect("non-zero");
    PipelineSettings {
        chunk_size: non_zero(chunk_size),
        footer_batch_size: non_zero(footer_batch_size),
        concurrency: non_zero(concurrency),
        ..PipelineSettings::default()
    }
}

pub fn pipeline(renderer: Arc<FakeRenderer>, settings: PipelineSettings) -> ReportPipeline {
    let templates = AskamaTemplates::new(
        TemplateContext::from_static_base("/static"),
        settings.statement_kind.clone(),
    );
    ReportPipeline::new(Arc::new(templates), renderer, settings)
}

/// Statement variables with one group per entry in `records`; rows are
/// labelled `g{group}-r{row}`.
pub fn statement_vars(records: &[usize]) -> serde_json::Value {
    let groups: Vec<serde_json::Value> = records
        .iter()
        .enumerate()
        .map(|(group, count)| {
            let transactions: Vec<serde_json::Value> = (1..=*count)
                .map(|row| serde_json::json!({ "label": format!("g{}-r{}", group + 1, row) }))
                .collect();
            serde_json::json!({
                "invoiceNumber": format!("INV-{}", group + 1),
                "transactions": transactions,
            })
        })
        .collect();
    serde_json::json!({
        "reportName": "Statement",
        "accountNumber": "A-100",
        "groupedInvoices": groups,
    })
}
