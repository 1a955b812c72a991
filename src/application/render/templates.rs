//! Rendering context: turns report variables into HTML.
//!
//! The context is built once at startup and shared read-only by every
//! pipeline invocation.

use askama::Template;
use serde_json::{Map, Value};

use crate::domain::report::{ReportKind, ReportVariables};

use super::{chunk::ChunkPosition, error::TemplateError};

const TITLE_KEY: &str = "reportName";
const LOGO_PATH: &str = "images/bcgov-logo-vert.jpg";
const REGISTRIES_LOGO_PATH: &str = "images/reg_logo.png";

/// Styles for footer batches: one footer block per printed page, anchored to
/// the bottom margin so it lands where the content pages leave room.
const FOOTER_OVERLAY_STYLE: &str = r#"<style>
@page { margin: 0; }
html, body { margin: 0; padding: 0; }
.footer-page { position: relative; height: 100vh; page-break-after: always; break-after: page; }
.footer-page:last-child { page-break-after: auto; break-after: auto; }
.footer-anchor { position: absolute; left: 14mm; right: 14mm; bottom: 8mm; font-family: "Helvetica Neue", Arial, sans-serif; font-size: 8pt; }
.footer-content { display: flex; justify-content: space-between; }
</style>"#;

/// Page coordinates handed to the footer template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FooterPage {
    pub current: usize,
    pub total: usize,
}

/// Template id + variables → HTML. Implementations must be pure.
pub trait ReportTemplates: Send + Sync {
    fn render_report(
        &self,
        kind: &ReportKind,
        variables: &ReportVariables,
        chunk: Option<&ChunkPosition>,
    ) -> Result<String, TemplateError>;

    fn render_footer(
        &self,
        kind: &ReportKind,
        variables: &ReportVariables,
        page: FooterPage,
    ) -> Result<String, TemplateError>;

    /// `<style>` block placed in the head of every footer batch.
    fn footer_style(&self) -> &str;
}

/// Values every template may reference regardless of report kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateContext {
    pub logo_url: String,
    pub registries_logo_url: String,
}

impl TemplateContext {
    pub fn from_static_base(static_base_url: &str) -> Self {
        let base = static_base_url.trim_end_matches('/');
        Self {
            logo_url: format!("{base}/{LOGO_PATH}"),
            registries_logo_url: format!("{base}/{REGISTRIES_LOGO_PATH}"),
        }
    }
}

/// Compile-time templates shipped with the service.
#[derive(Debug, Clone)]
pub struct AskamaTemplates {
    context: TemplateContext,
    statement_kind: String,
}

impl AskamaTemplates {
    pub fn new(context: TemplateContext, statement_kind: impl Into<String>) -> Self {
        Self {
            context,
            statement_kind: statement_kind.into(),
        }
    }
}

impl ReportTemplates for AskamaTemplates {
    fn render_report(
        &self,
        kind: &ReportKind,
        variables: &ReportVariables,
        chunk: Option<&ChunkPosition>,
    ) -> Result<String, TemplateError> {
        let title = title_of(kind, variables);
        let fields = fields_of(&variables.fields);
        let invoices: Vec<InvoiceView> = variables
            .grouped_invoices
            .iter()
            .map(|group| InvoiceView::new(&group.fields, &group.transactions))
            .collect();

        let rendered = if kind.belongs_to(&self.statement_kind) {
            StatementTemplate {
                context: &self.context,
                title: &title,
                fields,
                invoices,
                position: PositionView::from(chunk),
            }
            .render()
        } else {
            GenericTemplate {
                context: &self.context,
                kind: kind.as_str(),
                title: &title,
                fields,
                invoices,
            }
            .render()
        };

        rendered.map_err(|err| TemplateError::new(kind.as_str(), err.to_string()))
    }

    fn render_footer(
        &self,
        kind: &ReportKind,
        variables: &ReportVariables,
        page: FooterPage,
    ) -> Result<String, TemplateError> {
        FooterTemplate {
            kind: kind.as_str(),
            title: &title_of(kind, variables),
            current_page: page.current,
            total_pages: page.total,
        }
        .render()
        .map_err(|err| TemplateError::new("statement_footer", err.to_string()))
    }

    fn footer_style(&self) -> &str {
        FOOTER_OVERLAY_STYLE
    }
}

#[derive(Template)]
#[template(path = "statement_report.html")]
struct StatementTemplate<'a> {
    context: &'a TemplateContext,
    title: &'a str,
    fields: Vec<FieldView>,
    invoices: Vec<InvoiceView>,
    position: PositionView,
}

#[derive(Template)]
#[template(path = "report.html")]
struct GenericTemplate<'a> {
    context: &'a TemplateContext,
    kind: &'a str,
    title: &'a str,
    fields: Vec<FieldView>,
    invoices: Vec<InvoiceView>,
}

#[derive(Template)]
#[template(path = "statement_footer.html")]
struct FooterTemplate<'a> {
    kind: &'a str,
    title: &'a str,
    current_page: usize,
    total_pages: usize,
}

struct FieldView {
    label: String,
    value: String,
}

struct InvoiceView {
    fields: Vec<FieldView>,
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl InvoiceView {
    fn new(fields: &Map<String, Value>, transactions: &[Value]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in transactions {
            if let Value::Object(cells) = row {
                for key in cells.keys() {
                    if !columns.contains(key) {
                        columns.push(key.clone());
                    }
                }
            }
        }

        let rows = transactions
            .iter()
            .map(|row| match row {
                Value::Object(cells) => columns
                    .iter()
                    .map(|column| cells.get(column).map(display_value).unwrap_or_default())
                    .collect(),
                scalar => vec![display_value(scalar)],
            })
            .collect();

        Self {
            fields: fields_of(fields),
            columns,
            rows,
        }
    }
}

struct PositionView {
    mode: &'static str,
    group: usize,
    chunk: usize,
    slice_start: usize,
    slice_end: usize,
    total_chunks: String,
    is_first_chunk: bool,
}

impl From<Option<&ChunkPosition>> for PositionView {
    fn from(position: Option<&ChunkPosition>) -> Self {
        match position {
            Some(position) => Self {
                mode: position.mode.as_str(),
                group: position.group_index,
                chunk: position.chunk_index,
                slice_start: position.slice_start,
                slice_end: position.slice_end,
                total_chunks: position
                    .total_chunks_in_group
                    .map(|total| total.to_string())
                    .unwrap_or_default(),
                is_first_chunk: position.opens_document,
            },
            None => Self {
                mode: "document",
                group: 0,
                chunk: 0,
                slice_start: 0,
                slice_end: 0,
                total_chunks: String::new(),
                is_first_chunk: true,
            },
        }
    }
}

fn title_of(kind: &ReportKind, variables: &ReportVariables) -> String {
    match variables.fields.get(TITLE_KEY) {
        Some(Value::String(title)) if !title.trim().is_empty() => title.clone(),
        _ => kind.as_str().to_string(),
    }
}

fn fields_of(fields: &Map<String, Value>) -> Vec<FieldView> {
    fields
        .iter()
        .filter(|(key, _)| key.as_str() != TITLE_KEY)
        .map(|(key, value)| FieldView {
            label: key.clone(),
            value: display_value(value),
        })
        .collect()
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
