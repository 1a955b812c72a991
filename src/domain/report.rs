//! Structured form of a report creation request.
//!
//! Callers hand over a loosely-typed variable tree. It is parsed once at the
//! boundary into [`ReportVariables`]; the rendering pipeline never looks at the
//! raw JSON again.

use std::{fmt, num::NonZeroUsize};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::{Map, Value};

use super::error::DomainError;

pub const GROUPED_INVOICES_KEY: &str = "groupedInvoices";
pub const TRANSACTIONS_KEY: &str = "transactions";
/// Top-level field naming the report; caller templates are routed by it.
pub const REPORT_NAME_KEY: &str = "reportName";
/// Kind given to caller templates that carry no `reportName`.
pub const INLINE_TEMPLATE_KIND: &str = "inline_template";

/// Keys injected by the pipeline while rendering chunks and footers.
pub const RESERVED_KEYS: &[&str] = &[
    "_chunk_info",
    "current_page",
    "total_pages",
    "current_template",
];

/// Identifier of the template a report is rendered with, e.g. `statement_report`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReportKind(String);

impl ReportKind {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("report kind must not be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Kinds are grouped by family name, so `statement_report_v2` belongs to
    /// the `statement_report` family.
    pub fn belongs_to(&self, family: &str) -> bool {
        !family.is_empty() && self.0.contains(family)
    }

    pub fn belongs_to_any<S: AsRef<str>>(&self, families: &[S]) -> bool {
        families.iter().any(|family| self.belongs_to(family.as_ref()))
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One group of records (an invoice) together with its own header fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InvoiceGroup {
    pub fields: Map<String, Value>,
    pub transactions: Vec<Value>,
}

impl InvoiceGroup {
    fn from_value(index: usize, value: Value) -> Result<Self, DomainError> {
        let Value::Object(mut fields) = value else {
            return Err(DomainError::validation(format!(
                "{GROUPED_INVOICES_KEY}[{index}] must be an object"
            )));
        };

        let transactions = match fields.remove(TRANSACTIONS_KEY) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(rows)) => rows,
            Some(_) => {
                return Err(DomainError::validation(format!(
                    "{GROUPED_INVOICES_KEY}[{index}].{TRANSACTIONS_KEY} must be an array"
                )));
            }
        };

        Ok(Self {
            fields,
            transactions,
        })
    }

    /// Copy of this group carrying only `rows` as its records.
    pub fn with_transactions(&self, rows: &[Value]) -> Self {
        Self {
            fields: self.fields.clone(),
            transactions: rows.to_vec(),
        }
    }
}

/// Parsed template variables.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReportVariables {
    /// Top-level fields other than the grouped records.
    pub fields: Map<String, Value>,
    pub grouped_invoices: Vec<InvoiceGroup>,
}

impl ReportVariables {
    pub fn from_value(value: Value) -> Result<Self, DomainError> {
        let mut fields = match value {
            Value::Object(fields) => fields,
            Value::Null => Map::new(),
            _ => {
                return Err(DomainError::validation(
                    "template variables must be a JSON object",
                ));
            }
        };

        if let Some(key) = RESERVED_KEYS.iter().find(|key| fields.contains_key(**key)) {
            return Err(DomainError::reserved_key(*key));
        }

        let grouped_invoices = match fields.remove(GROUPED_INVOICES_KEY) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(groups)) => groups
                .into_iter()
                .enumerate()
                .map(|(index, group)| InvoiceGroup::from_value(index, group))
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => {
                return Err(DomainError::validation(format!(
                    "{GROUPED_INVOICES_KEY} must be an array"
                )));
            }
        };

        Ok(Self {
            fields,
            grouped_invoices,
        })
    }

    pub fn has_grouped_records(&self) -> bool {
        !self.grouped_invoices.is_empty()
    }

    /// Rebuild the JSON tree handed to runtime templates.
    pub fn to_value(&self) -> Value {
        let mut tree = self.fields.clone();
        if !self.grouped_invoices.is_empty() {
            let groups = self
                .grouped_invoices
                .iter()
                .map(|group| {
                    let mut fields = group.fields.clone();
                    fields.insert(
                        TRANSACTIONS_KEY.to_string(),
                        Value::Array(group.transactions.clone()),
                    );
                    Value::Object(fields)
                })
                .collect();
            tree.insert(GROUPED_INVOICES_KEY.to_string(), Value::Array(groups));
        }
        Value::Object(tree)
    }

    fn report_name(&self) -> Option<&str> {
        match self.fields.get(REPORT_NAME_KEY) {
            Some(Value::String(name)) if !name.trim().is_empty() => Some(name),
            _ => None,
        }
    }

    /// Variables scoped to a single group, as rendered by one chunk.
    pub fn scoped_to(&self, group: InvoiceGroup) -> Self {
        Self {
            fields: self.fields.clone(),
            grouped_invoices: vec![group],
        }
    }
}

/// Where the report's HTML template comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    /// Template shipped with the service, selected by the report kind.
    Stored,
    /// Jinja source supplied by the caller.
    Inline(String),
}

impl TemplateSource {
    /// Decode a base64 template as sent over the API.
    pub fn decode_inline(encoded: &str) -> Result<Self, DomainError> {
        let compact: String = encoded.split_ascii_whitespace().collect();
        let bytes = STANDARD
            .decode(compact.as_bytes())
            .map_err(|err| DomainError::validation(format!("template is not valid base64: {err}")))?;
        let source = String::from_utf8(bytes)
            .map_err(|_| DomainError::validation("template is not valid UTF-8"))?;
        Self::inline(source)
    }

    pub fn inline(source: String) -> Result<Self, DomainError> {
        if source.trim().is_empty() {
            return Err(DomainError::validation("template must not be empty"));
        }
        Ok(Self::Inline(source))
    }
}

/// A validated report creation request.
#[derive(Debug, Clone)]
pub struct ReportRequest {
    pub kind: ReportKind,
    pub variables: ReportVariables,
    pub template: TemplateSource,
    pub generate_page_numbers: bool,
    pub chunk_size: Option<NonZeroUsize>,
}

impl ReportRequest {
    pub fn parse(
        kind: impl Into<String>,
        variables: Value,
        generate_page_numbers: bool,
        chunk_size: Option<usize>,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            kind: ReportKind::new(kind)?,
            variables: ReportVariables::from_value(variables)?,
            template: TemplateSource::Stored,
            generate_page_numbers,
            chunk_size: non_zero_chunk_size(chunk_size)?,
        })
    }

    /// Request rendered with a caller template. The kind, and so the route,
    /// comes from the `reportName` variable.
    pub fn with_template(
        template: TemplateSource,
        variables: Value,
        generate_page_numbers: bool,
        chunk_size: Option<usize>,
    ) -> Result<Self, DomainError> {
        let variables = ReportVariables::from_value(variables)?;
        let kind = ReportKind::new(variables.report_name().unwrap_or(INLINE_TEMPLATE_KIND))?;
        Ok(Self {
            kind,
            variables,
            template,
            generate_page_numbers,
            chunk_size: non_zero_chunk_size(chunk_size)?,
        })
    }
}

fn non_zero_chunk_size(chunk_size: Option<usize>) -> Result<Option<NonZeroUsize>, DomainError> {
    chunk_size
        .map(|size| {
            NonZeroUsize::new(size)
                .ok_or_else(|| DomainError::validation("chunk size must be greater than zero"))
        })
        .transpose()
}
