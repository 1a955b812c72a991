//! Caller-supplied Jinja templates, compiled at request time.
//!
//! Templates run in an environment with no loader, HTML autoescaping and a
//! fuel limit. Footers still come from the stored templates.

use std::sync::Arc;

use minijinja::{AutoEscape, Environment, Error, ErrorKind, Value};
use serde_json::json;
use time::{
    Date, OffsetDateTime, PrimitiveDateTime, format_description::well_known::Rfc3339,
    macros::format_description,
};

use crate::domain::report::{ReportKind, ReportVariables};

use super::{
    chunk::{ChunkMode, ChunkPosition},
    error::TemplateError,
    templates::{FooterPage, ReportTemplates},
};

const TEMPLATE_NAME: &str = "inline.html";
const CHUNK_INFO_KEY: &str = "_chunk_info";
const RENDER_FUEL: u64 = 50_000_000;

pub struct InlineTemplates {
    env: Environment<'static>,
    stored: Arc<dyn ReportTemplates>,
}

impl InlineTemplates {
    /// Fails on syntax errors so a bad template is rejected before any
    /// conversion call is made.
    pub fn compile(source: &str, stored: Arc<dyn ReportTemplates>) -> Result<Self, TemplateError> {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_name: &str| AutoEscape::Html);
        env.set_fuel(Some(RENDER_FUEL));
        env.add_filter("format_datetime", format_datetime);
        env.add_template_owned(TEMPLATE_NAME, source.to_owned())
            .map_err(|err| TemplateError::new(TEMPLATE_NAME, err.to_string()))?;
        Ok(Self { env, stored })
    }
}

impl ReportTemplates for InlineTemplates {
    fn render_report(
        &self,
        _kind: &ReportKind,
        variables: &ReportVariables,
        chunk: Option<&ChunkPosition>,
    ) -> Result<String, TemplateError> {
        let mut context = variables.to_value();
        if let (Some(position), Some(tree)) = (chunk, context.as_object_mut()) {
            tree.insert(CHUNK_INFO_KEY.to_string(), chunk_info(position));
        }

        self.env
            .get_template(TEMPLATE_NAME)
            .and_then(|template| template.render(&context))
            .map_err(|err| TemplateError::new(TEMPLATE_NAME, err.to_string()))
    }

    fn render_footer(
        &self,
        kind: &ReportKind,
        variables: &ReportVariables,
        page: FooterPage,
    ) -> Result<String, TemplateError> {
        self.stored.render_footer(kind, variables, page)
    }

    fn footer_style(&self) -> &str {
        self.stored.footer_style()
    }
}

fn chunk_info(position: &ChunkPosition) -> serde_json::Value {
    let mode = match position.mode {
        ChunkMode::Content => "transactions",
        ChunkMode::Footer => "footer",
    };
    json!({
        "mode": mode,
        "invoice_index": position.group_index,
        "current_chunk": position.chunk_index,
        "slice_start": position.slice_start,
        "slice_end": position.slice_end,
        "invoice_chunks": position.total_chunks_in_group,
        "is_first_chunk": position.opens_document,
    })
}

/// `{{ value|format_datetime('full') }}`. Unknown formats fall back to `short`.
fn format_datetime(value: &str, format: Option<&str>) -> Result<Value, Error> {
    let moment = parse_datetime(value).ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot read `{value}` as a date"),
        )
    })?;

    let description = match format.unwrap_or("short") {
        "unix" => return Ok(Value::from(moment.unix_timestamp())),
        "full" => format_description!("[month]-[day]-[year] [hour repr:12]:[minute] [period]"),
        "month" => format_description!("[month repr:long]"),
        "yyyy-mm-dd" => format_description!("[year]-[month]-[day]"),
        "mmm dd,yyyy" => format_description!("[month repr:long] [day padding:space], [year]"),
        "detail" => format_description!(
            "[month repr:long] [day], [year] at [hour repr:12]:[minute] [period] Pacific Time"
        ),
        _ => format_description!("[month]-[day]-[year]"),
    };

    moment
        .format(description)
        .map(Value::from)
        .map_err(|err| Error::new(ErrorKind::InvalidOperation, err.to_string()))
}

/// RFC 3339 keeps its offset; timestamps without one are read as UTC.
fn parse_datetime(value: &str) -> Option<OffsetDateTime> {
    let value = value.trim();
    if let Ok(moment) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(moment);
    }

    let naive = [
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
        format_description!("[year]-[month]-[day]T[hour]:[minute]"),
    ];
    naive
        .into_iter()
        .find_map(|description| PrimitiveDateTime::parse(value, description).ok())
        .or_else(|| {
            Date::parse(value, format_description!("[year]-[month]-[day]"))
                .ok()
                .map(Date::midnight)
        })
        .map(PrimitiveDateTime::assume_utc)
}
