use serde::Deserialize;
use serde_json::Value;

/// Body of `POST /api/v1/reports`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReportBody {
    /// Stored template to render. Ignored when `template` is present.
    #[serde(default)]
    pub template_name: Option<String>,
    /// Base64 Jinja source; the report is then routed by `templateVars.reportName`.
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub template_vars: Value,
    #[serde(default)]
    pub generate_page_number: bool,
    #[serde(default)]
    pub chunk_size: Option<usize>,
}
