use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the report-press binary.
#[derive(Debug, Parser)]
#[command(
    name = "report-press",
    version,
    about = "Chunked, parallel PDF report renderer"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "REPORT_PRESS_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the report HTTP service.
    Serve(Box<ServeArgs>),
    /// Render a single report to a file and exit.
    Render(Box<RenderArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RendererOverrides {
    /// Override the base URL of the HTML-to-PDF service.
    #[arg(long = "renderer-url", value_name = "URL")]
    pub renderer_url: Option<String>,

    /// Override the per-call conversion timeout.
    #[arg(long = "renderer-timeout-seconds", value_name = "SECONDS")]
    pub renderer_timeout_seconds: Option<u64>,

    /// Override how many times a transient conversion failure is retried.
    #[arg(long = "renderer-max-retries", value_name = "COUNT")]
    pub renderer_max_retries: Option<u32>,

    /// Override the number of conversions in flight per report.
    #[arg(long = "renderer-concurrency", value_name = "COUNT")]
    pub renderer_concurrency: Option<usize>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct PipelineOverrides {
    /// Override the default number of records per render unit.
    #[arg(long = "pipeline-chunk-size", value_name = "COUNT")]
    pub pipeline_chunk_size: Option<usize>,

    /// Override the number of footers rendered per conversion call.
    #[arg(long = "pipeline-footer-batch-size", value_name = "COUNT")]
    pub pipeline_footer_batch_size: Option<usize>,

    /// Override the directory used for temporary fragment files.
    #[arg(long = "pipeline-scratch-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub pipeline_scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(flatten)]
    pub renderer: RendererOverrides,

    #[command(flatten)]
    pub pipeline: PipelineOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the maximum accepted request body size in bytes.
    #[arg(long = "server-max-request-bytes", value_name = "BYTES")]
    pub server_max_request_bytes: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    #[command(flatten)]
    pub renderer: RendererOverrides,

    #[command(flatten)]
    pub pipeline: PipelineOverrides,

    /// Report kind (template name), e.g. `statement_report`.
    #[arg(
        long = "template",
        value_name = "KIND",
        required_unless_present = "template_file",
        conflicts_with = "template_file"
    )]
    pub template: Option<String>,

    /// Jinja template to render instead of a stored one; routed by `reportName`.
    #[arg(long = "template-file", value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub template_file: Option<PathBuf>,

    /// JSON file holding the template variables.
    #[arg(long = "vars", value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub vars: PathBuf,

    /// Where to write the rendered PDF.
    #[arg(long = "output", value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub output: PathBuf,

    /// Stamp "page N of M" footers onto every page.
    #[arg(long = "page-numbers", action = clap::ArgAction::SetTrue)]
    pub page_numbers: bool,

    /// Records per render unit for this report only.
    #[arg(long = "chunk-size", value_name = "COUNT")]
    pub chunk_size: Option<usize>,
}
