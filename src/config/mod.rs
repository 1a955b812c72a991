//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

pub use cli::*;

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "report-press";
const ENV_PREFIX: &str = "REPORT_PRESS";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3002;
const DEFAULT_MAX_REQUEST_BYTES: u64 = 64 * 1024 * 1024;
const DEFAULT_RENDERER_URL: &str = "http://localhost:3000";
const DEFAULT_RENDERER_TIMEOUT_SECS: u64 = 500;
const DEFAULT_RENDERER_MAX_RETRIES: u32 = 3;
const DEFAULT_RENDERER_BACKOFF_BASE_MS: u64 = 500;
const DEFAULT_RENDERER_CONCURRENCY: usize = 5;
const DEFAULT_CHUNK_SIZE: usize = 500;
const DEFAULT_FOOTER_BATCH_SIZE: usize = 200;
const DEFAULT_STATEMENT_KIND: &str = "statement_report";
const DEFAULT_NUMBERED_KINDS: &[&str] = &["routing_slip_report", "payment_receipt"];
const DEFAULT_STATIC_BASE_URL: &str = "/static";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub renderer: RendererSettings,
    pub pipeline: PipelineSettings,
    pub templates: TemplateSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub max_request_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub concurrency: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub chunk_size: NonZeroUsize,
    pub footer_batch_size: NonZeroUsize,
    pub statement_kind: String,
    pub numbered_kinds: Vec<String>,
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct TemplateSettings {
    pub static_base_url: String,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("pipeline.numbered_kinds")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Render(args)) => raw.apply_render_overrides(args),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    renderer: RawRendererSettings,
    pipeline: RawPipelineSettings,
    templates: RawTemplateSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(limit) = overrides.server_max_request_bytes {
            self.server.max_request_bytes = Some(limit);
        }

        self.apply_logging_overrides(&overrides.logging);
        self.apply_renderer_overrides(&overrides.renderer);
        self.apply_pipeline_overrides(&overrides.pipeline);
    }

    fn apply_render_overrides(&mut self, args: &RenderArgs) {
        self.apply_logging_overrides(&args.logging);
        self.apply_renderer_overrides(&args.renderer);
        self.apply_pipeline_overrides(&args.pipeline);
    }

    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_renderer_overrides(&mut self, overrides: &RendererOverrides) {
        if let Some(url) = overrides.renderer_url.as_ref() {
            self.renderer.url = Some(url.clone());
        }
        if let Some(seconds) = overrides.renderer_timeout_seconds {
            self.renderer.timeout_seconds = Some(seconds);
        }
        if let Some(retries) = overrides.renderer_max_retries {
            self.renderer.max_retries = Some(retries);
        }
        if let Some(concurrency) = overrides.renderer_concurrency {
            self.renderer.concurrency = Some(concurrency);
        }
    }

    fn apply_pipeline_overrides(&mut self, overrides: &PipelineOverrides) {
        if let Some(size) = overrides.pipeline_chunk_size {
            self.pipeline.chunk_size = Some(size);
        }
        if let Some(size) = overrides.pipeline_footer_batch_size {
            self.pipeline.footer_batch_size = Some(size);
        }
        if let Some(dir) = overrides.pipeline_scratch_dir.as_ref() {
            self.pipeline.scratch_dir = Some(dir.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            renderer,
            pipeline,
            templates,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            renderer: build_renderer_settings(renderer)?,
            pipeline: build_pipeline_settings(pipeline)?,
            templates: build_template_settings(templates),
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let max_request_bytes = server
        .max_request_bytes
        .unwrap_or(DEFAULT_MAX_REQUEST_BYTES);
    if max_request_bytes == 0 {
        return Err(LoadError::invalid(
            "server.max_request_bytes",
            "must be greater than zero",
        ));
    }
    let max_request_bytes = usize::try_from(max_request_bytes).map_err(|_| {
        LoadError::invalid(
            "server.max_request_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(ServerSettings {
        addr,
        max_request_bytes,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_renderer_settings(renderer: RawRendererSettings) -> Result<RendererSettings, LoadError> {
    let url = renderer
        .url
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_RENDERER_URL.to_string());
    if url.is_empty() {
        return Err(LoadError::invalid("renderer.url", "url must not be empty"));
    }

    let timeout_secs = non_zero_u32(
        renderer
            .timeout_seconds
            .unwrap_or(DEFAULT_RENDERER_TIMEOUT_SECS),
        "renderer.timeout_seconds",
    )?;
    let backoff_ms = renderer
        .backoff_base_ms
        .unwrap_or(DEFAULT_RENDERER_BACKOFF_BASE_MS);
    if backoff_ms == 0 {
        return Err(LoadError::invalid(
            "renderer.backoff_base_ms",
            "must be greater than zero",
        ));
    }

    Ok(RendererSettings {
        url,
        timeout: Duration::from_secs(timeout_secs.get().into()),
        max_retries: renderer
            .max_retries
            .unwrap_or(DEFAULT_RENDERER_MAX_RETRIES),
        backoff_base: Duration::from_millis(backoff_ms),
        concurrency: non_zero_usize(
            renderer
                .concurrency
                .unwrap_or(DEFAULT_RENDERER_CONCURRENCY),
            "renderer.concurrency",
        )?,
    })
}

fn build_pipeline_settings(pipeline: RawPipelineSettings) -> Result<PipelineSettings, LoadError> {
    let statement_kind = pipeline
        .statement_kind
        .map(|kind| kind.trim().to_string())
        .unwrap_or_else(|| DEFAULT_STATEMENT_KIND.to_string());
    if statement_kind.is_empty() {
        return Err(LoadError::invalid(
            "pipeline.statement_kind",
            "kind must not be empty",
        ));
    }

    let numbered_kinds = match pipeline.numbered_kinds {
        Some(kinds) => kinds
            .into_iter()
            .map(|kind| kind.trim().to_string())
            .filter(|kind| !kind.is_empty())
            .collect(),
        None => DEFAULT_NUMBERED_KINDS
            .iter()
            .map(|kind| kind.to_string())
            .collect(),
    };

    let scratch_dir = pipeline
        .scratch_dir
        .filter(|dir| !dir.as_os_str().is_empty());

    Ok(PipelineSettings {
        chunk_size: non_zero_usize(
            pipeline.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            "pipeline.chunk_size",
        )?,
        footer_batch_size: non_zero_usize(
            pipeline
                .footer_batch_size
                .unwrap_or(DEFAULT_FOOTER_BATCH_SIZE),
            "pipeline.footer_batch_size",
        )?,
        statement_kind,
        numbered_kinds,
        scratch_dir,
    })
}

fn build_template_settings(templates: RawTemplateSettings) -> TemplateSettings {
    TemplateSettings {
        static_base_url: templates
            .static_base_url
            .unwrap_or_else(|| DEFAULT_STATIC_BASE_URL.to_string()),
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    max_request_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRendererSettings {
    url: Option<String>,
    timeout_seconds: Option<u64>,
    max_retries: Option<u32>,
    backoff_base_ms: Option<u64>,
    concurrency: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPipelineSettings {
    chunk_size: Option<usize>,
    footer_batch_size: Option<usize>,
    statement_kind: Option<String>,
    numbered_kinds: Option<Vec<String>>,
    scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTemplateSettings {
    static_base_url: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: usize, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
