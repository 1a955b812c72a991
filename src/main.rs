use std::{process, sync::Arc};

use report_press::{
    application::{
        error::AppError,
        render::{
            AskamaTemplates, PipelineError, PipelineSettings, RenderClient, RenderClientConfig,
            ReportPipeline, TemplateContext,
        },
    },
    config,
    domain::report::{ReportRequest, TemplateSource},
    infra::{
        error::InfraError,
        http::{self, ApiState},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) =
        config::load_with_cli().map_err(|err| AppError::from(InfraError::from(err)))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;
    let pipeline = build_pipeline(&settings)?;

    match command {
        config::Command::Serve(_) => serve_http(&settings, pipeline).await,
        config::Command::Render(args) => run_render(pipeline, *args).await,
    }
}

fn build_pipeline(settings: &config::Settings) -> Result<ReportPipeline, AppError> {
    let client = RenderClient::new(&RenderClientConfig::from(&settings.renderer))
        .map_err(|err| AppError::from(PipelineError::from(err)))?;
    let templates = AskamaTemplates::new(
        TemplateContext::from_static_base(&settings.templates.static_base_url),
        settings.pipeline.statement_kind.clone(),
    );

    info!(
        target = "report_press::startup",
        renderer = %client.endpoint(),
        concurrency = settings.renderer.concurrency.get(),
        chunk_size = settings.pipeline.chunk_size.get(),
        footer_batch_size = settings.pipeline.footer_batch_size.get(),
        "pipeline configured"
    );

    Ok(ReportPipeline::new(
        Arc::new(templates),
        Arc::new(client),
        PipelineSettings::from(settings),
    ))
}

async fn run_render(pipeline: ReportPipeline, args: config::RenderArgs) -> Result<(), AppError> {
    let raw_vars = tokio::fs::read(&args.vars)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let vars: serde_json::Value = serde_json::from_slice(&raw_vars).map_err(|err| {
        AppError::validation(format!(
            "template variables in `{}` are not valid JSON: {err}",
            args.vars.display()
        ))
    })?;
    drop(raw_vars);

    let request = match (&args.template_file, args.template) {
        (Some(path), _) => {
            let source = tokio::fs::read_to_string(path)
                .await
                .map_err(|err| AppError::from(InfraError::from(err)))?;
            ReportRequest::with_template(
                TemplateSource::inline(source)?,
                vars,
                args.page_numbers,
                args.chunk_size,
            )?
        }
        (None, Some(kind)) => ReportRequest::parse(kind, vars, args.page_numbers, args.chunk_size)?,
        (None, None) => {
            return Err(AppError::validation(
                "either --template or --template-file is required",
            ));
        }
    };

    info!(
        target = "report_press::render",
        kind = %request.kind,
        output = %args.output.display(),
        "Starting render"
    );

    let pdf = pipeline.create_report(request).await?;
    tokio::fs::write(&args.output, &pdf)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "report_press::render",
        output = %args.output.display(),
        bytes = pdf.len(),
        "Render completed"
    );
    Ok(())
}

async fn serve_http(settings: &config::Settings, pipeline: ReportPipeline) -> Result<(), AppError> {
    let router = http::build_router(ApiState { pipeline }, settings.server.max_request_bytes);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "report_press::serve",
        addr = %settings.server.addr,
        "Listening"
    );

    axum::serve(listener, router.into_make_service())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}
