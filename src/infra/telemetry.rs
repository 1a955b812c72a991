use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "report_press_render_attempts_total",
            Unit::Count,
            "Conversion calls issued to the PDF renderer, retries included."
        );
        describe_counter!(
            "report_press_render_retries_total",
            Unit::Count,
            "Conversion calls retried after a transient failure."
        );
        describe_counter!(
            "report_press_render_failures_total",
            Unit::Count,
            "Conversions that ended in a fatal error."
        );
        describe_counter!(
            "report_press_overlay_warnings_total",
            Unit::Count,
            "Pages emitted without a footer because the overlay failed."
        );
        describe_histogram!(
            "report_press_report_ms",
            Unit::Milliseconds,
            "End-to-end report generation latency in milliseconds."
        );
    });
}
