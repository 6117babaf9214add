//! Log output and span export for the `anglestream` binary.
//!
//! Logs go to stderr through `tracing-subscriber`. Session ids, peers and
//! errors travel as structured fields, so the JSON format can be fed straight
//! into a log pipeline. If a collector is configured, spans are also shipped
//! over OTLP/HTTP.
//!
//! Knobs: `RUST_LOG` (filter, `info` when unset), `ANGLESTREAM_LOG_FORMAT`
//! (`json` or `compact`) and `OTEL_EXPORTER_OTLP_ENDPOINT` (collector URL).

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FORMAT_VAR: &str = "ANGLESTREAM_LOG_FORMAT";
const OTLP_ENDPOINT_VAR: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Line format of the console log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    /// Anything other than `json` (case-insensitive) means compact.
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }

    fn from_env() -> Self {
        Self::parse(std::env::var(LOG_FORMAT_VAR).ok().as_deref())
    }
}

/// Install the global subscriber. Call once, before the runtime exists, and
/// keep the returned guard alive until exit.
pub fn init_tracing(service_name: &str) -> TelemetryGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let console: Box<dyn Layer<Registry> + Send + Sync> = match LogFormat::from_env() {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .with_current_span(true)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .compact()
            .boxed(),
    };

    let exporter = otlp_endpoint().and_then(|endpoint| span_exporter(service_name, &endpoint));
    let spans = exporter
        .as_ref()
        .map(|provider| tracing_opentelemetry::layer().with_tracer(provider.tracer("anglestream")));

    tracing_subscriber::registry()
        .with(console)
        .with(filter)
        .with(spans)
        .init();

    TelemetryGuard { provider: exporter }
}

/// Flushes exported spans when dropped.
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        let Some(provider) = self.provider.take() else {
            return;
        };
        if let Err(e) = provider.shutdown() {
            eprintln!("anglestream: span exporter did not flush cleanly: {e}");
        }
    }
}

fn otlp_endpoint() -> Option<String> {
    std::env::var(OTLP_ENDPOINT_VAR)
        .ok()
        .filter(|v| !v.trim().is_empty())
}

/// The runtime is built after this runs, so spans go out through the
/// synchronous exporter. A broken endpoint downgrades to console-only logs.
fn span_exporter(service_name: &str, endpoint: &str) -> Option<SdkTracerProvider> {
    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("anglestream: OTLP export to {endpoint} disabled: {e}");
            return None;
        }
    };

    Some(
        SdkTracerProvider::builder()
            .with_resource(Resource::builder().with_service_name(service_name.to_string()).build())
            .with_simple_exporter(exporter)
            .build(),
    )
}
