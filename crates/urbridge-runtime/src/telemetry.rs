//! Logging and trace export for the bridge process.
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter, default `info`. |
//! | `URBRIDGE_LOG_FORMAT=json` | Newline-delimited JSON instead of compact text. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | Also export spans over OTLP/HTTP to this collector. |
//!
//! ```rust,no_run
//! let _guard = urbridge_runtime::telemetry::init_tracing("urbridge");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global `tracing` subscriber.
///
/// Hold the returned guard until exit: dropping it flushes pending spans.
/// Calling this twice leaves the first subscriber in place.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = json_requested(std::env::var("URBRIDGE_LOG_FORMAT").ok().as_deref());
    let provider = build_provider(service_name);
    let otel = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("urbridge")));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(otel)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer().compact()))
        .try_init();
    if let Err(e) = installed {
        eprintln!("[urbridge] tracing subscriber already installed: {e}");
    }

    TracerProviderGuard(provider)
}

fn json_requested(format: Option<&str>) -> bool {
    format.is_some_and(|f| f.eq_ignore_ascii_case("json"))
}

/// Shuts the OTLP provider down on drop.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    pub fn exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("[urbridge] OpenTelemetry shutdown failed: {e}");
            }
        }
    }
}

fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[urbridge] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    // Simple exporter: tracing is initialised before the Tokio runtime exists.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_provider_without_endpoint() {
        // SAFETY: no other test touches this variable.
        unsafe { std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT") };
        assert!(build_provider("urbridge-test").is_none());
    }

    #[test]
    fn empty_guard_drops_cleanly() {
        let guard = TracerProviderGuard(None);
        assert!(!guard.exporting());
        drop(guard);
    }

    #[test]
    fn log_format_selection() {
        assert!(json_requested(Some("json")));
        assert!(json_requested(Some("JSON")));
        assert!(!json_requested(Some("compact")));
        assert!(!json_requested(None));
    }
}
