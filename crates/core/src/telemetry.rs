// Logging and trace export for gridrank processes
//
// Console output goes through tracing-subscriber with a filter scoped to the
// gridrank crates. When an OTLP endpoint is configured, dispatcher, pool and
// store spans are also exported over gRPC.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider, Tracer};
use opentelemetry_sdk::Resource;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when neither `RUST_LOG` nor `LOG_LEVEL` is set
pub const DEFAULT_LOG_FILTER: &str = "warn,gridrank_core=info,gridrank_scheduler=info,gridrank_worker=info";

const EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where logs and spans go
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// `service.name` resource attribute
    pub service_name: String,
    pub service_version: Option<String>,
    /// gRPC collector, e.g. `http://localhost:4317`
    pub otlp_endpoint: Option<String>,
    /// `EnvFilter` directives; [`DEFAULT_LOG_FILTER`] when unset or unparsable
    pub log_filter: Option<String>,
}

impl TelemetryConfig {
    /// Console logging only, default filter
    pub fn for_service(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            service_version: None,
            otlp_endpoint: None,
            log_filter: None,
        }
    }

    /// Read `OTEL_SERVICE_NAME`, `OTEL_SERVICE_VERSION`,
    /// `OTEL_EXPORTER_OTLP_ENDPOINT` and `RUST_LOG` / `LOG_LEVEL`, falling back
    /// to `service_name` when `OTEL_SERVICE_NAME` is unset.
    pub fn from_env(service_name: &str) -> Self {
        Self::from_lookup(service_name, |name| std::env::var(name).ok())
    }

    fn from_lookup<F>(service_name: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            service_name: var("OTEL_SERVICE_NAME").unwrap_or_else(|| service_name.to_string()),
            service_version: var("OTEL_SERVICE_VERSION"),
            otlp_endpoint: var("OTEL_EXPORTER_OTLP_ENDPOINT"),
            log_filter: var("RUST_LOG").or_else(|| var("LOG_LEVEL")),
        }
    }

    /// The console filter this configuration resolves to
    pub fn env_filter(&self) -> EnvFilter {
        self.log_filter
            .as_deref()
            .and_then(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
    }

    fn resource(&self) -> Resource {
        let mut attributes = vec![KeyValue::new("service.name", self.service_name.clone())];
        if let Some(version) = &self.service_version {
            attributes.push(KeyValue::new("service.version", version.clone()));
        }
        Resource::builder().with_attributes(attributes).build()
    }
}

/// Flushes exported spans when dropped; hold it for the life of the process
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are being exported
    pub fn is_exporting(&self) -> bool {
        self.provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("Failed to flush trace exporter: {e:?}");
            }
        }
    }
}

/// Install the global subscriber.
///
/// An unreachable or misconfigured collector does not stop the process; the
/// failure is logged once the console layer is up.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let console = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_filter(config.env_filter());

    let exporter = config
        .otlp_endpoint
        .as_deref()
        .map(|endpoint| (endpoint, otlp_provider(endpoint, config.resource())));

    let (provider, otel_layer) = match &exporter {
        Some((_, Ok((provider, tracer)))) => (
            Some(provider.clone()),
            Some(tracing_opentelemetry::layer().with_tracer(tracer.clone())),
        ),
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(otel_layer)
        .init();

    match exporter {
        Some((endpoint, Ok(_))) => {
            tracing::info!(endpoint, service = %config.service_name, "Exporting spans over OTLP");
        }
        Some((endpoint, Err(e))) => {
            tracing::warn!(endpoint, error = %e, "OTLP exporter unavailable, logging to console only");
        }
        None => {}
    }

    TelemetryGuard { provider }
}

fn otlp_provider(
    endpoint: &str,
    resource: Resource,
) -> Result<(SdkTracerProvider, Tracer), opentelemetry::trace::TraceError> {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::AlwaysOn)
        .with_resource(resource)
        .build();
    let tracer = provider.tracer("gridrank");

    Ok((provider, tracer))
}
