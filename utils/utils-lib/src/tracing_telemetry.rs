use opentelemetry::trace::TracerProvider;
pub use opentelemetry::{global, trace};
pub use opentelemetry::{Context, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{propagation::TraceContextPropagator, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// Default processor tags for a binary's tracer.
pub fn default_tracing_tags(git_commit: &str, cargo_version: &str) -> Vec<KeyValue> {
    vec![
        KeyValue::new("git.commit", git_commit.to_string()),
        KeyValue::new("crate.version", cargo_version.to_string()),
    ]
}

/// Fmt Layer for console output.
pub enum FmtLayer {
    Stdout,
    Stderr,
    None,
}

/// Tracing telemetry style.
#[derive(Debug, Clone, Copy, strum_macros::EnumString, strum_macros::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum FmtStyle {
    Compact,
    Pretty,
    Json,
}

/// Tracing telemetry builder.
pub struct TracingTelemetry {
    writer: FmtLayer,
    style: FmtStyle,
    colours: bool,
    jaeger: Option<String>,
    tracing_tags: Vec<KeyValue>,
}

impl TracingTelemetry {
    pub fn builder() -> Self {
        Self {
            writer: FmtLayer::Stdout,
            style: FmtStyle::Pretty,
            colours: true,
            jaeger: None,
            tracing_tags: Vec::new(),
        }
    }
    pub fn with_writer(self, writer: FmtLayer) -> TracingTelemetry {
        TracingTelemetry { writer, ..self }
    }
    pub fn with_style(self, style: FmtStyle) -> TracingTelemetry {
        TracingTelemetry { style, ..self }
    }
    pub fn with_colours(self, colours: bool) -> TracingTelemetry {
        TracingTelemetry { colours, ..self }
    }
    pub fn with_jaeger(self, jaeger: Option<String>) -> TracingTelemetry {
        TracingTelemetry { jaeger, ..self }
    }
    pub fn with_tracing_tags(self, tracing_tags: Vec<KeyValue>) -> TracingTelemetry {
        TracingTelemetry {
            tracing_tags,
            ..self
        }
    }

    /// Initialize the global subscriber for this binary.
    pub fn init(self, service_name: &str) {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let stdout = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(self.colours);
        let stderr = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(self.colours);

        let tracer = self.jaeger.map(|mut jaeger| {
            let svc_name = vec![KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                service_name.to_owned(),
            )];
            let tracing_tags = self.tracing_tags.into_iter().fold(svc_name, |mut acc, kv| {
                if !acc.iter().any(|acc| acc.key == kv.key) {
                    acc.push(kv);
                }
                acc
            });

            if !jaeger.starts_with("http") {
                jaeger = format!("http://{jaeger}");
            }

            global::set_text_map_propagator(TraceContextPropagator::new());
            opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(jaeger),
                )
                .with_trace_config(
                    sdktrace::Config::default().with_resource(Resource::new(tracing_tags)),
                )
                .install_batch(opentelemetry_sdk::runtime::TokioCurrentThread)
                .expect("tracer exporter should initialise")
        });
        let tracer = tracer.map(|provider| {
            global::set_tracer_provider(provider.clone());
            TRACER_PROVIDER.get_or_init(|| provider.clone());
            provider.tracer("tracing-otel-subscriber")
        });

        let subscriber = Registry::default().with(env_filter);

        macro_rules! finish {
            ($fmt_layer:expr) => {
                if let Some(tracer) = tracer {
                    let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);
                    subscriber.with($fmt_layer).with(telemetry).init();
                } else {
                    subscriber.with($fmt_layer).init();
                }
            };
        }

        match (self.writer, self.style) {
            (FmtLayer::Stdout, FmtStyle::Compact) => finish!(stdout.compact()),
            (FmtLayer::Stderr, FmtStyle::Compact) => finish!(stderr.compact()),
            (FmtLayer::Stdout, FmtStyle::Pretty) => finish!(stdout.pretty()),
            (FmtLayer::Stderr, FmtStyle::Pretty) => finish!(stderr.pretty()),
            (FmtLayer::Stdout, FmtStyle::Json) => finish!(stdout.json()),
            (FmtLayer::Stderr, FmtStyle::Json) => finish!(stderr.json()),
            (FmtLayer::None, _) => {
                if let Some(tracer) = tracer {
                    let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);
                    subscriber.with(telemetry).init();
                } else {
                    subscriber.init();
                }
            }
        };
    }
}

/// The tracer provider lives in a global context and must be flushed explicitly.
static TRACER_PROVIDER: std::sync::OnceLock<opentelemetry_sdk::trace::TracerProvider> =
    std::sync::OnceLock::new();

/// Flush any buffered spans before process exit.
pub fn flush_traces() {
    global::shutdown_tracer_provider();
    if let Some(provider) = TRACER_PROVIDER.get() {
        provider.shutdown().ok();
    }
}
