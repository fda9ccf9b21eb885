use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SpanExporter;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stream {
    Stderr,
    Stdout,
}

/// Rendering of the log lines
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum LogFormat {
    /// Multi-line, human friendly output
    #[default]
    Pretty,
    /// One line per event, better suited to log collectors
    Compact,
}

#[derive(Debug)]
pub struct Telemetry {
    pub service_name: String,
    pub endpoint: Url,
}

pub struct TracingConfig {
    pub stream: Stream,
    pub format: LogFormat,
    pub telemetry: Option<Telemetry>,
    pub directives: Vec<Directive>,
    pub span_uploading: SpanUploading,
}

pub enum SpanUploading {
    Blocking,
    BackgroundBatched,
}

/// Directives silencing the chattiest dependencies below `warn`
///
/// The S3 SDK and the HTTP stack emit an event per request at `debug` level,
/// which drowns the service's own logs.
pub fn quiet_dependencies_directives() -> Vec<Directive> {
    ["aws_config=warn", "aws_smithy_runtime=warn", "hyper=warn", "h2=warn"]
        .into_iter()
        .filter_map(|directive| directive.parse().ok())
        .collect()
}

pub fn create_tracing_subscriber<T: SpanExporter + 'static>(
    tracing_config: TracingConfig,
    log_level: LevelFilter,
    exporter: T,
) -> impl tracing::Subscriber {
    let env_filter_layer = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();
    let env_filter_layer = tracing_config
        .directives
        .into_iter()
        .fold(env_filter_layer, |env_filter_layer, directive| {
            env_filter_layer.add_directive(directive)
        });
    let fmt_layer = match (tracing_config.format, tracing_config.stream) {
        (LogFormat::Pretty, Stream::Stdout) => tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(false)
            .boxed(),
        (LogFormat::Pretty, Stream::Stderr) => tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(false)
            .with_writer(std::io::stderr)
            .boxed(),
        (LogFormat::Compact, Stream::Stdout) => tracing_subscriber::fmt::layer().compact().boxed(),
        (LogFormat::Compact, Stream::Stderr) => tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .boxed(),
    };
    // https://docs.rs/tracing-subscriber/latest/tracing_subscriber/layer/index.html#runtime-configuration-with-layers
    let telemetry_layer = tracing_config.telemetry.map(|telemetry| {
        let resource = Resource::builder()
            .with_service_name(telemetry.service_name)
            .build();
        let provider =
            opentelemetry_sdk::trace::SdkTracerProvider::builder().with_resource(resource);
        let provider = match tracing_config.span_uploading {
            SpanUploading::Blocking => provider.with_simple_exporter(exporter),
            SpanUploading::BackgroundBatched => provider.with_batch_exporter(exporter),
        }
        .build();
        opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
        tracing_opentelemetry::OpenTelemetryLayer::new(provider.tracer("orefox"))
    });

    tracing_subscriber::registry()
        .with(telemetry_layer)
        .with(env_filter_layer)
        .with(fmt_layer)
}
