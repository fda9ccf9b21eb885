use clap::Args;
use clap::ValueEnum;
use educe::Educe;
use url::Url;

#[derive(Args, Debug, Educe, Clone)]
#[educe(Default)]
pub struct TelemetryConfig {
    #[educe(Default = TelemetryKind::None)]
    #[clap(long, env, default_value_t)]
    pub telemetry_kind: TelemetryKind,
    #[educe(Default = "orefox".into())]
    #[clap(long, env, default_value = "orefox")]
    pub service_name: String,
    #[educe(Default = Url::parse("http://localhost:4317").expect("valid default endpoint"))]
    #[arg(long, env, default_value = "http://localhost:4317")]
    pub telemetry_endpoint: Url,
}

impl TelemetryConfig {
    /// The spans exporter settings, `None` when spans are not exported
    pub fn telemetry(&self) -> Option<common::tracing::Telemetry> {
        match self.telemetry_kind {
            TelemetryKind::None => None,
            TelemetryKind::Opentelemetry => Some(common::tracing::Telemetry {
                service_name: self.service_name.clone(),
                endpoint: self.telemetry_endpoint.clone(),
            }),
        }
    }
}

#[derive(Default, ValueEnum, Debug, Clone, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum TelemetryKind {
    #[default]
    None,
    Opentelemetry,
}
