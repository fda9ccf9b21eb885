use anyhow::Context as _;
use axum::http::HeaderValue;
use chrono::Duration;
use clap::ArgAction;
use clap::Args;

use crate::views;

use super::PostgresConfig;
use super::StorageConfig;

/// 250 MiB
const DEFAULT_REQUEST_BODY_LIMIT: usize = 250 * 1024 * 1024;

#[derive(Args, Debug)]
#[command(about, long_about = "Launch the server")]
pub struct RunserverArgs {
    #[arg(long, env = "OREFOX_PORT", default_value_t = 8000)]
    port: u16,
    #[arg(long, env = "OREFOX_ADDRESS", default_value_t = String::from("0.0.0.0"))]
    address: String,
    /// If this option is set to false, write operations are accepted even when the
    /// request carries no identity headers.
    #[clap(long, env = "ENABLE_AUTHORIZATION", default_value_t = true, action = ArgAction::Set)]
    enable_authorization: bool,
    /// The timeout to use when performing the healthcheck, in milliseconds
    #[clap(long, env = "OREFOX_HEALTH_CHECK_TIMEOUT_MS", default_value_t = 1000)]
    health_check_timeout_ms: u64,
    /// Maximum size of a request body in bytes, uploads included
    #[clap(long, env = "OREFOX_REQUEST_BODY_LIMIT", default_value_t = DEFAULT_REQUEST_BODY_LIMIT)]
    request_body_limit: usize,
    /// Origins allowed to call the API from a browser, any origin when empty
    #[clap(long, env = "OREFOX_ALLOWED_ORIGINS", value_delimiter = ',')]
    allowed_origins: Vec<String>,
}

fn parse_origins(origins: Vec<String>) -> anyhow::Result<Vec<HeaderValue>> {
    origins
        .into_iter()
        .map(|origin| origin.trim().to_owned())
        .filter(|origin| !origin.is_empty())
        .map(|origin| {
            HeaderValue::from_str(&origin).with_context(|| format!("invalid origin '{origin}'"))
        })
        .collect()
}

/// Create and run the server
pub async fn runserver(
    RunserverArgs {
        port,
        address,
        enable_authorization,
        health_check_timeout_ms,
        request_body_limit,
        allowed_origins,
    }: RunserverArgs,
    postgres: PostgresConfig,
    storage: StorageConfig,
    app_version: Option<String>,
) -> anyhow::Result<()> {
    let config = views::ServerConfig {
        port,
        address,
        health_check_timeout: Duration::milliseconds(
            i64::try_from(health_check_timeout_ms).unwrap_or(i64::MAX),
        ),
        enable_authorization,
        request_body_limit,
        allowed_origins: parse_origins(allowed_origins)?,
        postgres_config: postgres.try_into()?,
        storage_config: storage.try_into()?,
        app_version,
    };

    let server = views::Server::new(config).await?;
    Ok(server.start().await?)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn blank_origins_are_ignored() {
        let origins = parse_origins(vec![
            "https://orefox.example.com".to_owned(),
            " ".to_owned(),
            " http://localhost:3000 ".to_owned(),
        ])
        .unwrap();
        assert_eq!(
            origins,
            vec![
                HeaderValue::from_static("https://orefox.example.com"),
                HeaderValue::from_static("http://localhost:3000"),
            ]
        );
    }

    #[test]
    fn invalid_origins_are_reported() {
        let error = parse_origins(vec!["http://bad\nhost".to_owned()]).unwrap_err();
        assert!(error.to_string().contains("invalid origin"));
    }
}
