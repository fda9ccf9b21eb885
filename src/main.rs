mod client;
mod error;
mod intake;
mod models;
mod views;

use std::process::exit;

use clap::Parser;
use client::Client;
use client::Color;
use client::Commands;
use client::documents_commands::documents_cmd;
use client::healthcheck::healthcheck_cmd;
use client::migrate::migrate_cmd;
use client::print_openapi;
use client::projects_commands::projects_cmd;
use client::runserver::runserver;
use colored::Colorize;
use common::tracing::SpanUploading;
use common::tracing::Stream;
use common::tracing::TracingConfig;
use common::tracing::create_tracing_subscriber;
use common::tracing::quiet_dependencies_directives;
use opentelemetry_otlp::WithExportConfig;
use tracing_subscriber::util::SubscriberInitExt;

fn init_tracing(client: &Client) -> anyhow::Result<()> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(client.telemetry_config.telemetry_endpoint.as_str())
        .build()?;
    let runs_server = matches!(client.command, Commands::Runserver(_));
    let tracing_config = TracingConfig {
        stream: if client.command.prints_to_stdout() {
            Stream::Stderr
        } else {
            Stream::Stdout
        },
        format: client.log_format.into(),
        telemetry: client.telemetry_config.telemetry(),
        directives: quiet_dependencies_directives(),
        // short lived commands must not exit before their spans are sent
        span_uploading: if runs_server {
            SpanUploading::BackgroundBatched
        } else {
            SpanUploading::Blocking
        },
    };
    create_tracing_subscriber(tracing_config, client.log_level.into(), exporter).try_init()?;
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let client = Client::parse();
    init_tracing(&client)?;

    match client.color {
        Color::Never => colored::control::set_override(false),
        Color::Always => colored::control::set_override(true),
        Color::Auto => (),
    }

    let Client {
        postgres_config,
        storage_config,
        app_version,
        command,
        ..
    } = client;
    match command {
        Commands::Runserver(args) => {
            runserver(*args, postgres_config, storage_config, app_version).await
        }
        Commands::Healthcheck => healthcheck_cmd(postgres_config, storage_config).await,
        Commands::Openapi => print_openapi(),
        Commands::Migrate => migrate_cmd(postgres_config).await,
        Commands::Projects(command) => projects_cmd(command, postgres_config).await,
        Commands::Documents(command) => {
            documents_cmd(command, postgres_config, storage_config).await
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("{} {error:?}", "error:".red().bold());
        exit(2);
    }
}
