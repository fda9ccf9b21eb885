pub mod documents_commands;
pub mod healthcheck;
pub mod migrate;
mod postgres_config;
pub mod projects_commands;
pub mod runserver;
mod storage_config;
mod telemetry_config;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use documents_commands::DocumentsCommands;
pub use postgres_config::PostgresConfig;
use projects_commands::ProjectsCommands;
use runserver::RunserverArgs;
pub use storage_config::StorageConfig;
pub use telemetry_config::TelemetryConfig;
use tracing_subscriber::filter::LevelFilter;

use crate::views::OpenApiRoot;

#[derive(Parser, Debug)]
#[command(author, version)]
pub struct Client {
    #[command(flatten)]
    pub postgres_config: PostgresConfig,
    #[command(flatten)]
    pub storage_config: StorageConfig,
    #[command(flatten)]
    pub telemetry_config: TelemetryConfig,
    #[arg(long, env, value_enum, default_value_t = Color::Auto)]
    pub color: Color,
    /// Default level of the logs, `RUST_LOG` directives take precedence
    #[arg(long, env = "OREFOX_LOG_LEVEL", value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,
    #[arg(long, env = "OREFOX_LOG_FORMAT", value_enum, default_value_t)]
    pub log_format: LogFormat,
    /// OreFox version, reported by `GET /version`
    #[clap(long, env = "OREFOX_GIT_DESCRIBE")]
    pub app_version: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(ValueEnum, Debug, Default, Clone)]
pub enum Color {
    Never,
    Always,
    #[default]
    Auto,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(ValueEnum, Debug, Default, Clone, Copy)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
}

impl From<LogFormat> for common::tracing::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Runserver(Box<RunserverArgs>),
    #[command(about, long_about = "Checks that the database and the object store answer")]
    Healthcheck,
    #[command(about, long_about = "Prints the OpenApi of the service")]
    Openapi,
    #[command(about, long_about = "Applies the pending database migrations")]
    Migrate,
    #[command(subcommand, about, long_about = "Project related commands")]
    Projects(ProjectsCommands),
    #[command(subcommand, about, long_about = "Document related commands")]
    Documents(DocumentsCommands),
}

impl Commands {
    /// Commands whose standard output is meant to be piped
    pub fn prints_to_stdout(&self) -> bool {
        matches!(self, Commands::Openapi | Commands::Documents(_))
    }
}

/// Prints the OpenApi to stdout
pub fn print_openapi() -> anyhow::Result<()> {
    let openapi = OpenApiRoot::build_openapi();
    print!("{}", serde_yaml::to_string(&openapi)?);
    Ok(())
}

#[cfg(test)]
pub fn generate_temp_file<T: serde::Serialize>(object: &T) -> tempfile::NamedTempFile {
    use std::io::Write as _;
    let mut tmp_file = tempfile::NamedTempFile::new().unwrap();
    write!(tmp_file, "{}", serde_json::to_string(object).unwrap()).unwrap();
    tmp_file
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn command_line_is_consistent() {
        Client::command().debug_assert();
    }

    #[test]
    fn log_levels_map_to_filters() {
        assert_eq!(LevelFilter::from(LogLevel::Warn), LevelFilter::WARN);
        assert_eq!(LevelFilter::from(LogLevel::Trace), LevelFilter::TRACE);
    }
}
