use clap::ArgAction;
use clap::Args;
use clap::ValueEnum;
use url::Url;

#[derive(Default, ValueEnum, Debug, Clone, Copy, PartialEq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    S3,
    /// Objects are lost when the process exits
    Memory,
}

#[derive(Args, Debug, Clone)]
pub struct StorageConfig {
    #[arg(long, env, value_enum, default_value_t)]
    pub storage_backend: StorageBackend,
    /// `host:port` or URL of an S3-compatible service, AWS is used when unset
    #[arg(long, env)]
    pub s3_endpoint: Option<String>,
    /// Scheme used when `s3_endpoint` has none
    #[arg(long, env, default_value_t = false, action = ArgAction::Set)]
    pub s3_use_ssl: bool,
    #[arg(long, env, default_value = "orefox-documents")]
    pub s3_bucket: String,
    #[arg(long, env, default_value = "us-east-1")]
    pub s3_region: String,
    #[arg(long, env)]
    pub s3_access_key: Option<String>,
    #[arg(long, env, hide_env_values = true)]
    pub s3_secret_key: Option<String>,
    /// Path-style addressing, required by MinIO
    #[arg(long, env, default_value_t = true, action = ArgAction::Set)]
    pub s3_force_path_style: bool,
}

impl StorageConfig {
    fn endpoint(&self) -> Result<Option<Url>, url::ParseError> {
        let Some(endpoint) = self.s3_endpoint.as_deref().map(str::trim) else {
            return Ok(None);
        };
        if endpoint.is_empty() {
            return Ok(None);
        }
        if endpoint.contains("://") {
            return Url::parse(endpoint).map(Some);
        }
        let scheme = if self.s3_use_ssl { "https" } else { "http" };
        Url::parse(&format!("{scheme}://{endpoint}")).map(Some)
    }
}

impl TryFrom<StorageConfig> for storage::Config {
    type Error = url::ParseError;

    fn try_from(config: StorageConfig) -> Result<Self, Self::Error> {
        if config.storage_backend == StorageBackend::Memory {
            return Ok(storage::Config::Memory);
        }
        Ok(storage::Config::S3(storage::S3Config {
            endpoint: config.endpoint()?,
            bucket: config.s3_bucket,
            region: config.s3_region,
            access_key: config.s3_access_key,
            secret_key: config.s3_secret_key,
            force_path_style: config.s3_force_path_style,
        }))
    }
}
