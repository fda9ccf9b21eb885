use anyhow::anyhow;
use database::DbConnectionPool;

use crate::models::PgMetadataDriver;
use crate::views;

use super::PostgresConfig;
use super::StorageConfig;

/// Checks that the database and the object store answer, as `GET /health` does
pub async fn healthcheck_cmd(postgres: PostgresConfig, storage: StorageConfig) -> anyhow::Result<()> {
    let db_pool = DbConnectionPool::try_initialize(postgres.url()?, 1)?;
    let metadata = PgMetadataDriver::new(db_pool);
    let storage = storage::Client::new(storage.try_into()?).await;

    views::check_health(&metadata, &storage)
        .await
        .map_err(|e| anyhow!("healthcheck failed: {e}"))?;

    tracing::info!("✅ Healthcheck passed");
    Ok(())
}
