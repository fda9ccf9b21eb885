use database::DbConnectionPool;
use database::run_pending_migrations;
use tracing::info;

use super::PostgresConfig;

/// Applies the embedded migrations that were not run yet
pub async fn migrate_cmd(postgres: PostgresConfig) -> anyhow::Result<()> {
    let db_pool = DbConnectionPool::try_initialize(postgres.url()?, 1)?;
    let applied = run_pending_migrations(&db_pool).await?;
    if applied.is_empty() {
        info!("the database schema is up to date");
    }
    for migration in applied {
        info!(%migration, "migration applied");
    }
    Ok(())
}
