use std::io::Write;

use chrono::TimeDelta;
use clap::Args;
use clap::Subcommand;
use database::DbConnectionPool;
use tracing::info;

use crate::intake::DocumentIntake;
use crate::intake::ReconcileReport;
use crate::models::MetadataDriver;
use crate::models::PgMetadataDriver;

use super::PostgresConfig;
use super::StorageConfig;

#[derive(Subcommand, Debug)]
pub enum DocumentsCommands {
    Reconcile(ReconcileArgs),
}

#[derive(Args, Debug)]
#[command(
    about,
    long_about = "Remove what interrupted or failed uploads left in the database and the object store"
)]
pub struct ReconcileArgs {
    /// Leftovers younger than this are uploads that may still be running, they are kept
    #[arg(long, env = "OREFOX_RECONCILE_GRACE_HOURS", default_value_t = 24)]
    grace_hours: u32,
    /// Report what would be removed without removing anything
    #[arg(long)]
    dry_run: bool,
}

pub async fn documents_cmd(
    command: DocumentsCommands,
    postgres: PostgresConfig,
    storage: StorageConfig,
) -> anyhow::Result<()> {
    match command {
        DocumentsCommands::Reconcile(args) => {
            let db_pool = DbConnectionPool::try_initialize(postgres.url()?, 1)?;
            let storage = storage::Client::new(storage.try_into()?).await;
            let intake = DocumentIntake::new(PgMetadataDriver::new(db_pool), storage);
            let report = reconcile(&intake, args).await?;
            print_report(&report, &mut std::io::stdout().lock())
        }
    }
}

async fn reconcile<M: MetadataDriver>(
    intake: &DocumentIntake<M>,
    ReconcileArgs {
        grace_hours,
        dry_run,
    }: ReconcileArgs,
) -> anyhow::Result<ReconcileReport> {
    let report = intake
        .reconcile(TimeDelta::hours(i64::from(grace_hours)), dry_run)
        .await?;
    info!(
        stale_documents = report.stale_documents,
        orphan_objects = report.orphan_objects,
        failures = report.failures,
        dry_run,
        "reconciliation done"
    );
    Ok(report)
}

/// Prints the report, then fails if some leftovers could not be removed
fn print_report(report: &ReconcileReport, out: &mut impl Write) -> anyhow::Result<()> {
    writeln!(out, "{}", serde_json::to_string_pretty(report)?)?;
    if report.failures > 0 {
        anyhow::bail!(
            "{} leftovers could not be removed, see the logs",
            report.failures
        );
    }
    Ok(())
}
