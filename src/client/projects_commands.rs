use std::path::Path;
use std::path::PathBuf;

use clap::Args;
use clap::Subcommand;
use database::DbConnectionPool;
use geojson::Feature;
use geojson::GeoJson;
use orefox_models::Boundary;
use orefox_models::Project;
use orefox_models::ProjectMode;
use orefox_models::project::NewProject;
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::models::MetadataDriver;
use crate::models::PgMetadataDriver;

use super::PostgresConfig;

#[derive(Subcommand, Debug)]
pub enum ProjectsCommands {
    Import(ImportProjectsArgs),
}

#[derive(Args, Debug)]
#[command(
    about,
    long_about = "Create one project per feature of a GeoJSON FeatureCollection"
)]
pub struct ImportProjectsArgs {
    /// Features need a Polygon or MultiPolygon geometry and a `name` property.
    /// `description`, `mode` and `commodity` properties are optional.
    file: PathBuf,
    /// Only validate the features
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("could not read '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),
    #[error("expected a FeatureCollection")]
    NotACollection,
    #[error("feature {index}: {reason}")]
    Feature { index: usize, reason: String },
}

pub async fn projects_cmd(command: ProjectsCommands, postgres: PostgresConfig) -> anyhow::Result<()> {
    match command {
        ProjectsCommands::Import(args) => import_projects(args, postgres).await,
    }
}

async fn import_projects(
    ImportProjectsArgs { file, dry_run }: ImportProjectsArgs,
    postgres: PostgresConfig,
) -> anyhow::Result<()> {
    let projects = read_projects(&file)?;
    if dry_run {
        info!(count = projects.len(), "every feature is a valid project, nothing imported");
        return Ok(());
    }
    let db_pool = DbConnectionPool::try_initialize(postgres.url()?, 1)?;
    let created = create_projects(&PgMetadataDriver::new(db_pool), projects).await?;
    info!(count = created.len(), "projects imported");
    Ok(())
}

/// Parses and validates every feature of the file before anything is created
fn read_projects(path: &Path) -> Result<Vec<NewProject>, ImportError> {
    let content = std::fs::read_to_string(path).map_err(|source| ImportError::Read {
        path: path.to_owned(),
        source,
    })?;
    let GeoJson::FeatureCollection(collection) = content.parse::<GeoJson>()? else {
        return Err(ImportError::NotACollection);
    };
    collection
        .features
        .into_iter()
        .enumerate()
        .map(|(index, feature)| {
            feature_to_project(feature).map_err(|reason| ImportError::Feature { index, reason })
        })
        .collect()
}

fn text_property(feature: &Feature, name: &str) -> Result<Option<String>, String> {
    match feature.property(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(format!("property '{name}' must be a string")),
    }
}

fn feature_to_project(feature: Feature) -> Result<NewProject, String> {
    let name = text_property(&feature, "name")?.ok_or("property 'name' is required")?;
    let description = text_property(&feature, "description")?;
    let commodity = text_property(&feature, "commodity")?;
    let mode = text_property(&feature, "mode")?
        .map(|mode| mode.parse::<ProjectMode>())
        .transpose()
        .map_err(|_| "property 'mode' must be 'exploration' or 'mining'".to_owned())?
        .unwrap_or_default();
    let geometry = feature.geometry.ok_or("a geometry is required")?;
    let boundary = Boundary::try_from(geometry).map_err(|error| error.to_string())?;
    NewProject::new(&name, description, mode, commodity, Some(boundary))
        .map_err(|error| error.to_string())
}

/// Creates every project or, if one is rejected, none of them
async fn create_projects(
    metadata: &impl MetadataDriver,
    projects: Vec<NewProject>,
) -> anyhow::Result<Vec<Project>> {
    let created = metadata.create_projects(projects).await?;
    for project in &created {
        info!(project_id = project.id, name = %project.name, "project created");
    }
    Ok(created)
}
