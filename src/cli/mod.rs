//! Command-line interface for fabdeploy.
//!
//! Provides commands for deploying a layer into its workspace, previewing
//! the pipeline order offline, showing the resolved configuration, and
//! reading back the record ledger.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::{acquire_token, ClientCredentials, FabricClient};
use crate::config::{self, DeploymentTarget, ResolvedConfig};
use crate::core::{sort_artifacts, ItemTables, LookupSource, Orchestrator, RecordLog, SortMode};
use crate::domain::{ArtifactType, DeploymentRun, LocalArtifact};
use crate::repository::ArtifactRepository;

/// fabdeploy - Dependency-aware deployment of Fabric workspace artifacts
#[derive(Parser, Debug)]
#[command(name = "fabdeploy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (searched for in .fabdeploy/ if not given)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Which profile and which repository to use
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Deployment environment (dev, test, prod, ...)
    #[arg(long = "env", env = "DEPLOYMENT_ENV")]
    pub environment: String,

    /// Environment type of the profile
    #[arg(long = "env-type", env = "ENVIRONMENT_TYPE")]
    pub environment_type: String,

    /// Transformation layer (defaults to the configured one)
    #[arg(long)]
    pub layer: Option<String>,

    /// Repository root holding the ARM/ folder
    #[arg(long, env = "ARTIFACT_PATH")]
    pub artifact_path: Option<PathBuf>,
}

/// Service principal used against the remote workspace
#[derive(Args, Debug, Clone)]
pub struct CredentialArgs {
    #[arg(long, env = "TENANT_ID")]
    pub tenant_id: String,

    #[arg(long, env = "CLIENT_ID")]
    pub client_id: String,

    #[arg(long, env = "CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Deploy the selected layer into its workspace
    Deploy {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        credentials: CredentialArgs,
    },

    /// Show artifacts and pipeline ordering without contacting the workspace
    Plan {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Show resolved configuration (debug)
    Config {
        /// Also resolve the target for this environment
        #[arg(long = "env", env = "DEPLOYMENT_ENV")]
        environment: Option<String>,

        #[arg(long = "env-type", env = "ENVIRONMENT_TYPE")]
        environment_type: Option<String>,

        #[arg(long)]
        layer: Option<String>,
    },

    /// Show deployment records from the ledger
    Records {
        /// Only records of this run
        #[arg(long)]
        run_id: Option<String>,

        /// Maximum number of records to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let cfg = config::load_config(self.config.as_deref())?;

        match self.command {
            Commands::Deploy { target, credentials } => deploy(&cfg, &target, &credentials).await,
            Commands::Plan { target } => plan(&cfg, &target),
            Commands::Config {
                environment,
                environment_type,
                layer,
            } => show_config(&cfg, environment, environment_type, layer),
            Commands::Records { run_id, limit } => show_records(&cfg, run_id, limit),
        }
    }
}

/// Select the profile and read the repository
fn load_target(cfg: &ResolvedConfig, args: &TargetArgs) -> Result<(DeploymentTarget, Vec<LocalArtifact>)> {
    let target = cfg.select_target(&args.environment, &args.environment_type, args.layer.as_deref())?;

    let artifact_path = args
        .artifact_path
        .clone()
        .unwrap_or_else(|| cfg.artifact_path.clone());
    let repository = ArtifactRepository::new(&artifact_path, &target.target_folder);
    let artifacts = repository
        .scan()
        .with_context(|| format!("Failed to read artifacts from {}", repository.root().display()))?;

    info!(
        workspace = %target.workspace_name,
        folder = %repository.root().display(),
        artifacts = artifacts.len(),
        "Loaded repository"
    );
    Ok((target, artifacts))
}

/// Deploy one layer
async fn deploy(cfg: &ResolvedConfig, args: &TargetArgs, credentials: &CredentialArgs) -> Result<()> {
    let (target, artifacts) = load_target(cfg, args)?;

    let credentials = ClientCredentials {
        tenant_id: credentials.tenant_id.clone(),
        client_id: credentials.client_id.clone(),
        client_secret: credentials.client_secret.clone(),
    };
    let token = acquire_token(&cfg.token_url, &credentials)
        .await
        .context("Failed to acquire access token")?;
    let client = FabricClient::new(&cfg.api_base_url, token)?;

    let orchestrator = Orchestrator::new(client, cfg.clone());
    let report = orchestrator.deploy_workspace_report(&target, &artifacts).await?;

    // Record what was deployed before surfacing any phase failure
    if let Some(path) = &cfg.records_path {
        if let Err(e) = append_records(path, &report.run) {
            warn!(error = %e, path = %path.display(), "Failed to append deployment records");
        }
    }
    print_run(&report.run);

    report.into_result()?;
    Ok(())
}

fn append_records(path: &Path, run: &DeploymentRun) -> Result<()> {
    let log = RecordLog::open(path)?;
    let written = log.append_run(run)?;
    info!(records = written, path = %path.display(), "Deployment records appended");
    Ok(())
}

fn print_run(run: &DeploymentRun) {
    println!("Run ID: {}", run.id);
    println!("Workspace: {} ({})", run.workspace_name, run.workspace_id);
    println!("Strategy: {}", run.strategy);
    println!(
        "Notebooks: {} deployed, {} skipped",
        run.notebooks_deployed, run.notebooks_skipped
    );
    println!();
    println!("{:<14} {:<40} {:<38}", "TYPE", "NAME", "LIVE ID");
    println!("{}", "-".repeat(92));
    for record in &run.records {
        println!(
            "{:<14} {:<40} {:<38}",
            record.artifact_type.as_str(),
            record.artifact_name,
            record.live_id
        );
    }
}

/// Print what would be deployed and in which order
fn plan(cfg: &ResolvedConfig, args: &TargetArgs) -> Result<()> {
    let (target, artifacts) = load_target(cfg, args)?;
    let tables = ItemTables::build(&artifacts, &[])?;

    println!("Workspace: {}", target.workspace_name);
    println!("Folder:    {}", target.target_folder);
    println!();

    for artifact_type in crate::repository::SCANNED_TYPES {
        let names: Vec<&str> = artifacts
            .iter()
            .filter(|a| a.artifact_type == artifact_type)
            .map(|a| a.display_name.as_str())
            .collect();
        println!("{} ({}):", artifact_type, names.len());
        for name in names {
            let skipped = artifact_type == ArtifactType::Notebook
                && !target.notebooks_to_deploy.is_empty()
                && !target.notebooks_to_deploy.iter().any(|n| n == name);
            if skipped {
                println!("  {} (not in deployment list)", name);
            } else {
                println!("  {}", name);
            }
        }
    }

    let pipelines: Vec<LocalArtifact> = artifacts
        .iter()
        .filter(|a| a.artifact_type == ArtifactType::DataPipeline)
        .cloned()
        .collect();

    let creation = sort_artifacts(&pipelines, &tables, LookupSource::Repository, SortMode::ForCreation)?;
    let deletion = sort_artifacts(&pipelines, &tables, LookupSource::Repository, SortMode::ForDeletion)?;

    println!();
    println!("Pipeline creation order:");
    for (i, name) in creation.iter().enumerate() {
        println!("  {:>3}. {}", i + 1, name);
    }
    println!();
    println!("Pipeline deletion order:");
    for (i, name) in deletion.iter().enumerate() {
        println!("  {:>3}. {}", i + 1, name);
    }

    Ok(())
}

/// Show resolved configuration
fn show_config(
    cfg: &ResolvedConfig,
    environment: Option<String>,
    environment_type: Option<String>,
    layer: Option<String>,
) -> Result<()> {
    println!("fabdeploy configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!("Artifact path: {}", cfg.artifact_path.display());
    println!("Default layer: {}", cfg.transformation_layer);
    println!("API base URL:  {}", cfg.api_base_url);
    println!(
        "Records:       {}",
        cfg.records_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(disabled)".to_string())
    );
    println!();
    println!("Profiles:");
    if cfg.profiles.is_empty() {
        println!("  (none)");
    }
    for profile in &cfg.profiles {
        println!(
            "  {} / {} / {} -> {}{}",
            profile.deployment_env,
            profile.environment_type,
            profile.transformation_layer,
            profile.workspace_prefix,
            if profile.to_be_onboarded { "" } else { " (not onboarded)" }
        );
    }
    println!();
    println!("Connections:");
    for mapping in &cfg.connections {
        println!("  {}: {}", mapping.category, mapping.connection_name);
    }
    println!();
    println!("Throttle:");
    println!("  Batch size: {}", cfg.throttle.batch_size);
    println!("  Pause:      {}s", cfg.throttle.pause_seconds);
    println!();
    println!("Environment:");
    println!("  Name:    {}", cfg.environment.name);
    println!("  Runtime: {}", cfg.environment.runtime_version);
    println!("  Timeout: {}s", cfg.environment.publish_timeout_seconds);

    if let (Some(environment), Some(environment_type)) = (environment, environment_type) {
        let target = cfg.select_target(&environment, &environment_type, layer.as_deref())?;
        println!();
        println!("Target:");
        println!("  Workspace: {}", target.workspace_name);
        println!("  Capacity:  {}", target.capacity_id);
        println!("  Folder:    {}", target.target_folder);
        println!("  Groups:    {}", target.default_groups.join(", "));
        if target.notebooks_to_deploy.is_empty() {
            println!("  Notebooks: (all)");
        } else {
            println!("  Notebooks: {}", target.notebooks_to_deploy.join(", "));
        }
    }

    Ok(())
}

/// Show ledger entries, newest last
fn show_records(cfg: &ResolvedConfig, run_id: Option<String>, limit: usize) -> Result<()> {
    let Some(path) = &cfg.records_path else {
        println!("No records_path configured");
        return Ok(());
    };
    let log = RecordLog::open(path)?;

    let entries = match run_id {
        Some(id) => {
            let id = Uuid::parse_str(&id).with_context(|| format!("Invalid run ID: {}", id))?;
            log.run_entries(id)?
        }
        None => log.replay()?,
    };

    if entries.is_empty() {
        println!("No records found");
        return Ok(());
    }

    println!("{:<26} {:<38} {:<14} {:<32}", "TIMESTAMP", "RUN ID", "TYPE", "NAME");
    println!("{}", "-".repeat(112));
    let skip = entries.len().saturating_sub(limit);
    for entry in entries.iter().skip(skip) {
        println!(
            "{:<26} {:<38} {:<14} {:<32}",
            entry.ts.format("%Y-%m-%d %H:%M:%S"),
            entry.run_id,
            entry.record.artifact_type.as_str(),
            entry.record.artifact_name
        );
    }

    Ok(())
}
