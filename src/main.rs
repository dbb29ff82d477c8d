//! Berth command-line entry point.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{debug, info, warn};

mod allocator;
mod backup;
mod config;
mod descriptor;
mod error;
mod provision;
mod reconcile;
mod registry;
mod runtime;
mod types;

use allocator::LocalPortProbe;
use backup::SyncCommand;
use config::{BackupConfig, Settings};
use reconcile::{reconcile, MergePolicy};
use registry::RegistryStore;
use runtime::{DockerRuntime, RuntimeInspector};

#[derive(Debug, Parser)]
#[command(name = "berth", about = "Registry of hosted container deployments")]
struct Cli {
    /// Extra settings file (TOML, or JSON by extension)
    #[arg(long, global = true, env = "BERTH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Allocate a port and subnet for a new project and write its files
    Provision {
        name: String,
        /// Directory the project files are created in
        #[arg(long = "path")]
        path: PathBuf,
    },
    /// Refresh the registry from the running containers
    Scan {
        /// Drop records whose container is not running
        #[arg(long)]
        prune: bool,
    },
    /// Mirror every project's source tree into the backup destination
    Backup,
    /// Print the registry
    List,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let store = RegistryStore::new(&settings.registry_path);

    match cli.command {
        Command::Provision { name, path } => {
            let record = provision::provision(
                &store,
                &LocalPortProbe,
                settings.port_range(),
                &name,
                &path,
            )
            .with_context(|| format!("Failed to provision {name}"))?;
            println!("Files written to {}", path.display());
            println!(
                "Port: {}, Subnet: {}",
                record
                    .ports
                    .values()
                    .next()
                    .map(|p| p.to_string())
                    .unwrap_or_default(),
                record.subnet.as_deref().unwrap_or("-")
            );
        }
        Command::Scan { prune } => {
            let existing = store.load()?;
            let docker = DockerRuntime::connect().context("Failed to connect to Docker")?;
            let inspector = RuntimeInspector::new(&docker, &settings.default_app_root);
            let policy = MergePolicy {
                prune_missing: prune,
            };
            let (updated, report) = reconcile(&existing, &inspector, policy).await?;

            if report.added.is_empty() {
                info!("No new containers to add");
            } else {
                info!(
                    "Adding {} container(s): {}",
                    report.added.len(),
                    report.added.join(", ")
                );
            }
            if !report.updated.is_empty() {
                info!("Refreshed {} container(s)", report.updated.len());
            }
            debug!("{} container(s) unchanged", report.unchanged.len());
            if !report.pruned.is_empty() {
                warn!("Pruned {}", report.pruned.join(", "));
            }
            store.save(&updated)?;
        }
        Command::Backup => {
            let backup_config = BackupConfig::load(&settings.backup_config_path)?;
            let registry = store.load_required()?;
            let mirror = SyncCommand::new(&settings.sync_program, settings.sync_args.clone());

            let report = backup::run(&registry, &backup_config.destination, &mirror);
            info!(
                "Backup finished: {} synced, {} skipped, {} failed",
                report.synced.len(),
                report.skipped.len(),
                report.failed.len()
            );
            if !report.is_clean() {
                anyhow::bail!("backup failed for: {}", report.failed.join(", "));
            }
        }
        Command::List => {
            let registry = store.load()?;
            if registry.is_empty() {
                println!("No deployments in {}", store.path().display());
            }
            for record in registry.iter() {
                println!("{record}");
            }
        }
    }

    Ok(())
}
