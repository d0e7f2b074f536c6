//! Binary entry point for the disk migration CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use disk_migration::{
    AssumeYes, Cluster, ClusterError, ConfigError, Confirm, CopyLevel, FileLogSink, KubeCluster,
    Maintenance, MigrationConfig, MigrationError, MigrationOrchestrator, MigrationSettings, Poller,
    Rebinder, TerminalPrompt, Transition, VolumeOperations, logging, templates,
};

mod cli;

use cli::{
    CleanupCommand, Cli, ClaimTarget, CopyLevelArg, DeleteChainCommand, FixPoliciesCommand,
    ForceBindCommand, MigrateCommand, RebindCommand,
};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("could not connect to the cluster: {0}")]
    Connect(#[from] ClusterError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

#[tokio::main]
async fn main() {
    if !logging::init() {
        debug!("tracing subscriber already installed");
    }
    let cli = Cli::parse();
    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = MigrationConfig::load_without_cli_args()?;
    config.validate()?;

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());
    let poller = config.poller().with_cancellation(cancel);
    let cluster = KubeCluster::connect().await?;
    dispatch(cli, &config, cluster, poller).await
}

fn cancel_on_interrupt(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; abandoning pending waits");
            cancel.cancel();
        }
    });
}

async fn dispatch<C: Cluster>(
    cli: Cli,
    config: &MigrationConfig,
    cluster: C,
    poller: Poller,
) -> Result<(), CliError> {
    match cli {
        Cli::Migrate(command) => migrate(&command, config, cluster, poller).await,
        Cli::Rebind(command) => rebind(&command, config, &cluster, poller).await,
        Cli::ForceBind(command) => force_bind(&command, config, &cluster, poller).await,
        Cli::DeleteChain(command) => delete_chain(command, config, cluster, poller).await,
        Cli::CleanupPvs(command) => cleanup(&command, &cluster, poller).await,
        Cli::FixReclaimPolicies(command) => fix_policies(&command, &cluster, poller).await,
    }
}

async fn migrate<C: Cluster>(
    command: &MigrateCommand,
    config: &MigrationConfig,
    cluster: C,
    poller: Poller,
) -> Result<(), CliError> {
    let namespace = config.namespace_or(command.namespace.namespace.as_deref());
    let claim = resolve_claim(&command.target, config);
    let settings =
        MigrationSettings::from_config(config).with_copy_level(copy_level(command.copy_level));
    let orchestrator =
        MigrationOrchestrator::new(cluster, FileLogSink::new(config.log_dir()), settings)
            .with_poller(poller);

    let volume = orchestrator.migrate_volume(&claim, namespace).await?;
    info!(claim = %claim, volume = %volume, "migration complete");
    Ok(())
}

async fn rebind<C: Cluster>(
    command: &RebindCommand,
    config: &MigrationConfig,
    cluster: &C,
    poller: Poller,
) -> Result<(), CliError> {
    let namespace = config.namespace_or(command.namespace.namespace.as_deref());
    let rebinder = Rebinder::new(cluster, poller);
    match command.from_volume.as_deref() {
        Some(source) => {
            rebinder
                .rebind_from_volume(source, &command.claim, &command.volume, namespace)
                .await?;
        }
        None => {
            rebinder
                .rebind_claim_to_volume(&command.claim, &command.volume, namespace)
                .await?;
        }
    }
    Ok(())
}

async fn force_bind<C: Cluster>(
    command: &ForceBindCommand,
    config: &MigrationConfig,
    cluster: &C,
    poller: Poller,
) -> Result<(), CliError> {
    let namespace = config.namespace_or(command.namespace.namespace.as_deref());
    let outcome = VolumeOperations::new(cluster, poller)
        .set_claim_ref(&command.volume, &command.claim, namespace)
        .await?;
    if outcome == Transition::Applied {
        info!(volume = %command.volume, claim = %command.claim, "volume bound");
    }
    Ok(())
}

async fn delete_chain<C: Cluster>(
    command: DeleteChainCommand,
    config: &MigrationConfig,
    cluster: C,
    poller: Poller,
) -> Result<(), CliError> {
    let namespace = config.namespace_or(command.namespace.namespace.as_deref());
    let claim = resolve_claim(&command.target, config);
    let mut settings = MigrationSettings::from_config(config);
    if let Some(chain) = command.chain_name {
        settings.chain = chain;
    }

    let question = format!(
        "Delete chain {} from claim {namespace}/{claim}?",
        settings.chain
    );
    if !confirmer(command.yes).confirm(&question) {
        info!(claim = %claim, "nothing deleted");
        return Ok(());
    }

    let orchestrator =
        MigrationOrchestrator::new(cluster, FileLogSink::new(config.log_dir()), settings)
            .with_poller(poller);
    orchestrator
        .delete_chain(&claim, namespace, !command.keep_frontier)
        .await?;
    info!(claim = %claim, "chain deleted");
    Ok(())
}

async fn cleanup<C: Cluster>(
    command: &CleanupCommand,
    cluster: &C,
    poller: Poller,
) -> Result<(), CliError> {
    let summary = Maintenance::new(cluster, poller, confirmer(command.yes))
        .cleanup_volumes(&command.storage_class_prefix)
        .await?;
    info!(
        deleted_volumes = summary.deleted_volumes.len(),
        deleted_claims = summary.deleted_claims.len(),
        skipped = summary.skipped.len(),
        "cleanup finished"
    );
    Ok(())
}

async fn fix_policies<C: Cluster>(
    command: &FixPoliciesCommand,
    cluster: &C,
    poller: Poller,
) -> Result<(), CliError> {
    let summary = Maintenance::new(cluster, poller, confirmer(command.yes))
        .fix_reclaim_policies()
        .await?;
    info!(
        patched = summary.patched,
        unchanged = summary.unchanged,
        declined = summary.declined,
        "reclaim policies fixed"
    );
    Ok(())
}

fn resolve_claim(target: &ClaimTarget, config: &MigrationConfig) -> String {
    if target.pod {
        templates::pod_claim_name(&config.claim_prefix, &target.claim)
    } else {
        target.claim.clone()
    }
}

const fn copy_level(arg: CopyLevelArg) -> CopyLevel {
    match arg {
        CopyLevelArg::All => CopyLevel::All,
        CopyLevelArg::ChainOnly => CopyLevel::ChainOnly,
        CopyLevelArg::PrintOnly => CopyLevel::PrintOnly,
    }
}

fn confirmer(assume_yes: bool) -> Box<dyn Confirm> {
    if assume_yes {
        Box::new(AssumeYes)
    } else {
        Box::new(TerminalPrompt)
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "error: {err}").ok();
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
