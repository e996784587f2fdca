//! Aurora cluster backup/restore tool
//!
//! Sequences pg_dump/pg_restore, Secrets Manager, S3 transfer, RDS
//! endpoint discovery and SSM remote dispatch into one CLI.

mod backup;
mod config;
mod discovery;
mod dispatch;
mod errors;
mod maintenance;
mod restore;
mod secrets;

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use config::{Cli, Commands, OperationKind, RequestConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match run_app(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Operation failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn setup_logging(verbose: u8) {
    let default_filter = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();
}

async fn run_app(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Operate(args) => {
            let request = RequestConfig::from_args(&args)?;
            let sdk_config = config::load_sdk_config(&request.region).await;

            let credentials = secrets::resolve_credentials(&sdk_config, &request.secret_id)
                .await
                .context("credential resolution failed")?;

            match request.operation {
                OperationKind::Backup => {
                    backup::run_backup_flow(&sdk_config, &request, &credentials)
                        .await
                        .context("backup failed")?;
                }
                OperationKind::Restore => {
                    restore::run_restore_flow(&sdk_config, &request, &credentials)
                        .await
                        .context("restore failed")?;
                }
            }
            info!(
                "{} for cluster {} operation complete",
                request.operation, request.cluster
            );
        }
        Commands::Discover(args) => {
            let sdk_config = config::load_sdk_config(&args.region).await;
            let target = discovery::resolve_cluster_target(&sdk_config, &args.cluster, args.operation)
                .await
                .context("cluster discovery failed")?;

            let output_path = Path::new(config::DISCOVERY_OUTPUT_PATH);
            discovery::write_discovery_output(output_path, &target)
                .context("failed to write discovery output")?;
            info!(
                "Wrote endpoint details for cluster {} to {}",
                args.cluster,
                output_path.display()
            );
        }
        Commands::Dispatch(args) => {
            let request = RequestConfig::from_args(&args.request)?;
            let sdk_config = config::load_sdk_config(&request.region).await;

            let status = dispatch::run_dispatch_flow(
                &sdk_config,
                &request,
                &args.instance,
                Duration::from_secs(args.max_wait),
            )
            .await
            .context("remote dispatch failed")?;

            if status != dispatch::CommandStatus::Success {
                anyhow::bail!("remote command finished with status {}", status);
            }
            info!(
                "Remote {} on instance {} succeeded",
                request.operation, args.instance
            );
        }
    }
    Ok(())
}
