use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use nova_preflight::{
    CheckReport, Connection, MigrationCheck, MigrationTarget, PreflightError, TracingObserver,
    config::PreflightConfig,
    inventory::{Inventory, InventoryConnection},
    log_info, log_warn, logger, sweep_hosts,
    xenapi::{Host, Network, OpaqueRef, Sr, Vm},
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "nova-preflight")]
#[command(about = "Check whether a VM can be live-migrated to another host")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the preflight configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pool inventory to check against (overrides the configured one)
    #[arg(short, long)]
    inventory: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check one destination host
    Check {
        #[command(flatten)]
        target: TargetArgs,
        /// Destination host (reference or name)
        #[arg(long)]
        host: String,
    },
    /// Check every host of the destination pool
    Sweep {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// List the pools in the inventory
    #[command(alias = "ls")]
    Inventory,
}

#[derive(Args)]
struct TargetArgs {
    /// Pool the VM currently lives in
    #[arg(long)]
    pool: String,
    /// Destination pool (defaults to the VM's own pool)
    #[arg(long)]
    to_pool: Option<String>,
    /// VM to migrate (reference or name)
    #[arg(long)]
    vm: String,
    /// Candidate destination SR, in order of preference (repeatable)
    #[arg(long = "sr")]
    srs: Vec<String>,
    /// Destination network for every VIF
    #[arg(long)]
    network: Option<String>,
    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

struct Resolved {
    vm: Vm,
    source: Arc<dyn Connection>,
    destination: Arc<InventoryConnection>,
    target: MigrationTarget,
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(PreflightConfig::default_path);
    let config = match &config_path {
        Some(path) => PreflightConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PreflightConfig::default(),
    };

    let filter = if cli.verbose {
        "nova_preflight=debug".to_string()
    } else {
        config.logging.filter.clone()
    };
    logger::init(&filter);

    let Some(inventory_path) = cli.inventory.clone().or(config.inventory.clone()) else {
        bail!("no inventory given; pass --inventory or set `inventory` in the config");
    };
    let inventory = Inventory::from_file(&inventory_path)
        .with_context(|| format!("loading inventory {}", inventory_path.display()))?;

    match cli.command {
        Commands::Check { target, host } => {
            let resolved = resolve(&inventory, target)?;
            let host = find_host(resolved.destination.as_ref(), &host)?;
            log_info!(
                "Checking VM '{}' against host '{}'",
                resolved.vm.name_label,
                host.name_label
            );

            let report = MigrationCheck::new(
                resolved.vm,
                resolved.source,
                host.opaque_ref,
                resolved.target,
            )
            .spawn()
            .await
            .context("migration check task")?;

            print_report(&report, resolved.json)?;
            if !report.is_feasible() {
                std::process::exit(1);
            }
        }
        Commands::Sweep { target } => {
            let resolved = resolve(&inventory, target)?;
            let hosts: Vec<OpaqueRef<Host>> = resolved
                .destination
                .cache()
                .all::<Host>()
                .into_iter()
                .map(|host| host.opaque_ref)
                .collect();
            if hosts.is_empty() {
                log_warn!("Destination pool {} has no hosts", resolved.destination.id());
            }

            let reports = sweep_hosts(
                resolved.vm,
                resolved.source,
                hosts,
                resolved.target,
                Arc::new(TracingObserver),
                config.sweep.max_concurrent,
            )
            .await?;

            if resolved.json {
                println!("{}", serde_json::to_string_pretty(&reports)?);
            } else {
                for report in &reports {
                    println!("{}", report);
                }
            }
            if !reports.iter().any(CheckReport::is_feasible) {
                std::process::exit(1);
            }
        }
        Commands::Inventory => {
            println!("{:<24} {:<6} {:<6} {:<6} {:<6}", "POOL", "VMS", "HOSTS", "SRS", "NETS");
            println!("{}", "=".repeat(52));
            for name in inventory.list_pools() {
                let pool = inventory.pool(name)?;
                println!(
                    "{:<24} {:<6} {:<6} {:<6} {:<6}",
                    name,
                    pool.vm.len(),
                    pool.host.len(),
                    pool.sr.len(),
                    pool.network.len()
                );
            }
        }
    }

    Ok(())
}

fn resolve(inventory: &Inventory, args: TargetArgs) -> anyhow::Result<Resolved> {
    let source = Arc::new(inventory.connect(&args.pool)?);
    let destination = match &args.to_pool {
        Some(pool) if pool != &args.pool => Arc::new(inventory.connect(pool)?),
        _ => Arc::clone(&source),
    };

    let vm = source
        .cache()
        .find::<Vm>(|vm| vm.opaque_ref.as_str() == args.vm || vm.name_label == args.vm)
        .ok_or(PreflightError::ObjectNotFound {
            kind: "VM",
            reference: args.vm.clone(),
        })?;

    let target_srs: Vec<OpaqueRef<Sr>> = args
        .srs
        .iter()
        .map(|sr| OpaqueRef::new(sr.as_str()))
        .collect();
    let mut target = MigrationTarget::new(destination.clone(), target_srs);
    if let Some(network) = &args.network {
        target = target.with_network(OpaqueRef::<Network>::new(network.as_str()));
    }

    Ok(Resolved {
        vm,
        source,
        destination,
        target,
        json: args.json,
    })
}

fn find_host(destination: &InventoryConnection, key: &str) -> Result<Host, PreflightError> {
    destination
        .cache()
        .find::<Host>(|host| host.opaque_ref.as_str() == key || host.name_label == key)
        .ok_or(PreflightError::ObjectNotFound {
            kind: "Host",
            reference: key.to_string(),
        })
}

fn print_report(report: &CheckReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!("{}", report);
    }
    Ok(())
}
