use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tpu_fleet_common::FleetConfig;
use tpu_fleet_orchestrator::provider_manager::ProviderManager;
use tpu_fleet_orchestrator::reconcile_job;
use tpu_fleet_orchestrator::settings::Settings;
use tpu_fleet_orchestrator::{admin, summary, Reconciler, RemediationTask};

#[derive(Parser)]
#[command(
    name = "tpu-fleet",
    about = "Keeps a fleet of preemptible TPU pods created, set up and running",
    version
)]
struct Cli {
    /// Fleet definition (JSON). Overrides FLEET_CONFIG_FILE.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile forever (default)
    Run,
    /// Run a single reconcile cycle and exit
    Once,
    /// Show what the next cycle would create or recreate, without acting
    Plan,
    /// Create, set up and launch one fleet member
    Create { name: String },
    /// Delete one fleet member (simulates a preemption)
    Destroy { name: String },
    /// Validate the fleet definition and print its capacity classes
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::from_env();
    if let Some(path) = cli.config {
        settings.fleet_config_file = path;
    }

    let config = FleetConfig::load(&settings.fleet_config_file)
        .with_context(|| format!("loading {}", settings.fleet_config_file.display()))?;
    for warning in config.warnings() {
        eprintln!("⚠️  {}", warning);
    }
    let command = cli.command.unwrap_or(Commands::Run);

    if let Commands::CheckConfig = command {
        print_config(&config);
        return Ok(());
    }

    let config = Arc::new(config);
    let provider = ProviderManager::get_provider(&settings, &config)
        .ok_or_else(|| anyhow!("unknown or disabled provider {:?}", settings.provider))?;
    let bootstrapper = ProviderManager::get_bootstrapper(&settings)
        .ok_or_else(|| anyhow!("LAUNCHER_CMD is empty"))?;
    let reconciler = Arc::new(Reconciler::new(
        config.clone(),
        provider,
        bootstrapper,
        settings.max_concurrent_tasks,
    ));
    println!(
        "✅ Fleet loaded: {} instance(s), {} zone(s), provider={}",
        config.scripts.len(),
        config.zones.len(),
        settings.provider
    );

    match command {
        Commands::Run => run(reconciler, &settings).await,
        Commands::Once => {
            let report = reconciler.run_cycle().await?;
            summary::print_summary(&report);
            if report.failure_count() > 0 {
                bail!("{} remediation task(s) failed", report.failure_count());
            }
            Ok(())
        }
        Commands::Plan => {
            let (snapshot, plan) = reconciler.plan().await?;
            for failure in &snapshot.failed_zones {
                println!("⚠️  Zone {} unavailable: {}", failure.zone, failure.error);
            }
            if plan.is_empty() {
                println!("✅ Nothing to do");
            }
            for task in plan.tasks() {
                println!("🔧 would {}", task);
            }
            println!(
                "{}",
                summary::render_status(plan.desired_records(&config), plan.matched.len())
            );
            Ok(())
        }
        Commands::Create { name } => {
            ensure_member(&config, &name)?;
            reconciler
                .remediator()
                .execute(&RemediationTask::create(&name))
                .await
        }
        Commands::Destroy { name } => {
            ensure_member(&config, &name)?;
            let zone = config
                .class_for(&name)
                .map(|c| c.zone.clone())
                .ok_or_else(|| anyhow!("{} belongs to no capacity class", name))?;
            println!("Simulating interruption for TPU {}...", name);
            if reconciler.remediator().destroy(&zone, &name).await? {
                println!("TPU {} has been deleted.", name);
            } else {
                println!("TPU {} was already gone.", name);
            }
            Ok(())
        }
        Commands::CheckConfig => Ok(()),
    }
}

fn ensure_member(config: &FleetConfig, name: &str) -> Result<()> {
    if !config.is_desired(name) {
        bail!("{} is not a member of the fleet", name);
    }
    Ok(())
}

fn print_config(config: &FleetConfig) {
    println!("✅ Fleet definition is valid");
    println!("Zones: {}", config.zones.join(", "));
    println!("Managed prefixes: {}", config.managed_prefixes.join(", "));
    for class in &config.classes {
        println!(
            "Class {} ({} / {} / {:?}) in {}: {}",
            class.name,
            class.accelerator_type,
            class.software_version().unwrap_or_default(),
            class.provisioning,
            class.zone,
            class.members.iter().cloned().collect::<Vec<_>>().join(", ")
        );
    }
}

async fn run(reconciler: Arc<Reconciler>, settings: &Settings) -> Result<()> {
    let status = reconcile_job::new_status();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let job_status = status.clone();
    let timing = settings.timing.clone();
    let job_shutdown = shutdown_rx.clone();
    let job = tokio::spawn(async move {
        reconcile_job::run(reconciler, timing, job_status, job_shutdown).await;
    });

    let server = if settings.admin_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], settings.admin_port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding admin server on {}", addr))?;
        println!("Admin status listening on {}", addr);
        let mut server_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            let res = axum::serve(listener, admin::router(status))
                .with_graceful_shutdown(async move {
                    let _ = server_shutdown.changed().await;
                })
                .await;
            if let Err(e) = res {
                eprintln!("❌ Admin server error: {:?}", e);
            }
        }))
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to install CTRL+C handler")?;
    println!("🛑 Shutdown requested, waiting for the current cycle to finish...");
    let _ = shutdown_tx.send(true);

    let _ = job.await;
    if let Some(server) = server {
        let _ = server.await;
    }
    println!("TPU fleet orchestrator stopped");
    Ok(())
}
