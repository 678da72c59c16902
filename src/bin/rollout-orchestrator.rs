use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollout_orchestrator::strategy::partition;
use rollout_orchestrator::{
    DeploymentStrategyConfig, DeploymentTarget, Orchestrator, RolloutConfig, TargetStatus,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "rollout-orchestrator")]
#[command(about = "Progressive multi-target rollouts: parallel, rolling, blue-green and canary")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct RolloutCli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Roll a release out according to a rollout file
    Deploy {
        /// Rollout file (YAML or JSON)
        config: PathBuf,

        /// Version to roll out
        #[arg(short, long)]
        release: String,

        /// Keep monitoring target health after the rollout until Ctrl-C
        #[arg(long)]
        monitor: bool,

        /// Show what would be deployed without executing
        #[arg(long)]
        dry_run: bool,
    },
    /// Load and validate a rollout file
    Validate {
        /// Rollout file (YAML or JSON)
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = RolloutCli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    info!("Starting rollout-orchestrator v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Validate { config } => {
            let config = load(&config)?;
            println!(
                "✅ {} target(s), {} strategy",
                config.targets.len(),
                config.strategy.kind()
            );
            Ok(())
        }
        Command::Deploy {
            config,
            release,
            monitor,
            dry_run,
        } => {
            let config = load(&config)?;
            if dry_run {
                print_plan(&config, &release);
                return Ok(());
            }
            run_deployment(&config, &release, monitor).await
        }
    }
}

fn load(path: &Path) -> Result<RolloutConfig> {
    RolloutConfig::from_file(path)
        .with_context(|| format!("Failed to load rollout file {}", path.display()))
}

async fn run_deployment(config: &RolloutConfig, release: &str, monitor: bool) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config);

    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, stopping after in-flight provisioning");
            token.cancel();
        }
    });

    let outcome = orchestrator.deploy(&config.strategy, release).await;
    print_status(&orchestrator.status().await, config);

    let report = match outcome {
        Ok(report) => report,
        Err(e) => {
            error!("Rollout failed: {}", e);
            return Err(e.into());
        }
    };

    println!();
    println!(
        "🚀 Rolled out {} ({} strategy) in {}s",
        report.version,
        report.strategy,
        report.duration().num_seconds()
    );
    println!("  Run: {}", report.run_id);
    println!("  Config hash: {}", report.config_hash);

    if monitor {
        println!();
        println!("👀 Monitoring target health, press Ctrl-C to stop");
        let handle = orchestrator.start_health_monitoring(config.settings.health_monitor_interval);
        orchestrator.cancellation_token().cancelled().await;
        handle.stop().await;
        print_status(&orchestrator.status().await, config);
    }

    Ok(())
}

fn print_status(status: &HashMap<String, DeploymentTarget>, config: &RolloutConfig) {
    println!();
    println!("📦 Target Status:");
    println!(
        "  {:<24} {:<8} {:<12} {:<10} {:>7}  {}",
        "TARGET", "ROLE", "STATUS", "HEALTH", "WEIGHT", "ERROR"
    );

    // Rollout file order rather than hash order.
    for spec in &config.targets {
        let Some(target) = status.get(&spec.id) else {
            continue;
        };
        let icon = match target.status {
            TargetStatus::Deployed if target.is_healthy() => "✅",
            TargetStatus::Deployed => "⚠️ ",
            TargetStatus::Failed => "❌",
            TargetStatus::RolledBack | TargetStatus::RollingBack => "↩️ ",
            TargetStatus::Pending | TargetStatus::Deploying => "⏳",
        };
        println!(
            "{} {:<24} {:<8} {:<12} {:<10} {:>6.1}%  {}",
            icon,
            target.id,
            target.role.to_string(),
            target.status.to_string(),
            target.health.to_string(),
            target.traffic_weight * 100.0,
            target.last_error.as_deref().unwrap_or("")
        );
    }
}

fn print_plan(config: &RolloutConfig, release: &str) {
    println!("📋 Dry run: {} strategy for version {}", config.strategy.kind(), release);
    println!();

    let ids: Vec<String> = config.targets.iter().map(|t| t.id.clone()).collect();
    match &config.strategy {
        DeploymentStrategyConfig::Parallel => {
            println!("  Deploy all at once: {}", ids.join(", "));
        }
        DeploymentStrategyConfig::Rolling(rolling) => {
            let batches = partition(&ids, rolling.batch_size);
            for (i, batch) in batches.iter().enumerate() {
                println!("  Batch {}/{}: {}", i + 1, batches.len(), batch.join(", "));
            }
            println!(
                "  Delay between batches: {:?}, rollback on failure: {}",
                rolling.batch_delay, rolling.rollback_on_failure
            );
        }
        DeploymentStrategyConfig::BlueGreen(bg) => {
            println!("  Deploy green: {}", bg.green.join(", "));
            println!("  Grace period: {:?}", bg.health_check_grace_period);
            println!(
                "  Switch traffic: {} -> {}",
                bg.active.join(", "),
                bg.green.join(", ")
            );
            if bg.destroy_standby {
                println!("  Destroy former active set afterwards");
            }
        }
        DeploymentStrategyConfig::Canary(canary) => {
            println!(
                "  Deploy canary: {} (baseline {})",
                canary.canary_targets.join(", "),
                canary.baseline_target
            );
            let mut steps = vec![canary.initial_traffic_percent];
            let mut percent = canary.initial_traffic_percent;
            while percent < canary.max_traffic_percent && canary.traffic_increment_step > 0.0 {
                percent = (percent + canary.traffic_increment_step).min(canary.max_traffic_percent);
                steps.push(percent);
            }
            let ramp: Vec<String> = steps.iter().map(|p| format!("{p:.1}%")).collect();
            println!(
                "  Ramp: {} every {:?} for at most {:?}",
                ramp.join(" -> "),
                canary.step_duration,
                canary.monitor_duration
            );
            println!(
                "  Auto promote: {}, auto rollback: {}",
                canary.auto_promote, canary.auto_rollback
            );
        }
    }
}
