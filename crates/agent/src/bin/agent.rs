use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lookout_agent::agent_modules::config::load_config;
use lookout_agent::agent_modules::lifecycle::LifecycleController;
use lookout_agent::agent_modules::notify::{LogNotifier, NotificationDispatcher};
use lookout_agent::agent_modules::probe::{ProbeRegistry, ProbeRequest};
use lookout_agent::agent_modules::repository::InMemoryRepository;
use lookout_agent::agent_modules::service_monitor::MonitorScheduler;
use lookout_agent::version::VERSION;
use lookout_common::{MonitorTarget, MonitorType};

#[derive(Parser, Debug)]
#[command(version = VERSION, about = "Runs health-check monitors and escalates failures")]
struct Args {
    /// Path to the agent configuration file
    #[arg(short, long, default_value = "agent_config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every configured monitor until Ctrl-C (the default)
    Run,
    /// Probe a target once and exit non-zero if it is unhealthy
    Check {
        /// 1 site, 2 port, 3 host alive, 4 process, 5 script
        #[arg(long = "type")]
        monitor_type: u8,
        #[arg(long = "item")]
        items: Vec<String>,
        /// Seconds
        #[arg(long, default_value_t = 5)]
        timeout: u64,
        #[arg(long, default_value = "")]
        process: String,
        #[arg(long, default_value = "")]
        script: String,
    },
}

fn init_logging(log_dir: &Path) {
    // JSON file, rotated daily
    let file_appender = rolling::daily(log_dir, "agent.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

async fn run(config_path: &Path) -> Result<(), Box<dyn Error>> {
    let config = load_config(config_path)?;
    init_logging(&config.log_dir);
    info!(version = VERSION, config = %config_path.display(), "Starting lookout agent...");

    let registry = Arc::new(ProbeRegistry::with_defaults()?);
    let dispatcher = Arc::new(NotificationDispatcher::new(
        Arc::new(LogNotifier),
        config.notify_timeout(),
    ));
    let repository = Arc::new(InMemoryRepository::with_monitors(config.valid_monitors()));
    let lifecycle = LifecycleController::new(
        MonitorScheduler::new(registry, dispatcher),
        repository.clone(),
    );

    lifecycle.start_all().await?;

    tokio::select! {
        _ = reload_loop(config_path, config.reload_interval(), &repository, &lifecycle) => {}
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Received Ctrl-C. Shutting down."),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C. Shutting down."),
        },
    }

    lifecycle.shutdown().await;
    info!("Agent stopped.");
    Ok(())
}

/// Re-reads the config file every `interval` and reconciles running monitors with it.
async fn reload_loop(
    config_path: &Path,
    interval: Option<Duration>,
    repository: &InMemoryRepository,
    lifecycle: &LifecycleController,
) {
    let Some(interval) = interval else {
        info!("Config reload disabled.");
        return futures::future::pending::<()>().await;
    };

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match load_config(config_path) {
            Ok(config) => {
                let desired = repository.replace_all(config.valid_monitors()).await;
                lifecycle.reconcile(desired).await;
                info!(running = lifecycle.running_ids().len(), "Config reloaded.");
            }
            Err(e) => warn!(error = %e, "Config reload failed. Keeping the current monitors."),
        }
    }
}

async fn check(request: ProbeRequest) -> Result<bool, Box<dyn Error>> {
    request.target.validate_for(request.monitor_type)?;
    let registry = ProbeRegistry::with_defaults()?;
    let outcome = registry.check(&request).await;

    let elapsed_ms = outcome.elapsed.as_millis();
    if outcome.ok {
        println!("OK ({elapsed_ms}ms): {}", outcome.detail);
    } else {
        eprintln!("FAILED ({elapsed_ms}ms): {}", outcome.detail);
    }
    Ok(outcome.ok)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    let args = Args::parse();

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(&args.config).await,
        Command::Check {
            monitor_type,
            items,
            timeout,
            process,
            script,
        } => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
                )
                .init();

            let request = ProbeRequest {
                monitor_type: MonitorType::try_from(monitor_type)?,
                target: MonitorTarget {
                    items,
                    process,
                    script,
                },
                timeout: Duration::from_secs(timeout.max(1)),
            };
            if !check(request).await? {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
