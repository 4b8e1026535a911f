//! Monitrail CLI
//!
//! Validates GrandOutput configuration files, shows how topics are routed, and
//! runs a monitor fed from standard input.

use anyhow::Result;
use clap::{Parser, Subcommand};
use monitrail_core::{Monitor, MonitoringContext};
use monitrail_output::{
    BoundedStrategy, ChannelHost, ConfigWatcher, DispatcherConfig, GrandOutput, GrandOutputConfiguration, GrandOutputOptions,
    HandlerRegistry,
};
use monitrail_route::RouteResolver;
use monitrail_schema::LogLevel;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "monitrail")]
#[command(about = "Monitrail - Activity monitoring with topic-routed outputs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a configuration file
    Validate {
        /// GrandOutput configuration file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Show the handler chain of topics
    Route {
        /// GrandOutput configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Topics to resolve
        #[arg(required = true)]
        topics: Vec<String>,
    },

    /// Log standard input lines (`[level:] text`) through a GrandOutput
    Run {
        /// GrandOutput configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Topic of the monitor
        #[arg(short, long, default_value = "")]
        topic: String,

        /// Reload the configuration when the file changes
        #[arg(short, long)]
        watch: bool,

        /// Maximum number of queued events (unbounded when not set)
        #[arg(long)]
        capacity: Option<usize>,

        /// Log level
        #[arg(short, long, default_value = "info")]
        log_level: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config } => {
            setup_logging("info")?;
            validate_config(&config)?;
        }
        Commands::Route { config, topics } => {
            setup_logging("warn")?;
            show_routes(&config, &topics)?;
        }
        Commands::Run {
            config,
            topic,
            watch,
            capacity,
            log_level,
        } => {
            setup_logging(&log_level)?;
            run_monitor(config, topic, watch, capacity).await?;
        }
    }

    Ok(())
}

fn setup_logging(level: &str) -> Result<()> {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))?;

    Ok(())
}

fn load_config(path: &Path, registry: &HandlerRegistry) -> Result<GrandOutputConfiguration> {
    let mut config = GrandOutputConfiguration::new();
    let mut errors = Vec::new();
    if !config.load_from_file(path, registry, &mut errors) {
        anyhow::bail!("Invalid configuration '{}': {}", path.display(), errors.join("; "));
    }
    Ok(config)
}

fn validate_config(path: &Path) -> Result<()> {
    info!("Validating {}", path.display());

    let registry = HandlerRegistry::with_builtins();
    let config = load_config(path, &registry)?;
    let route = RouteResolver::resolve(config.route())?;
    let routes = route.route_count();

    // Handlers are opened then closed right away so that bad paths are reported here
    let host = ChannelHost::new(0, route, &registry)?;
    let handlers = host.handler_count();
    host.close();

    info!(
        routes,
        handlers,
        source_filters = config.source_filters().len(),
        "Validation complete"
    );
    Ok(())
}

fn show_routes(path: &Path, topics: &[String]) -> Result<()> {
    let config = load_config(path, &HandlerRegistry::with_builtins())?;
    let route = RouteResolver::resolve(config.route())?;

    for topic in topics {
        let actions: Vec<_> = route
            .collect_actions(topic)
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        println!("{:?}", topic);
        println!("  routes:  {}", route.matching_routes(topic).join(" > "));
        println!("  actions: {}", actions.join(", "));
    }
    Ok(())
}

/// `warn: disk almost full` logs a warning; a line without a known level prefix is logged as info
fn parse_line(line: &str) -> (LogLevel, &str) {
    if let Some((prefix, text)) = line.split_once(':') {
        if let Ok(level) = prefix.parse::<LogLevel>() {
            return (level, text.trim_start());
        }
    }
    (LogLevel::Info, line)
}

async fn run_monitor(config_path: PathBuf, topic: String, watch: bool, capacity: Option<usize>) -> Result<()> {
    info!(config = %config_path.display(), "Starting Monitrail");

    let context = Arc::new(MonitoringContext::new());
    let mut dispatcher = DispatcherConfig::default();
    if let Some(capacity) = capacity {
        dispatcher.strategy = Arc::new(BoundedStrategy::new(capacity));
    }
    let options = GrandOutputOptions {
        dispatcher,
        ..Default::default()
    };
    let output = GrandOutput::new(context.clone(), HandlerRegistry::with_builtins(), options)?;

    let mut watcher = None;
    if watch {
        let mut w = ConfigWatcher::new(&config_path, output.clone()).with_interval(Duration::from_secs(2));
        w.reload().await?;
        w.start();
        watcher = Some(w);
    } else {
        let config = load_config(&config_path, output.registry())?;
        let mut errors = Vec::new();
        if !output.set_configuration(&config, &mut errors) {
            anyhow::bail!("Configuration rejected: {}", errors.join("; "));
        }
    }

    let monitor = Monitor::with_topic(context.clone(), topic);
    output.register(&monitor)?;
    info!("Reading standard input. Press Ctrl+C to stop.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    let (level, text) = parse_line(&line);
                    monitor.log(level, text)?;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    if let Some(mut w) = watcher {
        w.stop();
    }
    let disposing = output.clone();
    tokio::task::spawn_blocking(move || disposing.dispose()).await?;

    let lost = output.lost_event_count();
    if lost > 0 {
        warn!(lost, "Events were lost under overload");
    }
    info!(
        lost,
        max_queued = output.max_queued_count(),
        critical_errors = context.critical_errors().total_count(),
        "Monitrail stopped"
    );
    context.shutdown();
    Ok(())
}
