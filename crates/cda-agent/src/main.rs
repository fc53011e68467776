//! CDA Agent - Constrained-device telemetry
//!
//! Polls the device's sensors on a fixed interval and publishes each cycle
//! to an MQTT broker, buffering while the broker is unreachable.

use anyhow::Context;
use cda_capture::FaultPlan;
use cda_core::config::{AgentConfig, ConfigLoader};
use cda_core::{AcquisitionScheduler, Agent, CycleConfig, PayloadAssembler, RawSensor};
use cda_mqtt::{BrokerLink, ConnectionManager, LogLink, MqttConfig, MqttLink, Publisher};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "cda-agent")]
#[command(author = "RustyHive")]
#[command(version)]
#[command(about = "Telemetry agent for constrained sensor devices", long_about = None)]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log format (text, json)
    #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "CDA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll sensors and publish readings until stopped
    Run {
        /// Use simulated probes instead of hardware
        #[arg(long)]
        simulate: bool,

        /// Log messages instead of sending them to the broker
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        faults: FaultArgs,
    },

    /// Run a single acquisition cycle and print the payload
    Once {
        #[command(flatten)]
        faults: FaultArgs,
    },

    /// Show the effective configuration
    Config {
        /// Write the configuration to this file instead of printing it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Fault injection for simulated probes
#[derive(Args, Clone, Copy)]
struct FaultArgs {
    /// Fail every Nth sample (0 = never)
    #[arg(long, default_value = "0")]
    fail_every: u64,

    /// Hang past the read timeout on every Nth sample (0 = never)
    #[arg(long, default_value = "0")]
    hang_every: u64,

    /// Report an implausible value on every Nth sample (0 = never)
    #[arg(long, default_value = "0")]
    out_of_range_every: u64,
}

impl FaultArgs {
    fn plan(&self, config: &AgentConfig) -> FaultPlan {
        FaultPlan {
            fail_every: self.fail_every,
            hang_every: self.hang_every,
            hang_for: config.acquisition.read_timeout() * 2,
            out_of_range_every: self.out_of_range_every,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration file
    let loader = ConfigLoader::new().with_cli_path(cli.config.clone());
    let (config, load_error) = match loader.load() {
        Ok(config) => (config, None),
        Err(e) => (AgentConfig::default(), Some(e)),
    };

    init_logging(cli.verbose, &cli.format, &config.device.log_level)?;
    if let Some(e) = load_error {
        warn!("Failed to load configuration: {}, using defaults", e);
    }

    match cli.command {
        Commands::Run {
            simulate,
            dry_run,
            faults,
        } => run_command(config, simulate, dry_run, faults).await,
        Commands::Once { faults } => once_command(config, faults).await,
        Commands::Config { output } => config_command(&config, output),
    }
}

/// Install the global subscriber
///
/// The CLI verbose flag takes precedence over the configured level.
fn init_logging(verbose: u8, format: &str, config_level: &str) -> anyhow::Result<()> {
    let level = if verbose > 0 {
        match verbose {
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    } else {
        match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if format == "json" {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

fn build_sensors(
    config: &AgentConfig,
    simulate: bool,
    faults: FaultArgs,
) -> anyhow::Result<Vec<Arc<dyn RawSensor>>> {
    let kinds = config.acquisition.sensor_kinds()?;
    if !simulate {
        anyhow::bail!("No hardware probe backend is built in; run with --simulate");
    }
    Ok(cda_capture::simulated_sensors(&kinds, &faults.plan(config)))
}

fn build_agent(config: &AgentConfig, sensors: Vec<Arc<dyn RawSensor>>) -> Agent {
    Agent::new(
        AcquisitionScheduler::new(sensors),
        PayloadAssembler::new(
            config.device.device_id.as_str(),
            config.device.room_id.as_str(),
            config.device.battery_level,
        ),
        CycleConfig {
            read_interval: config.acquisition.read_interval(),
            policy: config.acquisition.read_policy(),
        },
    )
}

async fn run_command(
    config: AgentConfig,
    simulate: bool,
    dry_run: bool,
    faults: FaultArgs,
) -> anyhow::Result<()> {
    info!("Starting CDA agent {}...", cda_core::AGENT_VERSION);

    let sensors = build_sensors(&config, simulate, faults)?;
    let mqtt_config = MqttConfig::from_settings(&config.broker, &config.device.device_id)
        .context("Invalid broker configuration")?;
    info!("Broker settings: {:?}", mqtt_config);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Connection side
    let link: Box<dyn BrokerLink> = if dry_run {
        Box::new(LogLink::new())
    } else {
        Box::new(MqttLink::new(&mqtt_config))
    };
    let manager = ConnectionManager::new(mqtt_config.backoff(), mqtt_config.connect_timeout);
    let publisher = Arc::new(Publisher::new(link.sender(), manager.handle(), &mqtt_config));
    publisher.start_drain_worker(shutdown_tx.subscribe());
    let connection = manager.start(link, shutdown_tx.subscribe());

    // Acquisition side
    let agent = build_agent(&config, sensors);
    let agent_task = tokio::spawn(agent.run(publisher.clone(), shutdown_tx.subscribe()));

    println!();
    println!("  CDA Agent v{}", cda_core::AGENT_VERSION);
    println!();
    println!("  Device:  {} ({})", config.device.device_id, config.device.room_id);
    println!("  Topic:   {}", publisher.topic());
    if dry_run {
        println!("  Broker:  dry run, messages are logged only");
    } else {
        println!("  Broker:  {}:{}", mqtt_config.host, mqtt_config.port);
    }
    println!();
    println!("  Press Ctrl+C to stop");
    println!();

    let signal = wait_for_signal().await?;
    info!("Received {}, shutting down", signal);
    // Receivers that already finished are fine
    let _ = shutdown_tx.send(());

    let run_stats = agent_task.await.context("Cycle driver panicked")?;
    let connection_stats = connection.await.context("Connection manager panicked")?;
    let lost = publisher.shutdown();

    let stats = publisher.stats();
    info!(
        "Ran {} cycles ({} blind); published {} direct, {} drained, {} dropped, {} lost at shutdown",
        run_stats.cycles, run_stats.blind_cycles, stats.published_direct, stats.drained, stats.dropped, lost
    );
    info!(
        "Connection: {} attempts, {} failures, {} disconnects",
        connection_stats.connect_attempts,
        connection_stats.connect_failures,
        connection_stats.disconnects
    );
    info!("Agent stopped");

    Ok(())
}

async fn wait_for_signal() -> anyhow::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                Ok("SIGINT")
            }
            _ = sigterm.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("Ctrl+C")
    }
}

async fn once_command(config: AgentConfig, faults: FaultArgs) -> anyhow::Result<()> {
    let sensors = build_sensors(&config, true, faults)?;
    let mut agent = build_agent(&config, sensors);

    let message = agent.cycle().await;
    agent.scheduler().shutdown();

    println!("{}", serde_json::to_string_pretty(&message)?);
    Ok(())
}

fn config_command(config: &AgentConfig, output: Option<PathBuf>) -> anyhow::Result<()> {
    if let Some(path) = output {
        ConfigLoader::save(config, &path)?;
        println!("Configuration written to {}", path.display());
        return Ok(());
    }

    let mut shown = config.clone();
    if shown.broker.password.is_some() {
        shown.broker.password = Some("***".to_string());
    }
    println!("{}", toml::to_string_pretty(&shown)?);
    Ok(())
}
