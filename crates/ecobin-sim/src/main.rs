//! ecobin - Smart Waste Bin Telemetry Simulator
//!
//! Usage:
//!   ecobin run --broker-host localhost --interval-ms 5000
//!   ecobin run --loopback --ticks 20 --viewer
//!   ecobin view --db waste_data.db --limit 10
//!   ecobin roster

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use ecobin_core::{
    EcobinConfig, LoopbackLink, MqttLink, SimulationLoop, SqliteStore, TelemetryPublisher,
    TelemetryStore, topic_for,
};
use ecobin_sim::{connect_publisher, run_viewer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};

#[derive(Parser)]
#[command(name = "ecobin")]
#[command(about = "Smart waste bin sensor simulation with MQTT publishing and SQLite storage")]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ConfigArgs {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long)]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sensor simulation
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        #[arg(long)]
        broker_host: Option<String>,

        #[arg(long)]
        broker_port: Option<u16>,

        /// Tick interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Seed for reproducible sensor evolution
        #[arg(long)]
        seed: Option<u64>,

        /// Stop after this many ticks
        #[arg(long)]
        ticks: Option<u64>,

        /// Publish to an in-process link instead of a broker
        #[arg(long)]
        loopback: bool,

        /// Keep running with publishing disabled if the broker is unreachable
        #[arg(long)]
        allow_offline: bool,

        /// Show the live table alongside the simulation
        #[arg(long)]
        viewer: bool,
    },

    /// Show the latest stored readings
    View {
        #[command(flatten)]
        config: ConfigArgs,

        /// Number of readings to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Refresh interval in milliseconds
        #[arg(long)]
        refresh_ms: Option<u64>,

        /// Print one table and exit
        #[arg(long)]
        once: bool,
    },

    /// List the configured bins and their topics
    Roster {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            config,
            broker_host,
            broker_port,
            interval_ms,
            seed,
            ticks,
            loopback,
            allow_offline,
            viewer,
        } => {
            let mut cfg = load_config(&config)?;
            if let Some(host) = broker_host {
                cfg.broker.host = host;
            }
            if let Some(port) = broker_port {
                cfg.broker.port = port;
            }
            if let Some(interval_ms) = interval_ms {
                cfg.simulation.interval_ms = interval_ms;
            }
            if seed.is_some() {
                cfg.simulation.seed = seed;
            }
            if ticks.is_some() {
                cfg.simulation.max_ticks = ticks;
            }
            if allow_offline {
                cfg.broker.publish_required = false;
            }
            cfg.validate()?;
            run_simulation(cfg, loopback, viewer).await
        }
        Commands::View {
            config,
            limit,
            refresh_ms,
            once,
        } => {
            let mut cfg = load_config(&config)?;
            if let Some(limit) = limit {
                cfg.viewer.limit = limit;
            }
            if let Some(refresh_ms) = refresh_ms {
                cfg.viewer.refresh_ms = refresh_ms;
            }
            cfg.validate()?;
            run_view(cfg, once).await
        }
        Commands::Roster { config } => {
            let cfg = load_config(&config)?;
            print_roster(&cfg);
            Ok(())
        }
    }
}

fn load_config(args: &ConfigArgs) -> Result<EcobinConfig> {
    let mut cfg = match &args.config {
        Some(path) => EcobinConfig::load(path)?,
        None => EcobinConfig::default(),
    };
    if let Some(db) = &args.db {
        cfg.store.path = db.clone();
    }
    Ok(cfg)
}

async fn run_simulation(cfg: EcobinConfig, loopback: bool, with_viewer: bool) -> Result<()> {
    let store = Arc::new(
        SqliteStore::open(&cfg.store.path, cfg.store.busy_timeout())
            .with_context(|| format!("opening store at {}", cfg.store.path.display()))?,
    );
    store.ensure_schema()?;

    let publisher_config = cfg.broker.publisher_config();
    let mut loopback_controller = None;
    let publisher = if loopback {
        let (link, controller) = LoopbackLink::connected();
        loopback_controller = Some(controller);
        TelemetryPublisher::connect(link, publisher_config).await?
    } else {
        let link = MqttLink::split(&cfg.broker.mqtt_settings());
        connect_publisher(link, publisher_config, cfg.broker.publish_required)
            .await
            .with_context(|| format!("connecting to {}:{}", cfg.broker.host, cfg.broker.port))?
    };

    let shutdown = CancellationToken::new();
    spawn_interrupt_handler(shutdown.clone());

    let viewer_task = if with_viewer {
        let reader: Arc<dyn TelemetryStore> = Arc::new(
            SqliteStore::open_read_only(&cfg.store.path, cfg.store.busy_timeout())
                .context("opening viewer connection")?,
        );
        let limit = cfg.viewer.limit;
        let refresh = Duration::from_millis(cfg.viewer.refresh_ms);
        let cancel = shutdown.clone();
        Some(tokio::spawn(async move {
            run_viewer(reader, limit, refresh, false, cancel, std::io::stdout()).await
        }))
    } else {
        None
    };

    let mut sim = SimulationLoop::new(
        cfg.roster.clone(),
        cfg.simulation.loop_settings(),
        publisher,
        store,
    );
    let stats = sim.run(shutdown.clone()).await;
    shutdown.cancel();

    if let Some(task) = viewer_task {
        task.await.context("viewer task panicked")??;
    }
    if let Some(controller) = loopback_controller {
        info!(messages = controller.message_count(), "Loopback link closed");
    }
    if stats.store_failures > 0 {
        warn!(failures = stats.store_failures, "Some readings were not stored");
    }
    Ok(())
}

async fn run_view(cfg: EcobinConfig, once: bool) -> Result<()> {
    if !cfg.store.path.exists() {
        bail!("no database at {}", cfg.store.path.display());
    }
    let store: Arc<dyn TelemetryStore> = Arc::new(
        SqliteStore::open_read_only(&cfg.store.path, cfg.store.busy_timeout())
            .with_context(|| format!("opening store at {}", cfg.store.path.display()))?,
    );

    let shutdown = CancellationToken::new();
    spawn_interrupt_handler(shutdown.clone());

    run_viewer(
        store,
        cfg.viewer.limit,
        Duration::from_millis(cfg.viewer.refresh_ms),
        once,
        shutdown,
        std::io::stdout(),
    )
    .await?;
    Ok(())
}

fn spawn_interrupt_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, finishing current tick");
                shutdown.cancel();
            }
            Err(e) => warn!(error = %e, "Could not listen for interrupt"),
        }
    });
}

fn print_roster(cfg: &EcobinConfig) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                  Configured Waste Bins                       ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    for bin in &cfg.roster {
        println!(
            "║ {:10} {:16} {:33} ║",
            bin.bin_id,
            bin.location,
            topic_for(&cfg.broker.topic_prefix, &bin.bin_id)
        );
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
}
