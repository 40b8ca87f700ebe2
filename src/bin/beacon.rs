use std::sync::Arc;

use anyhow::Context;
use beacon::{
    actors::Scheduler,
    clients::{
        ProbeClient, WeatherClient,
        probe::{IcmpProbeClient, SystemPingClient},
        weather::OpenWeatherClient,
    },
    config::{ProbeMethod, ResolvedConfig, read_config_file},
    monitors::{LivenessMonitorManager, WeatherReportManager},
    notifications,
    storage::{self, Account, Capability, MonitorStore},
    util::get_config_path,
};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(version, about)]
struct Args {
    /// Config file (defaults to $BEACON_CONFIG or ./beacon.json)
    #[arg(short)]
    file: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the scheduler until interrupted
    Run,

    /// Probe an address now and notify the account
    Probe {
        #[arg(long)]
        account: i64,
        address: String,
    },

    /// Check the weather of a monitor now and notify the account
    Weather {
        #[arg(long)]
        account: i64,
        #[arg(long)]
        monitor: i64,
    },

    /// Start tracking the weather of a location
    WatchLocation {
        #[arg(long)]
        account: i64,
        location: String,
    },

    /// Run a single sweep and print its summary
    Sweep { kind: SweepKind },

    /// Create or update an account (seeding and local testing)
    Account {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "client")]
        role: String,
        /// Mark the account inactive
        #[arg(long)]
        inactive: bool,
        /// Grant the weather tracking capability
        #[arg(long)]
        weather: bool,
        /// Grant the ping monitoring capability
        #[arg(long)]
        ping: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SweepKind {
    Liveness,
    Weather,
}

fn init(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = filter::Targets::new().with_targets(vec![("beacon", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

struct Engine {
    store: Arc<dyn MonitorStore>,
    liveness: Arc<LivenessMonitorManager>,
    weather: Arc<WeatherReportManager>,
}

async fn build(config: &ResolvedConfig) -> anyhow::Result<Engine> {
    let store = storage::open(&config.storage)
        .await
        .context("failed to open monitor store")?;

    let notifier = notifications::from_config(&config.transport)?;

    let prober: Arc<dyn ProbeClient> = match config.probe_method {
        ProbeMethod::System => Arc::new(SystemPingClient::new(config.ping_count)),
        ProbeMethod::Icmp => Arc::new(
            IcmpProbeClient::new().context("failed to open ICMP sockets (missing privileges?)")?,
        ),
    };

    let api_key = config.weather_api_key.clone().unwrap_or_else(|| {
        warn!("no weather API key configured, lookups will be rejected");
        String::new()
    });
    let weather_client: Arc<dyn WeatherClient> =
        Arc::new(OpenWeatherClient::new(&config.weather_api_url, api_key));

    let liveness = Arc::new(LivenessMonitorManager::new(
        store.clone(),
        prober,
        notifier.clone(),
        config.liveness.clone(),
    ));
    let weather = Arc::new(WeatherReportManager::new(
        store.clone(),
        weather_client,
        notifier,
        config.weather.clone(),
    ));

    Ok(Engine {
        store,
        liveness,
        weather,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let path = args.file.clone().unwrap_or_else(get_config_path);
    let config = read_config_file(&path)
        .with_context(|| format!("failed to read config file {path}"))?
        .resolve()?;

    let engine = build(&config).await?;

    let health = engine.store.health_check().await?;
    if !health.healthy {
        warn!("monitor store is unhealthy: {}", health.message);
    }

    match args.command {
        Command::Run => {
            let scheduler = Scheduler::start(
                engine.liveness.clone(),
                engine.weather.clone(),
                &config.scheduler,
            )?;

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
            info!("interrupted");

            scheduler.stop().await;
        }

        Command::Probe { account, address } => {
            let result = engine.liveness.probe_now(account, &address).await?;
            println!("{address}: {}", result.state());
            if !result.diagnostic().is_empty() {
                println!("{}", result.diagnostic());
            }
        }

        Command::Weather { account, monitor } => {
            let report = engine.weather.check_now(account, monitor).await?;
            let snapshot = &report.snapshot;
            println!(
                "{}: {:.1}°C, {}",
                snapshot.location, snapshot.temperature, snapshot.description
            );
            for recommendation in &report.recommendations {
                println!("- {}", recommendation.text());
            }
        }

        Command::WatchLocation { account, location } => {
            let monitor = engine.weather.watch_location(account, &location).await?;
            println!("weather monitor {} tracks {}", monitor.id, monitor.location);
        }

        Command::Sweep { kind } => {
            let summary = match kind {
                SweepKind::Liveness => engine.liveness.sweep().await,
                SweepKind::Weather => engine.weather.sweep_daily().await,
            };
            println!("{summary}");
        }

        Command::Account {
            id,
            email,
            role,
            inactive,
            weather,
            ping,
        } => {
            engine
                .store
                .upsert_account(Account {
                    id,
                    email,
                    role,
                    is_active: !inactive,
                })
                .await?;
            engine
                .store
                .set_capability(id, Capability::WeatherTracking, weather)
                .await?;
            engine
                .store
                .set_capability(id, Capability::PingMonitoring, ping)
                .await?;
            println!("account {id} saved");
        }
    }

    engine.store.close().await?;

    Ok(())
}
