use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::{ArgAction, Parser};
use neurio_bridge::{
    actors::poller::{PollCycle, PollerHandle},
    api::{ApiConfig, ApiState, spawn_api_server},
    bus::{Bus, MqttBus},
    config::{self, SharedConfig, read_config_file},
    discovery::{DiscoveryBuilder, metadata::StatusPageScraper},
    publisher::publish_discovery,
    reload::ConfigWatcher,
    sensor::SensorClient,
    snapshot::ReadingsStore,
};
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

const BROKER_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Publishes Neurio sensor readings to MQTT")]
struct Args {
    /// Config file
    #[arg(
        short,
        long,
        env = "NEURIO_BRIDGE_CONFIG",
        default_value = "config/default.toml"
    )]
    config: PathBuf,

    /// Allow cross-origin requests to the status API
    #[arg(long)]
    cors: bool,

    /// More output (-v debug, -vv trace)
    #[arg(short, action = ArgAction::Count)]
    verbose: u8,
}

fn init(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = filter::Targets::new().with_targets(vec![
        ("neurio_bridge", level),
        ("tower_http", level),
    ]);
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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let initial = read_config_file(&args.config)
        .with_context(|| format!("failed to load config from {}", args.config.display()))?;
    let bind_addr = SocketAddr::new(initial.bridge.address, initial.bridge.port);
    info!(
        "bridging {} sensor(s) to {}://{}:{}",
        initial.registry().len(),
        initial.mqtt.proto,
        initial.mqtt.host,
        initial.mqtt.port
    );

    let bus = Arc::new(MqttBus::connect(&initial.mqtt).context("failed to set up MQTT client")?);
    let shared = config::shared(initial);

    let store = Arc::new(ReadingsStore::new());
    let client = SensorClient::new()?;
    let sensor_timeout = client.timeout();
    let discovery = DiscoveryBuilder::new(Arc::new(StatusPageScraper::new()?));

    let poller = PollerHandle::spawn(PollCycle::new(
        shared.clone(),
        client,
        store.clone(),
        bus.clone() as Arc<dyn Bus>,
    ));

    let _watcher = match ConfigWatcher::spawn(&args.config, shared.clone()) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!("config hot reload disabled: {e:#}");
            None
        }
    };

    let api = ApiConfig {
        bind_addr,
        enable_cors: args.cors,
    };
    let state = ApiState::new(store.clone(), shared.clone(), discovery.clone(), sensor_timeout);
    spawn_api_server(api, state)
        .await
        .context("failed to start status API")?;

    let mut usr1 = signal(SignalKind::user_defined1()).context("failed to install SIGUSR1 handler")?;
    let mut int = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let mut term = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    // Announcing runs beside the signal loop so shutdown is never held up.
    let mut announcing: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            _ = usr1.recv() => {
                if announcing.as_ref().is_some_and(|task| !task.is_finished()) {
                    warn!("received SIGUSR1, discovery publish already running");
                    continue;
                }
                info!("received SIGUSR1, publishing discovery");
                announcing = Some(tokio::spawn(announce(
                    shared.clone(),
                    store.clone(),
                    discovery.clone(),
                    bus.clone(),
                )));
            }
            _ = int.recv() => break,
            _ = term.recv() => break,
        }
    }

    info!("bye");
    if let Some(task) = announcing {
        task.abort();
    }
    if let Err(e) = poller.shutdown().await {
        debug!("poller already stopped: {e}");
    }
    bus.disconnect();

    Ok(())
}

async fn announce(
    config: SharedConfig,
    store: Arc<ReadingsStore>,
    discovery: DiscoveryBuilder,
    bus: Arc<MqttBus>,
) {
    let config = config.load_full();
    let descriptors = discovery.build(&config, &store.snapshot()).await;
    if descriptors.is_empty() {
        warn!("no successful readings yet, nothing to announce");
        return;
    }

    if !bus.wait_connected(BROKER_WAIT).await {
        warn!("MQTT broker not connected, discovery messages are queued");
    }

    match publish_discovery(bus.as_ref(), &descriptors).await {
        Ok(count) => info!("published {count} discovery topics"),
        Err(e) => error!("failed to publish discovery: {e}"),
    }
}
