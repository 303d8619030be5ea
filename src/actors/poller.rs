//! PollerActor - Polls every configured sensor once per cycle
//!
//! ## Cycle
//!
//! ```text
//! Idle → Fetching → Aggregating → Publishing → Scheduled → Idle
//! ```
//!
//! 1. **Fetching** - the registry is taken from the current config and every
//!    sensor is fetched concurrently; the cycle waits for all of them
//! 2. **Aggregating** - a new snapshot replaces the previous one as a whole
//! 3. **Publishing** - each successful reading is handed to its own publish
//!    task; failures are logged
//! 4. **Scheduled** - the next cycle starts one interval after this one
//!    completed; without an interval the poller only answers commands

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, instrument, trace, warn};

use crate::bus::Bus;
use crate::config::SharedConfig;
use crate::publisher::publish_reading;
use crate::sensor::{Outcome, SensorClient};
use crate::snapshot::{ReadingsSnapshot, ReadingsStore};

use super::messages::PollerCommand;

/// One cycle's result
pub struct CycleOutcome {
    pub snapshot: Arc<ReadingsSnapshot>,

    /// Publish tasks spawned for the successful readings
    pub publishing: Vec<JoinHandle<()>>,
}

impl CycleOutcome {
    /// Wait until every reading of the cycle has been handed to the bus.
    pub async fn published(self) -> Arc<ReadingsSnapshot> {
        for task in self.publishing {
            if let Err(e) = task.await {
                error!("publish task failed: {e}");
            }
        }
        self.snapshot
    }
}

/// The fetch-aggregate-publish pass, independent of scheduling
#[derive(Clone)]
pub struct PollCycle {
    config: SharedConfig,
    client: SensorClient,
    store: Arc<ReadingsStore>,
    bus: Arc<dyn Bus>,
}

impl PollCycle {
    pub fn new(
        config: SharedConfig,
        client: SensorClient,
        store: Arc<ReadingsStore>,
        bus: Arc<dyn Bus>,
    ) -> Self {
        Self {
            config,
            client,
            store,
            bus,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(&self) -> CycleOutcome {
        let config = self.config.load_full();
        let registry = config.registry();

        trace!("polling {} sensors", registry.len());

        let readings = join_all(registry.iter().map(|sensor| self.client.fetch(sensor))).await;

        // A reload may have removed sensors while they were being fetched.
        let current = self.config.load().registry();
        let snapshot: ReadingsSnapshot = readings
            .into_iter()
            .filter(|reading| {
                let configured = current.contains(&reading.name);
                if !configured {
                    debug!("dropping reading of removed sensor '{}'", reading.name);
                }
                configured
            })
            .collect();

        let snapshot = self.store.replace(snapshot);

        let mut publishing = Vec::new();
        for (name, reading) in snapshot.iter() {
            match &reading.outcome {
                Outcome::Success(sample) => {
                    let bus = self.bus.clone();
                    let root = config.mqtt.topic.clone();
                    let sample = sample.clone();
                    let name = name.clone();

                    publishing.push(tokio::spawn(async move {
                        if let Err(e) = publish_reading(bus.as_ref(), &root, &sample).await {
                            error!("failed to publish readings of '{name}': {e}");
                        }
                    }));
                }
                failure => warn!(
                    "sensor '{name}' failed with status {}: {}",
                    failure.status_code(),
                    failure.message().unwrap_or_default()
                ),
            }
        }

        debug!(
            "cycle finished: {} of {} sensors ok",
            publishing.len(),
            snapshot.len()
        );

        CycleOutcome {
            snapshot,
            publishing,
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.config
            .load()
            .sensors
            .query_interval()
            .map(|interval| Instant::now() + interval)
    }
}

/// Actor running [`PollCycle`]s for the lifetime of the process
pub struct PollerActor {
    cycle: PollCycle,

    /// Command receiver for control messages
    command_rx: mpsc::Receiver<PollerCommand>,
}

impl PollerActor {
    pub fn new(cycle: PollCycle, command_rx: mpsc::Receiver<PollerCommand>) -> Self {
        Self { cycle, command_rx }
    }

    /// Run the actor's main loop
    ///
    /// The first cycle starts immediately. The loop runs until a Shutdown
    /// command is received or the command channel is closed.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting poller actor");

        let mut next_cycle = Some(Instant::now());

        loop {
            let due = async move {
                match next_cycle {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = due => {
                    // Publishing continues in the background.
                    let _ = self.cycle.run().await;
                    next_cycle = self.cycle.next_deadline();
                    if next_cycle.is_none() {
                        debug!("no query interval configured, not rescheduling");
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(PollerCommand::PollNow { respond_to }) => {
                            debug!("received PollNow command");
                            let outcome = self.cycle.run().await;
                            next_cycle = self.cycle.next_deadline();
                            tokio::spawn(async move {
                                let _ = respond_to.send(outcome.published().await);
                            });
                        }

                        Some(PollerCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }

                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        debug!("poller actor stopped");
    }
}

/// Handle for controlling the PollerActor
#[derive(Clone)]
pub struct PollerHandle {
    sender: mpsc::Sender<PollerCommand>,
}

impl PollerHandle {
    /// Spawn the poller actor as a tokio task
    pub fn spawn(cycle: PollCycle) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        tokio::spawn(PollerActor::new(cycle, cmd_rx).run());

        Self { sender: cmd_tx }
    }

    /// Run a cycle now and wait until its readings are published.
    pub async fn poll_now(&self) -> Result<Arc<ReadingsSnapshot>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PollerCommand::PollNow { respond_to: tx })
            .await
            .context("failed to send PollNow command")?;

        rx.await.context("failed to receive cycle result")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(PollerCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
