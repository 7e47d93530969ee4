//! Simulation Loop
//!
//! Drives the roster through ticks on a fixed interval. Each tick, for every
//! bin in roster order: advance the sensor, classify, publish, append.
//! Publishing and persistence are independent sinks; a failure in either is
//! logged and counted, never propagated.

use crate::classifier::classify;
use crate::publisher::TelemetryPublisher;
use crate::reading::{BinIdentity, Reading};
use crate::sensor::SensorState;
use crate::store::{StoreError, TelemetryStore};
use chrono::NaiveDateTime;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Source of capture timestamps
pub type Clock = Box<dyn Fn() -> NaiveDateTime + Send>;

pub fn local_clock() -> Clock {
    Box::new(|| chrono::Local::now().naive_local())
}

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub interval: Duration,
    /// Stop after this many ticks; `None` runs until cancelled
    pub max_ticks: Option<u64>,
    pub seed: Option<u64>,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            max_ticks: None,
            seed: None,
        }
    }
}

/// Running counters across the loop's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    pub readings: u64,
    pub published: u64,
    pub publish_dropped: u64,
    pub stored: u64,
    pub store_failures: u64,
}

/// Outcome of a single tick
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub readings: Vec<Reading>,
    pub published: u64,
    pub publish_dropped: u64,
    pub store_failures: u64,
}

struct BinSlot {
    identity: BinIdentity,
    topic: String,
    state: SensorState,
}

pub struct SimulationLoop {
    bins: Vec<BinSlot>,
    settings: LoopSettings,
    publisher: TelemetryPublisher,
    store: Arc<dyn TelemetryStore>,
    rng: StdRng,
    clock: Clock,
    stats: LoopStats,
}

impl SimulationLoop {
    /// Build the loop and randomize each bin's starting state.
    ///
    /// With `settings.seed` set, sensor evolution is fully reproducible.
    pub fn new(
        roster: Vec<BinIdentity>,
        settings: LoopSettings,
        publisher: TelemetryPublisher,
        store: Arc<dyn TelemetryStore>,
    ) -> Self {
        let mut rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let bins = roster
            .into_iter()
            .map(|identity| BinSlot {
                topic: publisher.topic(&identity.bin_id),
                state: SensorState::new(&mut rng),
                identity,
            })
            .collect();

        Self {
            bins,
            settings,
            publisher,
            store,
            rng,
            clock: local_clock(),
            stats: LoopStats::default(),
        }
    }

    /// Replace the wall clock used for reading timestamps
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn publisher(&self) -> &TelemetryPublisher {
        &self.publisher
    }

    pub fn roster(&self) -> impl Iterator<Item = (&BinIdentity, &str)> {
        self.bins.iter().map(|b| (&b.identity, b.topic.as_str()))
    }

    /// Run one tick over the whole roster
    pub async fn tick(&mut self) -> TickReport {
        let now = (self.clock)();
        let mut report = TickReport::default();

        for slot in &mut self.bins {
            let measurement = slot.state.advance(&mut self.rng, now);
            let status = classify(&measurement);
            let reading = Reading::new(&slot.identity, measurement, status);

            info!(
                bin_id = %reading.bin_id,
                location = %reading.location,
                fill_level = reading.fill_level,
                temperature = reading.temperature,
                humidity = reading.humidity,
                relay = %reading.relay_status,
                status = %reading.status,
                "Reading captured"
            );

            match self.publisher.publish(&slot.topic, &reading) {
                Ok(()) => report.published += 1,
                Err(e) => {
                    warn!(bin_id = %reading.bin_id, error = %e, "Publish dropped");
                    report.publish_dropped += 1;
                }
            }

            if let Err(e) = append(&self.store, reading.clone()).await {
                error!(bin_id = %reading.bin_id, error = %e, "Failed to store reading");
                report.store_failures += 1;
            }

            report.readings.push(reading);
        }

        let count = report.readings.len() as u64;
        self.stats.ticks += 1;
        self.stats.readings += count;
        self.stats.published += report.published;
        self.stats.publish_dropped += report.publish_dropped;
        self.stats.stored += count - report.store_failures;
        self.stats.store_failures += report.store_failures;

        report
    }

    /// Tick on the configured interval until `shutdown` fires or `max_ticks`
    /// is reached, then disconnect the publisher.
    ///
    /// A tick in progress always completes before shutdown is honoured.
    pub async fn run(&mut self, shutdown: CancellationToken) -> LoopStats {
        info!(
            bins = self.bins.len(),
            interval_ms = self.settings.interval.as_millis() as u64,
            "Smart waste monitoring started"
        );

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self
                .settings
                .max_ticks
                .is_some_and(|max| self.stats.ticks >= max)
            {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            self.tick().await;
        }

        info!("Stopping monitoring");
        self.publisher.shutdown().await;

        let stats = self.stats;
        info!(
            ticks = stats.ticks,
            readings = stats.readings,
            published = stats.published,
            publish_dropped = stats.publish_dropped,
            store_failures = stats.store_failures,
            "Monitoring stopped"
        );
        stats
    }
}

/// Append off the async workers; sqlite writes block
async fn append(store: &Arc<dyn TelemetryStore>, reading: Reading) -> Result<(), StoreError> {
    let store = store.clone();
    tokio::task::spawn_blocking(move || store.append(&reading))
        .await
        .map_err(|e| StoreError::Write(format!("append task failed: {}", e)))?
}
