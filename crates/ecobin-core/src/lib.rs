//! # ecobin-core - Waste Bin Telemetry Pipeline
//!
//! Simulates a fleet of waste-bin sensors and pushes every reading through
//! two independent sinks: a pub/sub broker and an append-only store.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       SimulationLoop                         │
//! │                                                              │
//! │   ┌─────────────┐   ┌──────────────┐                         │
//! │   │ SensorState │──▶│  classifier  │──▶ Reading              │
//! │   │  (per bin)  │   │ (pure label) │      │                  │
//! │   └─────────────┘   └──────────────┘      │                  │
//! │                               ┌───────────┴──────────┐       │
//! │                               ▼                      ▼       │
//! │                    ┌────────────────────┐ ┌────────────────┐ │
//! │                    │ TelemetryPublisher │ │ TelemetryStore │ │
//! │                    │  (at-most-once)    │ │ (append-only)  │ │
//! │                    └─────────┬──────────┘ └────────────────┘ │
//! └──────────────────────────────┼───────────────────────────────┘
//!                                ▼
//!                  reconnect task ◀──▶ broker link
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ecobin_core::{EcobinConfig, LoopbackLink, SimulationLoop, SqliteStore,
//!     TelemetryPublisher, TelemetryStore};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EcobinConfig::default();
//! let store = Arc::new(SqliteStore::open_in_memory()?);
//! store.ensure_schema()?;
//!
//! let (link, _controller) = LoopbackLink::connected();
//! let publisher = TelemetryPublisher::connect(link, config.broker.publisher_config()).await?;
//!
//! let mut sim = SimulationLoop::new(
//!     config.roster.clone(),
//!     config.simulation.loop_settings(),
//!     publisher,
//!     store,
//! );
//! let stats = sim.run(CancellationToken::new()).await;
//! # let _ = stats;
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod config;
pub mod publisher;
pub mod reading;
pub mod sensor;
pub mod simulation;
pub mod store;
pub mod transport;

pub use classifier::{classify, classify_values};
pub use config::{ConfigError, EcobinConfig};
pub use publisher::{ConnectionState, PublishError, PublisherConfig, TelemetryPublisher, topic_for};
pub use reading::{BinIdentity, Measurement, Reading, RelayStatus, Status};
pub use sensor::SensorState;
pub use simulation::{LoopSettings, LoopStats, SimulationLoop, TickReport};
pub use store::{SqliteStore, StoreError, TelemetryStore};
pub use transport::{LoopbackController, LoopbackLink, MqttLink, MqttSettings};
