//! # ecobin-sim - Process Shell for the Waste Bin Pipeline
//!
//! Hosts the terminal viewer that polls the store for the newest readings,
//! and the startup policy for an unreachable broker.
//! The binary in `main.rs` wires configuration, logging, and signals around
//! `ecobin_core`.

pub mod startup;
pub mod viewer;

pub use startup::connect_publisher;
pub use viewer::{render_table, run_viewer};
