//! Per-bin physical state and its one-tick evolution.
//!
//! Values accumulate at full precision; rounding happens only when a
//! `Measurement` is emitted so repeated ticks do not drift.

use crate::reading::{Measurement, RelayStatus, round1};
use chrono::NaiveDateTime;
use rand::Rng;

pub const FILL_RANGE: (f64, f64) = (0.0, 100.0);
pub const TEMPERATURE_RANGE: (f64, f64) = (15.0, 40.0);
pub const HUMIDITY_RANGE: (f64, f64) = (20.0, 80.0);

/// Mutable sensor state for a single bin
#[derive(Debug, Clone, PartialEq)]
pub struct SensorState {
    fill_level: f64,
    temperature: f64,
    humidity: f64,
    relay_status: RelayStatus,
}

impl SensorState {
    /// Randomized starting state: a mostly empty bin at room conditions
    pub fn new<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::from_values(
            rng.random_range(0.0..=20.0),
            rng.random_range(18.0..=25.0),
            rng.random_range(30.0..=60.0),
        )
    }

    /// Build a state from explicit values, clamped into the physical ranges
    pub fn from_values(fill_level: f64, temperature: f64, humidity: f64) -> Self {
        let fill_level = clamp(fill_level, FILL_RANGE);
        Self {
            fill_level,
            temperature: clamp(temperature, TEMPERATURE_RANGE),
            humidity: clamp(humidity, HUMIDITY_RANGE),
            relay_status: RelayStatus::for_fill(fill_level),
        }
    }

    pub fn fill_level(&self) -> f64 {
        self.fill_level
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn humidity(&self) -> f64 {
        self.humidity
    }

    pub fn relay_status(&self) -> RelayStatus {
        self.relay_status
    }

    /// Advance one tick and emit the rounded measurement captured at `now`.
    ///
    /// Fill only ever grows; temperature and humidity random-walk inside
    /// their bounds.
    pub fn advance<R: Rng + ?Sized>(&mut self, rng: &mut R, now: NaiveDateTime) -> Measurement {
        self.fill_level = clamp(self.fill_level + rng.random_range(0.5..=3.0), FILL_RANGE);
        self.temperature = clamp(
            self.temperature + rng.random_range(-1.0..=1.0),
            TEMPERATURE_RANGE,
        );
        self.humidity = clamp(self.humidity + rng.random_range(-2.0..=2.0), HUMIDITY_RANGE);
        self.relay_status = RelayStatus::for_fill(self.fill_level);

        self.measure(now)
    }

    fn measure(&self, now: NaiveDateTime) -> Measurement {
        let fill_level = round1(self.fill_level);
        Measurement {
            timestamp: now,
            fill_level,
            temperature: round1(self.temperature),
            humidity: round1(self.humidity),
            // Derived from the emitted value so each measurement is self-consistent
            relay_status: RelayStatus::for_fill(fill_level),
        }
    }
}

fn clamp(value: f64, (min, max): (f64, f64)) -> f64 {
    value.clamp(min, max)
}
