//! Status classification.
//!
//! First match wins; a temperature alert outranks any fill-level label.

use crate::reading::{Measurement, Reading, Status};

pub const HIGH_TEMPERATURE: f64 = 35.0;
pub const NEARLY_FULL: f64 = 90.0;
pub const GETTING_FULL: f64 = 75.0;

/// Anything carrying the two values the classifier looks at
pub trait Classifiable {
    fn fill_level(&self) -> f64;
    fn temperature(&self) -> f64;
}

impl Classifiable for Measurement {
    fn fill_level(&self) -> f64 {
        self.fill_level
    }

    fn temperature(&self) -> f64 {
        self.temperature
    }
}

impl Classifiable for Reading {
    fn fill_level(&self) -> f64 {
        self.fill_level
    }

    fn temperature(&self) -> f64 {
        self.temperature
    }
}

pub fn classify<T: Classifiable + ?Sized>(sample: &T) -> Status {
    classify_values(sample.fill_level(), sample.temperature())
}

pub fn classify_values(fill_level: f64, temperature: f64) -> Status {
    if temperature > HIGH_TEMPERATURE {
        Status::HighTemperature
    } else if fill_level > NEARLY_FULL {
        Status::NearlyFull
    } else if fill_level > GETTING_FULL {
        Status::GettingFull
    } else {
        Status::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temperature_outranks_fill() {
        assert_eq!(classify_values(95.0, 36.0), Status::HighTemperature);
        assert_eq!(classify_values(10.0, 35.1), Status::HighTemperature);
        assert_eq!(classify_values(95.0, 35.0), Status::NearlyFull);
    }

    #[test]
    fn test_fill_boundaries() {
        assert_eq!(classify_values(75.0, 20.0), Status::Normal);
        assert_eq!(classify_values(75.1, 20.0), Status::GettingFull);
        assert_eq!(classify_values(90.0, 20.0), Status::GettingFull);
        assert_eq!(classify_values(90.1, 20.0), Status::NearlyFull);
        assert_eq!(classify_values(100.0, 20.0), Status::NearlyFull);
        assert_eq!(classify_values(0.0, 15.0), Status::Normal);
    }
}
