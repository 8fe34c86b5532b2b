//! Randomized delay ranges

use rand::Rng;
use std::time::Duration;

use crate::ConfigError;

/// A closed interval `[min, max]` a delay is drawn from uniformly
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayRange {
    min: Duration,
    max: Duration,
}

impl DelayRange {
    /// Build from seconds; rejects negative, non-finite, or inverted bounds
    pub fn from_secs(min: f64, max: f64) -> Result<Self, ConfigError> {
        if !min.is_finite() || !max.is_finite() || min < 0.0 || min > max {
            return Err(ConfigError::InvalidDelay { min, max });
        }
        Ok(Self {
            min: Duration::from_secs_f64(min),
            max: Duration::from_secs_f64(max),
        })
    }

    /// No delay at all
    pub fn zero() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn is_zero(&self) -> bool {
        self.max.is_zero()
    }

    /// Draw one delay
    pub fn sample(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        rand::thread_rng().gen_range(self.min..=self.max)
    }
}
