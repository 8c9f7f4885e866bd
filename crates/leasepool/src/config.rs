//! Pool configuration.

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use crate::wait_queue::QueueDiscipline;

pub const DEFAULT_CAPACITY: usize = 3;

pub const ENV_CAPACITY: &str = "LEASEPOOL_CAPACITY";
pub const ENV_LEASE_MIN_MS: &str = "LEASEPOOL_LEASE_MIN_MS";
pub const ENV_LEASE_MAX_MS: &str = "LEASEPOOL_LEASE_MAX_MS";
pub const ENV_QUEUE_DISCIPLINE: &str = "LEASEPOOL_QUEUE_DISCIPLINE";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("capacity must be a positive integer, got {0}")]
    InvalidCapacity(String),
    #[error("invalid lease duration range {min_ms}..={max_ms} ms: {reason}")]
    InvalidLeaseRange {
        min_ms: u64,
        max_ms: u64,
        reason: &'static str,
    },
    #[error("{0} and {1} must be set together")]
    IncompleteLeaseRange(&'static str, &'static str),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("{0}")]
    InvalidDiscipline(String),
}

/// Inclusive range lease durations are drawn from, in milliseconds.
///
/// Always valid: construction and deserialization both go through `validate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawLeaseDurationRange")]
pub struct LeaseDurationRange {
    min_ms: u64,
    max_ms: u64,
}

#[derive(Deserialize)]
struct RawLeaseDurationRange {
    min_ms: u64,
    max_ms: u64,
}

impl TryFrom<RawLeaseDurationRange> for LeaseDurationRange {
    type Error = ConfigError;

    fn try_from(raw: RawLeaseDurationRange) -> Result<Self, Self::Error> {
        Self::from_millis(raw.min_ms, raw.max_ms)
    }
}

impl LeaseDurationRange {
    pub fn new(min: Duration, max: Duration) -> Result<Self, ConfigError> {
        Self::from_millis(duration_millis("min", min)?, duration_millis("max", max)?)
    }

    pub fn from_millis(min_ms: u64, max_ms: u64) -> Result<Self, ConfigError> {
        let range = Self { min_ms, max_ms };
        range.validate()?;
        Ok(range)
    }

    /// A range that always yields the same duration.
    pub fn fixed(duration: Duration) -> Result<Self, ConfigError> {
        Self::new(duration, duration)
    }

    pub fn min(&self) -> Duration {
        Duration::from_millis(self.min_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let reason = if self.max_ms == 0 {
            "maximum must be greater than zero"
        } else if self.min_ms > self.max_ms {
            "minimum exceeds maximum"
        } else {
            return Ok(());
        };
        Err(ConfigError::InvalidLeaseRange {
            min_ms: self.min_ms,
            max_ms: self.max_ms,
            reason,
        })
    }

    /// Draw a duration uniformly from the range.
    pub fn sample(&self) -> Duration {
        if self.min_ms == self.max_ms {
            return self.min();
        }
        Duration::from_millis(rand::rng().random_range(self.min_ms..=self.max_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub capacity: usize,
    pub lease_duration: Option<LeaseDurationRange>,
    pub queue_discipline: QueueDiscipline,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            lease_duration: None,
            queue_discipline: QueueDiscipline::Fifo,
        }
    }
}

impl PoolConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_lease_duration(mut self, range: LeaseDurationRange) -> Self {
        self.lease_duration = Some(range);
        self
    }

    pub fn with_queue_discipline(mut self, discipline: QueueDiscipline) -> Self {
        self.queue_discipline = discipline;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::InvalidCapacity("0".to_string()));
        }
        if let Some(range) = &self.lease_duration {
            range.validate()?;
        }
        Ok(())
    }

    /// Defaults overlaid with `LEASEPOOL_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_CAPACITY) {
            config.capacity = raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|c| *c > 0)
                .ok_or(ConfigError::InvalidCapacity(raw))?;
        }

        let min = lookup(ENV_LEASE_MIN_MS)
            .map(|v| parse_millis(ENV_LEASE_MIN_MS, v))
            .transpose()?;
        let max = lookup(ENV_LEASE_MAX_MS)
            .map(|v| parse_millis(ENV_LEASE_MAX_MS, v))
            .transpose()?;
        config.lease_duration = match (min, max) {
            (Some(min), Some(max)) => Some(LeaseDurationRange::from_millis(min, max)?),
            (None, None) => None,
            _ => {
                return Err(ConfigError::IncompleteLeaseRange(
                    ENV_LEASE_MIN_MS,
                    ENV_LEASE_MAX_MS,
                ));
            }
        };

        if let Some(raw) = lookup(ENV_QUEUE_DISCIPLINE) {
            config.queue_discipline = raw
                .trim()
                .parse()
                .map_err(ConfigError::InvalidDiscipline)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn duration_millis(key: &'static str, duration: Duration) -> Result<u64, ConfigError> {
    u64::try_from(duration.as_millis()).map_err(|_| ConfigError::InvalidValue {
        key,
        value: format!("{duration:?}"),
    })
}

fn parse_millis(key: &'static str, value: String) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}
