use crate::error::ValidationError;
use crate::key::validate_identifier;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What the limiter should do when the backing store is unreachable.
///
/// Resolved from the system-default config record only; an `ALLOW` policy
/// turns infrastructure faults into silent admissions with a no-op lease,
/// a `BLOCK` policy re-raises them as an unavailability error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnUnavailable {
    /// Fail open: admit without consuming tokens.
    Allow,
    /// Fail closed: reject with an unavailability error.
    Block,
}

/// A named token-bucket rule.
///
/// `capacity` is the sustained rate (tokens added per refill period) and
/// `burst` is the bucket ceiling; a freshly created bucket starts full at
/// `burst`. The invariant `capacity <= burst` is enforced at construction.
///
/// # Examples
///
/// ```
/// use tollgate_core::Limit;
///
/// // 10 requests per minute, allowing a momentary burst of 15.
/// let rpm = Limit::per_minute("rpm", 10).unwrap().with_burst(15).unwrap();
/// assert_eq!(rpm.capacity(), 10);
/// assert_eq!(rpm.burst(), 15);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    name: String,
    capacity: u64,
    burst: u64,
    refill_amount: u64,
    refill_period_ms: u64,
}

impl Limit {
    /// Creates a limit with an explicit refill schedule.
    ///
    /// `burst` starts equal to `capacity`; raise it with
    /// [`with_burst`](Limit::with_burst).
    pub fn new(
        name: impl Into<String>,
        capacity: u64,
        refill_amount: u64,
        refill_period: Duration,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ValidationError::EmptyLimitName);
        }
        validate_identifier(&name)?;
        if refill_amount == 0 {
            return Err(ValidationError::ZeroRefillAmount { name });
        }
        let refill_period_ms = refill_period.as_millis() as u64;
        if refill_period_ms == 0 {
            return Err(ValidationError::ZeroRefillPeriod { name });
        }
        Ok(Self {
            burst: capacity,
            name,
            capacity,
            refill_amount,
            refill_period_ms,
        })
    }

    /// `rate` tokens sustained per second.
    pub fn per_second(name: impl Into<String>, rate: u64) -> Result<Self, ValidationError> {
        Self::new(name, rate, rate, Duration::from_secs(1))
    }

    /// `rate` tokens sustained per minute.
    pub fn per_minute(name: impl Into<String>, rate: u64) -> Result<Self, ValidationError> {
        Self::new(name, rate, rate, Duration::from_secs(60))
    }

    /// `rate` tokens sustained per hour.
    pub fn per_hour(name: impl Into<String>, rate: u64) -> Result<Self, ValidationError> {
        Self::new(name, rate, rate, Duration::from_secs(3600))
    }

    /// `rate` tokens sustained per day.
    pub fn per_day(name: impl Into<String>, rate: u64) -> Result<Self, ValidationError> {
        Self::new(name, rate, rate, Duration::from_secs(86_400))
    }

    /// Raises the bucket ceiling above the sustained rate.
    ///
    /// Fails if `burst` would fall below `capacity`.
    pub fn with_burst(mut self, burst: u64) -> Result<Self, ValidationError> {
        if self.capacity > burst {
            return Err(ValidationError::CapacityExceedsBurst {
                name: self.name,
                capacity: self.capacity,
                burst,
            });
        }
        self.burst = burst;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn burst(&self) -> u64 {
        self.burst
    }

    pub fn refill_amount(&self) -> u64 {
        self.refill_amount
    }

    pub fn refill_period(&self) -> Duration {
        Duration::from_millis(self.refill_period_ms)
    }

    pub fn refill_period_ms(&self) -> u64 {
        self.refill_period_ms
    }

    /// Whole seconds of the refill period, required for persisted config
    /// records.
    pub fn refill_period_seconds(&self) -> Result<u64, ValidationError> {
        if self.refill_period_ms % 1000 != 0 {
            return Err(ValidationError::SubSecondPeriod {
                name: self.name.clone(),
            });
        }
        Ok(self.refill_period_ms / 1000)
    }
}
