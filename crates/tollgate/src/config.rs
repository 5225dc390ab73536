use crate::events::{AdmissionEvent, EventListeners};
use std::time::Duration;
use tollgate_core::OnUnavailable;

/// Configuration for a [`RateLimiter`](crate::RateLimiter).
///
/// Built with [`LimiterConfig::builder`]; every knob has a production
/// default.
#[derive(Debug)]
pub struct LimiterConfig {
    pub(crate) name: String,
    pub(crate) namespace: String,
    pub(crate) default_on_unavailable: OnUnavailable,
    pub(crate) config_cache_ttl: Duration,
    pub(crate) max_write_attempts: usize,
    pub(crate) retry_initial_backoff: Duration,
    pub(crate) retry_max_backoff: Duration,
    pub(crate) speculative_writes: bool,
    pub(crate) operation_timeout: Option<Duration>,
    pub(crate) event_listeners: EventListeners,
}

impl LimiterConfig {
    /// Starts a builder with defaults.
    pub fn builder() -> LimiterConfigBuilder {
        LimiterConfigBuilder::new()
    }
}

/// Builder for [`LimiterConfig`].
pub struct LimiterConfigBuilder {
    name: String,
    namespace: String,
    default_on_unavailable: OnUnavailable,
    config_cache_ttl: Duration,
    max_write_attempts: usize,
    retry_initial_backoff: Duration,
    retry_max_backoff: Duration,
    speculative_writes: bool,
    operation_timeout: Option<Duration>,
    event_listeners: EventListeners,
}

impl Default for LimiterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LimiterConfigBuilder {
    /// Creates a new builder with defaults.
    ///
    /// Defaults:
    /// - namespace: `"default"`
    /// - on_unavailable fallback: `Block` (fail closed)
    /// - config cache TTL: 60 seconds (zero disables caching)
    /// - conditional-write attempts: 3, with 25ms..250ms jittered backoff
    /// - speculative writes: enabled
    /// - operation timeout: none
    /// - name: `"<unnamed>"`
    pub fn new() -> Self {
        Self {
            name: "<unnamed>".to_string(),
            namespace: "default".to_string(),
            default_on_unavailable: OnUnavailable::Block,
            config_cache_ttl: Duration::from_secs(60),
            max_write_attempts: 3,
            retry_initial_backoff: Duration::from_millis(25),
            retry_max_backoff: Duration::from_millis(250),
            speculative_writes: true,
            operation_timeout: None,
            event_listeners: EventListeners::new(),
        }
    }

    /// Sets the limiter name, used in events, logs, and metric labels.
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the human namespace name whose opaque prefix isolates this
    /// tenant's keys. Registered on first connect.
    pub fn namespace<S: Into<String>>(mut self, namespace: S) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the fail-open/fail-closed fallback used when no system-default
    /// record defines one, or when resolution itself failed.
    pub fn on_unavailable(mut self, policy: OnUnavailable) -> Self {
        self.default_on_unavailable = policy;
        self
    }

    /// Sets the config cache TTL. `Duration::ZERO` disables caching.
    pub fn config_cache_ttl(mut self, ttl: Duration) -> Self {
        self.config_cache_ttl = ttl;
        self
    }

    /// Sets how many times a lost conditional write is retried before the
    /// admission is reported as an infrastructure failure.
    pub fn max_write_attempts(mut self, attempts: usize) -> Self {
        self.max_write_attempts = attempts.max(1);
        self
    }

    /// Sets the jittered backoff window between conditional-write retries.
    pub fn retry_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_initial_backoff = initial;
        self.retry_max_backoff = max;
        self
    }

    /// Disables the speculative write path; every acquire then reads
    /// before writing.
    pub fn disable_speculative_writes(mut self) -> Self {
        self.speculative_writes = false;
        self
    }

    /// Bounds every storage operation; an overrun is classified as an
    /// infrastructure fault and goes through the failure-mode gate.
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    /// Registers a callback for every admission event.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&AdmissionEvent) + Send + Sync + 'static,
    {
        self.event_listeners.add(f);
        self
    }

    /// Registers a callback invoked when an acquire is admitted.
    ///
    /// # Callback Signature
    /// `Fn(&str, &str)` - entity id and resource.
    pub fn on_admitted<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.event_listeners.add(move |event| {
            if let AdmissionEvent::Admitted {
                entity_id,
                resource,
                ..
            } = event
            {
                f(entity_id, resource);
            }
        });
        self
    }

    /// Registers a callback invoked when an acquire is denied.
    ///
    /// # Callback Signature
    /// `Fn(u64)` - the primary violation's retry-after in milliseconds.
    pub fn on_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.event_listeners.add(move |event| {
            if let AdmissionEvent::Rejected { retry_after_ms, .. } = event {
                f(*retry_after_ms);
            }
        });
        self
    }

    /// Registers a callback invoked when the ALLOW policy admits through
    /// an infrastructure failure.
    pub fn on_fail_open<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.event_listeners.add(move |event| {
            if matches!(event, AdmissionEvent::FailedOpen { .. }) {
                f();
            }
        });
        self
    }

    /// Registers a callback invoked before each conditional-write retry.
    ///
    /// # Callback Signature
    /// `Fn(usize, Duration)` - retry attempt number (1-indexed) and the
    /// jittered delay about to be slept.
    pub fn on_conflict_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, Duration) + Send + Sync + 'static,
    {
        self.event_listeners.add(move |event| {
            if let AdmissionEvent::ConflictRetry { attempt, delay, .. } = event {
                f(*attempt, *delay);
            }
        });
        self
    }

    /// Builds the config.
    pub fn build(self) -> LimiterConfig {
        LimiterConfig {
            name: self.name,
            namespace: self.namespace,
            default_on_unavailable: self.default_on_unavailable,
            config_cache_ttl: self.config_cache_ttl,
            max_write_attempts: self.max_write_attempts,
            retry_initial_backoff: self.retry_initial_backoff,
            retry_max_backoff: self.retry_max_backoff,
            speculative_writes: self.speculative_writes,
            operation_timeout: self.operation_timeout,
            event_listeners: self.event_listeners,
        }
    }
}
