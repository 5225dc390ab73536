//! Admission events for observability.
//!
//! Listeners are registered on the config builder and invoked inline at the
//! point the event occurs. A panicking listener is isolated so the
//! remaining listeners still run and the admission itself is unaffected.

use std::sync::Arc;
use std::time::Duration;

/// Events emitted by the limiter.
#[derive(Debug, Clone)]
pub enum AdmissionEvent {
    /// An acquire succeeded and a lease was issued.
    Admitted {
        entity_id: String,
        resource: String,
        cascade: bool,
        /// True when the speculative write path served the admission.
        fast_path: bool,
        /// Total attempts including the successful one.
        attempts: usize,
    },
    /// An acquire was denied by one or more limits.
    Rejected {
        entity_id: String,
        resource: String,
        retry_after_ms: u64,
    },
    /// A conditional write lost its version race and the slow path is
    /// retrying after a jittered delay.
    ConflictRetry {
        entity_id: String,
        resource: String,
        attempt: usize,
        delay: Duration,
    },
    /// Infrastructure failed and the ALLOW policy admitted without
    /// consuming tokens.
    FailedOpen { entity_id: String, resource: String },
    /// Infrastructure failed and the BLOCK policy rejected the call.
    FailedClosed { entity_id: String, resource: String },
    /// A lease applied its net adjustments (or had none to apply).
    LeaseCommitted { adjusted: bool },
    /// A lease issued compensating writes returning its consumption.
    LeaseReleased { restored: bool },
}

impl AdmissionEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            AdmissionEvent::Admitted { .. } => "Admitted",
            AdmissionEvent::Rejected { .. } => "Rejected",
            AdmissionEvent::ConflictRetry { .. } => "ConflictRetry",
            AdmissionEvent::FailedOpen { .. } => "FailedOpen",
            AdmissionEvent::FailedClosed { .. } => "FailedClosed",
            AdmissionEvent::LeaseCommitted { .. } => "LeaseCommitted",
            AdmissionEvent::LeaseReleased { .. } => "LeaseReleased",
        }
    }
}

type Listener = Arc<dyn Fn(&AdmissionEvent) + Send + Sync>;

/// A collection of admission-event listeners.
#[derive(Clone, Default)]
pub(crate) struct EventListeners {
    listeners: Vec<Listener>,
}

impl std::fmt::Debug for EventListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListeners")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl EventListeners {
    pub(crate) fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub(crate) fn add<F>(&mut self, f: F)
    where
        F: Fn(&AdmissionEvent) + Send + Sync + 'static,
    {
        self.listeners.push(Arc::new(f));
    }

    /// Emits an event to all listeners, isolating panics so one
    /// misbehaving listener cannot block the rest or the admission.
    pub(crate) fn emit(&self, event: &AdmissionEvent) {
        for listener in &self.listeners {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener(event);
            }));
            if result.is_err() {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    event_type = event.event_type(),
                    "admission event listener panicked"
                );
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}
