//! Failure-mode tests.
//!
//! Test organization:
//! - fail_open.rs: ALLOW swallows infrastructure faults into no-op leases
//! - fail_closed.rs: BLOCK re-raises them as unavailability
//! - conflict_retry.rs: lost version races retry with backoff

mod fail_closed;
