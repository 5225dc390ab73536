//! The token-bucket engine.
//!
//! Pure integer math over server-side timestamps: refill, check, consume,
//! and adjust, with zero accumulated drift. The engine never performs I/O;
//! callers read bucket state from storage, run the engine, and write the
//! returned state back under a version condition.
//!
//! Tokens are stored as `base_units * 1000` (milli-tokens). Refill converts
//! elapsed server milliseconds into milli-tokens with integer division and
//! carries the remainder forward by advancing `last_refill_server_ms` only
//! as far as the granted tokens account for. Splitting an interval into any
//! number of refill calls therefore yields the same balance as one refill
//! over the whole interval.

use crate::limit::Limit;
use crate::status::LimitStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Milli-token scale factor.
pub const MILLI: i64 = 1000;

/// Map of limit name to requested base units.
pub type ConsumeMap = BTreeMap<String, u64>;

/// Persistent per-limit bucket state.
///
/// `tokens_milli` may be negative: post-hoc adjustments can push a bucket
/// into debt, which future refills pay down before new admissions pass.
/// `last_refill_server_ms` is monotonically non-decreasing for the life of
/// the bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitState {
    pub tokens_milli: i64,
    pub last_refill_server_ms: i64,
    pub capacity_milli: i64,
    pub burst_milli: i64,
    pub refill_amount_milli: i64,
    pub refill_period_ms: i64,
}

impl LimitState {
    /// A fresh bucket for `limit`: full at `burst`, refilled as of `now`.
    pub fn fresh(limit: &Limit, now_server_ms: i64) -> Self {
        Self {
            tokens_milli: limit.burst() as i64 * MILLI,
            last_refill_server_ms: now_server_ms,
            capacity_milli: limit.capacity() as i64 * MILLI,
            burst_milli: limit.burst() as i64 * MILLI,
            refill_amount_milli: limit.refill_amount() as i64 * MILLI,
            refill_period_ms: limit.refill_period_ms() as i64,
        }
    }

    /// Lazily adds tokens for the server time elapsed since the last refill.
    ///
    /// Integer division leaves a sub-token remainder; instead of dropping
    /// it, `last_refill_server_ms` advances only by the milliseconds the
    /// granted tokens account for, so the remainder is credited on a later
    /// call. The balance is clamped at `burst_milli`.
    pub fn refill(&mut self, now_server_ms: i64) {
        let elapsed_ms = (now_server_ms - self.last_refill_server_ms).max(0);
        if elapsed_ms == 0 {
            return;
        }
        let add_milli = (elapsed_ms as i128 * self.refill_amount_milli as i128
            / self.refill_period_ms as i128) as i64;
        if add_milli == 0 {
            return;
        }
        let consumed_ms = (add_milli as i128 * self.refill_period_ms as i128
            / self.refill_amount_milli as i128) as i64;
        self.last_refill_server_ms += consumed_ms;
        self.tokens_milli = (self.tokens_milli + add_milli).min(self.burst_milli);
    }

    /// Adopts the refill parameters of a (possibly re-configured) limit,
    /// clamping the balance to the new ceiling.
    ///
    /// Called after [`refill`](LimitState::refill) so elapsed time is
    /// credited under the parameters it accrued under.
    pub fn adopt(&mut self, limit: &Limit) {
        self.capacity_milli = limit.capacity() as i64 * MILLI;
        self.burst_milli = limit.burst() as i64 * MILLI;
        self.refill_amount_milli = limit.refill_amount() as i64 * MILLI;
        self.refill_period_ms = limit.refill_period_ms() as i64;
        self.tokens_milli = self.tokens_milli.min(self.burst_milli);
    }

    /// Milliseconds until the balance reaches `requested_milli`, assuming no
    /// other writers. Zero when already satisfiable.
    ///
    /// Must be called on post-refill state. The sub-token remainder parked
    /// in `last_refill_server_ms` is subtracted so the bound is exact: a
    /// retry after exactly this many milliseconds succeeds, one millisecond
    /// earlier still fails.
    pub fn retry_after_ms(&self, requested_milli: i64, now_server_ms: i64) -> i64 {
        let deficit_milli = requested_milli - self.tokens_milli;
        if deficit_milli <= 0 {
            return 0;
        }
        let need_ms = ceil_div(
            deficit_milli as i128 * self.refill_period_ms as i128,
            self.refill_amount_milli as i128,
        ) as i64;
        let residue_ms = (now_server_ms - self.last_refill_server_ms).max(0);
        (need_ms - residue_ms).max(0)
    }

    /// Applies a signed adjustment in milli-tokens.
    ///
    /// May drive the balance negative (debt); never above `burst_milli`.
    pub fn adjust_milli(&mut self, delta_milli: i64) {
        self.tokens_milli = (self.tokens_milli + delta_milli).min(self.burst_milli);
    }
}

fn ceil_div(num: i128, den: i128) -> i128 {
    (num + den - 1) / den
}

/// Result of a check-and-consume pass over one bucket.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    /// True iff no limit was exceeded; `state` then has the consumption
    /// applied.
    pub admitted: bool,
    /// Post-refill state; post-consume as well when admitted.
    pub state: BucketState,
    /// One verdict per evaluated limit, passing and failing alike.
    pub statuses: Vec<LimitStatus>,
}

/// Per-`(entity, resource)` bucket state covering one or more named limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketState {
    pub limits: BTreeMap<String, LimitState>,
}

impl BucketState {
    /// Whether the bucket already tracks every limit in `limits`.
    ///
    /// The speculative write path requires this: a bucket missing a newly
    /// introduced limit must take the read-modify-write path so the fresh
    /// limit state is seeded from server time.
    pub fn covers(&self, limits: &[Limit]) -> bool {
        limits.iter().all(|l| self.limits.contains_key(l.name()))
    }

    /// Current balance of one limit in whole base units (floor), if tracked.
    pub fn tokens_base(&self, limit_name: &str) -> Option<i64> {
        self.limits
            .get(limit_name)
            .map(|s| s.tokens_milli.div_euclid(MILLI))
    }

    /// Evaluates all `limits` together against this state at `now_server_ms`.
    ///
    /// Each limit is refilled, re-parameterized from the resolved config,
    /// and checked against the requested amount (zero for limits absent
    /// from `consume`). The admission decision is all-or-nothing: tokens
    /// are consumed only when every limit passes. Limits tracked in the
    /// stored state but absent from `limits` are carried through untouched.
    ///
    /// Callers validate the consume map against the limit set first; an
    /// unknown name in `consume` is a validation error at a higher layer.
    pub fn check_and_consume(
        &self,
        limits: &[Limit],
        consume: &ConsumeMap,
        now_server_ms: i64,
        entity_id: &str,
        resource: &str,
    ) -> CheckOutcome {
        let mut next = self.clone();
        let mut statuses = Vec::with_capacity(limits.len());
        let mut admitted = true;

        for limit in limits {
            let state = next
                .limits
                .entry(limit.name().to_string())
                .or_insert_with(|| LimitState::fresh(limit, now_server_ms));
            state.refill(now_server_ms);
            state.adopt(limit);

            let requested = consume.get(limit.name()).copied().unwrap_or(0);
            let requested_milli = requested as i64 * MILLI;
            let would_have_milli = state.tokens_milli - requested_milli;
            let exceeded = would_have_milli < 0;
            if exceeded {
                admitted = false;
            }

            statuses.push(LimitStatus {
                entity_id: entity_id.to_string(),
                resource: resource.to_string(),
                limit_name: limit.name().to_string(),
                capacity: limit.capacity(),
                burst: limit.burst(),
                available: state.tokens_milli.div_euclid(MILLI),
                requested,
                exceeded,
                retry_after_ms: if exceeded {
                    state.retry_after_ms(requested_milli, now_server_ms) as u64
                } else {
                    0
                },
            });
        }

        if admitted {
            for limit in limits {
                if let Some(requested) = consume.get(limit.name()) {
                    if let Some(state) = next.limits.get_mut(limit.name()) {
                        state.tokens_milli -= *requested as i64 * MILLI;
                    }
                }
            }
        }

        CheckOutcome {
            admitted,
            state: next,
            statuses,
        }
    }

    /// Applies signed base-unit deltas to tracked limits.
    ///
    /// Positive deltas return tokens (clamped at burst), negative deltas
    /// take them, possibly into debt. Unknown names are ignored; the caller
    /// validated the delta map when the lease was created.
    pub fn adjust(&mut self, deltas: &BTreeMap<String, i64>) {
        for (name, delta) in deltas {
            if let Some(state) = self.limits.get_mut(name) {
                state.adjust_milli(delta * MILLI);
            }
        }
    }
}
