use proptest::prelude::*;
use tollgate_core::{LimitState, MILLI};

fn post_refill_state(
    amount_milli: i64,
    period_ms: i64,
    burst_milli: i64,
    tokens_milli: i64,
    elapsed_ms: i64,
) -> (LimitState, i64) {
    let mut state = LimitState {
        tokens_milli: tokens_milli.min(burst_milli),
        last_refill_server_ms: 0,
        capacity_milli: burst_milli,
        burst_milli,
        refill_amount_milli: amount_milli,
        refill_period_ms: period_ms,
    };
    // Accrue some history so a sub-token remainder may be parked in the
    // timestamp, the case the bound must stay exact under.
    state.refill(elapsed_ms);
    (state, elapsed_ms)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    /// Sound: sleeping exactly retry_after_ms satisfies the request.
    /// Tight: sleeping one millisecond less does not.
    #[test]
    fn retry_after_is_sound_and_tight(
        amount_milli in 1i64..=100_000,
        period_ms in 1i64..=1_000_000,
        burst_tokens in 1i64..=1_000,
        debt_milli in 0i64..=100_000,
        requested in 1i64..=1_000,
        elapsed_ms in 0i64..=1_000_000,
    ) {
        let burst_milli = burst_tokens * MILLI;
        let requested_milli = requested * MILLI;
        // Only satisfiable requests have a finite bound worth testing.
        prop_assume!(requested_milli <= burst_milli);

        let (state, now) =
            post_refill_state(amount_milli, period_ms, burst_milli, -debt_milli, elapsed_ms);
        let retry_after = state.retry_after_ms(requested_milli, now);
        prop_assume!(retry_after > 0);

        let mut satisfied = state.clone();
        satisfied.refill(now + retry_after);
        prop_assert!(
            satisfied.tokens_milli >= requested_milli,
            "slept {retry_after}ms but only {} of {} milli",
            satisfied.tokens_milli,
            requested_milli
        );

        let mut early = state.clone();
        early.refill(now + retry_after - 1);
        prop_assert!(
            early.tokens_milli < requested_milli,
            "admitted {}ms early",
            1
        );
    }

    /// A zero bound means the request is satisfiable right now.
    #[test]
    fn zero_retry_after_means_available(
        amount_milli in 1i64..=100_000,
        period_ms in 1i64..=1_000_000,
        burst_tokens in 1i64..=1_000,
        tokens in 0i64..=1_000,
        requested in 1i64..=1_000,
    ) {
        let burst_milli = burst_tokens * MILLI;
        let state = LimitState {
            tokens_milli: (tokens * MILLI).min(burst_milli),
            last_refill_server_ms: 0,
            capacity_milli: burst_milli,
            burst_milli,
            refill_amount_milli: amount_milli,
            refill_period_ms: period_ms,
        };
        let requested_milli = requested * MILLI;
        let retry_after = state.retry_after_ms(requested_milli, 0);
        prop_assert_eq!(retry_after == 0, state.tokens_milli >= requested_milli);
    }
}
