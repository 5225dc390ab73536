use proptest::prelude::*;
use tollgate_core::{LimitState, MILLI};

#[derive(Debug, Clone)]
enum Op {
    /// Advance the clock and refill.
    Elapse(i64),
    /// Consume `n` tokens if the balance allows (a failed check mutates
    /// nothing, mirroring the admission engine).
    Consume(i64),
    /// Signed adjustment in base units.
    Adjust(i64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0i64..=100_000).prop_map(Op::Elapse),
        (1i64..=50).prop_map(Op::Consume),
        (-50i64..=50).prop_map(Op::Adjust),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Over any op sequence, the final balance equals the initial balance
    /// plus refill minus successful consumption plus adjustments. The
    /// burst ceiling is parked far away so the clamp never interferes;
    /// clamping behavior is covered separately.
    #[test]
    fn tokens_are_conserved(
        amount_milli in 1i64..=10_000,
        period_multiplier in 1i64..=120,
        ops in proptest::collection::vec(op_strategy(), 1..=64),
    ) {
        let huge_burst = 1_000_000_000_000;
        let params = LimitState {
            tokens_milli: 0,
            last_refill_server_ms: 0,
            capacity_milli: huge_burst,
            burst_milli: huge_burst,
            refill_amount_milli: amount_milli,
            refill_period_ms: amount_milli * period_multiplier,
        };

        let mut state = params.clone();
        // Shadow state refilled at the same instants, tracking the total
        // refill grant independently of consumption.
        let mut refill_tracker = params.clone();

        let mut now = 0i64;
        let mut consumed_milli = 0i64;
        let mut adjusted_milli = 0i64;

        for op in &ops {
            match op {
                Op::Elapse(dt) => {
                    now += dt;
                    state.refill(now);
                    refill_tracker.refill(now);
                }
                Op::Consume(tokens) => {
                    let requested_milli = tokens * MILLI;
                    if state.tokens_milli >= requested_milli {
                        state.tokens_milli -= requested_milli;
                        consumed_milli += requested_milli;
                    }
                }
                Op::Adjust(delta) => {
                    state.adjust_milli(delta * MILLI);
                    adjusted_milli += delta * MILLI;
                }
            }
        }

        let granted_milli = refill_tracker.tokens_milli;
        prop_assert_eq!(
            state.tokens_milli,
            granted_milli - consumed_milli + adjusted_milli
        );
    }

    /// Consumption never drives the balance negative through the check
    /// path; only adjustments can create debt.
    #[test]
    fn debt_comes_only_from_adjustments(
        amount_milli in 1i64..=10_000,
        period_multiplier in 1i64..=120,
        ops in proptest::collection::vec(
            prop_oneof![
                (0i64..=10_000).prop_map(Op::Elapse),
                (1i64..=50).prop_map(Op::Consume),
            ],
            1..=64,
        ),
    ) {
        let burst = 100 * MILLI;
        let mut state = LimitState {
            tokens_milli: burst,
            last_refill_server_ms: 0,
            capacity_milli: burst,
            burst_milli: burst,
            refill_amount_milli: amount_milli,
            refill_period_ms: amount_milli * period_multiplier,
        };

        let mut now = 0i64;
        for op in &ops {
            match op {
                Op::Elapse(dt) => {
                    now += dt;
                    state.refill(now);
                }
                Op::Consume(tokens) => {
                    let requested_milli = tokens * MILLI;
                    if state.tokens_milli >= requested_milli {
                        state.tokens_milli -= requested_milli;
                    }
                }
                Op::Adjust(_) => unreachable!(),
            }
            prop_assert!(state.tokens_milli >= 0);
            prop_assert!(state.tokens_milli <= burst);
        }
    }
}
