//! Rolling-window rate limit on rebalanced volume.
//!
//! [`RebalanceQuotaService`] bounds the notional amount moved in one
//! direction over the last N cycles to a share of the total system
//! balance. Requests that would cross the ceiling are partially filled up
//! to it rather than rejected outright.

use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, U256};
use tracing::{debug, info, warn};

use crate::ledger::RebalanceDirection;
use crate::metrics::AutomationMetrics;

mod accumulator;

pub use accumulator::SlidingWindowAccumulator;

pub(crate) const BASIS_POINTS_DENOMINATOR: u32 = 10_000;

pub struct RebalanceQuotaService {
    metrics: Arc<dyn AutomationMetrics>,
    direction: RebalanceDirection,
    window: Mutex<SlidingWindowAccumulator>,
    quota_bps: u32,
    tolerance_amount: U256,
}

impl RebalanceQuotaService {
    pub fn new(
        metrics: Arc<dyn AutomationMetrics>,
        direction: RebalanceDirection,
        window_size_in_cycles: usize,
        quota_bps: u32,
        tolerance_amount: U256,
    ) -> Self {
        Self {
            metrics,
            direction,
            window: Mutex::new(SlidingWindowAccumulator::new(window_size_in_cycles)),
            quota_bps,
            tolerance_amount,
        }
    }

    pub fn direction(&self) -> RebalanceDirection {
        self.direction
    }

    /// Clips `requested` so the rolling window never exceeds
    /// `total_system_balance * quota_bps / 10_000`.
    ///
    /// Every call outside the disabled case advances the window by one
    /// cycle, including sub-tolerance requests which are recorded as zero.
    pub fn rebalance_amount_after_quota(
        &self,
        vault: Address,
        total_system_balance: U256,
        requested: U256,
    ) -> U256 {
        let mut window = match self.window.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };

        if window.capacity() == 0 {
            debug!(direction = %self.direction, %requested, "Quota disabled, passing request through");
            return requested;
        }

        if requested < self.tolerance_amount {
            window.push(U256::ZERO);
            debug!(
                direction = %self.direction,
                %requested,
                tolerance = %self.tolerance_amount,
                "Request below tolerance, recording zero"
            );
            return U256::ZERO;
        }

        let quota = total_system_balance * U256::from(self.quota_bps)
            / U256::from(BASIS_POINTS_DENOMINATOR);
        let prev_total = window.total();
        window.push(requested);
        let new_total = window.total();

        if new_total <= quota {
            info!(
                direction = %self.direction,
                %requested,
                %new_total,
                %quota,
                "Rebalance within quota"
            );
            return requested;
        }

        self.metrics.increment_staking_deposit_quota_exceeded(vault);

        if prev_total >= quota {
            warn!(
                direction = %self.direction,
                %requested,
                %prev_total,
                %quota,
                "Quota already exhausted, throttling rebalance to zero"
            );
            return U256::ZERO;
        }

        let remaining = quota - prev_total;
        warn!(
            direction = %self.direction,
            %requested,
            %remaining,
            %quota,
            "Quota exceeded, partially filling rebalance"
        );
        remaining
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::metrics::mock::{MetricEvent, RecordingMetrics};

    const VAULT: Address = Address::repeat_byte(0xaa);

    fn service(
        metrics: Arc<RecordingMetrics>,
        window: usize,
        quota_bps: u32,
        tolerance: u64,
    ) -> RebalanceQuotaService {
        RebalanceQuotaService::new(
            metrics,
            RebalanceDirection::Stake,
            window,
            quota_bps,
            U256::from(tolerance),
        )
    }

    fn quota_exceeded_count(metrics: &RecordingMetrics) -> usize {
        metrics.count(|event| matches!(event, MetricEvent::QuotaExceeded(vault) if *vault == VAULT))
    }

    #[test]
    fn disabled_window_passes_request_through() {
        let metrics = Arc::new(RecordingMetrics::new());
        let quota = service(Arc::clone(&metrics), 0, 1, 0);

        let amount = quota.rebalance_amount_after_quota(VAULT, U256::from(100), U256::from(5_000));

        assert_eq!(amount, U256::from(5_000));
        assert!(metrics.events().is_empty());
    }

    #[test]
    fn below_tolerance_returns_zero_and_advances_window() {
        let metrics = Arc::new(RecordingMetrics::new());
        // 10% of 10_000 = 1_000
        let quota = service(Arc::clone(&metrics), 2, 1_000, 50);

        assert_eq!(
            quota.rebalance_amount_after_quota(VAULT, U256::from(10_000), U256::from(900)),
            U256::from(900)
        );
        assert_eq!(
            quota.rebalance_amount_after_quota(VAULT, U256::from(10_000), U256::from(49)),
            U256::ZERO
        );
        assert_eq!(
            quota.rebalance_amount_after_quota(VAULT, U256::from(10_000), U256::from(49)),
            U256::ZERO
        );

        // The 900 push has been evicted by the two zero pushes.
        assert_eq!(
            quota.rebalance_amount_after_quota(VAULT, U256::from(10_000), U256::from(1_000)),
            U256::from(1_000)
        );
        assert_eq!(quota_exceeded_count(&metrics), 0);
    }

    #[test]
    fn partial_fill_at_quota_boundary() {
        let metrics = Arc::new(RecordingMetrics::new());
        // 10% of 10_000 = 1_000
        let quota = service(Arc::clone(&metrics), 5, 1_000, 0);

        assert_eq!(
            quota.rebalance_amount_after_quota(VAULT, U256::from(10_000), U256::from(800)),
            U256::from(800)
        );
        assert_eq!(
            quota.rebalance_amount_after_quota(VAULT, U256::from(10_000), U256::from(500)),
            U256::from(200)
        );
        assert_eq!(quota_exceeded_count(&metrics), 1);
    }

    #[test]
    fn saturated_window_throttles_to_zero() {
        let metrics = Arc::new(RecordingMetrics::new());
        let quota = service(Arc::clone(&metrics), 5, 1_000, 0);

        quota.rebalance_amount_after_quota(VAULT, U256::from(10_000), U256::from(1_000));

        assert_eq!(
            quota.rebalance_amount_after_quota(VAULT, U256::from(10_000), U256::from(1)),
            U256::ZERO
        );
        assert_eq!(
            quota.rebalance_amount_after_quota(VAULT, U256::from(10_000), U256::from(300)),
            U256::ZERO
        );
        assert_eq!(quota_exceeded_count(&metrics), 2);
    }

    #[test]
    fn window_eviction_restores_headroom() {
        let metrics = Arc::new(RecordingMetrics::new());
        let quota = service(Arc::clone(&metrics), 2, 1_000, 0);

        quota.rebalance_amount_after_quota(VAULT, U256::from(10_000), U256::from(1_000));
        assert_eq!(
            quota.rebalance_amount_after_quota(VAULT, U256::from(10_000), U256::from(500)),
            U256::ZERO
        );

        // Pushing 400 evicts the first 1_000, leaving [500, 400].
        let amount = quota.rebalance_amount_after_quota(VAULT, U256::from(10_000), U256::from(400));

        assert_eq!(amount, U256::from(400));
    }

    #[test]
    fn zero_system_balance_throttles_everything() {
        let metrics = Arc::new(RecordingMetrics::new());
        let quota = service(Arc::clone(&metrics), 3, 1_800, 1);

        let amount = quota.rebalance_amount_after_quota(VAULT, U256::ZERO, U256::from(5));

        assert_eq!(amount, U256::ZERO);
        assert_eq!(quota_exceeded_count(&metrics), 1);
    }

    proptest! {
        #[test]
        fn smaller_request_never_yields_more(
            // Shorter than the window so the extra push never evicts.
            history in prop::collection::vec(0u64..2_000, 0..4),
            smaller in 0u64..3_000,
            extra in 0u64..3_000,
            total_balance in 1u64..50_000,
            bps in 0u32..=10_000,
        ) {
            let larger = smaller + extra;
            let build = || {
                let quota = service(Arc::new(RecordingMetrics::new()), 4, bps, 10);
                for amount in &history {
                    quota.rebalance_amount_after_quota(VAULT, U256::from(total_balance), U256::from(*amount));
                }
                quota
            };

            let small_result = build().rebalance_amount_after_quota(
                VAULT, U256::from(total_balance), U256::from(smaller));
            let large_result = build().rebalance_amount_after_quota(
                VAULT, U256::from(total_balance), U256::from(larger));

            prop_assert!(small_result <= large_result);
        }

        #[test]
        fn clipped_amount_never_exceeds_request_or_headroom(
            prev in 0u64..1_000,
            requested in 0u64..5_000,
        ) {
            let quota = service(Arc::new(RecordingMetrics::new()), 10, 1_000, 0);
            quota.rebalance_amount_after_quota(VAULT, U256::from(10_000), U256::from(prev));

            let returned = quota.rebalance_amount_after_quota(
                VAULT, U256::from(10_000), U256::from(requested));

            prop_assert!(returned <= U256::from(requested));
            if prev + requested > 1_000 {
                prop_assert_eq!(returned, U256::from(1_000 - prev));
            } else {
                prop_assert_eq!(returned, U256::from(requested));
            }
        }
    }
}
