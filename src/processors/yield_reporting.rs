use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{
    LedgerClients, OperationModeProcessor, ProcessorError, submit_vault_report_if_not_fresh,
    wait_for_report_or_timeout,
};
use crate::ledger::{
    LedgerError, ProviderContracts, RebalanceDirection, RebalanceRequirement, WEI_PER_ETHER,
};
use crate::metrics::{AutomationMetrics, OperationModeMetricsRecorder, wei_to_gwei};
use crate::mode::OperationMode;
use crate::quota::RebalanceQuotaService;
use crate::staking::BeaconChainStakingClient;

const MODE: OperationMode = OperationMode::YieldReporting;

#[derive(Debug, Clone)]
pub struct YieldReportingSettings {
    pub yield_provider: Address,
    pub l2_yield_recipient: Address,
    pub max_inaction: Duration,
    pub should_submit_vault_report: bool,
    pub should_report_yield: bool,
    pub is_unpause_staking_enabled: bool,
    /// Growth of outstanding negative yield, in wei, that forces a report.
    pub min_negative_yield_diff_to_report_yield: U256,
    pub min_withdrawal_threshold_eth: u64,
    /// Yield is reported every N cycles regardless of the negative yield
    /// threshold.
    pub cycles_per_yield_report: u64,
}

/// Steady-state cadence: keeps the withdrawal reserve at target, reports
/// yield and queues validator withdrawals when the reserve runs short.
pub struct YieldReportingProcessor {
    metrics: Arc<dyn AutomationMetrics>,
    recorder: Arc<OperationModeMetricsRecorder>,
    ledger: LedgerClients,
    staking: Arc<BeaconChainStakingClient>,
    quota: Arc<RebalanceQuotaService>,
    settings: YieldReportingSettings,
    cycle_count: AtomicU64,
}

impl YieldReportingProcessor {
    pub fn new(
        metrics: Arc<dyn AutomationMetrics>,
        recorder: Arc<OperationModeMetricsRecorder>,
        ledger: LedgerClients,
        staking: Arc<BeaconChainStakingClient>,
        quota: Arc<RebalanceQuotaService>,
        settings: YieldReportingSettings,
    ) -> Self {
        Self {
            metrics,
            recorder,
            ledger,
            staking,
            quota,
            settings,
            cycle_count: AtomicU64::new(0),
        }
    }

    /// Pauses staking ahead of a deficit, runs the primary rebalance, makes
    /// at most one amendment pass if the reserve drifted into deficit, and
    /// queues beacon chain withdrawals last since they settle outside the
    /// cycle.
    async fn run_cycle(&self) -> Result<(), ProcessorError> {
        let cycle = self.cycle_count.fetch_add(1, Ordering::SeqCst) + 1;
        let yield_provider = self.settings.yield_provider;
        let yield_manager = &self.ledger.yield_manager;
        info!(cycle, "Starting yield reporting cycle");

        let contracts = yield_manager.provider_contracts(yield_provider).await?;
        let vault = contracts.vault;

        // The requirement read depends on a fresh vault report.
        submit_vault_report_if_not_fresh(
            &self.ledger,
            &self.recorder,
            vault,
            self.settings.should_submit_vault_report,
        )
        .await;

        let actual = yield_manager.rebalance_requirements().await?;
        let initial = self.apply_staking_quota(vault, actual).await?;
        info!(
            direction = %initial.direction,
            amount = %initial.amount,
            "Initial rebalance requirement"
        );

        if initial.direction == RebalanceDirection::Unstake {
            yield_manager
                .pause_staking_if_not_already(yield_provider)
                .await
                .inspect_err(|error| warn!(%error, "Pausing staking failed, continuing"))
                .ok();
        }

        match initial.direction {
            RebalanceDirection::None => self.handle_no_rebalance(contracts, cycle).await?,
            RebalanceDirection::Stake => self.handle_staking(contracts, cycle, initial.amount).await,
            RebalanceDirection::Unstake => {
                self.report_yield_if_due(contracts, cycle).await;
                self.handle_unstaking(contracts, initial.amount).await;
            }
        }

        let post = yield_manager.rebalance_requirements().await?;
        info!(direction = %post.direction, amount = %post.amount, "Post rebalance requirement");

        if initial.direction != RebalanceDirection::Unstake
            && post.direction == RebalanceDirection::Unstake
        {
            info!("Reserve drifted into deficit during the cycle, amending");
            self.handle_unstaking(contracts, post.amount).await;
        }

        let withdrawal = yield_manager.rebalance_requirements().await?;
        if withdrawal.direction == RebalanceDirection::Unstake {
            self.staking
                .submit_withdrawal_requests_to_fulfil_amount(withdrawal.amount)
                .await?;
        }

        if self.settings.is_unpause_staking_enabled
            && initial.direction != RebalanceDirection::Unstake
            && post.direction != RebalanceDirection::Unstake
        {
            yield_manager
                .unpause_staking_if_not_already(yield_provider)
                .await
                .inspect_err(|error| warn!(%error, "Unpausing staking failed, continuing"))
                .ok();
        }

        Ok(())
    }

    /// Clips a stake requirement to the rolling quota. Other directions
    /// advance the window with a zero-sized request.
    async fn apply_staking_quota(
        &self,
        vault: Address,
        actual: RebalanceRequirement,
    ) -> Result<RebalanceRequirement, LedgerError> {
        let total_system_balance = self.ledger.yield_manager.total_system_balance().await?;

        let governed = actual.direction == self.quota.direction();
        let requested = if governed { actual.amount } else { U256::ZERO };
        let allowed = self
            .quota
            .rebalance_amount_after_quota(vault, total_system_balance, requested);

        let reported = match actual.direction {
            RebalanceDirection::Stake if governed && allowed.is_zero() => {
                RebalanceRequirement::none()
            }
            RebalanceDirection::Stake if governed => RebalanceRequirement::stake(allowed),
            _ => actual,
        };

        self.metrics.set_actual_rebalance_requirement(
            vault,
            wei_to_gwei(actual.amount),
            actual.direction,
        );
        self.metrics.set_reported_rebalance_requirement(
            vault,
            wei_to_gwei(reported.amount),
            reported.direction,
        );

        Ok(reported)
    }

    /// Sweeps funds stranded on the yield manager into the provider, then
    /// reports yield.
    async fn handle_no_rebalance(
        &self,
        contracts: ProviderContracts,
        cycle: u64,
    ) -> Result<(), LedgerError> {
        let yield_manager = &self.ledger.yield_manager;
        let yield_provider = self.settings.yield_provider;

        let (balance, target_reserve_deficit) = futures_util::try_join!(
            yield_manager.balance(),
            yield_manager.target_reserve_deficit(),
        )?;
        let threshold =
            U256::from(self.settings.min_withdrawal_threshold_eth) * U256::from(WEI_PER_ETHER);

        if balance > threshold {
            // fundYieldProvider reverts while the reserve is short of target.
            if !target_reserve_deficit.is_zero() {
                let receipt = yield_manager
                    .safe_withdraw_from_yield_provider(yield_provider, target_reserve_deficit)
                    .await
                    .inspect_err(|error| {
                        warn!(%error, "safeWithdrawFromYieldProvider failed, continuing");
                    })
                    .ok();
                self.recorder
                    .record_safe_withdrawal_metrics(contracts, receipt.as_ref());
            }

            let receipt = yield_manager
                .fund_yield_provider(yield_provider, balance)
                .await
                .inspect_err(|error| warn!(%error, "fundYieldProvider failed, continuing"))
                .ok();
            self.recorder
                .record_transfer_funds_metrics(contracts, receipt.as_ref());
        } else {
            debug!(%balance, %threshold, "Yield manager balance below threshold, nothing to sweep");
        }

        self.report_yield_if_due(contracts, cycle).await;
        Ok(())
    }

    /// Moves a reserve surplus into the provider. Funding the provider only
    /// happens once the rollup released the funds. Yield is reported last.
    async fn handle_staking(&self, contracts: ProviderContracts, cycle: u64, amount: U256) {
        info!(%amount, "Reserve surplus, staking");

        match self
            .ledger
            .rollup
            .transfer_funds_for_native_yield(amount)
            .await
        {
            Ok(_) => {
                self.metrics
                    .record_rebalance(RebalanceDirection::Stake, wei_to_gwei(amount));

                let receipt = self
                    .ledger
                    .yield_manager
                    .fund_yield_provider(self.settings.yield_provider, amount)
                    .await
                    .inspect_err(|error| warn!(%error, "fundYieldProvider failed, continuing"))
                    .ok();
                self.recorder
                    .record_transfer_funds_metrics(contracts, receipt.as_ref());
            }
            Err(error) => warn!(%error, "transferFundsForNativeYield failed, continuing"),
        }

        self.report_yield_if_due(contracts, cycle).await;
    }

    async fn handle_unstaking(&self, contracts: ProviderContracts, amount: U256) {
        info!(%amount, "Reserve deficit, topping up withdrawal reserve");

        let receipt = self
            .ledger
            .yield_manager
            .safe_add_to_withdrawal_reserve_if_above_threshold(self.settings.yield_provider, amount)
            .await
            .inspect_err(|error| {
                warn!(%error, "safeAddToWithdrawalReserveIfAboveThreshold failed, continuing");
            })
            .ok()
            .flatten();
        self.recorder
            .record_safe_withdrawal_metrics(contracts, receipt.as_ref());
    }

    async fn report_yield_if_due(&self, contracts: ProviderContracts, cycle: u64) {
        if !self.should_report_yield(contracts.vault, cycle).await {
            return;
        }

        match self
            .ledger
            .yield_manager
            .report_yield(self.settings.yield_provider, self.settings.l2_yield_recipient)
            .await
        {
            Ok(receipt) => {
                info!(tx_hash = %receipt.transaction_hash, "Reported yield");
                self.recorder
                    .record_report_yield_metrics(contracts, Some(&receipt));
            }
            Err(error) => warn!(%error, "reportYield failed, continuing"),
        }
    }

    /// Reports when the peeked negative yield grew by at least the
    /// configured amount since the last report, or on every N-th cycle.
    /// Publishes the peeked values as gauges along the way.
    async fn should_report_yield(&self, vault: Address, cycle: u64) -> bool {
        let yield_manager = &self.ledger.yield_manager;
        let yield_provider = self.settings.yield_provider;

        let (settleable_fees, peeked, provider_data) = futures_util::join!(
            self.ledger.vault_hub.settleable_lido_fees(vault),
            yield_manager.peek_yield_report(yield_provider, self.settings.l2_yield_recipient),
            yield_manager.yield_provider_data(yield_provider),
        );
        let settleable_fees = settleable_fees
            .inspect_err(|error| debug!(%error, "Settleable Lido fees unavailable"))
            .ok();
        let peeked = peeked
            .inspect_err(|error| debug!(%error, "Yield report peek unavailable"))
            .ok();
        let provider_data = provider_data
            .inspect_err(|error| debug!(%error, "Yield provider data unavailable"))
            .ok();

        let mut negative_yield_diff = None;
        if let Some(report) = peeked {
            self.metrics.set_last_peeked_negative_yield_report(
                vault,
                wei_to_gwei(report.outstanding_negative_yield),
            );
            self.metrics
                .set_last_peeked_positive_yield_report(vault, wei_to_gwei(report.yield_amount));

            if let Some(data) = provider_data.as_ref() {
                negative_yield_diff = report
                    .outstanding_negative_yield
                    .checked_sub(data.last_reported_negative_yield);
            }
        }

        if let Some(fees) = settleable_fees {
            self.metrics
                .set_last_settleable_lido_fees(vault, wei_to_gwei(fees));
        }

        let negative_yield_threshold_met = negative_yield_diff
            .is_some_and(|diff| diff >= self.settings.min_negative_yield_diff_to_report_yield);
        let cycle_report_due = cycle
            .checked_rem(self.settings.cycles_per_yield_report)
            .is_some_and(|remainder| remainder == 0);
        let should_report = self.settings.should_report_yield
            && (negative_yield_threshold_met || cycle_report_due);

        info!(
            should_report,
            cycle,
            cycle_report_due,
            negative_yield_threshold_met,
            negative_yield_diff = ?negative_yield_diff,
            settleable_fees = ?settleable_fees,
            "Yield report decision"
        );
        should_report
    }
}

#[async_trait]
impl OperationModeProcessor for YieldReportingProcessor {
    #[tracing::instrument(skip_all, fields(mode = %MODE), level = tracing::Level::INFO)]
    async fn process(&self) -> Result<(), ProcessorError> {
        wait_for_report_or_timeout(
            self.ledger.lazy_oracle.as_ref(),
            self.metrics.as_ref(),
            MODE,
            self.settings.max_inaction,
        )
        .await?;

        let started = Instant::now();
        self.run_cycle().await?;
        self.metrics
            .record_operation_mode_duration(MODE, started.elapsed().as_secs_f64());

        Ok(())
    }
}
