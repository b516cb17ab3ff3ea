use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::Address;
use async_trait::async_trait;
use tracing::{info, warn};

use super::{LedgerClients, OperationModeProcessor, ProcessorError, wait_for_report_or_timeout};
use crate::metrics::{AutomationMetrics, OperationModeMetricsRecorder};
use crate::mode::OperationMode;
use crate::staking::BeaconChainStakingClient;

const MODE: OperationMode = OperationMode::OssificationPending;

/// Drives a provider through pending ossification. Each cycle submits the
/// latest vault report when a dry run succeeds, then advances ossification
/// and starts draining the validators once it completes.
pub struct OssificationPendingProcessor {
    metrics: Arc<dyn AutomationMetrics>,
    recorder: Arc<OperationModeMetricsRecorder>,
    ledger: LedgerClients,
    staking: Arc<BeaconChainStakingClient>,
    yield_provider: Address,
    max_inaction: Duration,
}

impl OssificationPendingProcessor {
    pub fn new(
        metrics: Arc<dyn AutomationMetrics>,
        recorder: Arc<OperationModeMetricsRecorder>,
        ledger: LedgerClients,
        staking: Arc<BeaconChainStakingClient>,
        yield_provider: Address,
        max_inaction: Duration,
    ) -> Self {
        Self {
            metrics,
            recorder,
            ledger,
            staking,
            yield_provider,
            max_inaction,
        }
    }

    async fn submit_vault_report_if_simulation_ok(&self, vault: Address) {
        let reports = &self.ledger.accounting_reports;

        let params = match reports.latest_vault_report_params(vault).await {
            Ok(params) => params,
            Err(error) => {
                warn!(%vault, %error, "Could not resolve latest vault report, skipping submission");
                return;
            }
        };

        if !reports.is_simulate_submit_vault_report_ok(&params).await {
            info!(%vault, "Vault report submission would revert, skipping");
            return;
        }

        let receipt = reports
            .submit_vault_report(&params)
            .await
            .inspect_err(|error| warn!(%vault, %error, "Vault report submission failed, continuing"))
            .ok();
        self.recorder
            .record_vault_report_metrics(vault, receipt.as_ref());
    }

    async fn run_cycle(&self) -> Result<(), ProcessorError> {
        let yield_manager = &self.ledger.yield_manager;
        let contracts = yield_manager.provider_contracts(self.yield_provider).await?;

        self.submit_vault_report_if_simulation_ok(contracts.vault).await;

        let receipt = yield_manager
            .progress_pending_ossification(self.yield_provider)
            .await?;
        info!(tx_hash = %receipt.transaction_hash, "Progressed pending ossification");
        self.recorder
            .record_progress_ossification_metrics(contracts, Some(&receipt));

        if !yield_manager.is_ossified(self.yield_provider).await? {
            info!("Ossification still pending");
            return Ok(());
        }

        info!("Ossification complete, withdrawing everything available");
        let receipt = yield_manager
            .safe_max_add_to_withdrawal_reserve(self.yield_provider)
            .await
            .inspect_err(|error| warn!(%error, "safeMaxAddToWithdrawalReserve failed, continuing"))
            .ok()
            .flatten();
        self.recorder
            .record_safe_withdrawal_metrics(contracts, receipt.as_ref());

        self.staking.submit_max_available_withdrawal_requests().await?;
        Ok(())
    }
}

#[async_trait]
impl OperationModeProcessor for OssificationPendingProcessor {
    #[tracing::instrument(skip_all, fields(mode = %MODE), level = tracing::Level::INFO)]
    async fn process(&self) -> Result<(), ProcessorError> {
        wait_for_report_or_timeout(
            self.ledger.lazy_oracle.as_ref(),
            self.metrics.as_ref(),
            MODE,
            self.max_inaction,
        )
        .await?;

        let started = Instant::now();
        self.run_cycle().await?;
        self.metrics
            .record_operation_mode_duration(MODE, started.elapsed().as_secs_f64());

        Ok(())
    }
}
