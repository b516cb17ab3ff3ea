use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::Address;
use async_trait::async_trait;
use tracing::{info, warn};

use super::{LedgerClients, OperationModeProcessor, ProcessorError};
use crate::metrics::{AutomationMetrics, OperationModeMetricsRecorder, TriggerKind};
use crate::mode::OperationMode;
use crate::staking::BeaconChainStakingClient;

const MODE: OperationMode = OperationMode::OssificationComplete;

/// Once ossified only withdrawals remain: every `max_inaction` the reserve
/// is topped up with whatever is available and the validators are drained.
pub struct OssificationCompleteProcessor {
    metrics: Arc<dyn AutomationMetrics>,
    recorder: Arc<OperationModeMetricsRecorder>,
    ledger: LedgerClients,
    staking: Arc<BeaconChainStakingClient>,
    yield_provider: Address,
    max_inaction: Duration,
}

impl OssificationCompleteProcessor {
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
}

#[async_trait]
impl OperationModeProcessor for OssificationCompleteProcessor {
    #[tracing::instrument(skip_all, fields(mode = %MODE), level = tracing::Level::INFO)]
    async fn process(&self) -> Result<(), ProcessorError> {
        tokio::time::sleep(self.max_inaction).await;
        self.metrics
            .increment_operation_mode_trigger(MODE, TriggerKind::Timeout);

        let yield_manager = &self.ledger.yield_manager;
        let contracts = yield_manager.provider_contracts(self.yield_provider).await?;

        let receipt = yield_manager
            .safe_max_add_to_withdrawal_reserve(self.yield_provider)
            .await
            .inspect_err(|error| warn!(%error, "safeMaxAddToWithdrawalReserve failed, continuing"))
            .ok()
            .flatten();
        self.recorder
            .record_safe_withdrawal_metrics(contracts, receipt.as_ref());

        let started = Instant::now();
        self.staking.submit_max_available_withdrawal_requests().await?;
        self.metrics
            .record_operation_mode_duration(MODE, started.elapsed().as_secs_f64());

        info!("Ossified provider cycle complete");
        Ok(())
    }
}
