//! One cycle of work per operation mode.
//!
//! The selector holds one processor per [`OperationMode`] and calls
//! [`OperationModeProcessor::process`] once per loop iteration. A processor
//! returns only after its trigger fired and the cycle's writes settled.
//!
//! Writes marked as tolerated are logged and skipped at the call site;
//! every other failure aborts the cycle and is retried on the next one.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::ledger::{
    LazyOracle, LedgerError, LidoAccountingReports, LineaRollupYieldExtension, VaultHub,
    YieldManager,
};
use crate::metrics::{AutomationMetrics, OperationModeMetricsRecorder, TriggerKind};
use crate::mode::OperationMode;
use crate::staking::StakingError;

mod ossification_complete;
mod ossification_pending;
mod yield_reporting;

pub use ossification_complete::OssificationCompleteProcessor;
pub use ossification_pending::OssificationPendingProcessor;
pub use yield_reporting::{YieldReportingProcessor, YieldReportingSettings};

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Staking(#[from] StakingError),
}

#[async_trait]
pub trait OperationModeProcessor: Send + Sync {
    /// Runs exactly one cycle, including the wait for its trigger.
    async fn process(&self) -> Result<(), ProcessorError>;
}

/// Ledger collaborators shared by the processors.
#[derive(Clone)]
pub struct LedgerClients {
    pub yield_manager: Arc<dyn YieldManager>,
    pub lazy_oracle: Arc<dyn LazyOracle>,
    pub rollup: Arc<dyn LineaRollupYieldExtension>,
    pub vault_hub: Arc<dyn VaultHub>,
    pub accounting_reports: Arc<dyn LidoAccountingReports>,
}

/// Races the next `VaultsReportDataUpdated` event against `max_inaction`.
///
/// The watch is released on every exit path, including a failed wait.
pub(crate) async fn wait_for_report_or_timeout(
    lazy_oracle: &dyn LazyOracle,
    metrics: &dyn AutomationMetrics,
    mode: OperationMode,
    max_inaction: Duration,
) -> Result<TriggerKind, LedgerError> {
    let mut watch = lazy_oracle.watch_vaults_report_data_updated().await?;

    let fired = tokio::select! {
        result = watch.wait() => Some(result),
        () = tokio::time::sleep(max_inaction) => None,
    };
    watch.unwatch();

    let trigger = match fired {
        Some(result) => {
            result?;
            TriggerKind::Event
        }
        None => TriggerKind::Timeout,
    };

    info!(%mode, trigger = trigger.as_label(), "Cycle triggered");
    metrics.increment_operation_mode_trigger(mode, trigger);
    Ok(trigger)
}

/// Submits the latest accounting report for `vault` unless disabled or the
/// vault hub already holds a fresh one. Submission failures are tolerated.
pub(crate) async fn submit_vault_report_if_not_fresh(
    ledger: &LedgerClients,
    recorder: &OperationModeMetricsRecorder,
    vault: Address,
    enabled: bool,
) {
    if !enabled {
        info!(%vault, "Vault report submission disabled, skipping");
        return;
    }

    match ledger.vault_hub.is_report_fresh(vault).await {
        Ok(true) => {
            info!(%vault, "Vault report is fresh, skipping submission");
            return;
        }
        Ok(false) => {}
        Err(error) => {
            warn!(%vault, %error, "Could not read vault report freshness, submitting anyway");
        }
    }

    let receipt = ledger
        .accounting_reports
        .submit_latest_vault_report(vault)
        .await
        .inspect_err(|error| warn!(%vault, %error, "Vault report submission failed, continuing"))
        .ok();

    recorder.record_vault_report_metrics(vault, receipt.as_ref());
}
