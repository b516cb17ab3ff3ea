use std::sync::Arc;

use alloy::primitives::Address;
use alloy::rpc::types::TransactionReceipt;
use tracing::debug;

use super::{AutomationMetrics, wei_to_gwei};
use crate::ledger::{ProviderContracts, RebalanceDirection};
use crate::ledger::receipts::{fee_payments, reserve_increment, yield_reported};

/// Turns receipts of the automation's writes into metric deltas.
///
/// Every method takes the receipt as an `Option` so that skipped or
/// tolerated-and-failed writes can be passed through unchanged. Nothing is
/// recorded for `None` or for logs that do not decode.
pub struct OperationModeMetricsRecorder {
    metrics: Arc<dyn AutomationMetrics>,
    yield_manager: Address,
    vault_hub: Address,
}

impl OperationModeMetricsRecorder {
    pub fn new(metrics: Arc<dyn AutomationMetrics>, yield_manager: Address, vault_hub: Address) -> Self {
        Self {
            metrics,
            yield_manager,
            vault_hub,
        }
    }

    fn record_fee_payments(&self, contracts: ProviderContracts, receipt: &TransactionReceipt) {
        let vault = contracts.vault;
        let payments = fee_payments(receipt, self.vault_hub, contracts);

        if !payments.node_operator_fees.is_zero() {
            self.metrics
                .add_node_operator_fees_paid(vault, wei_to_gwei(payments.node_operator_fees));
        }
        if !payments.liabilities.is_zero() {
            self.metrics
                .add_liabilities_paid(vault, wei_to_gwei(payments.liabilities));
        }
        if !payments.lido_fees.is_zero() {
            self.metrics
                .add_lido_fees_paid(vault, wei_to_gwei(payments.lido_fees));
        }
    }

    /// Fees and liabilities settled while funding the provider.
    pub fn record_transfer_funds_metrics(
        &self,
        contracts: ProviderContracts,
        receipt: Option<&TransactionReceipt>,
    ) {
        let Some(receipt) = receipt else {
            return;
        };
        self.record_fee_payments(contracts, receipt);
    }

    /// Unstaked volume that reached the withdrawal reserve, plus fees
    /// settled on the way out.
    pub fn record_safe_withdrawal_metrics(
        &self,
        contracts: ProviderContracts,
        receipt: Option<&TransactionReceipt>,
    ) {
        let Some(receipt) = receipt else {
            return;
        };

        match reserve_increment(receipt, self.yield_manager) {
            Some(amount) => self
                .metrics
                .record_rebalance(RebalanceDirection::Unstake, wei_to_gwei(amount)),
            None => debug!(tx_hash = %receipt.transaction_hash, "No WithdrawalReserveAugmented event in receipt"),
        }

        self.record_fee_payments(contracts, receipt);
    }

    pub fn record_report_yield_metrics(
        &self,
        contracts: ProviderContracts,
        receipt: Option<&TransactionReceipt>,
    ) {
        let Some(receipt) = receipt else {
            return;
        };
        let vault = contracts.vault;

        match yield_reported(receipt, self.yield_manager) {
            Some(report) => {
                self.metrics.increment_report_yield(vault);
                self.metrics.set_last_reported_negative_yield(
                    vault,
                    wei_to_gwei(report.outstanding_negative_yield),
                );
            }
            None => debug!(tx_hash = %receipt.transaction_hash, "No NativeYieldReported event in receipt"),
        }

        self.record_fee_payments(contracts, receipt);
    }

    pub fn record_progress_ossification_metrics(
        &self,
        contracts: ProviderContracts,
        receipt: Option<&TransactionReceipt>,
    ) {
        let Some(receipt) = receipt else {
            return;
        };
        self.record_fee_payments(contracts, receipt);
    }

    pub fn record_vault_report_metrics(&self, vault: Address, receipt: Option<&TransactionReceipt>) {
        if receipt.is_some() {
            self.metrics.increment_lido_vault_accounting_report(vault);
        }
    }
}
