//! Metrics sink used by every component of the control loop.
//!
//! [`AutomationMetrics`] is fire-and-forget: no method returns a value or
//! fails. [`PrometheusMetrics`] is the production implementation and
//! [`OperationModeMetricsRecorder`] translates transaction receipts into
//! metric deltas.

use alloy::primitives::{Address, U256};

use crate::ledger::RebalanceDirection;
use crate::mode::OperationMode;
use crate::validators::BlsPublicKey;

#[cfg(test)]
pub(crate) mod mock;
mod recorder;
mod registry;
pub(crate) mod server;

pub use recorder::OperationModeMetricsRecorder;
pub use registry::{MetricsError, PrometheusMetrics};

const WEI_PER_GWEI: u64 = 1_000_000_000;

/// Converts a wei amount into whole gwei for gauge and counter values.
pub(crate) fn wei_to_gwei(amount_wei: U256) -> f64 {
    let gwei = amount_wei / U256::from(WEI_PER_GWEI);
    u128::try_from(gwei).unwrap_or(u128::MAX) as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Success,
    Failure,
}

impl ExecutionStatus {
    pub(crate) const fn as_label(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// What woke a processor up for its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Event,
    Timeout,
}

impl TriggerKind {
    pub(crate) const fn as_label(self) -> &'static str {
        match self {
            Self::Event => "vaults_report_data_updated_event",
            Self::Timeout => "timeout",
        }
    }
}

/// Counters, gauges and histograms updated by the automation.
///
/// Amounts are gwei. Implementations drop negative or non-finite values.
pub trait AutomationMetrics: Send + Sync {
    fn record_rebalance(&self, direction: RebalanceDirection, amount_gwei: f64);

    fn add_validator_partial_unstake_amount(&self, pubkey: &BlsPublicKey, amount_gwei: f64);

    fn increment_validator_exit(&self, pubkey: &BlsPublicKey);

    fn increment_lido_vault_accounting_report(&self, vault: Address);

    fn increment_report_yield(&self, vault: Address);

    fn set_last_peeked_negative_yield_report(&self, vault: Address, amount_gwei: f64);

    fn set_last_peeked_positive_yield_report(&self, vault: Address, amount_gwei: f64);

    fn set_last_settleable_lido_fees(&self, vault: Address, amount_gwei: f64);

    fn set_last_vault_report_timestamp(&self, vault: Address, timestamp: u64);

    fn set_yield_reported_cumulative(&self, vault: Address, amount_gwei: f64);

    fn set_lst_liability_principal_gwei(&self, vault: Address, amount_gwei: f64);

    fn set_last_reported_negative_yield(&self, vault: Address, amount_gwei: f64);

    fn set_last_total_pending_partial_withdrawals_gwei(&self, amount_gwei: f64);

    fn set_last_total_validator_balance_gwei(&self, amount_gwei: f64);

    fn set_validator_staked_amount_gwei(&self, pubkey: &BlsPublicKey, amount_gwei: f64);

    fn set_pending_partial_withdrawal_queue_amount_gwei(
        &self,
        pubkey: &BlsPublicKey,
        withdrawable_epoch: u64,
        amount_gwei: f64,
    );

    fn set_pending_exit_queue_amount_gwei(
        &self,
        pubkey: &BlsPublicKey,
        exit_epoch: u64,
        amount_gwei: f64,
        slashed: bool,
    );

    fn set_last_total_pending_exit_gwei(&self, amount_gwei: f64);

    fn set_pending_full_withdrawal_queue_amount_gwei(
        &self,
        pubkey: &BlsPublicKey,
        withdrawable_epoch: u64,
        amount_gwei: f64,
        slashed: bool,
    );

    fn set_last_total_pending_full_withdrawal_gwei(&self, amount_gwei: f64);

    fn set_pending_deposit_queue_amount_gwei(&self, pubkey: &BlsPublicKey, slot: u64, amount_gwei: f64);

    fn set_last_total_pending_deposit_gwei(&self, amount_gwei: f64);

    fn set_lido_lst_liability_gwei(&self, vault: Address, amount_gwei: f64);

    /// Absolute epoch difference between the primary and reference beacon
    /// nodes. `None` when either epoch could not be read, exported as -1.
    fn set_beacon_chain_epoch_drift(&self, drift_epochs: Option<u64>);

    fn add_node_operator_fees_paid(&self, vault: Address, amount_gwei: f64);

    fn add_liabilities_paid(&self, vault: Address, amount_gwei: f64);

    fn add_lido_fees_paid(&self, vault: Address, amount_gwei: f64);

    fn increment_operation_mode_execution(&self, mode: OperationMode, status: ExecutionStatus);

    fn increment_operation_mode_trigger(&self, mode: OperationMode, trigger: TriggerKind);

    fn record_operation_mode_duration(&self, mode: OperationMode, seconds: f64);

    fn increment_staking_deposit_quota_exceeded(&self, vault: Address);

    /// Requirement before tolerance band and quota are applied.
    fn set_actual_rebalance_requirement(
        &self,
        vault: Address,
        amount_gwei: f64,
        direction: RebalanceDirection,
    );

    /// Requirement the cycle actually acts on.
    fn set_reported_rebalance_requirement(
        &self,
        vault: Address,
        amount_gwei: f64,
        direction: RebalanceDirection,
    );
}
