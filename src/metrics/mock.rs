//! Recording implementation of [`AutomationMetrics`] for tests.

use std::sync::Mutex;

use alloy::primitives::Address;

use super::{AutomationMetrics, ExecutionStatus, TriggerKind};
use crate::ledger::RebalanceDirection;
use crate::mode::OperationMode;
use crate::validators::BlsPublicKey;

/// One captured metrics call.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MetricEvent {
    Rebalance(RebalanceDirection, f64),
    PartialUnstake(BlsPublicKey, f64),
    ValidatorExit(BlsPublicKey),
    VaultAccountingReport(Address),
    ReportYield(Address),
    PeekedNegativeYield(Address, f64),
    PeekedPositiveYield(Address, f64),
    SettleableLidoFees(Address, f64),
    VaultReportTimestamp(Address, u64),
    YieldReportedCumulative(Address, f64),
    LstLiabilityPrincipal(Address, f64),
    LastReportedNegativeYield(Address, f64),
    TotalPendingPartialWithdrawals(f64),
    TotalValidatorBalance(f64),
    ValidatorStakedAmount(BlsPublicKey, f64),
    PendingPartialWithdrawalQueue(BlsPublicKey, u64, f64),
    PendingExitQueue(BlsPublicKey, u64, f64, bool),
    TotalPendingExit(f64),
    PendingFullWithdrawalQueue(BlsPublicKey, u64, f64, bool),
    TotalPendingFullWithdrawal(f64),
    PendingDepositQueue(BlsPublicKey, u64, f64),
    TotalPendingDeposit(f64),
    LidoLstLiability(Address, f64),
    BeaconChainEpochDrift(Option<u64>),
    NodeOperatorFeesPaid(Address, f64),
    LiabilitiesPaid(Address, f64),
    LidoFeesPaid(Address, f64),
    ModeExecution(OperationMode, ExecutionStatus),
    ModeTrigger(OperationMode, TriggerKind),
    ModeDuration(OperationMode),
    QuotaExceeded(Address),
    ActualRequirement(Address, f64, RebalanceDirection),
    ReportedRequirement(Address, f64, RebalanceDirection),
}

#[derive(Default)]
pub(crate) struct RecordingMetrics {
    events: Mutex<Vec<MetricEvent>>,
}

impl RecordingMetrics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, predicate: impl Fn(&MetricEvent) -> bool) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| predicate(event))
            .count()
    }

    fn push(&self, event: MetricEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl AutomationMetrics for RecordingMetrics {
    fn record_rebalance(&self, direction: RebalanceDirection, amount_gwei: f64) {
        self.push(MetricEvent::Rebalance(direction, amount_gwei));
    }

    fn add_validator_partial_unstake_amount(&self, pubkey: &BlsPublicKey, amount_gwei: f64) {
        self.push(MetricEvent::PartialUnstake(*pubkey, amount_gwei));
    }

    fn increment_validator_exit(&self, pubkey: &BlsPublicKey) {
        self.push(MetricEvent::ValidatorExit(*pubkey));
    }

    fn increment_lido_vault_accounting_report(&self, vault: Address) {
        self.push(MetricEvent::VaultAccountingReport(vault));
    }

    fn increment_report_yield(&self, vault: Address) {
        self.push(MetricEvent::ReportYield(vault));
    }

    fn set_last_peeked_negative_yield_report(&self, vault: Address, amount_gwei: f64) {
        self.push(MetricEvent::PeekedNegativeYield(vault, amount_gwei));
    }

    fn set_last_peeked_positive_yield_report(&self, vault: Address, amount_gwei: f64) {
        self.push(MetricEvent::PeekedPositiveYield(vault, amount_gwei));
    }

    fn set_last_settleable_lido_fees(&self, vault: Address, amount_gwei: f64) {
        self.push(MetricEvent::SettleableLidoFees(vault, amount_gwei));
    }

    fn set_last_vault_report_timestamp(&self, vault: Address, timestamp: u64) {
        self.push(MetricEvent::VaultReportTimestamp(vault, timestamp));
    }

    fn set_yield_reported_cumulative(&self, vault: Address, amount_gwei: f64) {
        self.push(MetricEvent::YieldReportedCumulative(vault, amount_gwei));
    }

    fn set_lst_liability_principal_gwei(&self, vault: Address, amount_gwei: f64) {
        self.push(MetricEvent::LstLiabilityPrincipal(vault, amount_gwei));
    }

    fn set_last_reported_negative_yield(&self, vault: Address, amount_gwei: f64) {
        self.push(MetricEvent::LastReportedNegativeYield(vault, amount_gwei));
    }

    fn set_last_total_pending_partial_withdrawals_gwei(&self, amount_gwei: f64) {
        self.push(MetricEvent::TotalPendingPartialWithdrawals(amount_gwei));
    }

    fn set_last_total_validator_balance_gwei(&self, amount_gwei: f64) {
        self.push(MetricEvent::TotalValidatorBalance(amount_gwei));
    }

    fn set_validator_staked_amount_gwei(&self, pubkey: &BlsPublicKey, amount_gwei: f64) {
        self.push(MetricEvent::ValidatorStakedAmount(*pubkey, amount_gwei));
    }

    fn set_pending_partial_withdrawal_queue_amount_gwei(
        &self,
        pubkey: &BlsPublicKey,
        withdrawable_epoch: u64,
        amount_gwei: f64,
    ) {
        self.push(MetricEvent::PendingPartialWithdrawalQueue(
            *pubkey,
            withdrawable_epoch,
            amount_gwei,
        ));
    }

    fn set_pending_exit_queue_amount_gwei(
        &self,
        pubkey: &BlsPublicKey,
        exit_epoch: u64,
        amount_gwei: f64,
        slashed: bool,
    ) {
        self.push(MetricEvent::PendingExitQueue(
            *pubkey,
            exit_epoch,
            amount_gwei,
            slashed,
        ));
    }

    fn set_last_total_pending_exit_gwei(&self, amount_gwei: f64) {
        self.push(MetricEvent::TotalPendingExit(amount_gwei));
    }

    fn set_pending_full_withdrawal_queue_amount_gwei(
        &self,
        pubkey: &BlsPublicKey,
        withdrawable_epoch: u64,
        amount_gwei: f64,
        slashed: bool,
    ) {
        self.push(MetricEvent::PendingFullWithdrawalQueue(
            *pubkey,
            withdrawable_epoch,
            amount_gwei,
            slashed,
        ));
    }

    fn set_last_total_pending_full_withdrawal_gwei(&self, amount_gwei: f64) {
        self.push(MetricEvent::TotalPendingFullWithdrawal(amount_gwei));
    }

    fn set_pending_deposit_queue_amount_gwei(&self, pubkey: &BlsPublicKey, slot: u64, amount_gwei: f64) {
        self.push(MetricEvent::PendingDepositQueue(*pubkey, slot, amount_gwei));
    }

    fn set_last_total_pending_deposit_gwei(&self, amount_gwei: f64) {
        self.push(MetricEvent::TotalPendingDeposit(amount_gwei));
    }

    fn set_lido_lst_liability_gwei(&self, vault: Address, amount_gwei: f64) {
        self.push(MetricEvent::LidoLstLiability(vault, amount_gwei));
    }

    fn set_beacon_chain_epoch_drift(&self, drift_epochs: Option<u64>) {
        self.push(MetricEvent::BeaconChainEpochDrift(drift_epochs));
    }

    fn add_node_operator_fees_paid(&self, vault: Address, amount_gwei: f64) {
        self.push(MetricEvent::NodeOperatorFeesPaid(vault, amount_gwei));
    }

    fn add_liabilities_paid(&self, vault: Address, amount_gwei: f64) {
        self.push(MetricEvent::LiabilitiesPaid(vault, amount_gwei));
    }

    fn add_lido_fees_paid(&self, vault: Address, amount_gwei: f64) {
        self.push(MetricEvent::LidoFeesPaid(vault, amount_gwei));
    }

    fn increment_operation_mode_execution(&self, mode: OperationMode, status: ExecutionStatus) {
        self.push(MetricEvent::ModeExecution(mode, status));
    }

    fn increment_operation_mode_trigger(&self, mode: OperationMode, trigger: TriggerKind) {
        self.push(MetricEvent::ModeTrigger(mode, trigger));
    }

    fn record_operation_mode_duration(&self, mode: OperationMode, _seconds: f64) {
        self.push(MetricEvent::ModeDuration(mode));
    }

    fn increment_staking_deposit_quota_exceeded(&self, vault: Address) {
        self.push(MetricEvent::QuotaExceeded(vault));
    }

    fn set_actual_rebalance_requirement(
        &self,
        vault: Address,
        amount_gwei: f64,
        direction: RebalanceDirection,
    ) {
        self.push(MetricEvent::ActualRequirement(vault, amount_gwei, direction));
    }

    fn set_reported_rebalance_requirement(
        &self,
        vault: Address,
        amount_gwei: f64,
        direction: RebalanceDirection,
    ) {
        self.push(MetricEvent::ReportedRequirement(
            vault,
            amount_gwei,
            direction,
        ));
    }
}
