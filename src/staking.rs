//! Batching of validator withdrawal requests against the staking vault.
//!
//! [`BeaconChainStakingClient`] turns a wei amount into at most one
//! bounded batch of partial withdrawals per call, and can top a batch up
//! with full exits for validators that have nothing left to withdraw.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use thiserror::Error;
use tracing::{debug, info};

use crate::ledger::{LedgerError, YieldManager};
use crate::metrics::AutomationMetrics;
use crate::validators::{
    BlsPublicKey, ValidatorBalanceWithPendingWithdrawal, ValidatorDataClient, ValidatorDataError,
    WEI_PER_GWEI,
};

#[derive(Debug, Error)]
pub enum StakingError {
    #[error(transparent)]
    ValidatorData(#[from] ValidatorDataError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Parallel lists of validator keys and gwei amounts for one unstake call.
///
/// An amount of zero requests a full exit. The batch never holds more than
/// its limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalRequestBatch {
    limit: usize,
    public_keys: Vec<BlsPublicKey>,
    amounts_gwei: Vec<u64>,
}

impl WithdrawalRequestBatch {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            public_keys: Vec::with_capacity(limit),
            amounts_gwei: Vec::with_capacity(limit),
        }
    }

    /// Appends a request. Returns `false` when the batch is already full.
    pub fn push(&mut self, public_key: BlsPublicKey, amount_gwei: u64) -> bool {
        if self.is_full() {
            return false;
        }

        self.public_keys.push(public_key);
        self.amounts_gwei.push(amount_gwei);
        true
    }

    pub fn public_keys(&self) -> &[BlsPublicKey] {
        &self.public_keys
    }

    pub fn amounts_gwei(&self) -> &[u64] {
        &self.amounts_gwei
    }

    pub fn len(&self) -> usize {
        self.public_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.public_keys.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.limit
    }

    pub fn remaining_slots(&self) -> usize {
        self.limit.saturating_sub(self.len())
    }

    pub fn requests(&self) -> impl Iterator<Item = (&BlsPublicKey, u64)> {
        self.public_keys
            .iter()
            .zip(self.amounts_gwei.iter().copied())
    }

    /// Sum of requested amounts in wei.
    pub fn total_wei(&self) -> U256 {
        self.amounts_gwei
            .iter()
            .fold(U256::ZERO, |total, amount| {
                total.saturating_add(U256::from(*amount) * U256::from(WEI_PER_GWEI))
            })
    }
}

/// Greedy partial withdrawals, in the order given, until `required_wei` is
/// covered or the batch is full. Zero-sized takes are skipped.
pub fn partial_withdrawal_batch(
    validators: &[ValidatorBalanceWithPendingWithdrawal],
    required_wei: U256,
    limit: usize,
) -> WithdrawalRequestBatch {
    let mut batch = WithdrawalRequestBatch::with_limit(limit);
    let mut remaining_gwei = required_wei / U256::from(WEI_PER_GWEI);

    for validator in validators {
        if batch.is_full() || remaining_gwei.is_zero() {
            break;
        }

        let take = U256::from(validator.withdrawable_amount_gwei).min(remaining_gwei);
        if take.is_zero() {
            continue;
        }

        // take <= withdrawable_amount_gwei, which is a u64
        batch.push(validator.public_key, take.to::<u64>());
        remaining_gwei -= take;
    }

    batch
}

/// Full exits for validators with nothing withdrawable, up to `limit`.
pub fn full_exit_batch(
    validators: &[ValidatorBalanceWithPendingWithdrawal],
    limit: usize,
) -> WithdrawalRequestBatch {
    let mut batch = WithdrawalRequestBatch::with_limit(limit);

    for validator in validators
        .iter()
        .filter(|validator| validator.withdrawable_amount_gwei == 0)
    {
        if !batch.push(validator.public_key, 0) {
            break;
        }
    }

    batch
}

pub struct BeaconChainStakingClient {
    metrics: Arc<dyn AutomationMetrics>,
    validators: Arc<dyn ValidatorDataClient>,
    yield_manager: Arc<dyn YieldManager>,
    yield_provider: Address,
    max_requests_per_transaction: usize,
}

impl BeaconChainStakingClient {
    pub fn new(
        metrics: Arc<dyn AutomationMetrics>,
        validators: Arc<dyn ValidatorDataClient>,
        yield_manager: Arc<dyn YieldManager>,
        yield_provider: Address,
        max_requests_per_transaction: usize,
    ) -> Self {
        Self {
            metrics,
            validators,
            yield_manager,
            yield_provider,
            max_requests_per_transaction,
        }
    }

    /// Requests enough partial withdrawals to free `amount_wei`, net of
    /// withdrawals already pending. Returns the number of unused batch slots.
    pub async fn submit_withdrawal_requests_to_fulfil_amount(
        &self,
        amount_wei: U256,
    ) -> Result<usize, StakingError> {
        let validators = self
            .validators
            .validators_for_withdrawal_requests_ascending()
            .await?;

        self.submit_partial_withdrawals(&validators, amount_wei)
            .await
    }

    /// Drains all partial withdrawal capacity, then spends leftover slots on
    /// full exits of validators that have nothing withdrawable.
    pub async fn submit_max_available_withdrawal_requests(&self) -> Result<(), StakingError> {
        let validators = self
            .validators
            .validators_for_withdrawal_requests_ascending()
            .await?;

        let remaining_slots = self
            .submit_partial_withdrawals(&validators, U256::MAX)
            .await?;
        if remaining_slots == 0 {
            debug!("No batch slots left for validator exits");
            return Ok(());
        }

        let exits = full_exit_batch(&validators, remaining_slots);
        self.submit(&exits).await
    }

    async fn submit_partial_withdrawals(
        &self,
        validators: &[ValidatorBalanceWithPendingWithdrawal],
        amount_wei: U256,
    ) -> Result<usize, StakingError> {
        let pending_wei = self
            .validators
            .total_pending_partial_withdrawals_wei()
            .await?;
        let required_wei = amount_wei.saturating_sub(pending_wei);

        let batch =
            partial_withdrawal_batch(validators, required_wei, self.max_requests_per_transaction);
        debug!(
            %amount_wei,
            %pending_wei,
            %required_wei,
            requests = batch.len(),
            "Built partial withdrawal batch"
        );

        self.submit(&batch).await?;
        Ok(batch.remaining_slots())
    }

    async fn submit(&self, batch: &WithdrawalRequestBatch) -> Result<(), StakingError> {
        if batch.is_empty() {
            debug!("Withdrawal request batch is empty, skipping unstake");
            return Ok(());
        }

        self.yield_manager.unstake(self.yield_provider, batch).await?;

        for (public_key, amount_gwei) in batch.requests() {
            if amount_gwei == 0 {
                self.metrics.increment_validator_exit(public_key);
            } else {
                self.metrics
                    .add_validator_partial_unstake_amount(public_key, amount_gwei as f64);
            }
        }

        info!(
            yield_provider = %self.yield_provider,
            requests = batch.len(),
            total_wei = %batch.total_wei(),
            "Submitted withdrawal request batch"
        );
        Ok(())
    }
}
