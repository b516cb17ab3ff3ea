//! Consensus-layer validator data consumed by the staking client and the
//! gauge poller.
//!
//! The [`ValidatorDataClient`] trait exposes raw beacon state reads and
//! derives the withdrawal view from them with the pure helpers in this
//! module. [`BeaconNodeClient`] implements it against the standard beacon
//! node REST API.

use std::collections::{BTreeMap, HashMap};

use alloy::primitives::{Address, B256, FixedBytes, U256};
use async_trait::async_trait;
use thiserror::Error;

mod beacon_node;

pub use beacon_node::BeaconNodeClient;

/// BLS12-381 public key of a validator.
pub type BlsPublicKey = FixedBytes<48>;

pub(crate) const GWEI_PER_ETHER: u64 = 1_000_000_000;
pub(crate) const WEI_PER_GWEI: u64 = 1_000_000_000;

/// Balance a validator must keep to stay active.
pub(crate) const MIN_ACTIVATION_BALANCE_GWEI: u64 = 32 * GWEI_PER_ETHER;

/// Epochs a validator must be active before it may request withdrawals.
pub(crate) const SHARD_COMMITTEE_PERIOD: u64 = 256;

#[derive(Debug, Error)]
pub enum ValidatorDataError {
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error("beacon node returned {status}: {message}")]
    Api {
        status: reqwest::StatusCode,
        message: String,
    },
    #[error("invalid beacon node url: {0}")]
    Url(#[from] url::ParseError),
}

/// Validator in the `active_ongoing` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorBalance {
    pub public_key: BlsPublicKey,
    pub validator_index: u64,
    pub balance_gwei: u64,
    pub activation_epoch: u64,
}

/// One entry of the beacon state's pending partial withdrawal queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPartialWithdrawal {
    pub validator_index: u64,
    pub amount_gwei: u64,
    pub withdrawable_epoch: u64,
}

/// Validator that initiated an exit and is still waiting for its exit
/// epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitingValidator {
    pub public_key: BlsPublicKey,
    pub validator_index: u64,
    pub balance_gwei: u64,
    pub exit_epoch: u64,
    pub slashed: bool,
}

/// Validator past its exit epoch whose balance has not been swept yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitedValidator {
    pub public_key: BlsPublicKey,
    pub validator_index: u64,
    pub balance_gwei: u64,
    pub withdrawable_epoch: u64,
    pub slashed: bool,
}

/// One entry of the beacon state's pending deposit queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDeposit {
    pub public_key: BlsPublicKey,
    pub withdrawal_credentials: B256,
    pub amount_gwei: u64,
    pub slot: u64,
}

/// Queued partial withdrawals of one validator that unlock in the same
/// epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedPendingWithdrawal {
    pub public_key: BlsPublicKey,
    pub validator_index: u64,
    pub withdrawable_epoch: u64,
    pub amount_gwei: u64,
}

/// Validator joined with its queued partial withdrawals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorBalanceWithPendingWithdrawal {
    pub public_key: BlsPublicKey,
    pub validator_index: u64,
    pub balance_gwei: u64,
    pub activation_epoch: u64,
    pub pending_partial_withdrawal_gwei: u64,
    /// Balance above the activation floor not already queued for withdrawal.
    pub withdrawable_amount_gwei: u64,
}

#[async_trait]
pub trait ValidatorDataClient: Send + Sync {
    async fn active_validators(&self) -> Result<Vec<ValidatorBalance>, ValidatorDataError>;

    async fn exiting_validators(&self) -> Result<Vec<ExitingValidator>, ValidatorDataError>;

    /// Exited validators still holding a balance.
    async fn exited_validators(&self) -> Result<Vec<ExitedValidator>, ValidatorDataError>;

    async fn pending_partial_withdrawals(
        &self,
    ) -> Result<Vec<PendingPartialWithdrawal>, ValidatorDataError>;

    /// The whole deposit queue, not only deposits for managed validators.
    async fn pending_deposits(&self) -> Result<Vec<PendingDeposit>, ValidatorDataError>;

    async fn current_epoch(&self) -> Result<u64, ValidatorDataError>;

    /// Validators eligible for withdrawal requests, smallest withdrawable
    /// amount first.
    async fn validators_for_withdrawal_requests_ascending(
        &self,
    ) -> Result<Vec<ValidatorBalanceWithPendingWithdrawal>, ValidatorDataError> {
        let (validators, pending, current_epoch) = futures_util::try_join!(
            self.active_validators(),
            self.pending_partial_withdrawals(),
            self.current_epoch(),
        )?;

        let mut eligible = filter_past_shard_committee_period(
            join_validators_with_pending_withdrawals(&validators, &pending),
            current_epoch,
        );
        eligible.sort_by_key(|validator| validator.withdrawable_amount_gwei);

        Ok(eligible)
    }

    async fn total_pending_partial_withdrawals_wei(&self) -> Result<U256, ValidatorDataError> {
        let (validators, pending) = futures_util::try_join!(
            self.active_validators(),
            self.pending_partial_withdrawals(),
        )?;

        Ok(total_pending_partial_withdrawals_wei(
            &join_validators_with_pending_withdrawals(&validators, &pending),
        ))
    }
}

/// Attaches the queued partial withdrawals of each validator, summed per
/// validator index. Queue entries for unknown validators are dropped.
pub fn join_validators_with_pending_withdrawals(
    validators: &[ValidatorBalance],
    pending: &[PendingPartialWithdrawal],
) -> Vec<ValidatorBalanceWithPendingWithdrawal> {
    let mut pending_by_index: HashMap<u64, u64> = HashMap::new();
    for withdrawal in pending {
        let entry = pending_by_index.entry(withdrawal.validator_index).or_default();
        *entry = entry.saturating_add(withdrawal.amount_gwei);
    }

    validators
        .iter()
        .map(|validator| {
            let pending_gwei = pending_by_index
                .get(&validator.validator_index)
                .copied()
                .unwrap_or_default();

            ValidatorBalanceWithPendingWithdrawal {
                public_key: validator.public_key,
                validator_index: validator.validator_index,
                balance_gwei: validator.balance_gwei,
                activation_epoch: validator.activation_epoch,
                pending_partial_withdrawal_gwei: pending_gwei,
                withdrawable_amount_gwei: validator
                    .balance_gwei
                    .saturating_sub(pending_gwei)
                    .saturating_sub(MIN_ACTIVATION_BALANCE_GWEI),
            }
        })
        .collect()
}

/// Drops validators that have not yet been active for a full shard
/// committee period, since the deposit contract rejects their requests.
pub fn filter_past_shard_committee_period(
    validators: Vec<ValidatorBalanceWithPendingWithdrawal>,
    current_epoch: u64,
) -> Vec<ValidatorBalanceWithPendingWithdrawal> {
    validators
        .into_iter()
        .filter(|validator| {
            validator
                .activation_epoch
                .saturating_add(SHARD_COMMITTEE_PERIOD)
                <= current_epoch
        })
        .collect()
}

pub fn total_pending_partial_withdrawals_wei(
    validators: &[ValidatorBalanceWithPendingWithdrawal],
) -> U256 {
    validators
        .iter()
        .map(|validator| {
            U256::from(validator.pending_partial_withdrawal_gwei) * U256::from(WEI_PER_GWEI)
        })
        .fold(U256::ZERO, |total, amount| total + amount)
}

pub fn total_validator_balance_gwei(validators: &[ValidatorBalance]) -> u64 {
    validators
        .iter()
        .fold(0u64, |total, validator| total.saturating_add(validator.balance_gwei))
}

pub fn total_exiting_balance_gwei(validators: &[ExitingValidator]) -> u64 {
    validators
        .iter()
        .fold(0u64, |total, validator| total.saturating_add(validator.balance_gwei))
}

pub fn total_exited_balance_gwei(validators: &[ExitedValidator]) -> u64 {
    validators
        .iter()
        .fold(0u64, |total, validator| total.saturating_add(validator.balance_gwei))
}

/// Sums the queued partial withdrawals of active validators per
/// `(validator_index, withdrawable_epoch)`. Ordered by index, then epoch.
pub fn aggregate_pending_withdrawals(
    validators: &[ValidatorBalance],
    pending: &[PendingPartialWithdrawal],
) -> Vec<AggregatedPendingWithdrawal> {
    let keys: HashMap<u64, BlsPublicKey> = validators
        .iter()
        .map(|validator| (validator.validator_index, validator.public_key))
        .collect();

    let mut aggregated: BTreeMap<(u64, u64), u64> = BTreeMap::new();
    for withdrawal in pending
        .iter()
        .filter(|withdrawal| keys.contains_key(&withdrawal.validator_index))
    {
        let entry = aggregated
            .entry((withdrawal.validator_index, withdrawal.withdrawable_epoch))
            .or_default();
        *entry = entry.saturating_add(withdrawal.amount_gwei);
    }

    aggregated
        .into_iter()
        .filter_map(|((validator_index, withdrawable_epoch), amount_gwei)| {
            Some(AggregatedPendingWithdrawal {
                public_key: *keys.get(&validator_index)?,
                validator_index,
                withdrawable_epoch,
                amount_gwei,
            })
        })
        .collect()
}

/// Compounding (0x02) withdrawal credentials pointing at `vault`.
pub fn vault_withdrawal_credentials(vault: Address) -> B256 {
    let mut credentials = [0u8; 32];
    credentials[0] = 0x02;
    credentials[12..].copy_from_slice(vault.as_slice());
    B256::from(credentials)
}

/// Deposits in the queue whose withdrawal credentials point at `vault`.
pub fn pending_deposits_for_vault(
    deposits: &[PendingDeposit],
    vault: Address,
) -> Vec<PendingDeposit> {
    let credentials = vault_withdrawal_credentials(vault);
    deposits
        .iter()
        .filter(|deposit| deposit.withdrawal_credentials == credentials)
        .cloned()
        .collect()
}
