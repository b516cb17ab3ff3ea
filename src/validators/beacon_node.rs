use std::time::Duration;

use alloy::primitives::B256;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};
use url::Url;

use super::{
    BlsPublicKey, ExitedValidator, ExitingValidator, PendingDeposit, PendingPartialWithdrawal,
    ValidatorBalance, ValidatorDataClient, ValidatorDataError,
};

const SLOTS_PER_EPOCH: u64 = 32;

/// Beacon node API sends every integer as a decimal string.
fn quoted_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

#[derive(Deserialize)]
struct DataResponse<T> {
    data: T,
}

/// Validator lifecycle states as named by the beacon node API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ValidatorStatus {
    PendingInitialized,
    PendingQueued,
    ActiveOngoing,
    ActiveExiting,
    ActiveSlashed,
    ExitedUnslashed,
    ExitedSlashed,
    WithdrawalPossible,
    WithdrawalDone,
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct ValidatorEntry {
    #[serde(deserialize_with = "quoted_u64")]
    index: u64,
    #[serde(deserialize_with = "quoted_u64")]
    balance: u64,
    status: ValidatorStatus,
    validator: ValidatorRecord,
}

#[derive(Deserialize)]
struct ValidatorRecord {
    pubkey: BlsPublicKey,
    slashed: bool,
    #[serde(deserialize_with = "quoted_u64")]
    activation_epoch: u64,
    #[serde(deserialize_with = "quoted_u64")]
    exit_epoch: u64,
    #[serde(deserialize_with = "quoted_u64")]
    withdrawable_epoch: u64,
}

#[derive(Deserialize)]
struct PendingDepositEntry {
    pubkey: BlsPublicKey,
    withdrawal_credentials: B256,
    #[serde(deserialize_with = "quoted_u64")]
    amount: u64,
    #[serde(deserialize_with = "quoted_u64")]
    slot: u64,
}

#[derive(Deserialize)]
struct PendingPartialWithdrawalEntry {
    #[serde(deserialize_with = "quoted_u64")]
    validator_index: u64,
    #[serde(deserialize_with = "quoted_u64")]
    amount: u64,
    #[serde(deserialize_with = "quoted_u64")]
    withdrawable_epoch: u64,
}

#[derive(Deserialize)]
struct HeaderEntry {
    header: SignedHeader,
}

#[derive(Deserialize)]
struct SignedHeader {
    message: HeaderMessage,
}

#[derive(Deserialize)]
struct HeaderMessage {
    #[serde(deserialize_with = "quoted_u64")]
    slot: u64,
}

/// Reads validator state for a fixed set of public keys from a beacon
/// node. Server errors and transport failures are retried with
/// exponential backoff.
pub struct BeaconNodeClient {
    client: Client,
    base_url: Url,
    public_keys: Vec<BlsPublicKey>,
    retry: ExponentialBuilder,
}

impl BeaconNodeClient {
    pub fn new(base_url: Url, public_keys: Vec<BlsPublicKey>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            public_keys,
            retry: ExponentialBuilder::default()
                .with_max_times(3)
                .with_min_delay(Duration::from_millis(250))
                .with_max_delay(Duration::from_secs(5)),
        }
    }

    async fn get_once(&self, url: &Url) -> Result<Response, ValidatorDataError> {
        let response = self.client.get(url.clone()).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            return Err(ValidatorDataError::Api { status, message });
        }

        Ok(response)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ValidatorDataError> {
        let url = self.base_url.join(path)?;

        let response = (|| async { self.get_once(&url).await })
            .retry(self.retry)
            .when(is_retryable)
            .notify(|error, delay| warn!(%error, ?delay, %url, "Retrying beacon node request"))
            .await?;

        let body: DataResponse<T> = response.json().await?;
        Ok(body.data)
    }
}

fn is_retryable(error: &ValidatorDataError) -> bool {
    match error {
        ValidatorDataError::Api { status, .. } => status.is_server_error(),
        ValidatorDataError::Reqwest(_) => true,
        ValidatorDataError::Url(_) => false,
    }
}

impl BeaconNodeClient {
    /// Head state entries for the managed keys, in any status.
    async fn validator_entries(&self) -> Result<Vec<ValidatorEntry>, ValidatorDataError> {
        if self.public_keys.is_empty() {
            return Ok(Vec::new());
        }

        let ids = self
            .public_keys
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let path = format!("eth/v1/beacon/states/head/validators?id={ids}");

        self.get(&path).await
    }
}

#[async_trait]
impl ValidatorDataClient for BeaconNodeClient {
    async fn active_validators(&self) -> Result<Vec<ValidatorBalance>, ValidatorDataError> {
        let validators: Vec<ValidatorBalance> = self
            .validator_entries()
            .await?
            .into_iter()
            .filter(|entry| entry.status == ValidatorStatus::ActiveOngoing)
            .map(|entry| ValidatorBalance {
                public_key: entry.validator.pubkey,
                validator_index: entry.index,
                balance_gwei: entry.balance,
                activation_epoch: entry.validator.activation_epoch,
            })
            .collect();

        debug!(count = validators.len(), "Fetched active validators");
        Ok(validators)
    }

    async fn exiting_validators(&self) -> Result<Vec<ExitingValidator>, ValidatorDataError> {
        let validators: Vec<ExitingValidator> = self
            .validator_entries()
            .await?
            .into_iter()
            .filter(|entry| {
                matches!(
                    entry.status,
                    ValidatorStatus::ActiveExiting | ValidatorStatus::ActiveSlashed
                )
            })
            .map(|entry| ExitingValidator {
                public_key: entry.validator.pubkey,
                validator_index: entry.index,
                balance_gwei: entry.balance,
                exit_epoch: entry.validator.exit_epoch,
                slashed: entry.validator.slashed,
            })
            .collect();

        debug!(count = validators.len(), "Fetched exiting validators");
        Ok(validators)
    }

    async fn exited_validators(&self) -> Result<Vec<ExitedValidator>, ValidatorDataError> {
        let validators: Vec<ExitedValidator> = self
            .validator_entries()
            .await?
            .into_iter()
            .filter(|entry| {
                matches!(
                    entry.status,
                    ValidatorStatus::ExitedUnslashed
                        | ValidatorStatus::ExitedSlashed
                        | ValidatorStatus::WithdrawalPossible
                )
            })
            .filter(|entry| entry.balance > 0)
            .map(|entry| ExitedValidator {
                public_key: entry.validator.pubkey,
                validator_index: entry.index,
                balance_gwei: entry.balance,
                withdrawable_epoch: entry.validator.withdrawable_epoch,
                slashed: entry.validator.slashed,
            })
            .collect();

        debug!(count = validators.len(), "Fetched exited validators");
        Ok(validators)
    }

    async fn pending_partial_withdrawals(
        &self,
    ) -> Result<Vec<PendingPartialWithdrawal>, ValidatorDataError> {
        let entries: Vec<PendingPartialWithdrawalEntry> = self
            .get("eth/v1/beacon/states/head/pending_partial_withdrawals")
            .await?;

        Ok(entries
            .into_iter()
            .map(|entry| PendingPartialWithdrawal {
                validator_index: entry.validator_index,
                amount_gwei: entry.amount,
                withdrawable_epoch: entry.withdrawable_epoch,
            })
            .collect())
    }

    async fn pending_deposits(&self) -> Result<Vec<PendingDeposit>, ValidatorDataError> {
        let entries: Vec<PendingDepositEntry> = self
            .get("eth/v1/beacon/states/head/pending_deposits")
            .await?;

        Ok(entries
            .into_iter()
            .map(|entry| PendingDeposit {
                public_key: entry.pubkey,
                withdrawal_credentials: entry.withdrawal_credentials,
                amount_gwei: entry.amount,
                slot: entry.slot,
            })
            .collect())
    }

    async fn current_epoch(&self) -> Result<u64, ValidatorDataError> {
        let head: HeaderEntry = self.get("eth/v1/beacon/headers/head").await?;
        Ok(head.header.message.slot / SLOTS_PER_EPOCH)
    }
}
