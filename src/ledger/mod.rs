//! Narrow interfaces to the ledgers the automation drives.
//!
//! Each contract the control loop touches is reached through one trait:
//! [`YieldManager`], [`LineaRollupYieldExtension`], [`VaultHub`],
//! [`LazyOracle`] and [`LidoAccountingReports`]. The alloy-backed
//! implementations live in the submodules; tests use the in-memory ones in
//! `mock`.
//!
//! Writes return the confirmed receipt. Writes that may decide not to act
//! ("if not already", "if above threshold") return `Ok(None)` when skipped.

use std::fmt;

use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::TransactionReceipt;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

use native_yield_evm::EvmError;

use crate::staking::WithdrawalRequestBatch;

mod accounting_report;
pub(crate) mod bindings;
mod lazy_oracle;
#[cfg(test)]
pub(crate) mod mock;
pub(crate) mod receipts;
mod rollup;
mod steth;
mod vault_hub;
mod yield_manager;

pub use accounting_report::LidoAccountingReportClient;
pub use lazy_oracle::LazyOracleContract;
pub use rollup::LineaRollupYieldExtensionContract;
pub use steth::StethContract;
pub use vault_hub::VaultHubContract;
pub use yield_manager::YieldManagerContract;
pub(crate) use yield_manager::WEI_PER_ETHER;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Evm(#[from] EvmError),
    #[error("accounting report request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("accounting report fetch returned {status}: {message}")]
    ReportApi {
        status: reqwest::StatusCode,
        message: String,
    },
    #[error("invalid accounting report url: {0}")]
    ReportUrl(#[from] url::ParseError),
    #[error("vault {vault} is missing from accounting report {cid}")]
    VaultNotInReport { vault: Address, cid: String },
    #[error("malformed accounting report: {0}")]
    MalformedReport(String),
    #[error("event watch closed before firing")]
    WatchClosed,
    #[error("event watch already consumed")]
    WatchConsumed,
}

/// Which way funds need to move between the withdrawal reserve and the
/// yield provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RebalanceDirection {
    None,
    Stake,
    Unstake,
}

impl RebalanceDirection {
    pub const fn as_label(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Stake => "stake",
            Self::Unstake => "unstake",
        }
    }
}

impl fmt::Display for RebalanceDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Direction and wei amount needed to bring the withdrawal reserve back to
/// target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebalanceRequirement {
    pub direction: RebalanceDirection,
    pub amount: U256,
}

impl RebalanceRequirement {
    pub const fn none() -> Self {
        Self {
            direction: RebalanceDirection::None,
            amount: U256::ZERO,
        }
    }

    pub const fn stake(amount: U256) -> Self {
        Self {
            direction: RebalanceDirection::Stake,
            amount,
        }
    }

    pub const fn unstake(amount: U256) -> Self {
        Self {
            direction: RebalanceDirection::Unstake,
            amount,
        }
    }
}

/// Per-provider state tracked by the yield manager.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct YieldProviderData {
    pub is_staking_paused: bool,
    pub is_ossification_initiated: bool,
    pub is_ossified: bool,
    /// Vendor dashboard contract.
    pub primary_entrypoint: Address,
    /// Staking vault, the only entrypoint left once ossified.
    pub ossified_entrypoint: Address,
    pub user_funds: U256,
    pub yield_reported_cumulative: U256,
    pub lst_liability_principal: U256,
    pub last_reported_negative_yield: U256,
}

/// Vendor contracts behind one yield provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderContracts {
    pub vault: Address,
    pub dashboard: Address,
}

impl From<&YieldProviderData> for ProviderContracts {
    fn from(data: &YieldProviderData) -> Self {
        Self {
            vault: data.ossified_entrypoint,
            dashboard: data.primary_entrypoint,
        }
    }
}

/// Outcome of a yield report, either peeked by simulation or decoded from
/// a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct YieldReport {
    pub yield_amount: U256,
    pub outstanding_negative_yield: U256,
}

/// Latest accounting report anchor published by the lazy oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportData {
    pub timestamp: u64,
    pub ref_slot: u64,
    pub tree_root: B256,
    pub report_cid: String,
}

/// Arguments of `LazyOracle.updateVaultData` for one vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultReportParams {
    pub vault: Address,
    pub total_value: U256,
    pub cumulative_lido_fees: U256,
    pub liability_shares: U256,
    pub max_liability_shares: U256,
    pub slashing_reserve: U256,
    pub proof: Vec<B256>,
}

/// Single-fire subscription to a ledger event.
///
/// `wait` resolves once when the event is observed. `unwatch` releases the
/// underlying subscription and is safe to call any number of times; it
/// also runs on drop, so every exit path tears the watch down.
pub struct EventWatch {
    fired: Option<oneshot::Receiver<()>>,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl EventWatch {
    pub fn new(fired: oneshot::Receiver<()>, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            fired: Some(fired),
            release: Some(Box::new(release)),
        }
    }

    pub async fn wait(&mut self) -> Result<(), LedgerError> {
        let fired = self.fired.take().ok_or(LedgerError::WatchConsumed)?;
        fired.await.map_err(|_| LedgerError::WatchClosed)
    }

    pub fn unwatch(&mut self) {
        self.fired = None;
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for EventWatch {
    fn drop(&mut self) {
        self.unwatch();
    }
}

impl fmt::Debug for EventWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventWatch")
            .field("pending", &self.fired.is_some())
            .field("released", &self.release.is_none())
            .finish()
    }
}

#[async_trait]
pub trait YieldManager: Send + Sync {
    fn address(&self) -> Address;

    async fn is_ossification_initiated(&self, yield_provider: Address) -> Result<bool, LedgerError>;

    async fn is_ossified(&self, yield_provider: Address) -> Result<bool, LedgerError>;

    async fn is_staking_paused(&self, yield_provider: Address) -> Result<bool, LedgerError>;

    async fn yield_provider_data(
        &self,
        yield_provider: Address,
    ) -> Result<YieldProviderData, LedgerError>;

    /// Staking vault behind the provider.
    async fn staking_vault(&self, yield_provider: Address) -> Result<Address, LedgerError> {
        Ok(self.yield_provider_data(yield_provider).await?.ossified_entrypoint)
    }

    /// Staking vault and dashboard behind the provider, from a single read.
    async fn provider_contracts(
        &self,
        yield_provider: Address,
    ) -> Result<ProviderContracts, LedgerError> {
        Ok(ProviderContracts::from(
            &self.yield_provider_data(yield_provider).await?,
        ))
    }

    /// Native balance held by the yield manager itself.
    async fn balance(&self) -> Result<U256, LedgerError>;

    async fn total_system_balance(&self) -> Result<U256, LedgerError>;

    async fn target_reserve_deficit(&self) -> Result<U256, LedgerError>;

    /// Compares the withdrawal reserve to its effective target.
    async fn rebalance_requirements(&self) -> Result<RebalanceRequirement, LedgerError>;

    /// Simulates `reportYield` without broadcasting it.
    async fn peek_yield_report(
        &self,
        yield_provider: Address,
        l2_yield_recipient: Address,
    ) -> Result<YieldReport, LedgerError>;

    /// Yield manager balance plus what the provider can release right now.
    async fn available_unstaking_balance(&self, yield_provider: Address)
    -> Result<U256, LedgerError>;

    async fn fund_yield_provider(
        &self,
        yield_provider: Address,
        amount: U256,
    ) -> Result<TransactionReceipt, LedgerError>;

    async fn report_yield(
        &self,
        yield_provider: Address,
        l2_yield_recipient: Address,
    ) -> Result<TransactionReceipt, LedgerError>;

    /// Requests validator withdrawals, paying the vault's withdrawal fee.
    async fn unstake(
        &self,
        yield_provider: Address,
        batch: &WithdrawalRequestBatch,
    ) -> Result<TransactionReceipt, LedgerError>;

    async fn safe_withdraw_from_yield_provider(
        &self,
        yield_provider: Address,
        amount: U256,
    ) -> Result<TransactionReceipt, LedgerError>;

    async fn safe_add_to_withdrawal_reserve_if_above_threshold(
        &self,
        yield_provider: Address,
        amount: U256,
    ) -> Result<Option<TransactionReceipt>, LedgerError>;

    async fn safe_max_add_to_withdrawal_reserve(
        &self,
        yield_provider: Address,
    ) -> Result<Option<TransactionReceipt>, LedgerError>;

    async fn pause_staking_if_not_already(
        &self,
        yield_provider: Address,
    ) -> Result<Option<TransactionReceipt>, LedgerError>;

    async fn unpause_staking_if_not_already(
        &self,
        yield_provider: Address,
    ) -> Result<Option<TransactionReceipt>, LedgerError>;

    async fn progress_pending_ossification(
        &self,
        yield_provider: Address,
    ) -> Result<TransactionReceipt, LedgerError>;
}

#[async_trait]
pub trait LineaRollupYieldExtension: Send + Sync {
    /// Moves `amount` from the message service reserve to the yield manager.
    async fn transfer_funds_for_native_yield(
        &self,
        amount: U256,
    ) -> Result<TransactionReceipt, LedgerError>;
}

#[async_trait]
pub trait VaultHub: Send + Sync {
    fn address(&self) -> Address;

    async fn settleable_lido_fees(&self, vault: Address) -> Result<U256, LedgerError>;

    async fn latest_report_timestamp(&self, vault: Address) -> Result<u64, LedgerError>;

    async fn is_report_fresh(&self, vault: Address) -> Result<bool, LedgerError>;
}

/// Lido's liquid staking token.
#[async_trait]
pub trait Steth: Send + Sync {
    /// Ether backing the stETH shares minted against `dashboard`'s vault,
    /// rounded up.
    async fn lst_liability(&self, dashboard: Address) -> Result<U256, LedgerError>;
}

#[async_trait]
pub trait LazyOracle: Send + Sync {
    async fn latest_report_data(&self) -> Result<ReportData, LedgerError>;

    /// Starts watching for the next `VaultsReportDataUpdated` event.
    async fn watch_vaults_report_data_updated(&self) -> Result<EventWatch, LedgerError>;

    async fn simulate_update_vault_data(
        &self,
        params: &VaultReportParams,
    ) -> Result<(), LedgerError>;

    async fn update_vault_data(
        &self,
        params: &VaultReportParams,
    ) -> Result<TransactionReceipt, LedgerError>;
}

#[async_trait]
pub trait LidoAccountingReports: Send + Sync {
    /// Resolves the latest report and the vault's merkle proof within it.
    async fn latest_vault_report_params(
        &self,
        vault: Address,
    ) -> Result<VaultReportParams, LedgerError>;

    /// True when a dry run of submitting exactly `params` succeeds.
    async fn is_simulate_submit_vault_report_ok(&self, params: &VaultReportParams) -> bool;

    async fn submit_vault_report(
        &self,
        params: &VaultReportParams,
    ) -> Result<TransactionReceipt, LedgerError>;

    /// Resolves the latest report for `vault` and submits it.
    async fn submit_latest_vault_report(
        &self,
        vault: Address,
    ) -> Result<TransactionReceipt, LedgerError> {
        let params = self.latest_vault_report_params(vault).await?;
        self.submit_vault_report(&params).await
    }
}
