use std::time::Duration;

use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::Provider;
use alloy::rpc::types::{Filter, TransactionReceipt};
use alloy::sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use native_yield_evm::{EvmError, Wallet, read, simulate};

use super::bindings::ILazyOracle;
use super::{EventWatch, LazyOracle, LedgerError, ReportData, VaultReportParams};

/// Lido lazy oracle: report anchors, vault data updates and the
/// `VaultsReportDataUpdated` trigger.
pub struct LazyOracleContract<W> {
    wallet: W,
    address: Address,
    poll_interval: Duration,
}

impl<W: Wallet> LazyOracleContract<W> {
    pub fn new(wallet: W, address: Address, poll_interval: Duration) -> Self {
        Self {
            wallet,
            address,
            poll_interval,
        }
    }

    fn update_call(params: &VaultReportParams) -> ILazyOracle::updateVaultDataCall {
        ILazyOracle::updateVaultDataCall {
            _vault: params.vault,
            _totalValue: params.total_value,
            _cumulativeLidoFees: params.cumulative_lido_fees,
            _liabilityShares: params.liability_shares,
            _maxLiabilityShares: params.max_liability_shares,
            _slashingReserve: params.slashing_reserve,
            _proof: params.proof.clone(),
        }
    }
}

#[async_trait]
impl<W> LazyOracle for LazyOracleContract<W>
where
    W: Wallet,
    W::Provider: 'static,
{
    async fn latest_report_data(&self) -> Result<ReportData, LedgerError> {
        let data = read(&self.wallet, self.address, &ILazyOracle::latestReportDataCall {}).await?;

        Ok(ReportData {
            timestamp: data.timestamp.saturating_to::<u64>(),
            ref_slot: data.refSlot.saturating_to::<u64>(),
            tree_root: data.treeRoot,
            report_cid: data.reportCid,
        })
    }

    async fn watch_vaults_report_data_updated(&self) -> Result<EventWatch, LedgerError> {
        let provider = self.wallet.provider().clone();
        let start_block = provider
            .get_block_number()
            .await
            .map_err(EvmError::from)?;

        let filter = Filter::new()
            .address(self.address)
            .event_signature(ILazyOracle::VaultsReportDataUpdated::SIGNATURE_HASH)
            .from_block(start_block);
        let poll_interval = self.poll_interval;
        let (fired, receiver) = oneshot::channel();

        let poller = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                ticker.tick().await;

                match provider.get_logs(&filter).await {
                    Ok(logs) => {
                        let updated = logs.iter().any(|log| {
                            log.block_number.is_some_and(|block| block > start_block)
                        });
                        if updated {
                            debug!("Observed VaultsReportDataUpdated");
                            let _ = fired.send(());
                            return;
                        }
                    }
                    Err(error) => {
                        warn!(%error, "Polling VaultsReportDataUpdated logs failed");
                    }
                }
            }
        });

        Ok(EventWatch::new(receiver, move || poller.abort()))
    }

    async fn simulate_update_vault_data(
        &self,
        params: &VaultReportParams,
    ) -> Result<(), LedgerError> {
        simulate(&self.wallet, self.address, &Self::update_call(params)).await?;
        Ok(())
    }

    async fn update_vault_data(
        &self,
        params: &VaultReportParams,
    ) -> Result<TransactionReceipt, LedgerError> {
        let calldata = Bytes::from(Self::update_call(params).abi_encode());
        let receipt = self
            .wallet
            .send(self.address, calldata, U256::ZERO, "updateVaultData")
            .await?;

        info!(vault = %params.vault, tx_hash = %receipt.transaction_hash, "Updated vault data");
        Ok(receipt)
    }
}
