//! Local signer: the private key is held in process memory.
//!
//! `LocalWallet` wraps an alloy provider built with an embedded
//! `EthereumWallet` filler and submits transactions directly.

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256, Bytes, U256};
use alloy::providers::{Provider, ProviderBuilder, WalletProvider};
use alloy::rpc::types::{TransactionReceipt, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use tracing::info;
use url::Url;

use crate::{Evm, EvmError, Wallet};

/// Wallet that signs and submits transactions with a local key.
///
/// The wallet address is derived from the provider's default signer.
pub struct LocalWallet<P> {
    provider: P,
    required_confirmations: u64,
}

impl<P> LocalWallet<P> {
    pub fn new(provider: P, required_confirmations: u64) -> Self {
        Self {
            provider,
            required_confirmations,
        }
    }
}

/// Builds an HTTP provider signing with `private_key` and wraps it in a
/// [`LocalWallet`].
pub fn connect_http(
    rpc_url: Url,
    private_key: &B256,
    required_confirmations: u64,
) -> Result<LocalWallet<impl Provider + WalletProvider + Clone + 'static>, EvmError> {
    let signer = PrivateKeySigner::from_bytes(private_key)?;
    let provider = ProviderBuilder::new()
        .wallet(EthereumWallet::from(signer))
        .connect_http(rpc_url);

    Ok(LocalWallet::new(provider, required_confirmations))
}

#[async_trait]
impl<P> Evm for LocalWallet<P>
where
    P: Provider + WalletProvider + Clone + Send + Sync + 'static,
{
    type Provider = P;

    fn provider(&self) -> &P {
        &self.provider
    }
}

#[async_trait]
impl<P> Wallet for LocalWallet<P>
where
    P: Provider + WalletProvider + Clone + Send + Sync + 'static,
{
    fn address(&self) -> Address {
        self.provider.default_signer_address()
    }

    async fn send(
        &self,
        contract: Address,
        calldata: Bytes,
        value: U256,
        note: &str,
    ) -> Result<TransactionReceipt, EvmError> {
        info!(%contract, %value, note, "Submitting contract call");

        let tx = TransactionRequest::default()
            .to(contract)
            .value(value)
            .input(calldata.into());

        let pending = self.provider.send_transaction(tx).await?;

        info!(tx_hash = %pending.tx_hash(), note, "Transaction submitted");

        let receipt = pending
            .with_required_confirmations(self.required_confirmations)
            .get_receipt()
            .await?;

        if !receipt.status() {
            return Err(EvmError::Reverted {
                tx_hash: receipt.transaction_hash,
            });
        }

        info!(tx_hash = %receipt.transaction_hash, note, "Transaction confirmed");

        Ok(receipt)
    }
}
