//! EVM chain access for the native yield automation service.
//!
//! Two traits split read and write access:
//!
//! - [`Evm`] gives read-only chain access: the underlying provider,
//!   raw `eth_call` and native balances.
//!
//! - [`Wallet`] extends `Evm` with a signing identity. It can dry-run a
//!   call from the signer address (used to gate privileged writes on a
//!   successful simulation) and submit a signed, optionally payable
//!   transaction and wait for its receipt.
//!
//! The free functions [`read`] and [`simulate`] wrap the raw calls with
//! `sol!` call types so consumers get decoded return values.

use std::sync::Arc;

use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::Provider;
use alloy::rpc::types::{TransactionReceipt, TransactionRequest};
use alloy::sol_types::SolCall;
use async_trait::async_trait;

#[cfg(feature = "local-signer")]
pub mod local;

/// Errors that can occur during EVM operations.
#[derive(Debug, thiserror::Error)]
pub enum EvmError {
    #[error("transaction error: {0}")]
    Transaction(#[from] alloy::providers::PendingTransactionError),
    #[error("transport error: {0}")]
    Transport(#[from] alloy::transports::RpcError<alloy::transports::TransportErrorKind>),
    #[error("contract error: {0}")]
    Contract(#[from] alloy::contract::Error),
    #[error("failed to decode call result: {0}")]
    Decode(#[from] alloy::sol_types::Error),
    #[error("transaction reverted: {tx_hash}")]
    Reverted { tx_hash: alloy::primitives::TxHash },
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(#[from] alloy::signers::k256::ecdsa::Error),
}

/// Read-only EVM chain access.
#[async_trait]
pub trait Evm: Send + Sync + 'static {
    /// The provider type used for chain access.
    type Provider: Provider + Clone + Send + Sync;

    /// Returns the underlying provider for direct chain queries.
    fn provider(&self) -> &Self::Provider;

    /// Runs `eth_call` against `contract` with the given calldata.
    async fn call(&self, contract: Address, calldata: Bytes) -> Result<Bytes, EvmError> {
        let tx = TransactionRequest::default()
            .to(contract)
            .input(calldata.into());

        Ok(self.provider().call(tx).await?)
    }

    /// Native balance of `account` at the latest block.
    async fn balance(&self, account: Address) -> Result<U256, EvmError> {
        Ok(self.provider().get_balance(account).await?)
    }
}

/// Signing wallet on an EVM chain.
///
/// Implementations handle key management. [`LocalWallet`](local::LocalWallet)
/// signs with a raw private key held in process memory.
#[async_trait]
pub trait Wallet: Evm {
    /// Returns the address this wallet signs transactions from.
    fn address(&self) -> Address;

    /// Executes the call as `eth_call` from the wallet address without
    /// broadcasting it. Reverts surface as errors.
    async fn simulate(
        &self,
        contract: Address,
        calldata: Bytes,
        value: U256,
    ) -> Result<Bytes, EvmError> {
        let tx = TransactionRequest::default()
            .from(self.address())
            .to(contract)
            .value(value)
            .input(calldata.into());

        Ok(self.provider().call(tx).await?)
    }

    /// Submit a signed contract call transaction and wait for its receipt.
    ///
    /// - `contract` is the target contract address
    /// - `calldata` is the ABI-encoded function call
    /// - `value` is the native amount attached to the call
    /// - `note` is a human-readable operation description used for logging
    async fn send(
        &self,
        contract: Address,
        calldata: Bytes,
        value: U256,
        note: &str,
    ) -> Result<TransactionReceipt, EvmError>;
}

#[async_trait]
impl<T: Evm> Evm for Arc<T> {
    type Provider = T::Provider;

    fn provider(&self) -> &Self::Provider {
        (**self).provider()
    }

    async fn call(&self, contract: Address, calldata: Bytes) -> Result<Bytes, EvmError> {
        (**self).call(contract, calldata).await
    }

    async fn balance(&self, account: Address) -> Result<U256, EvmError> {
        (**self).balance(account).await
    }
}

#[async_trait]
impl<T: Wallet> Wallet for Arc<T> {
    fn address(&self) -> Address {
        (**self).address()
    }

    async fn simulate(
        &self,
        contract: Address,
        calldata: Bytes,
        value: U256,
    ) -> Result<Bytes, EvmError> {
        (**self).simulate(contract, calldata, value).await
    }

    async fn send(
        &self,
        contract: Address,
        calldata: Bytes,
        value: U256,
        note: &str,
    ) -> Result<TransactionReceipt, EvmError> {
        (**self).send(contract, calldata, value, note).await
    }
}

/// Typed view call: encodes `call`, runs it and decodes the return value.
pub async fn read<E, C>(evm: &E, contract: Address, call: &C) -> Result<C::Return, EvmError>
where
    E: Evm + ?Sized,
    C: SolCall + Sync,
{
    let output = evm.call(contract, call.abi_encode().into()).await?;
    Ok(C::abi_decode_returns(&output)?)
}

/// Typed dry run of a state-changing call from the wallet address.
pub async fn simulate<W, C>(wallet: &W, contract: Address, call: &C) -> Result<C::Return, EvmError>
where
    W: Wallet + ?Sized,
    C: SolCall + Sync,
{
    let output = wallet
        .simulate(contract, call.abi_encode().into(), U256::ZERO)
        .await?;
    Ok(C::abi_decode_returns(&output)?)
}
