use alloy::primitives::{Address, Bytes, U256};
use alloy::rpc::types::TransactionReceipt;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use tracing::info;

use native_yield_evm::Wallet;

use super::bindings::ILineaRollupYieldExtension;
use super::{LedgerError, LineaRollupYieldExtension};

pub struct LineaRollupYieldExtensionContract<W> {
    wallet: W,
    address: Address,
}

impl<W: Wallet> LineaRollupYieldExtensionContract<W> {
    pub fn new(wallet: W, address: Address) -> Self {
        Self { wallet, address }
    }
}

#[async_trait]
impl<W: Wallet> LineaRollupYieldExtension for LineaRollupYieldExtensionContract<W> {
    async fn transfer_funds_for_native_yield(
        &self,
        amount: U256,
    ) -> Result<TransactionReceipt, LedgerError> {
        let calldata = Bytes::from(
            ILineaRollupYieldExtension::transferFundsForNativeYieldCall { _amount: amount }
                .abi_encode(),
        );

        let receipt = self
            .wallet
            .send(self.address, calldata, U256::ZERO, "transferFundsForNativeYield")
            .await?;

        info!(%amount, tx_hash = %receipt.transaction_hash, "Transferred funds for native yield");
        Ok(receipt)
    }
}
