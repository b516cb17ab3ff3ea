use alloy::primitives::{Address, U256};
use async_trait::async_trait;

use native_yield_evm::{Evm, read};

use super::bindings::IVaultHub;
use super::{LedgerError, VaultHub};

/// Read-only view of the Lido vault hub.
pub struct VaultHubContract<E> {
    evm: E,
    address: Address,
}

impl<E: Evm> VaultHubContract<E> {
    pub fn new(evm: E, address: Address) -> Self {
        Self { evm, address }
    }
}

#[async_trait]
impl<E: Evm> VaultHub for VaultHubContract<E> {
    fn address(&self) -> Address {
        self.address
    }

    async fn settleable_lido_fees(&self, vault: Address) -> Result<U256, LedgerError> {
        let call = IVaultHub::settleableLidoFeesValueCall { _vault: vault };
        Ok(read(&self.evm, self.address, &call).await?)
    }

    async fn latest_report_timestamp(&self, vault: Address) -> Result<u64, LedgerError> {
        let call = IVaultHub::latestReportCall { _vault: vault };
        let report = read(&self.evm, self.address, &call).await?;
        Ok(report.timestamp.to::<u64>())
    }

    async fn is_report_fresh(&self, vault: Address) -> Result<bool, LedgerError> {
        let call = IVaultHub::isReportFreshCall { _vault: vault };
        Ok(read(&self.evm, self.address, &call).await?)
    }
}
