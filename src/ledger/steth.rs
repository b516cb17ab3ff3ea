use alloy::primitives::{Address, U256};
use async_trait::async_trait;

use native_yield_evm::{Evm, read};

use super::bindings::{IDashboard, ISTETH};
use super::{LedgerError, Steth};

pub struct StethContract<E> {
    evm: E,
    address: Address,
}

impl<E: Evm> StethContract<E> {
    pub fn new(evm: E, address: Address) -> Self {
        Self { evm, address }
    }
}

#[async_trait]
impl<E: Evm> Steth for StethContract<E> {
    async fn lst_liability(&self, dashboard: Address) -> Result<U256, LedgerError> {
        let shares = read(&self.evm, dashboard, &IDashboard::liabilitySharesCall {}).await?;
        let call = ISTETH::getPooledEthBySharesRoundUpCall {
            _sharesAmount: shares,
        };
        Ok(read(&self.evm, self.address, &call).await?)
    }
}
