//! Event extraction from transaction receipts.
//!
//! Logs that fail to decode, or come from an unexpected emitter, are
//! skipped.

use alloy::primitives::{Address, U256};
use alloy::rpc::types::TransactionReceipt;
use alloy::sol_types::SolEvent;

use super::{ProviderContracts, YieldReport};
use super::bindings::{IDashboard, IVaultHub, IYieldManager};

/// Decodes every `E` in the receipt, optionally only from `emitter`.
fn decode_events<E: SolEvent>(
    receipt: &TransactionReceipt,
    emitter: Option<Address>,
) -> impl Iterator<Item = E> + '_ {
    receipt
        .inner
        .logs()
        .iter()
        .filter(move |log| emitter.is_none_or(|address| log.address() == address))
        .filter_map(|log| E::decode_log(&log.inner).ok())
        .map(|decoded| decoded.data)
}

/// Ether that reached the withdrawal reserve via `WithdrawalReserveAugmented`.
pub(crate) fn reserve_increment(
    receipt: &TransactionReceipt,
    yield_manager: Address,
) -> Option<U256> {
    decode_events::<IYieldManager::WithdrawalReserveAugmented>(receipt, Some(yield_manager))
        .next()
        .map(|event| event.reserveIncrementAmount)
}

pub(crate) fn yield_reported(
    receipt: &TransactionReceipt,
    yield_manager: Address,
) -> Option<YieldReport> {
    decode_events::<IYieldManager::NativeYieldReported>(receipt, Some(yield_manager))
        .next()
        .map(|event| YieldReport {
            yield_amount: event.yieldAmount,
            outstanding_negative_yield: event.outstandingNegativeYield,
        })
}

pub(crate) fn funded_amount(receipt: &TransactionReceipt, yield_manager: Address) -> Option<U256> {
    decode_events::<IYieldManager::YieldProviderFunded>(receipt, Some(yield_manager))
        .next()
        .map(|event| event.amount)
}

/// Vault payouts settled inside one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct FeePayments {
    pub(crate) lido_fees: U256,
    pub(crate) liabilities: U256,
    pub(crate) node_operator_fees: U256,
}

/// Sums Lido fee settlements and liability rebalances emitted by the vault
/// hub for the provider's vault, plus node operator fee disbursements
/// emitted by the provider's own dashboard.
pub(crate) fn fee_payments(
    receipt: &TransactionReceipt,
    vault_hub: Address,
    contracts: ProviderContracts,
) -> FeePayments {
    let vault = contracts.vault;

    let lido_fees = decode_events::<IVaultHub::LidoFeesSettled>(receipt, Some(vault_hub))
        .filter(|event| event.vault == vault)
        .fold(U256::ZERO, |total, event| total.saturating_add(event.transferred));

    let liabilities = decode_events::<IVaultHub::VaultRebalanced>(receipt, Some(vault_hub))
        .filter(|event| event.vault == vault)
        .fold(U256::ZERO, |total, event| {
            total.saturating_add(event.etherWithdrawn)
        });

    let node_operator_fees =
        decode_events::<IDashboard::FeeDisbursed>(receipt, Some(contracts.dashboard))
            .fold(U256::ZERO, |total, event| total.saturating_add(event.fee));

    FeePayments {
        lido_fees,
        liabilities,
        node_operator_fees,
    }
}
