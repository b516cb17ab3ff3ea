use alloy::primitives::{Address, Bytes, U256};
use alloy::rpc::types::TransactionReceipt;
use alloy::sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use tracing::{debug, info};

use native_yield_evm::{Wallet, read, simulate};

use super::bindings::{IStakingVault, IYieldManager};
use super::{
    LedgerError, RebalanceRequirement, YieldManager, YieldProviderData, YieldReport,
};
use crate::staking::WithdrawalRequestBatch;

pub(crate) const WEI_PER_ETHER: u64 = 1_000_000_000_000_000_000;

/// Compares the reserve balance against its target. Differences strictly
/// below `tolerance` are treated as balanced.
pub(crate) fn classify_requirement(
    reserve_balance: U256,
    target: U256,
    tolerance: U256,
) -> RebalanceRequirement {
    if reserve_balance < target {
        let deficit = target - reserve_balance;
        if deficit < tolerance {
            RebalanceRequirement::none()
        } else {
            RebalanceRequirement::unstake(deficit)
        }
    } else {
        let surplus = reserve_balance - target;
        if surplus < tolerance || surplus.is_zero() {
            RebalanceRequirement::none()
        } else {
            RebalanceRequirement::stake(surplus)
        }
    }
}

/// [`YieldManager`] backed by the on-chain contract.
pub struct YieldManagerContract<W> {
    wallet: W,
    address: Address,
    tolerance_amount: U256,
    min_withdrawal_threshold: U256,
}

impl<W: Wallet> YieldManagerContract<W> {
    pub fn new(
        wallet: W,
        address: Address,
        tolerance_amount: U256,
        min_withdrawal_threshold_eth: u64,
    ) -> Self {
        Self {
            wallet,
            address,
            tolerance_amount,
            min_withdrawal_threshold: U256::from(min_withdrawal_threshold_eth)
                * U256::from(WEI_PER_ETHER),
        }
    }

    async fn send<C: SolCall + Sync>(
        &self,
        call: &C,
        value: U256,
        note: &str,
    ) -> Result<TransactionReceipt, LedgerError> {
        let calldata = Bytes::from(call.abi_encode());
        Ok(self.wallet.send(self.address, calldata, value, note).await?)
    }

    async fn safe_add_to_withdrawal_reserve(
        &self,
        yield_provider: Address,
        amount: U256,
    ) -> Result<TransactionReceipt, LedgerError> {
        let receipt = self
            .send(
                &IYieldManager::safeAddToWithdrawalReserveCall {
                    _yieldProvider: yield_provider,
                    _amount: amount,
                },
                U256::ZERO,
                "safeAddToWithdrawalReserve",
            )
            .await?;

        info!(%yield_provider, %amount, tx_hash = %receipt.transaction_hash, "Added to withdrawal reserve");
        Ok(receipt)
    }
}

#[async_trait]
impl<W: Wallet> YieldManager for YieldManagerContract<W> {
    fn address(&self) -> Address {
        self.address
    }

    async fn is_ossification_initiated(&self, yield_provider: Address) -> Result<bool, LedgerError> {
        let call = IYieldManager::isOssificationInitiatedCall {
            _yieldProvider: yield_provider,
        };
        Ok(read(&self.wallet, self.address, &call).await?)
    }

    async fn is_ossified(&self, yield_provider: Address) -> Result<bool, LedgerError> {
        let call = IYieldManager::isOssifiedCall {
            _yieldProvider: yield_provider,
        };
        Ok(read(&self.wallet, self.address, &call).await?)
    }

    async fn is_staking_paused(&self, yield_provider: Address) -> Result<bool, LedgerError> {
        let call = IYieldManager::isStakingPausedCall {
            _yieldProvider: yield_provider,
        };
        Ok(read(&self.wallet, self.address, &call).await?)
    }

    async fn yield_provider_data(
        &self,
        yield_provider: Address,
    ) -> Result<YieldProviderData, LedgerError> {
        let call = IYieldManager::getYieldProviderDataCall {
            _yieldProvider: yield_provider,
        };
        let data = read(&self.wallet, self.address, &call).await?;

        Ok(YieldProviderData {
            is_staking_paused: data.isStakingPaused,
            is_ossification_initiated: data.isOssificationInitiated,
            is_ossified: data.isOssified,
            primary_entrypoint: data.primaryEntrypoint,
            ossified_entrypoint: data.ossifiedEntrypoint,
            user_funds: data.userFunds,
            yield_reported_cumulative: data.yieldReportedCumulative,
            lst_liability_principal: data.lstLiabilityPrincipal,
            last_reported_negative_yield: data.lastReportedNegativeYield,
        })
    }

    async fn balance(&self) -> Result<U256, LedgerError> {
        Ok(self.wallet.balance(self.address).await?)
    }

    async fn total_system_balance(&self) -> Result<U256, LedgerError> {
        let call = IYieldManager::getTotalSystemBalanceCall {};
        Ok(read(&self.wallet, self.address, &call).await?)
    }

    async fn target_reserve_deficit(&self) -> Result<U256, LedgerError> {
        let call = IYieldManager::getTargetReserveDeficitCall {};
        Ok(read(&self.wallet, self.address, &call).await?)
    }

    async fn rebalance_requirements(&self) -> Result<RebalanceRequirement, LedgerError> {
        let message_service = read(
            &self.wallet,
            self.address,
            &IYieldManager::L1_MESSAGE_SERVICECall {},
        )
        .await?;
        let reserve_balance = self.wallet.balance(message_service).await?;
        let target = read(
            &self.wallet,
            self.address,
            &IYieldManager::getEffectiveTargetWithdrawalReserveCall {},
        )
        .await?;

        let requirement = classify_requirement(reserve_balance, target, self.tolerance_amount);
        debug!(
            %reserve_balance,
            %target,
            tolerance = %self.tolerance_amount,
            direction = %requirement.direction,
            amount = %requirement.amount,
            "Computed rebalance requirement"
        );

        Ok(requirement)
    }

    async fn peek_yield_report(
        &self,
        yield_provider: Address,
        l2_yield_recipient: Address,
    ) -> Result<YieldReport, LedgerError> {
        let call = IYieldManager::reportYieldCall {
            _yieldProvider: yield_provider,
            _l2YieldRecipient: l2_yield_recipient,
        };
        let peeked = simulate(&self.wallet, self.address, &call).await?;

        Ok(YieldReport {
            yield_amount: peeked.newReportedYield,
            outstanding_negative_yield: peeked.outstandingNegativeYield,
        })
    }

    async fn available_unstaking_balance(
        &self,
        yield_provider: Address,
    ) -> Result<U256, LedgerError> {
        let own_balance = self.wallet.balance(self.address).await?;
        let withdrawable = simulate(
            &self.wallet,
            self.address,
            &IYieldManager::withdrawableValueCall {
                _yieldProvider: yield_provider,
            },
        )
        .await?;

        Ok(own_balance.saturating_add(withdrawable))
    }

    async fn fund_yield_provider(
        &self,
        yield_provider: Address,
        amount: U256,
    ) -> Result<TransactionReceipt, LedgerError> {
        let receipt = self
            .send(
                &IYieldManager::fundYieldProviderCall {
                    _yieldProvider: yield_provider,
                    _amount: amount,
                },
                U256::ZERO,
                "fundYieldProvider",
            )
            .await?;

        info!(%yield_provider, %amount, tx_hash = %receipt.transaction_hash, "Funded yield provider");
        Ok(receipt)
    }

    async fn report_yield(
        &self,
        yield_provider: Address,
        l2_yield_recipient: Address,
    ) -> Result<TransactionReceipt, LedgerError> {
        let receipt = self
            .send(
                &IYieldManager::reportYieldCall {
                    _yieldProvider: yield_provider,
                    _l2YieldRecipient: l2_yield_recipient,
                },
                U256::ZERO,
                "reportYield",
            )
            .await?;

        info!(%yield_provider, %l2_yield_recipient, tx_hash = %receipt.transaction_hash, "Reported yield");
        Ok(receipt)
    }

    async fn unstake(
        &self,
        yield_provider: Address,
        batch: &WithdrawalRequestBatch,
    ) -> Result<TransactionReceipt, LedgerError> {
        let staking_vault = self.staking_vault(yield_provider).await?;
        let fee = read(
            &self.wallet,
            staking_vault,
            &IStakingVault::calculateValidatorWithdrawalFeeCall {
                _numberOfKeys: U256::from(batch.len()),
            },
        )
        .await?;

        let params = IYieldManager::WithdrawalParams {
            pubkeys: batch
                .public_keys()
                .iter()
                .map(|key| Bytes::copy_from_slice(key.as_slice()))
                .collect(),
            amounts: batch.amounts_gwei().to_vec(),
            refundRecipient: self.address,
        };

        let receipt = self
            .send(
                &IYieldManager::unstakeCall {
                    _yieldProvider: yield_provider,
                    _withdrawalParams: Bytes::from(params.abi_encode()),
                },
                fee,
                "unstake",
            )
            .await?;

        info!(
            %yield_provider,
            requests = batch.len(),
            %fee,
            tx_hash = %receipt.transaction_hash,
            "Submitted validator withdrawal requests"
        );
        Ok(receipt)
    }

    async fn safe_withdraw_from_yield_provider(
        &self,
        yield_provider: Address,
        amount: U256,
    ) -> Result<TransactionReceipt, LedgerError> {
        let receipt = self
            .send(
                &IYieldManager::safeWithdrawFromYieldProviderCall {
                    _yieldProvider: yield_provider,
                    _amount: amount,
                },
                U256::ZERO,
                "safeWithdrawFromYieldProvider",
            )
            .await?;

        info!(%yield_provider, %amount, tx_hash = %receipt.transaction_hash, "Withdrew from yield provider");
        Ok(receipt)
    }

    async fn safe_add_to_withdrawal_reserve_if_above_threshold(
        &self,
        yield_provider: Address,
        amount: U256,
    ) -> Result<Option<TransactionReceipt>, LedgerError> {
        let available = self.available_unstaking_balance(yield_provider).await?;
        if available <= self.min_withdrawal_threshold {
            info!(
                %yield_provider,
                %available,
                threshold = %self.min_withdrawal_threshold,
                "Available unstaking balance below threshold, skipping reserve top-up"
            );
            return Ok(None);
        }

        self.safe_add_to_withdrawal_reserve(yield_provider, amount)
            .await
            .map(Some)
    }

    async fn safe_max_add_to_withdrawal_reserve(
        &self,
        yield_provider: Address,
    ) -> Result<Option<TransactionReceipt>, LedgerError> {
        let available = self.available_unstaking_balance(yield_provider).await?;
        if available <= self.min_withdrawal_threshold {
            info!(
                %yield_provider,
                %available,
                threshold = %self.min_withdrawal_threshold,
                "Available unstaking balance below threshold, skipping max reserve top-up"
            );
            return Ok(None);
        }

        self.safe_add_to_withdrawal_reserve(yield_provider, available)
            .await
            .map(Some)
    }

    async fn pause_staking_if_not_already(
        &self,
        yield_provider: Address,
    ) -> Result<Option<TransactionReceipt>, LedgerError> {
        if self.is_staking_paused(yield_provider).await? {
            info!(%yield_provider, "Staking already paused");
            return Ok(None);
        }

        let receipt = self
            .send(
                &IYieldManager::pauseStakingCall {
                    _yieldProvider: yield_provider,
                },
                U256::ZERO,
                "pauseStaking",
            )
            .await?;

        info!(%yield_provider, tx_hash = %receipt.transaction_hash, "Paused staking");
        Ok(Some(receipt))
    }

    async fn unpause_staking_if_not_already(
        &self,
        yield_provider: Address,
    ) -> Result<Option<TransactionReceipt>, LedgerError> {
        if !self.is_staking_paused(yield_provider).await? {
            info!(%yield_provider, "Staking already resumed");
            return Ok(None);
        }

        let receipt = self
            .send(
                &IYieldManager::unpauseStakingCall {
                    _yieldProvider: yield_provider,
                },
                U256::ZERO,
                "unpauseStaking",
            )
            .await?;

        info!(%yield_provider, tx_hash = %receipt.transaction_hash, "Unpaused staking");
        Ok(Some(receipt))
    }

    async fn progress_pending_ossification(
        &self,
        yield_provider: Address,
    ) -> Result<TransactionReceipt, LedgerError> {
        let receipt = self
            .send(
                &IYieldManager::progressPendingOssificationCall {
                    _yieldProvider: yield_provider,
                },
                U256::ZERO,
                "progressPendingOssification",
            )
            .await?;

        info!(%yield_provider, tx_hash = %receipt.transaction_hash, "Progressed pending ossification");
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use alloy::providers::mock::Asserter;

    use super::*;
    use crate::ledger::ProviderContracts;
    use crate::test_utils::MockedWallet;
    use crate::validators::mock::validator;

    const YIELD_MANAGER: Address = Address::repeat_byte(0x11);
    const PROVIDER: Address = Address::repeat_byte(0x22);
    const MESSAGE_SERVICE: Address = Address::repeat_byte(0x33);
    const STAKING_VAULT: Address = Address::repeat_byte(0x44);

    fn contract(asserter: &Asserter, threshold_eth: u64) -> YieldManagerContract<MockedWallet> {
        YieldManagerContract::new(
            MockedWallet::new(asserter.clone()),
            YIELD_MANAGER,
            U256::from(10_000u64),
            threshold_eth,
        )
    }

    fn push_return<C: SolCall>(asserter: &Asserter, value: &C::Return) {
        asserter.push_success(&Bytes::from(C::abi_encode_returns(value)));
    }

    fn one_ether() -> U256 {
        U256::from(WEI_PER_ETHER)
    }

    #[test]
    fn classify_within_tolerance_is_none() {
        let target = U256::from(500_000u64);
        let tolerance = U256::from(10_000u64);

        assert_eq!(
            classify_requirement(target + U256::from(5_000u64), target, tolerance),
            RebalanceRequirement::none()
        );
        assert_eq!(
            classify_requirement(target - U256::from(9_999u64), target, tolerance),
            RebalanceRequirement::none()
        );
    }

    #[test]
    fn classify_deficit_and_surplus() {
        let target = U256::from(500_000u64);
        let tolerance = U256::from(10_000u64);

        assert_eq!(
            classify_requirement(target - U256::from(20_000u64), target, tolerance),
            RebalanceRequirement::unstake(U256::from(20_000u64))
        );
        assert_eq!(
            classify_requirement(target + U256::from(30_000u64), target, tolerance),
            RebalanceRequirement::stake(U256::from(30_000u64))
        );
    }

    #[test]
    fn classify_with_zero_tolerance_and_exact_target_is_none() {
        let target = U256::from(42u64);

        assert_eq!(
            classify_requirement(target, target, U256::ZERO),
            RebalanceRequirement::none()
        );
    }

    #[tokio::test]
    async fn rebalance_requirements_reads_reserve_and_target() {
        let asserter = Asserter::new();
        push_return::<IYieldManager::L1_MESSAGE_SERVICECall>(&asserter, &MESSAGE_SERVICE);
        asserter.push_success(&U256::from(480_000u64));
        push_return::<IYieldManager::getEffectiveTargetWithdrawalReserveCall>(
            &asserter,
            &U256::from(500_000u64),
        );

        let requirement = contract(&asserter, 0).rebalance_requirements().await.unwrap();

        assert_eq!(requirement, RebalanceRequirement::unstake(U256::from(20_000u64)));
    }

    #[tokio::test]
    async fn pause_skipped_when_already_paused() {
        let asserter = Asserter::new();
        push_return::<IYieldManager::isStakingPausedCall>(&asserter, &true);
        let yield_manager = contract(&asserter, 0);

        let receipt = yield_manager.pause_staking_if_not_already(PROVIDER).await.unwrap();

        assert!(receipt.is_none());
        assert!(yield_manager.wallet.sent().is_empty());
    }

    #[tokio::test]
    async fn pause_sends_when_not_paused() {
        let asserter = Asserter::new();
        push_return::<IYieldManager::isStakingPausedCall>(&asserter, &false);
        let yield_manager = contract(&asserter, 0);

        let receipt = yield_manager.pause_staking_if_not_already(PROVIDER).await.unwrap();

        assert!(receipt.is_some());
        let sent = yield_manager.wallet.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].contract, YIELD_MANAGER);
        assert_eq!(
            sent[0].calldata,
            Bytes::from(
                IYieldManager::pauseStakingCall {
                    _yieldProvider: PROVIDER
                }
                .abi_encode()
            )
        );
    }

    #[tokio::test]
    async fn unpause_skipped_when_not_paused() {
        let asserter = Asserter::new();
        push_return::<IYieldManager::isStakingPausedCall>(&asserter, &false);
        let yield_manager = contract(&asserter, 0);

        let receipt = yield_manager
            .unpause_staking_if_not_already(PROVIDER)
            .await
            .unwrap();

        assert!(receipt.is_none());
        assert!(yield_manager.wallet.sent().is_empty());
    }

    #[tokio::test]
    async fn available_unstaking_balance_adds_withdrawable_value() {
        let asserter = Asserter::new();
        asserter.push_success(&U256::from(1_000u64));
        push_return::<IYieldManager::withdrawableValueCall>(&asserter, &U256::from(500u64));

        let available = contract(&asserter, 0)
            .available_unstaking_balance(PROVIDER)
            .await
            .unwrap();

        assert_eq!(available, U256::from(1_500u64));
    }

    #[tokio::test]
    async fn reserve_top_up_skipped_below_threshold() {
        let asserter = Asserter::new();
        asserter.push_success(&(one_ether() - U256::from(1u64)));
        push_return::<IYieldManager::withdrawableValueCall>(&asserter, &U256::ZERO);
        let yield_manager = contract(&asserter, 1);

        let receipt = yield_manager
            .safe_add_to_withdrawal_reserve_if_above_threshold(PROVIDER, U256::from(5u64))
            .await
            .unwrap();

        assert!(receipt.is_none());
        assert!(yield_manager.wallet.sent().is_empty());
    }

    #[tokio::test]
    async fn max_reserve_top_up_adds_full_available_balance() {
        let asserter = Asserter::new();
        let available = one_ether() + U256::from(50u64);
        asserter.push_success(&available);
        push_return::<IYieldManager::withdrawableValueCall>(&asserter, &U256::ZERO);
        let yield_manager = contract(&asserter, 1);

        let receipt = yield_manager
            .safe_max_add_to_withdrawal_reserve(PROVIDER)
            .await
            .unwrap();

        assert!(receipt.is_some());
        let sent = yield_manager.wallet.sent();
        assert_eq!(
            sent[0].calldata,
            Bytes::from(
                IYieldManager::safeAddToWithdrawalReserveCall {
                    _yieldProvider: PROVIDER,
                    _amount: available,
                }
                .abi_encode()
            )
        );
    }

    #[tokio::test]
    async fn unstake_encodes_requests_and_pays_fee() {
        let asserter = Asserter::new();
        push_return::<IYieldManager::getYieldProviderDataCall>(
            &asserter,
            &IYieldManager::YieldProviderData {
                ossifiedEntrypoint: STAKING_VAULT,
                ..Default::default()
            },
        );
        push_return::<IStakingVault::calculateValidatorWithdrawalFeeCall>(
            &asserter,
            &U256::from(123u64),
        );
        let yield_manager = contract(&asserter, 0);

        let key = validator(7, 0).public_key;
        let mut batch = WithdrawalRequestBatch::with_limit(2);
        batch.push(key, 32);

        yield_manager.unstake(PROVIDER, &batch).await.unwrap();

        let sent = yield_manager.wallet.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].value, U256::from(123u64));

        let expected_params = IYieldManager::WithdrawalParams {
            pubkeys: vec![Bytes::copy_from_slice(key.as_slice())],
            amounts: vec![32],
            refundRecipient: YIELD_MANAGER,
        };
        let decoded = IYieldManager::unstakeCall::abi_decode(&sent[0].calldata).unwrap();
        assert_eq!(decoded._yieldProvider, PROVIDER);
        assert_eq!(decoded._withdrawalParams, Bytes::from(expected_params.abi_encode()));
    }

    #[tokio::test]
    async fn provider_contracts_resolved_from_one_read() {
        let asserter = Asserter::new();
        let dashboard = Address::repeat_byte(0x45);
        push_return::<IYieldManager::getYieldProviderDataCall>(
            &asserter,
            &IYieldManager::YieldProviderData {
                primaryEntrypoint: dashboard,
                ossifiedEntrypoint: STAKING_VAULT,
                ..Default::default()
            },
        );

        let contracts = contract(&asserter, 0)
            .provider_contracts(PROVIDER)
            .await
            .unwrap();

        assert_eq!(
            contracts,
            ProviderContracts {
                vault: STAKING_VAULT,
                dashboard,
            }
        );
    }

    #[tokio::test]
    async fn read_failure_surfaces_as_ledger_error() {
        let asserter = Asserter::new();
        asserter.push_failure_msg("header not found");

        let result = contract(&asserter, 0).is_ossified(PROVIDER).await;

        assert!(matches!(result, Err(LedgerError::Evm(_))));
    }
}
