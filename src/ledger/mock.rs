//! In-memory ledger clients with call logs and configurable failures.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::TransactionReceipt;
use alloy::transports::TransportErrorKind;
use async_trait::async_trait;
use tokio::sync::oneshot;

use native_yield_evm::EvmError;

use super::{
    EventWatch, LazyOracle, LedgerError, LidoAccountingReports, LineaRollupYieldExtension,
    RebalanceRequirement, ReportData, Steth, VaultHub, VaultReportParams, YieldManager,
    YieldProviderData, YieldReport,
};
use crate::staking::WithdrawalRequestBatch;
use crate::test_utils::receipt_with_logs;
use crate::validators::BlsPublicKey;

pub(crate) const YIELD_MANAGER: Address = Address::repeat_byte(0x11);
pub(crate) const VAULT_HUB: Address = Address::repeat_byte(0x88);
pub(crate) const STAKING_VAULT: Address = Address::repeat_byte(0x44);
pub(crate) const DASHBOARD: Address = Address::repeat_byte(0x45);

pub(crate) fn read_failure() -> LedgerError {
    LedgerError::Evm(EvmError::Transport(TransportErrorKind::custom_str(
        "mock rpc unavailable",
    )))
}

pub(crate) fn write_failure() -> LedgerError {
    LedgerError::Evm(EvmError::Reverted {
        tx_hash: B256::repeat_byte(0xee),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum YieldManagerCall {
    FundYieldProvider(U256),
    ReportYield(Address),
    Unstake {
        public_keys: Vec<BlsPublicKey>,
        amounts_gwei: Vec<u64>,
    },
    SafeWithdrawFromYieldProvider(U256),
    SafeAddToWithdrawalReserve(U256),
    SafeMaxAddToWithdrawalReserve,
    PauseStaking,
    UnpauseStaking,
    ProgressPendingOssification,
}

/// Yield manager state held in memory.
///
/// `requirements` is consumed front to back; the last entry repeats once
/// the queue is down to one.
pub(crate) struct MockYieldManager {
    pub(crate) ossification_initiated: AtomicBool,
    pub(crate) ossified: AtomicBool,
    pub(crate) staking_paused: AtomicBool,
    pub(crate) below_withdrawal_threshold: AtomicBool,
    pub(crate) provider_data: Mutex<YieldProviderData>,
    pub(crate) balance: Mutex<U256>,
    pub(crate) total_system_balance: Mutex<U256>,
    pub(crate) target_reserve_deficit: Mutex<U256>,
    pub(crate) available_unstaking_balance: Mutex<U256>,
    pub(crate) requirements: Mutex<VecDeque<RebalanceRequirement>>,
    pub(crate) peeked_report: Mutex<Option<YieldReport>>,
    /// Ossification state to adopt once `progress_pending_ossification` runs.
    pub(crate) ossified_after_progress: AtomicBool,
    pub(crate) flag_reads: AtomicUsize,
    fail_flag_reads: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    failing_operations: Mutex<Vec<&'static str>>,
    receipts: Mutex<HashMap<&'static str, TransactionReceipt>>,
    calls: Mutex<Vec<YieldManagerCall>>,
}

impl MockYieldManager {
    pub(crate) fn new() -> Self {
        Self {
            ossification_initiated: AtomicBool::new(false),
            ossified: AtomicBool::new(false),
            staking_paused: AtomicBool::new(false),
            below_withdrawal_threshold: AtomicBool::new(false),
            provider_data: Mutex::new(YieldProviderData {
                primary_entrypoint: DASHBOARD,
                ossified_entrypoint: STAKING_VAULT,
                ..Default::default()
            }),
            balance: Mutex::new(U256::ZERO),
            total_system_balance: Mutex::new(U256::ZERO),
            target_reserve_deficit: Mutex::new(U256::ZERO),
            available_unstaking_balance: Mutex::new(U256::ZERO),
            requirements: Mutex::new(VecDeque::from([RebalanceRequirement::none()])),
            peeked_report: Mutex::new(Some(YieldReport::default())),
            ossified_after_progress: AtomicBool::new(false),
            flag_reads: AtomicUsize::new(0),
            fail_flag_reads: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            failing_operations: Mutex::new(Vec::new()),
            receipts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_requirements(requirements: &[RebalanceRequirement]) -> Self {
        let mock = Self::new();
        *mock.requirements.lock().unwrap() = requirements.iter().copied().collect();
        mock
    }

    pub(crate) fn calls(&self) -> Vec<YieldManagerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    /// Fails the next `count` ossification flag reads.
    pub(crate) fn fail_next_flag_reads(&self, count: usize) {
        self.fail_flag_reads.store(count, Ordering::SeqCst);
    }

    pub(crate) fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Fails only the named write, e.g. `"reportYield"`.
    pub(crate) fn fail_operation(&self, operation: &'static str) {
        self.failing_operations.lock().unwrap().push(operation);
    }

    /// Receipt returned by the named write instead of an empty one.
    pub(crate) fn set_receipt(&self, operation: &'static str, receipt: TransactionReceipt) {
        self.receipts.lock().unwrap().insert(operation, receipt);
    }

    fn read<T>(&self, value: T) -> Result<T, LedgerError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(read_failure());
        }
        Ok(value)
    }

    fn read_flag(&self, flag: &AtomicBool) -> Result<bool, LedgerError> {
        self.flag_reads.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .fail_flag_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(read_failure());
        }
        self.read(flag.load(Ordering::SeqCst))
    }

    fn write(
        &self,
        operation: &'static str,
        call: YieldManagerCall,
    ) -> Result<TransactionReceipt, LedgerError> {
        if self.fail_writes.load(Ordering::SeqCst)
            || self.failing_operations.lock().unwrap().contains(&operation)
        {
            return Err(write_failure());
        }

        self.calls.lock().unwrap().push(call);
        Ok(self
            .receipts
            .lock()
            .unwrap()
            .get(operation)
            .cloned()
            .unwrap_or_else(|| receipt_with_logs(&[])))
    }
}

#[async_trait]
impl YieldManager for MockYieldManager {
    fn address(&self) -> Address {
        YIELD_MANAGER
    }

    async fn is_ossification_initiated(&self, _: Address) -> Result<bool, LedgerError> {
        self.read_flag(&self.ossification_initiated)
    }

    async fn is_ossified(&self, _: Address) -> Result<bool, LedgerError> {
        self.read_flag(&self.ossified)
    }

    async fn is_staking_paused(&self, _: Address) -> Result<bool, LedgerError> {
        self.read(self.staking_paused.load(Ordering::SeqCst))
    }

    async fn yield_provider_data(&self, _: Address) -> Result<YieldProviderData, LedgerError> {
        self.read(self.provider_data.lock().unwrap().clone())
    }

    async fn balance(&self) -> Result<U256, LedgerError> {
        self.read(*self.balance.lock().unwrap())
    }

    async fn total_system_balance(&self) -> Result<U256, LedgerError> {
        self.read(*self.total_system_balance.lock().unwrap())
    }

    async fn target_reserve_deficit(&self) -> Result<U256, LedgerError> {
        self.read(*self.target_reserve_deficit.lock().unwrap())
    }

    async fn rebalance_requirements(&self) -> Result<RebalanceRequirement, LedgerError> {
        let mut requirements = self.requirements.lock().unwrap();
        let requirement = if requirements.len() > 1 {
            requirements.pop_front()
        } else {
            requirements.front().copied()
        };
        self.read(requirement.unwrap_or_else(RebalanceRequirement::none))
    }

    async fn peek_yield_report(&self, _: Address, _: Address) -> Result<YieldReport, LedgerError> {
        let peeked = *self.peeked_report.lock().unwrap();
        self.read(())?;
        peeked.ok_or_else(read_failure)
    }

    async fn available_unstaking_balance(&self, _: Address) -> Result<U256, LedgerError> {
        self.read(*self.available_unstaking_balance.lock().unwrap())
    }

    async fn fund_yield_provider(
        &self,
        _: Address,
        amount: U256,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.write("fundYieldProvider", YieldManagerCall::FundYieldProvider(amount))
    }

    async fn report_yield(
        &self,
        _: Address,
        l2_yield_recipient: Address,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.write(
            "reportYield",
            YieldManagerCall::ReportYield(l2_yield_recipient),
        )
    }

    async fn unstake(
        &self,
        _: Address,
        batch: &WithdrawalRequestBatch,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.write(
            "unstake",
            YieldManagerCall::Unstake {
                public_keys: batch.public_keys().to_vec(),
                amounts_gwei: batch.amounts_gwei().to_vec(),
            },
        )
    }

    async fn safe_withdraw_from_yield_provider(
        &self,
        _: Address,
        amount: U256,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.write(
            "safeWithdrawFromYieldProvider",
            YieldManagerCall::SafeWithdrawFromYieldProvider(amount),
        )
    }

    async fn safe_add_to_withdrawal_reserve_if_above_threshold(
        &self,
        _: Address,
        amount: U256,
    ) -> Result<Option<TransactionReceipt>, LedgerError> {
        if self.below_withdrawal_threshold.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.write(
            "safeAddToWithdrawalReserve",
            YieldManagerCall::SafeAddToWithdrawalReserve(amount),
        )
        .map(Some)
    }

    async fn safe_max_add_to_withdrawal_reserve(
        &self,
        _: Address,
    ) -> Result<Option<TransactionReceipt>, LedgerError> {
        if self.below_withdrawal_threshold.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.write(
            "safeMaxAddToWithdrawalReserve",
            YieldManagerCall::SafeMaxAddToWithdrawalReserve,
        )
        .map(Some)
    }

    async fn pause_staking_if_not_already(
        &self,
        _: Address,
    ) -> Result<Option<TransactionReceipt>, LedgerError> {
        if self.staking_paused.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let receipt = self.write("pauseStaking", YieldManagerCall::PauseStaking)?;
        self.staking_paused.store(true, Ordering::SeqCst);
        Ok(Some(receipt))
    }

    async fn unpause_staking_if_not_already(
        &self,
        _: Address,
    ) -> Result<Option<TransactionReceipt>, LedgerError> {
        if !self.staking_paused.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let receipt = self.write("unpauseStaking", YieldManagerCall::UnpauseStaking)?;
        self.staking_paused.store(false, Ordering::SeqCst);
        Ok(Some(receipt))
    }

    async fn progress_pending_ossification(
        &self,
        _: Address,
    ) -> Result<TransactionReceipt, LedgerError> {
        let receipt = self.write(
            "progressPendingOssification",
            YieldManagerCall::ProgressPendingOssification,
        )?;
        if self.ossified_after_progress.load(Ordering::SeqCst) {
            self.ossified.store(true, Ordering::SeqCst);
        }
        Ok(receipt)
    }
}

#[derive(Default)]
pub(crate) struct MockRollup {
    pub(crate) fail: AtomicBool,
    transfers: Mutex<Vec<U256>>,
}

impl MockRollup {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn transfers(&self) -> Vec<U256> {
        self.transfers.lock().unwrap().clone()
    }
}

#[async_trait]
impl LineaRollupYieldExtension for MockRollup {
    async fn transfer_funds_for_native_yield(
        &self,
        amount: U256,
    ) -> Result<TransactionReceipt, LedgerError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(write_failure());
        }
        self.transfers.lock().unwrap().push(amount);
        Ok(receipt_with_logs(&[]))
    }
}

/// Liability per dashboard; unknown dashboards fail the read.
pub(crate) struct MockSteth {
    pub(crate) liabilities: Mutex<HashMap<Address, U256>>,
}

impl MockSteth {
    pub(crate) fn new() -> Self {
        Self {
            liabilities: Mutex::new(HashMap::from([(DASHBOARD, U256::ZERO)])),
        }
    }
}

#[async_trait]
impl Steth for MockSteth {
    async fn lst_liability(&self, dashboard: Address) -> Result<U256, LedgerError> {
        self.liabilities
            .lock()
            .unwrap()
            .get(&dashboard)
            .copied()
            .ok_or_else(read_failure)
    }
}

/// `None` fields make the matching read fail.
pub(crate) struct MockVaultHub {
    pub(crate) settleable_lido_fees: Mutex<Option<U256>>,
    pub(crate) latest_report_timestamp: Mutex<Option<u64>>,
    pub(crate) fresh: Mutex<Option<bool>>,
}

impl MockVaultHub {
    pub(crate) fn new() -> Self {
        Self {
            settleable_lido_fees: Mutex::new(Some(U256::ZERO)),
            latest_report_timestamp: Mutex::new(Some(0)),
            fresh: Mutex::new(Some(true)),
        }
    }
}

#[async_trait]
impl VaultHub for MockVaultHub {
    fn address(&self) -> Address {
        VAULT_HUB
    }

    async fn settleable_lido_fees(&self, _: Address) -> Result<U256, LedgerError> {
        self.settleable_lido_fees
            .lock()
            .unwrap()
            .ok_or_else(read_failure)
    }

    async fn latest_report_timestamp(&self, _: Address) -> Result<u64, LedgerError> {
        self.latest_report_timestamp
            .lock()
            .unwrap()
            .ok_or_else(read_failure)
    }

    async fn is_report_fresh(&self, _: Address) -> Result<bool, LedgerError> {
        self.fresh.lock().unwrap().ok_or_else(read_failure)
    }
}

/// Oracle whose watches either fire immediately or stay pending until
/// fired by the test.
pub(crate) struct MockLazyOracle {
    pub(crate) fire_on_watch: AtomicBool,
    pub(crate) simulate_ok: AtomicBool,
    pub(crate) watches: AtomicUsize,
    pub(crate) releases: Arc<AtomicUsize>,
    pub(crate) report: Mutex<ReportData>,
    pending: Mutex<Vec<oneshot::Sender<()>>>,
    simulations: Mutex<Vec<VaultReportParams>>,
    updates: Mutex<Vec<VaultReportParams>>,
}

impl MockLazyOracle {
    pub(crate) fn new() -> Self {
        Self {
            fire_on_watch: AtomicBool::new(false),
            simulate_ok: AtomicBool::new(true),
            watches: AtomicUsize::new(0),
            releases: Arc::new(AtomicUsize::new(0)),
            report: Mutex::new(ReportData {
                timestamp: 1_700_000_000,
                ref_slot: 42,
                tree_root: B256::repeat_byte(0xaa),
                report_cid: "bafy-mock".to_string(),
            }),
            pending: Mutex::new(Vec::new()),
            simulations: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn firing() -> Self {
        let oracle = Self::new();
        oracle.fire_on_watch.store(true, Ordering::SeqCst);
        oracle
    }

    /// Fires every watch still waiting.
    pub(crate) fn fire_pending(&self) {
        for sender in self.pending.lock().unwrap().drain(..) {
            let _ = sender.send(());
        }
    }

    pub(crate) fn updates(&self) -> Vec<VaultReportParams> {
        self.updates.lock().unwrap().clone()
    }

    pub(crate) fn simulations(&self) -> Vec<VaultReportParams> {
        self.simulations.lock().unwrap().clone()
    }
}

#[async_trait]
impl LazyOracle for MockLazyOracle {
    async fn latest_report_data(&self) -> Result<ReportData, LedgerError> {
        Ok(self.report.lock().unwrap().clone())
    }

    async fn watch_vaults_report_data_updated(&self) -> Result<EventWatch, LedgerError> {
        self.watches.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = oneshot::channel();
        if self.fire_on_watch.load(Ordering::SeqCst) {
            let _ = sender.send(());
        } else {
            self.pending.lock().unwrap().push(sender);
        }

        let releases = Arc::clone(&self.releases);
        Ok(EventWatch::new(receiver, move || {
            releases.fetch_add(1, Ordering::SeqCst);
        }))
    }

    async fn simulate_update_vault_data(
        &self,
        params: &VaultReportParams,
    ) -> Result<(), LedgerError> {
        self.simulations.lock().unwrap().push(params.clone());
        if self.simulate_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(write_failure())
        }
    }

    async fn update_vault_data(
        &self,
        params: &VaultReportParams,
    ) -> Result<TransactionReceipt, LedgerError> {
        self.updates.lock().unwrap().push(params.clone());
        Ok(receipt_with_logs(&[]))
    }
}

/// Every params read returns a report with a fresh `total_value`, so tests
/// can tell which read a simulation or submission used.
pub(crate) struct MockAccountingReports {
    pub(crate) simulate_ok: AtomicBool,
    pub(crate) fail_params: AtomicBool,
    pub(crate) fail_submit: AtomicBool,
    pub(crate) params_reads: AtomicUsize,
    pub(crate) submissions: AtomicUsize,
    simulated: Mutex<Vec<VaultReportParams>>,
    submitted: Mutex<Vec<VaultReportParams>>,
}

impl MockAccountingReports {
    pub(crate) fn new() -> Self {
        Self {
            simulate_ok: AtomicBool::new(true),
            fail_params: AtomicBool::new(false),
            fail_submit: AtomicBool::new(false),
            params_reads: AtomicUsize::new(0),
            submissions: AtomicUsize::new(0),
            simulated: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn simulated(&self) -> Vec<VaultReportParams> {
        self.simulated.lock().unwrap().clone()
    }

    pub(crate) fn submitted(&self) -> Vec<VaultReportParams> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl LidoAccountingReports for MockAccountingReports {
    async fn latest_vault_report_params(
        &self,
        vault: Address,
    ) -> Result<VaultReportParams, LedgerError> {
        let read = self.params_reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_params.load(Ordering::SeqCst) {
            return Err(LedgerError::VaultNotInReport {
                vault,
                cid: "bafy-mock".to_string(),
            });
        }

        Ok(VaultReportParams {
            vault,
            total_value: U256::from(100 + read),
            cumulative_lido_fees: U256::ZERO,
            liability_shares: U256::ZERO,
            max_liability_shares: U256::ZERO,
            slashing_reserve: U256::ZERO,
            proof: vec![B256::repeat_byte(0x01)],
        })
    }

    async fn is_simulate_submit_vault_report_ok(&self, params: &VaultReportParams) -> bool {
        self.simulated.lock().unwrap().push(params.clone());
        self.simulate_ok.load(Ordering::SeqCst)
    }

    async fn submit_vault_report(
        &self,
        params: &VaultReportParams,
    ) -> Result<TransactionReceipt, LedgerError> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(write_failure());
        }
        self.submissions.fetch_add(1, Ordering::SeqCst);
        self.submitted.lock().unwrap().push(params.clone());
        Ok(receipt_with_logs(&[]))
    }
}
