//! Periodic refresh of point-in-time gauges from read-only ledger and
//! beacon chain state.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::ledger::{
    LedgerError, ProviderContracts, Steth, VaultHub, YieldManager, YieldProviderData,
};
use crate::metrics::{AutomationMetrics, wei_to_gwei};
use crate::operation_loop::OperationLoop;
use crate::validators::{
    ExitedValidator, ExitingValidator, PendingDeposit, PendingPartialWithdrawal,
    ValidatorBalance, ValidatorDataClient, ValidatorDataError, aggregate_pending_withdrawals,
    join_validators_with_pending_withdrawals, pending_deposits_for_vault,
    total_exited_balance_gwei, total_exiting_balance_gwei, total_pending_partial_withdrawals_wei,
    total_validator_balance_gwei,
};

#[derive(Debug, Error)]
enum GaugeError {
    #[error(transparent)]
    ValidatorData(#[from] ValidatorDataError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("{0} unavailable")]
    MissingInput(&'static str),
}

/// Read-only clients sampled by the poller.
pub struct GaugeSources {
    pub validators: Arc<dyn ValidatorDataClient>,
    /// Only its epoch is read, to measure how far `validators` lags.
    pub reference_beacon_node: Option<Arc<dyn ValidatorDataClient>>,
    pub yield_manager: Arc<dyn YieldManager>,
    pub vault_hub: Arc<dyn VaultHub>,
    pub steth: Arc<dyn Steth>,
}

type Refresh<'a> = (&'static str, BoxFuture<'a, Result<(), GaugeError>>);

fn fetched<T, E: std::fmt::Display>(result: Result<T, E>, what: &'static str) -> Option<T> {
    result
        .inspect_err(|error| error!(%error, "Failed to fetch {what}"))
        .ok()
}

pub struct GaugeMetricsPoller {
    metrics: Arc<dyn AutomationMetrics>,
    sources: GaugeSources,
    yield_provider: Address,
    poll_interval: Duration,
    operation_loop: OperationLoop,
}

impl GaugeMetricsPoller {
    pub fn new(
        metrics: Arc<dyn AutomationMetrics>,
        sources: GaugeSources,
        yield_provider: Address,
        poll_interval: Duration,
    ) -> Self {
        Self {
            metrics,
            sources,
            yield_provider,
            poll_interval,
            operation_loop: OperationLoop::new(),
        }
    }

    /// Refreshes every gauge once. Each refresh runs independently; failures
    /// are logged with the gauge name and never returned.
    pub async fn poll(&self) {
        let beacon = &self.sources.validators;
        let (validators, exiting, exited, pending, deposits, provider_data) = futures_util::join!(
            beacon.active_validators(),
            beacon.exiting_validators(),
            beacon.exited_validators(),
            beacon.pending_partial_withdrawals(),
            beacon.pending_deposits(),
            self.sources
                .yield_manager
                .yield_provider_data(self.yield_provider),
        );

        let validators = fetched(validators, "active validators");
        let exiting = fetched(exiting, "exiting validators");
        let exited = fetched(exited, "exited validators");
        let pending = fetched(pending, "pending partial withdrawals");
        let deposits = fetched(deposits, "pending deposits");
        let provider_data = provider_data
            .inspect_err(|error| {
                error!(
                    %error,
                    "Failed to fetch yield provider data, skipping vault-dependent gauges"
                );
            })
            .ok();

        if let Some(reference) = self.sources.reference_beacon_node.as_deref() {
            self.refresh_beacon_chain_epoch_drift(reference).await;
        }

        let validators = validators.as_deref();
        let pending = pending.as_deref();
        let exiting = exiting.as_deref();
        let exited = exited.as_deref();

        let mut refreshes: Vec<Refresh<'_>> = vec![
            (
                "total pending partial withdrawals",
                self.refresh_total_pending_partial_withdrawals(validators, pending)
                    .boxed(),
            ),
            (
                "pending partial withdrawals queue",
                self.refresh_pending_partial_withdrawals_queue(validators, pending)
                    .boxed(),
            ),
            (
                "total validator balance",
                self.refresh_total_validator_balance(validators).boxed(),
            ),
            (
                "validator staked amount",
                self.refresh_validator_staked_amount(validators).boxed(),
            ),
            (
                "pending exit queue",
                self.refresh_pending_exit_queue(exiting).boxed(),
            ),
            (
                "total pending exit",
                self.refresh_total_pending_exit(exiting).boxed(),
            ),
            (
                "pending full withdrawal queue",
                self.refresh_pending_full_withdrawal_queue(exited).boxed(),
            ),
            (
                "total pending full withdrawal",
                self.refresh_total_pending_full_withdrawal(exited).boxed(),
            ),
        ];

        if let Some(data) = provider_data.as_ref() {
            let contracts = ProviderContracts::from(data);
            let deposits = deposits
                .as_deref()
                .map(|deposits| pending_deposits_for_vault(deposits, contracts.vault));

            refreshes.push((
                "last vault report timestamp",
                self.refresh_last_vault_report_timestamp(contracts.vault)
                    .boxed(),
            ));
            refreshes.push((
                "pending deposits",
                self.refresh_pending_deposits(deposits).boxed(),
            ));
            refreshes.push((
                "yield provider data",
                self.refresh_yield_provider_data(contracts.vault, data)
                    .boxed(),
            ));
            refreshes.push((
                "lido lst liability",
                self.refresh_lido_lst_liability(contracts).boxed(),
            ));
        }

        let (labels, futures): (Vec<_>, Vec<_>) = refreshes.into_iter().unzip();
        let results = join_all(futures).await;

        for (gauge, result) in labels.into_iter().zip(results) {
            if let Err(error) = result {
                error!(gauge, %error, "Failed to update gauge metric");
            }
        }
    }

    /// Exports -1 when either beacon node cannot report its epoch.
    async fn refresh_beacon_chain_epoch_drift(&self, reference: &dyn ValidatorDataClient) {
        let (primary_epoch, reference_epoch) = futures_util::join!(
            self.sources.validators.current_epoch(),
            reference.current_epoch(),
        );
        let primary_epoch = primary_epoch
            .inspect_err(|error| {
                warn!(%error, "Failed to fetch primary beacon epoch for drift check");
            })
            .ok();
        let reference_epoch = reference_epoch
            .inspect_err(|error| {
                warn!(%error, "Failed to fetch reference beacon epoch for drift check");
            })
            .ok();

        let drift = primary_epoch
            .zip(reference_epoch)
            .map(|(primary, reference)| primary.abs_diff(reference));
        match drift {
            Some(drift) => {
                info!(?primary_epoch, ?reference_epoch, drift, "Beacon chain epoch drift check");
            }
            None => {
                warn!(?primary_epoch, ?reference_epoch, "Beacon chain epoch drift unknown");
            }
        }

        self.metrics.set_beacon_chain_epoch_drift(drift);
    }

    async fn refresh_total_pending_partial_withdrawals(
        &self,
        validators: Option<&[ValidatorBalance]>,
        pending: Option<&[PendingPartialWithdrawal]>,
    ) -> Result<(), GaugeError> {
        let validators = validators.ok_or(GaugeError::MissingInput("active validators"))?;
        let pending = pending.ok_or(GaugeError::MissingInput("pending partial withdrawals"))?;

        let total_wei = total_pending_partial_withdrawals_wei(
            &join_validators_with_pending_withdrawals(validators, pending),
        );
        self.metrics
            .set_last_total_pending_partial_withdrawals_gwei(wei_to_gwei(total_wei));
        Ok(())
    }

    async fn refresh_pending_partial_withdrawals_queue(
        &self,
        validators: Option<&[ValidatorBalance]>,
        pending: Option<&[PendingPartialWithdrawal]>,
    ) -> Result<(), GaugeError> {
        let validators = validators.ok_or(GaugeError::MissingInput("active validators"))?;
        let pending = pending.ok_or(GaugeError::MissingInput("pending partial withdrawals"))?;

        for withdrawal in aggregate_pending_withdrawals(validators, pending) {
            self.metrics.set_pending_partial_withdrawal_queue_amount_gwei(
                &withdrawal.public_key,
                withdrawal.withdrawable_epoch,
                withdrawal.amount_gwei as f64,
            );
        }
        Ok(())
    }

    async fn refresh_total_validator_balance(
        &self,
        validators: Option<&[ValidatorBalance]>,
    ) -> Result<(), GaugeError> {
        let validators = validators.ok_or(GaugeError::MissingInput("active validators"))?;

        self.metrics
            .set_last_total_validator_balance_gwei(total_validator_balance_gwei(validators) as f64);
        Ok(())
    }

    async fn refresh_validator_staked_amount(
        &self,
        validators: Option<&[ValidatorBalance]>,
    ) -> Result<(), GaugeError> {
        let validators = validators.ok_or(GaugeError::MissingInput("active validators"))?;

        for validator in validators {
            self.metrics.set_validator_staked_amount_gwei(
                &validator.public_key,
                validator.balance_gwei as f64,
            );
        }
        Ok(())
    }

    async fn refresh_pending_exit_queue(
        &self,
        exiting: Option<&[ExitingValidator]>,
    ) -> Result<(), GaugeError> {
        let exiting = exiting.ok_or(GaugeError::MissingInput("exiting validators"))?;

        for validator in exiting {
            self.metrics.set_pending_exit_queue_amount_gwei(
                &validator.public_key,
                validator.exit_epoch,
                validator.balance_gwei as f64,
                validator.slashed,
            );
        }
        Ok(())
    }

    async fn refresh_total_pending_exit(
        &self,
        exiting: Option<&[ExitingValidator]>,
    ) -> Result<(), GaugeError> {
        let exiting = exiting.ok_or(GaugeError::MissingInput("exiting validators"))?;

        self.metrics
            .set_last_total_pending_exit_gwei(total_exiting_balance_gwei(exiting) as f64);
        Ok(())
    }

    async fn refresh_pending_full_withdrawal_queue(
        &self,
        exited: Option<&[ExitedValidator]>,
    ) -> Result<(), GaugeError> {
        let exited = exited.ok_or(GaugeError::MissingInput("exited validators"))?;

        for validator in exited {
            self.metrics.set_pending_full_withdrawal_queue_amount_gwei(
                &validator.public_key,
                validator.withdrawable_epoch,
                validator.balance_gwei as f64,
                validator.slashed,
            );
        }
        Ok(())
    }

    async fn refresh_total_pending_full_withdrawal(
        &self,
        exited: Option<&[ExitedValidator]>,
    ) -> Result<(), GaugeError> {
        let exited = exited.ok_or(GaugeError::MissingInput("exited validators"))?;

        self.metrics
            .set_last_total_pending_full_withdrawal_gwei(total_exited_balance_gwei(exited) as f64);
        Ok(())
    }

    async fn refresh_last_vault_report_timestamp(&self, vault: Address) -> Result<(), GaugeError> {
        let timestamp = self.sources.vault_hub.latest_report_timestamp(vault).await?;
        self.metrics.set_last_vault_report_timestamp(vault, timestamp);
        Ok(())
    }

    /// Per-deposit queue entries and their total, both limited to deposits
    /// targeting the vault.
    async fn refresh_pending_deposits(
        &self,
        deposits: Option<Vec<PendingDeposit>>,
    ) -> Result<(), GaugeError> {
        let deposits = deposits.ok_or(GaugeError::MissingInput("pending deposits"))?;

        let mut total_gwei = 0u64;
        for deposit in &deposits {
            self.metrics.set_pending_deposit_queue_amount_gwei(
                &deposit.public_key,
                deposit.slot,
                deposit.amount_gwei as f64,
            );
            total_gwei = total_gwei.saturating_add(deposit.amount_gwei);
        }
        self.metrics.set_last_total_pending_deposit_gwei(total_gwei as f64);
        Ok(())
    }

    async fn refresh_yield_provider_data(
        &self,
        vault: Address,
        data: &YieldProviderData,
    ) -> Result<(), GaugeError> {
        self.metrics
            .set_yield_reported_cumulative(vault, wei_to_gwei(data.yield_reported_cumulative));
        self.metrics
            .set_lst_liability_principal_gwei(vault, wei_to_gwei(data.lst_liability_principal));
        self.metrics.set_last_reported_negative_yield(
            vault,
            wei_to_gwei(data.last_reported_negative_yield),
        );
        Ok(())
    }

    async fn refresh_lido_lst_liability(
        &self,
        contracts: ProviderContracts,
    ) -> Result<(), GaugeError> {
        let liability = self
            .sources
            .steth
            .lst_liability(contracts.dashboard)
            .await?;
        self.metrics
            .set_lido_lst_liability_gwei(contracts.vault, wei_to_gwei(liability));
        Ok(())
    }

    /// Polls every `poll_interval` until [`stop`](Self::stop). A second call
    /// while running returns immediately.
    pub async fn start(&self) {
        let Some(_active) = self.operation_loop.try_begin() else {
            debug!("Gauge metrics poller already running");
            return;
        };

        info!(interval = ?self.poll_interval, "Starting gauge metrics poller");
        while self.operation_loop.is_running() {
            self.poll().await;
            self.operation_loop.pause(self.poll_interval).await;
        }
        info!("Gauge metrics poller stopped");
    }

    pub fn stop(&self) {
        if self.operation_loop.stop() {
            info!("Stopping gauge metrics poller");
        }
    }
}
