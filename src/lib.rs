use std::sync::Arc;

use rocket::{Ignite, Rocket};
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tracing::{error, info, info_span, warn};

use native_yield_evm::EvmError;
use native_yield_evm::local::connect_http;

pub mod config;
mod gauge_poller;
pub mod ledger;
pub mod metrics;
pub mod mode;
mod operation_loop;
pub mod processors;
pub mod quota;
pub mod selector;
pub mod staking;
pub mod validators;

#[cfg(test)]
mod test_utils;

use crate::config::Ctx;
use crate::gauge_poller::{GaugeMetricsPoller, GaugeSources};
use crate::ledger::{
    LazyOracle, LazyOracleContract, LidoAccountingReportClient, LineaRollupYieldExtensionContract,
    RebalanceDirection, StethContract, VaultHubContract, YieldManager, YieldManagerContract,
};
use crate::metrics::{AutomationMetrics, MetricsError, OperationModeMetricsRecorder, PrometheusMetrics};
use crate::processors::{
    LedgerClients, OssificationCompleteProcessor, OssificationPendingProcessor,
    YieldReportingProcessor, YieldReportingSettings,
};
use crate::quota::RebalanceQuotaService;
use crate::selector::{ModeProcessors, OperationModeSelector};
use crate::staking::BeaconChainStakingClient;
use crate::validators::{BeaconNodeClient, ValidatorDataClient};

const REQUIRED_CONFIRMATIONS: u64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("failed to connect signing wallet: {0}")]
    Evm(#[from] EvmError),
    #[error("failed to build metrics registry: {0}")]
    Metrics(#[from] MetricsError),
}

/// Owns every long-running component of one deployment.
pub struct NativeYieldAutomationService {
    metrics_port: u16,
    metrics: Arc<PrometheusMetrics>,
    poller: Arc<GaugeMetricsPoller>,
    selector: Arc<OperationModeSelector>,
}

/// Handles of the tasks spawned by [`NativeYieldAutomationService::start`].
pub struct ServiceTasks {
    pub metrics_server: JoinHandle<Result<Rocket<Ignite>, rocket::Error>>,
    pub gauge_poller: JoinHandle<()>,
    pub selector: JoinHandle<()>,
}

impl NativeYieldAutomationService {
    pub fn new(ctx: &Ctx) -> Result<Self, ServiceError> {
        let wallet = Arc::new(connect_http(
            ctx.rpc_url.clone(),
            &ctx.signer_private_key,
            REQUIRED_CONFIRMATIONS,
        )?);

        let prometheus = Arc::new(PrometheusMetrics::new()?);
        let metrics: Arc<dyn AutomationMetrics> = prometheus.clone();
        let contracts = &ctx.contracts;
        let yield_provider = contracts.lido_yield_provider;

        let yield_manager: Arc<dyn YieldManager> = Arc::new(YieldManagerContract::new(
            wallet.clone(),
            contracts.yield_manager,
            ctx.rebalance.tolerance_amount_wei,
            ctx.rebalance.min_withdrawal_threshold_eth,
        ));
        let lazy_oracle: Arc<dyn LazyOracle> = Arc::new(LazyOracleContract::new(
            wallet.clone(),
            contracts.lazy_oracle,
            ctx.timing.trigger_poll_interval,
        ));
        let vault_hub = Arc::new(VaultHubContract::new(wallet.clone(), contracts.vault_hub));
        let steth = Arc::new(StethContract::new(wallet.clone(), contracts.steth));
        let ledger = LedgerClients {
            yield_manager: yield_manager.clone(),
            lazy_oracle: lazy_oracle.clone(),
            rollup: Arc::new(LineaRollupYieldExtensionContract::new(
                wallet,
                contracts.linea_rollup,
            )),
            vault_hub: vault_hub.clone(),
            accounting_reports: Arc::new(LidoAccountingReportClient::new(
                ctx.ipfs_base_url.clone(),
                lazy_oracle,
            )),
        };

        let validators: Arc<dyn ValidatorDataClient> = Arc::new(BeaconNodeClient::new(
            ctx.beacon_node_url.clone(),
            ctx.validator_public_keys.clone(),
        ));
        let reference_beacon_node = ctx.reference_beacon_node_url.as_ref().map(|url| {
            Arc::new(BeaconNodeClient::new(url.clone(), Vec::new())) as Arc<dyn ValidatorDataClient>
        });
        let recorder = Arc::new(OperationModeMetricsRecorder::new(
            metrics.clone(),
            contracts.yield_manager,
            contracts.vault_hub,
        ));
        let staking = Arc::new(BeaconChainStakingClient::new(
            metrics.clone(),
            validators.clone(),
            yield_manager.clone(),
            yield_provider,
            ctx.rebalance.max_validator_withdrawal_requests_per_transaction,
        ));
        let quota = Arc::new(RebalanceQuotaService::new(
            metrics.clone(),
            RebalanceDirection::Stake,
            ctx.rebalance.staking_rebalance_quota_window_size_in_cycles,
            ctx.rebalance.staking_rebalance_quota_bps,
            ctx.rebalance.tolerance_amount_wei,
        ));

        let max_inaction = ctx.timing.max_inaction;
        let settings = YieldReportingSettings {
            yield_provider,
            l2_yield_recipient: contracts.l2_yield_recipient,
            max_inaction,
            should_submit_vault_report: ctx.reporting.should_submit_vault_report,
            should_report_yield: ctx.reporting.should_report_yield,
            is_unpause_staking_enabled: ctx.reporting.is_unpause_staking_enabled,
            min_negative_yield_diff_to_report_yield: ctx
                .reporting
                .min_negative_yield_diff_to_report_yield_wei,
            min_withdrawal_threshold_eth: ctx.rebalance.min_withdrawal_threshold_eth,
            cycles_per_yield_report: ctx.reporting.cycles_per_yield_report,
        };

        let processors = ModeProcessors {
            yield_reporting: Arc::new(YieldReportingProcessor::new(
                metrics.clone(),
                recorder.clone(),
                ledger.clone(),
                staking.clone(),
                quota,
                settings,
            )),
            ossification_pending: Arc::new(OssificationPendingProcessor::new(
                metrics.clone(),
                recorder.clone(),
                ledger.clone(),
                staking.clone(),
                yield_provider,
                max_inaction,
            )),
            ossification_complete: Arc::new(OssificationCompleteProcessor::new(
                metrics.clone(),
                recorder,
                ledger,
                staking,
                yield_provider,
                max_inaction,
            )),
        };

        let selector = Arc::new(OperationModeSelector::new(
            metrics.clone(),
            yield_manager.clone(),
            yield_provider,
            processors,
            ctx.timing.contract_read_retry_time,
        ));
        let poller = Arc::new(GaugeMetricsPoller::new(
            metrics,
            GaugeSources {
                validators,
                reference_beacon_node,
                yield_manager,
                vault_hub,
                steth,
            },
            yield_provider,
            ctx.timing.gauge_metrics_poll_interval,
        ));

        info!(
            %yield_provider,
            yield_manager = %contracts.yield_manager,
            validators = ctx.validator_public_keys.len(),
            "Native yield automation service initialized"
        );

        Ok(Self {
            metrics_port: ctx.metrics_port,
            metrics: prometheus,
            poller,
            selector,
        })
    }

    /// Spawns the metrics server, the gauge poller and the operation mode
    /// selector.
    pub fn start(&self) -> ServiceTasks {
        info!(metrics_port = self.metrics_port, "Starting native yield automation service");

        let metrics_server =
            metrics::server::spawn_metrics_server(self.metrics_port, self.metrics.clone());

        let poller = self.poller.clone();
        let gauge_poller = tokio::spawn(async move { poller.start().await });

        let selector = self.selector.clone();
        let selector = tokio::spawn(async move { selector.start().await });

        ServiceTasks {
            metrics_server,
            gauge_poller,
            selector,
        }
    }

    /// Stops both loops after their in-flight cycles. Idempotent.
    pub fn stop(&self) {
        self.selector.stop();
        self.poller.stop();
    }
}

pub async fn launch(ctx: Ctx) -> anyhow::Result<()> {
    let launch_span = info_span!("launch");
    let _enter = launch_span.enter();

    let service = NativeYieldAutomationService::new(&ctx)?;
    let tasks = service.start();

    await_shutdown(&service, tasks).await;

    info!("Shutdown complete");
    Ok(())
}

async fn await_shutdown(service: &NativeYieldAutomationService, tasks: ServiceTasks) {
    let ServiceTasks {
        metrics_server,
        gauge_poller,
        mut selector,
    } = tasks;
    let server_abort = metrics_server.abort_handle();

    let selector = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, waiting for in-flight cycles...");
            service.stop();
            Some(selector)
        }
        result = metrics_server => {
            log_server_result(result);
            service.stop();
            Some(selector)
        }
        result = &mut selector => {
            log_loop_result("selector", result);
            service.stop();
            None
        }
    };

    abort_task("metrics server", &server_abort);
    wait_for_loops(selector, gauge_poller).await;
}

/// Waits for the stopped loops to finish their current cycle. A second
/// ctrl-c aborts them.
async fn wait_for_loops(selector: Option<JoinHandle<()>>, gauge_poller: JoinHandle<()>) {
    let mut aborts = vec![("gauge poller", gauge_poller.abort_handle())];
    if let Some(selector) = &selector {
        aborts.push(("selector", selector.abort_handle()));
    }

    let finished = async {
        if let Some(selector) = selector {
            log_loop_result("selector", selector.await);
        }
        log_loop_result("gauge poller", gauge_poller.await);
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            warn!("Received second shutdown signal, aborting in-flight cycles");
            for (name, handle) in &aborts {
                abort_task(name, handle);
            }
        }
        () = finished => {}
    }
}

fn abort_task(name: &str, handle: &AbortHandle) {
    info!("Aborting {name} task");
    handle.abort();
}

fn log_server_result(result: Result<Result<Rocket<Ignite>, rocket::Error>, JoinError>) {
    match result {
        Ok(Ok(_)) => info!("Metrics server completed successfully"),
        Ok(Err(e)) => error!("Metrics server failed: {e}"),
        Err(e) => error!("Metrics server task panicked: {e}"),
    }
}

fn log_loop_result(name: &str, result: Result<(), JoinError>) {
    match result {
        Ok(()) => info!("{name} task completed"),
        Err(e) if e.is_cancelled() => info!("{name} task cancelled"),
        Err(e) => error!("{name} task panicked: {e}"),
    }
}
