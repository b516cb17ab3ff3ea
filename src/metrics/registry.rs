//! Prometheus-backed [`AutomationMetrics`] on a dedicated registry.

use alloy::primitives::Address;
use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

use super::{AutomationMetrics, ExecutionStatus, TriggerKind};
use crate::ledger::RebalanceDirection;
use crate::mode::OperationMode;
use crate::validators::BlsPublicKey;

const PREFIX: &str = "native_yield";

/// Buckets reach 20 minutes so long ossification waits stay visible.
const DURATION_BUCKETS: [f64; 11] = [
    1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 180.0, 300.0, 600.0, 900.0, 1200.0,
];

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("metrics output is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub struct PrometheusMetrics {
    registry: Registry,
    rebalance_amount_total: CounterVec,
    validator_partial_unstake_amount_total: CounterVec,
    validator_exit_total: CounterVec,
    lido_vault_accounting_report_submitted_total: CounterVec,
    report_yield_total: CounterVec,
    last_peeked_negative_yield_report: GaugeVec,
    last_peeked_positive_yield_report: GaugeVec,
    last_settleable_lido_fees: GaugeVec,
    last_vault_report_timestamp: GaugeVec,
    yield_reported_cumulative: GaugeVec,
    lst_liability_principal_gwei: GaugeVec,
    last_reported_negative_yield: GaugeVec,
    last_total_pending_partial_withdrawals_gwei: Gauge,
    last_total_validator_balance_gwei: Gauge,
    validator_staked_amount_gwei: GaugeVec,
    pending_partial_withdrawal_queue_amount_gwei: GaugeVec,
    pending_exit_queue_amount_gwei: GaugeVec,
    last_total_pending_exit_gwei: Gauge,
    pending_full_withdrawal_queue_amount_gwei: GaugeVec,
    last_total_pending_full_withdrawal_gwei: Gauge,
    pending_deposit_queue_amount_gwei: GaugeVec,
    last_total_pending_deposit_gwei: Gauge,
    lido_lst_liability_gwei: GaugeVec,
    beacon_chain_epoch_drift: Gauge,
    node_operator_fees_paid_total: CounterVec,
    liabilities_paid_total: CounterVec,
    lido_fees_paid_total: CounterVec,
    operation_mode_execution_total: CounterVec,
    operation_mode_trigger_total: CounterVec,
    operation_mode_execution_duration_seconds: HistogramVec,
    staking_deposit_quota_exceeded_total: CounterVec,
    actual_rebalance_requirement_gwei: GaugeVec,
    reported_rebalance_requirement_gwei: GaugeVec,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        Ok(Self {
            rebalance_amount_total: counter_vec(
                &registry,
                "rebalance_amount_total",
                "Total gwei rebalanced between the L1 message service and the yield provider",
                &["direction"],
            )?,
            validator_partial_unstake_amount_total: counter_vec(
                &registry,
                "validator_partial_unstake_amount_total",
                "Total gwei requested for partial withdrawal per validator",
                &["validator_pubkey"],
            )?,
            validator_exit_total: counter_vec(
                &registry,
                "validator_exit_total",
                "Validator full exits requested by the automation",
                &["validator_pubkey"],
            )?,
            lido_vault_accounting_report_submitted_total: counter_vec(
                &registry,
                "lido_vault_accounting_report_submitted_total",
                "Vault accounting reports submitted",
                &["vault_address"],
            )?,
            report_yield_total: counter_vec(
                &registry,
                "report_yield_total",
                "Successful yield reports",
                &["vault_address"],
            )?,
            last_peeked_negative_yield_report: gauge_vec(
                &registry,
                "last_peeked_negative_yield_report",
                "Outstanding negative yield from the latest simulated report, gwei",
                &["vault_address"],
            )?,
            last_peeked_positive_yield_report: gauge_vec(
                &registry,
                "last_peeked_positive_yield_report",
                "Yield amount from the latest simulated report, gwei",
                &["vault_address"],
            )?,
            last_settleable_lido_fees: gauge_vec(
                &registry,
                "last_settleable_lido_fees",
                "Lido fees currently settleable by the vault, gwei",
                &["vault_address"],
            )?,
            last_vault_report_timestamp: gauge_vec(
                &registry,
                "last_vault_report_timestamp",
                "Timestamp of the latest vault report applied on the vault hub",
                &["vault_address"],
            )?,
            yield_reported_cumulative: gauge_vec(
                &registry,
                "yield_reported_cumulative",
                "Cumulative yield reported by the yield provider, gwei",
                &["vault_address"],
            )?,
            lst_liability_principal_gwei: gauge_vec(
                &registry,
                "lst_liability_principal_gwei",
                "LST liability principal held by the yield provider, gwei",
                &["vault_address"],
            )?,
            last_reported_negative_yield: gauge_vec(
                &registry,
                "last_reported_negative_yield",
                "Negative yield recorded at the last yield report, gwei",
                &["vault_address"],
            )?,
            last_total_pending_partial_withdrawals_gwei: gauge(
                &registry,
                "last_total_pending_partial_withdrawals_gwei",
                "Pending partial withdrawals across managed validators, gwei",
            )?,
            last_total_validator_balance_gwei: gauge(
                &registry,
                "last_total_validator_balance_gwei",
                "Balance across managed validators, gwei",
            )?,
            validator_staked_amount_gwei: gauge_vec(
                &registry,
                "validator_staked_amount_gwei",
                "Balance staked in a managed validator, gwei",
                &["pubkey"],
            )?,
            pending_partial_withdrawal_queue_amount_gwei: gauge_vec(
                &registry,
                "pending_partial_withdrawal_queue_amount_gwei",
                "Queued partial withdrawals per validator and withdrawable epoch, gwei",
                &["pubkey", "withdrawable_epoch"],
            )?,
            pending_exit_queue_amount_gwei: gauge_vec(
                &registry,
                "pending_exit_queue_amount_gwei",
                "Balance of a validator waiting in the exit queue, gwei",
                &["pubkey", "exit_epoch", "slashed"],
            )?,
            last_total_pending_exit_gwei: gauge(
                &registry,
                "last_total_pending_exit_gwei",
                "Balance across exiting validators, gwei",
            )?,
            pending_full_withdrawal_queue_amount_gwei: gauge_vec(
                &registry,
                "pending_full_withdrawal_queue_amount_gwei",
                "Balance of an exited validator awaiting its sweep, gwei",
                &["pubkey", "withdrawable_epoch", "slashed"],
            )?,
            last_total_pending_full_withdrawal_gwei: gauge(
                &registry,
                "last_total_pending_full_withdrawal_gwei",
                "Balance across exited validators awaiting their sweep, gwei",
            )?,
            pending_deposit_queue_amount_gwei: gauge_vec(
                &registry,
                "pending_deposit_queue_amount_gwei",
                "Queued deposit to the vault's withdrawal credentials, gwei",
                &["pubkey", "slot"],
            )?,
            last_total_pending_deposit_gwei: gauge(
                &registry,
                "last_total_pending_deposit_gwei",
                "Queued deposits to the vault's withdrawal credentials, gwei",
            )?,
            lido_lst_liability_gwei: gauge_vec(
                &registry,
                "lido_lst_liability_gwei",
                "Ether backing the stETH minted against the vault, gwei",
                &["vault_address"],
            )?,
            beacon_chain_epoch_drift: gauge(
                &registry,
                "beacon_chain_epoch_drift",
                "Epoch difference between primary and reference beacon nodes, -1 when unknown",
            )?,
            node_operator_fees_paid_total: counter_vec(
                &registry,
                "node_operator_fees_paid_total",
                "Node operator fees paid out of the vault, gwei",
                &["vault_address"],
            )?,
            liabilities_paid_total: counter_vec(
                &registry,
                "liabilities_paid_total",
                "Liabilities settled by rebalancing the vault, gwei",
                &["vault_address"],
            )?,
            lido_fees_paid_total: counter_vec(
                &registry,
                "lido_fees_paid_total",
                "Lido protocol fees settled by the vault, gwei",
                &["vault_address"],
            )?,
            operation_mode_execution_total: counter_vec(
                &registry,
                "operation_mode_execution_total",
                "Control loop executions per operation mode",
                &["mode", "status"],
            )?,
            operation_mode_trigger_total: counter_vec(
                &registry,
                "operation_mode_trigger_total",
                "What started each processor cycle",
                &["mode", "trigger"],
            )?,
            operation_mode_execution_duration_seconds: {
                let histogram = HistogramVec::new(
                    HistogramOpts::new(
                        format!("{PREFIX}_operation_mode_execution_duration_seconds"),
                        "Processor cycle duration after its trigger fired",
                    )
                    .buckets(DURATION_BUCKETS.to_vec()),
                    &["mode"],
                )?;
                registry.register(Box::new(histogram.clone()))?;
                histogram
            },
            staking_deposit_quota_exceeded_total: counter_vec(
                &registry,
                "staking_deposit_quota_exceeded_total",
                "Stake rebalances clipped by the rolling quota",
                &["vault_address"],
            )?,
            actual_rebalance_requirement_gwei: gauge_vec(
                &registry,
                "actual_rebalance_requirement_gwei",
                "Rebalance requirement before tolerance band and quota, gwei",
                &["vault_address", "staking_direction"],
            )?,
            reported_rebalance_requirement_gwei: gauge_vec(
                &registry,
                "reported_rebalance_requirement_gwei",
                "Rebalance requirement acted upon, gwei",
                &["vault_address", "staking_direction"],
            )?,
            registry,
        })
    }

    /// Renders every registered metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

fn counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<CounterVec, prometheus::Error> {
    let counter = CounterVec::new(Opts::new(format!("{PREFIX}_{name}"), help), labels)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn gauge_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<GaugeVec, prometheus::Error> {
    let gauge = GaugeVec::new(Opts::new(format!("{PREFIX}_{name}"), help), labels)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<Gauge, prometheus::Error> {
    let gauge = Gauge::new(format!("{PREFIX}_{name}"), help)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn accepts(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

fn add(counter: &CounterVec, labels: &[&str], value: f64) {
    if accepts(value) {
        counter.with_label_values(labels).inc_by(value);
    }
}

fn set(gauge: &GaugeVec, labels: &[&str], value: f64) {
    if accepts(value) {
        gauge.with_label_values(labels).set(value);
    }
}

impl AutomationMetrics for PrometheusMetrics {
    fn record_rebalance(&self, direction: RebalanceDirection, amount_gwei: f64) {
        add(
            &self.rebalance_amount_total,
            &[direction.as_label()],
            amount_gwei,
        );
    }

    fn add_validator_partial_unstake_amount(&self, pubkey: &BlsPublicKey, amount_gwei: f64) {
        if amount_gwei <= 0.0 {
            return;
        }

        add(
            &self.validator_partial_unstake_amount_total,
            &[pubkey.to_string().as_str()],
            amount_gwei,
        );
    }

    fn increment_validator_exit(&self, pubkey: &BlsPublicKey) {
        self.validator_exit_total
            .with_label_values(&[pubkey.to_string().as_str()])
            .inc();
    }

    fn increment_lido_vault_accounting_report(&self, vault: Address) {
        self.lido_vault_accounting_report_submitted_total
            .with_label_values(&[vault.to_string().as_str()])
            .inc();
    }

    fn increment_report_yield(&self, vault: Address) {
        self.report_yield_total
            .with_label_values(&[vault.to_string().as_str()])
            .inc();
    }

    fn set_last_peeked_negative_yield_report(&self, vault: Address, amount_gwei: f64) {
        set(
            &self.last_peeked_negative_yield_report,
            &[vault.to_string().as_str()],
            amount_gwei,
        );
    }

    fn set_last_peeked_positive_yield_report(&self, vault: Address, amount_gwei: f64) {
        set(
            &self.last_peeked_positive_yield_report,
            &[vault.to_string().as_str()],
            amount_gwei,
        );
    }

    fn set_last_settleable_lido_fees(&self, vault: Address, amount_gwei: f64) {
        set(
            &self.last_settleable_lido_fees,
            &[vault.to_string().as_str()],
            amount_gwei,
        );
    }

    fn set_last_vault_report_timestamp(&self, vault: Address, timestamp: u64) {
        set(
            &self.last_vault_report_timestamp,
            &[vault.to_string().as_str()],
            timestamp as f64,
        );
    }

    fn set_yield_reported_cumulative(&self, vault: Address, amount_gwei: f64) {
        set(
            &self.yield_reported_cumulative,
            &[vault.to_string().as_str()],
            amount_gwei,
        );
    }

    fn set_lst_liability_principal_gwei(&self, vault: Address, amount_gwei: f64) {
        set(
            &self.lst_liability_principal_gwei,
            &[vault.to_string().as_str()],
            amount_gwei,
        );
    }

    fn set_last_reported_negative_yield(&self, vault: Address, amount_gwei: f64) {
        set(
            &self.last_reported_negative_yield,
            &[vault.to_string().as_str()],
            amount_gwei,
        );
    }

    fn set_last_total_pending_partial_withdrawals_gwei(&self, amount_gwei: f64) {
        if accepts(amount_gwei) {
            self.last_total_pending_partial_withdrawals_gwei
                .set(amount_gwei);
        }
    }

    fn set_last_total_validator_balance_gwei(&self, amount_gwei: f64) {
        if accepts(amount_gwei) {
            self.last_total_validator_balance_gwei.set(amount_gwei);
        }
    }

    fn set_validator_staked_amount_gwei(&self, pubkey: &BlsPublicKey, amount_gwei: f64) {
        set(
            &self.validator_staked_amount_gwei,
            &[pubkey.to_string().as_str()],
            amount_gwei,
        );
    }

    fn set_pending_partial_withdrawal_queue_amount_gwei(
        &self,
        pubkey: &BlsPublicKey,
        withdrawable_epoch: u64,
        amount_gwei: f64,
    ) {
        set(
            &self.pending_partial_withdrawal_queue_amount_gwei,
            &[
                pubkey.to_string().as_str(),
                withdrawable_epoch.to_string().as_str(),
            ],
            amount_gwei,
        );
    }

    fn set_pending_exit_queue_amount_gwei(
        &self,
        pubkey: &BlsPublicKey,
        exit_epoch: u64,
        amount_gwei: f64,
        slashed: bool,
    ) {
        set(
            &self.pending_exit_queue_amount_gwei,
            &[
                pubkey.to_string().as_str(),
                exit_epoch.to_string().as_str(),
                if slashed { "true" } else { "false" },
            ],
            amount_gwei,
        );
    }

    fn set_last_total_pending_exit_gwei(&self, amount_gwei: f64) {
        if accepts(amount_gwei) {
            self.last_total_pending_exit_gwei.set(amount_gwei);
        }
    }

    fn set_pending_full_withdrawal_queue_amount_gwei(
        &self,
        pubkey: &BlsPublicKey,
        withdrawable_epoch: u64,
        amount_gwei: f64,
        slashed: bool,
    ) {
        set(
            &self.pending_full_withdrawal_queue_amount_gwei,
            &[
                pubkey.to_string().as_str(),
                withdrawable_epoch.to_string().as_str(),
                if slashed { "true" } else { "false" },
            ],
            amount_gwei,
        );
    }

    fn set_last_total_pending_full_withdrawal_gwei(&self, amount_gwei: f64) {
        if accepts(amount_gwei) {
            self.last_total_pending_full_withdrawal_gwei.set(amount_gwei);
        }
    }

    fn set_pending_deposit_queue_amount_gwei(&self, pubkey: &BlsPublicKey, slot: u64, amount_gwei: f64) {
        set(
            &self.pending_deposit_queue_amount_gwei,
            &[pubkey.to_string().as_str(), slot.to_string().as_str()],
            amount_gwei,
        );
    }

    fn set_last_total_pending_deposit_gwei(&self, amount_gwei: f64) {
        if accepts(amount_gwei) {
            self.last_total_pending_deposit_gwei.set(amount_gwei);
        }
    }

    fn set_lido_lst_liability_gwei(&self, vault: Address, amount_gwei: f64) {
        set(
            &self.lido_lst_liability_gwei,
            &[vault.to_string().as_str()],
            amount_gwei,
        );
    }

    fn set_beacon_chain_epoch_drift(&self, drift_epochs: Option<u64>) {
        let value = drift_epochs.map_or(-1.0, |drift| drift as f64);
        self.beacon_chain_epoch_drift.set(value);
    }

    fn add_node_operator_fees_paid(&self, vault: Address, amount_gwei: f64) {
        add(
            &self.node_operator_fees_paid_total,
            &[vault.to_string().as_str()],
            amount_gwei,
        );
    }

    fn add_liabilities_paid(&self, vault: Address, amount_gwei: f64) {
        add(
            &self.liabilities_paid_total,
            &[vault.to_string().as_str()],
            amount_gwei,
        );
    }

    fn add_lido_fees_paid(&self, vault: Address, amount_gwei: f64) {
        add(
            &self.lido_fees_paid_total,
            &[vault.to_string().as_str()],
            amount_gwei,
        );
    }

    fn increment_operation_mode_execution(&self, mode: OperationMode, status: ExecutionStatus) {
        self.operation_mode_execution_total
            .with_label_values(&[mode.as_label(), status.as_label()])
            .inc();
    }

    fn increment_operation_mode_trigger(&self, mode: OperationMode, trigger: TriggerKind) {
        self.operation_mode_trigger_total
            .with_label_values(&[mode.as_label(), trigger.as_label()])
            .inc();
    }

    fn record_operation_mode_duration(&self, mode: OperationMode, seconds: f64) {
        if accepts(seconds) {
            self.operation_mode_execution_duration_seconds
                .with_label_values(&[mode.as_label()])
                .observe(seconds);
        }
    }

    fn increment_staking_deposit_quota_exceeded(&self, vault: Address) {
        self.staking_deposit_quota_exceeded_total
            .with_label_values(&[vault.to_string().as_str()])
            .inc();
    }

    fn set_actual_rebalance_requirement(
        &self,
        vault: Address,
        amount_gwei: f64,
        direction: RebalanceDirection,
    ) {
        set(
            &self.actual_rebalance_requirement_gwei,
            &[vault.to_string().as_str(), direction.as_label()],
            amount_gwei,
        );
    }

    fn set_reported_rebalance_requirement(
        &self,
        vault: Address,
        amount_gwei: f64,
        direction: RebalanceDirection,
    ) {
        set(
            &self.reported_rebalance_requirement_gwei,
            &[vault.to_string().as_str(), direction.as_label()],
            amount_gwei,
        );
    }
}
