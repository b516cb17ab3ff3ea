//! Configuration loading: a plaintext config TOML and a secrets TOML,
//! combined into a validated runtime [`Ctx`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use clap::Parser;
use serde::Deserialize;
use tracing::Level;
use url::Url;

use crate::quota::BASIS_POINTS_DENOMINATOR;
use crate::validators::BlsPublicKey;

#[derive(Parser, Debug)]
pub struct Env {
    /// Path to plaintext TOML configuration file
    #[clap(long, env = "NATIVE_YIELD_CONFIG")]
    pub config: PathBuf,
    /// Path to TOML secrets file
    #[clap(long, env = "NATIVE_YIELD_SECRETS")]
    pub secrets: PathBuf,
}

/// Non-secret settings deserialized from the plaintext config TOML.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Config {
    log_level: Option<LogLevel>,
    metrics_port: Option<u16>,
    contracts: ContractsConfig,
    timing: TimingConfig,
    rebalance: RebalanceConfig,
    reporting: ReportingConfig,
    validators: ValidatorsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContractsConfig {
    pub yield_manager: Address,
    pub lazy_oracle: Address,
    pub vault_hub: Address,
    pub steth: Address,
    pub linea_rollup: Address,
    pub lido_yield_provider: Address,
    pub l2_yield_recipient: Address,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TimingConfig {
    max_inaction_ms: u64,
    contract_read_retry_time_ms: u64,
    gauge_metrics_poll_interval_ms: u64,
    trigger_poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RebalanceConfig {
    pub tolerance_amount_wei: U256,
    pub min_withdrawal_threshold_eth: u64,
    pub max_validator_withdrawal_requests_per_transaction: usize,
    pub staking_rebalance_quota_bps: u32,
    pub staking_rebalance_quota_window_size_in_cycles: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportingConfig {
    pub should_submit_vault_report: bool,
    pub should_report_yield: bool,
    pub is_unpause_staking_enabled: bool,
    pub min_negative_yield_diff_to_report_yield_wei: U256,
    pub cycles_per_yield_report: u64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ValidatorsConfig {
    public_keys: Vec<BlsPublicKey>,
}

/// Secret credentials deserialized from the secrets TOML.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Secrets {
    rpc_url: Url,
    beacon_node_url: Url,
    /// Second beacon node used only to measure epoch drift of the first.
    reference_beacon_node_url: Option<Url>,
    /// Gateway root, without the `ipfs/` segment. Reports are fetched from
    /// `<ipfs_base_url>/ipfs/<cid>`.
    ipfs_base_url: Url,
    signer_private_key: B256,
}

const DEFAULT_METRICS_PORT: u16 = 3000;
const DEFAULT_TRIGGER_POLL_INTERVAL_MS: u64 = 12_000;

/// Intervals driving the control loop and the gauge poller.
#[derive(Debug, Clone)]
pub struct Timing {
    pub max_inaction: Duration,
    pub contract_read_retry_time: Duration,
    pub gauge_metrics_poll_interval: Duration,
    pub trigger_poll_interval: Duration,
}

/// Runtime configuration assembled from the config and secrets files.
#[derive(Clone)]
pub struct Ctx {
    pub log_level: LogLevel,
    pub metrics_port: u16,
    pub contracts: ContractsConfig,
    pub timing: Timing,
    pub rebalance: RebalanceConfig,
    pub reporting: ReportingConfig,
    pub validator_public_keys: Vec<BlsPublicKey>,
    pub(crate) rpc_url: Url,
    pub(crate) beacon_node_url: Url,
    pub(crate) reference_beacon_node_url: Option<Url>,
    pub(crate) ipfs_base_url: Url,
    pub(crate) signer_private_key: B256,
}

impl std::fmt::Debug for Ctx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ctx")
            .field("log_level", &self.log_level)
            .field("metrics_port", &self.metrics_port)
            .field("contracts", &self.contracts)
            .field("timing", &self.timing)
            .field("rebalance", &self.rebalance)
            .field("reporting", &self.reporting)
            .field("validator_public_keys", &self.validator_public_keys.len())
            .field("rpc_url", &"[REDACTED]")
            .field("beacon_node_url", &"[REDACTED]")
            .field(
                "reference_beacon_node_url",
                &self.reference_beacon_node_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("ipfs_base_url", &"[REDACTED]")
            .field("signer_private_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML")]
    Toml(#[from] toml::de::Error),
    #[error("staking_rebalance_quota_bps must be at most 10000, got {0}")]
    QuotaBasisPointsOutOfRange(u32),
    #[error("cycles_per_yield_report must be at least 1")]
    ZeroYieldReportCadence,
    #[error("max_validator_withdrawal_requests_per_transaction must be at least 1")]
    ZeroWithdrawalRequestsPerTransaction,
}

impl Ctx {
    pub fn load_files(config: &Path, secrets: &Path) -> Result<Self, ConfigError> {
        let config_toml = std::fs::read_to_string(config)?;
        let secrets_toml = std::fs::read_to_string(secrets)?;
        Self::from_toml(&config_toml, &secrets_toml)
    }

    pub fn from_toml(config_toml: &str, secrets_toml: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(config_toml)?;
        let secrets: Secrets = toml::from_str(secrets_toml)?;

        validate(&config)?;

        let timing = Timing {
            max_inaction: Duration::from_millis(config.timing.max_inaction_ms),
            contract_read_retry_time: Duration::from_millis(
                config.timing.contract_read_retry_time_ms,
            ),
            gauge_metrics_poll_interval: Duration::from_millis(
                config.timing.gauge_metrics_poll_interval_ms,
            ),
            trigger_poll_interval: Duration::from_millis(
                config
                    .timing
                    .trigger_poll_interval_ms
                    .unwrap_or(DEFAULT_TRIGGER_POLL_INTERVAL_MS),
            ),
        };

        Ok(Self {
            log_level: config.log_level.unwrap_or(LogLevel::Info),
            metrics_port: config.metrics_port.unwrap_or(DEFAULT_METRICS_PORT),
            contracts: config.contracts,
            timing,
            rebalance: config.rebalance,
            reporting: config.reporting,
            validator_public_keys: config.validators.public_keys,
            rpc_url: secrets.rpc_url,
            beacon_node_url: secrets.beacon_node_url,
            reference_beacon_node_url: secrets.reference_beacon_node_url,
            ipfs_base_url: secrets.ipfs_base_url,
            signer_private_key: secrets.signer_private_key,
        })
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    let quota_bps = config.rebalance.staking_rebalance_quota_bps;
    if quota_bps > BASIS_POINTS_DENOMINATOR {
        return Err(ConfigError::QuotaBasisPointsOutOfRange(quota_bps));
    }

    if config.reporting.cycles_per_yield_report == 0 {
        return Err(ConfigError::ZeroYieldReportCadence);
    }

    if config
        .rebalance
        .max_validator_withdrawal_requests_per_transaction
        == 0
    {
        return Err(ConfigError::ZeroWithdrawalRequestsPerTransaction);
    }

    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(log_level: LogLevel) -> Self {
        (&log_level).into()
    }
}

impl From<&LogLevel> for Level {
    fn from(log_level: &LogLevel) -> Self {
        match log_level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

pub fn setup_tracing(log_level: &LogLevel) {
    let level: Level = log_level.into();
    let default_filter = format!("native_yield_automation={level},native_yield_evm={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}
