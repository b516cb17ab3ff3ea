//! Lido vault accounting reports.
//!
//! The lazy oracle anchors each report by merkle root and IPFS CID. The
//! report itself is an OpenZeppelin `StandardMerkleTree` dump whose leaves
//! are `(vault, totalValue, cumulativeLidoFees, liabilityShares,
//! maxLiabilityShares, slashingReserve)`.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256, U256, keccak256};
use alloy::rpc::types::TransactionReceipt;
use alloy::sol_types::SolValue;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::{LazyOracle, LedgerError, LidoAccountingReports, VaultReportParams};

const LEAF_FIELDS: usize = 6;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MerkleTreeDump {
    tree: Vec<B256>,
    values: Vec<MerkleTreeValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MerkleTreeValue {
    value: Vec<String>,
    tree_index: usize,
}

fn parse_amount(raw: &str) -> Result<U256, LedgerError> {
    raw.parse()
        .map_err(|error| LedgerError::MalformedReport(format!("invalid amount {raw}: {error}")))
}

fn leaf_params(value: &[String], vault: Address) -> Result<VaultReportParams, LedgerError> {
    if value.len() != LEAF_FIELDS {
        return Err(LedgerError::MalformedReport(format!(
            "expected {LEAF_FIELDS} leaf fields, got {}",
            value.len()
        )));
    }

    Ok(VaultReportParams {
        vault,
        total_value: parse_amount(&value[1])?,
        cumulative_lido_fees: parse_amount(&value[2])?,
        liability_shares: parse_amount(&value[3])?,
        max_liability_shares: parse_amount(&value[4])?,
        slashing_reserve: parse_amount(&value[5])?,
        proof: Vec::new(),
    })
}

/// Double-hashed leaf, as `StandardMerkleTree` computes it.
pub(crate) fn leaf_hash(params: &VaultReportParams) -> B256 {
    let encoded = (
        params.vault,
        params.total_value,
        params.cumulative_lido_fees,
        params.liability_shares,
        params.max_liability_shares,
        params.slashing_reserve,
    )
        .abi_encode_params();
    keccak256(keccak256(encoded))
}

/// Sibling path from `index` up to the root of a flattened binary tree.
pub(crate) fn proof_path(tree: &[B256], mut index: usize) -> Result<Vec<B256>, LedgerError> {
    if index >= tree.len() {
        return Err(LedgerError::MalformedReport(format!(
            "tree index {index} out of bounds"
        )));
    }

    let mut proof = Vec::new();
    while index > 0 {
        let sibling = if index % 2 == 1 { index + 1 } else { index - 1 };
        let node = tree.get(sibling).ok_or_else(|| {
            LedgerError::MalformedReport(format!("missing sibling {sibling} of node {index}"))
        })?;
        proof.push(*node);
        index = (index - 1) / 2;
    }

    Ok(proof)
}

/// Fetches accounting reports from IPFS and submits them through the lazy
/// oracle.
pub struct LidoAccountingReportClient {
    client: Client,
    ipfs_base_url: Url,
    lazy_oracle: Arc<dyn LazyOracle>,
    retry: ExponentialBuilder,
}

impl LidoAccountingReportClient {
    /// `ipfs_base_url` is the gateway root; a trailing slash is added when
    /// missing so a path prefix such as `/gateway` survives the join.
    pub fn new(mut ipfs_base_url: Url, lazy_oracle: Arc<dyn LazyOracle>) -> Self {
        if !ipfs_base_url.path().ends_with('/') {
            let path = format!("{}/", ipfs_base_url.path());
            ipfs_base_url.set_path(&path);
        }

        Self {
            client: Client::new(),
            ipfs_base_url,
            lazy_oracle,
            retry: ExponentialBuilder::default()
                .with_max_times(3)
                .with_min_delay(Duration::from_millis(500))
                .with_max_delay(Duration::from_secs(10)),
        }
    }

    async fn get_once(&self, url: &Url) -> Result<Response, LedgerError> {
        let response = self.client.get(url.clone()).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            return Err(LedgerError::ReportApi { status, message });
        }

        Ok(response)
    }

    async fn fetch_tree(&self, cid: &str) -> Result<MerkleTreeDump, LedgerError> {
        let url = self.ipfs_base_url.join(&format!("ipfs/{cid}"))?;

        let response = (|| async { self.get_once(&url).await })
            .retry(self.retry)
            .when(is_retryable)
            .notify(|error, delay| warn!(%error, ?delay, %url, "Retrying accounting report fetch"))
            .await?;

        Ok(response.json().await?)
    }
}

fn is_retryable(error: &LedgerError) -> bool {
    match error {
        LedgerError::ReportApi { status, .. } => status.is_server_error(),
        LedgerError::Http(_) => true,
        _ => false,
    }
}

#[async_trait]
impl LidoAccountingReports for LidoAccountingReportClient {
    async fn latest_vault_report_params(
        &self,
        vault: Address,
    ) -> Result<VaultReportParams, LedgerError> {
        let report = self.lazy_oracle.latest_report_data().await?;
        let dump = self.fetch_tree(&report.report_cid).await?;

        if dump.tree.first() != Some(&report.tree_root) {
            return Err(LedgerError::MalformedReport(format!(
                "root of {} does not match oracle root {}",
                report.report_cid, report.tree_root
            )));
        }

        let entry = dump
            .values
            .iter()
            .find(|entry| {
                entry
                    .value
                    .first()
                    .and_then(|raw| raw.parse::<Address>().ok())
                    == Some(vault)
            })
            .ok_or_else(|| LedgerError::VaultNotInReport {
                vault,
                cid: report.report_cid.clone(),
            })?;

        let mut params = leaf_params(&entry.value, vault)?;
        if dump.tree.get(entry.tree_index) != Some(&leaf_hash(&params)) {
            return Err(LedgerError::MalformedReport(format!(
                "leaf of {vault} does not match tree node {}",
                entry.tree_index
            )));
        }
        params.proof = proof_path(&dump.tree, entry.tree_index)?;

        debug!(
            %vault,
            cid = %report.report_cid,
            ref_slot = report.ref_slot,
            proof_len = params.proof.len(),
            "Resolved vault report params"
        );
        Ok(params)
    }

    async fn is_simulate_submit_vault_report_ok(&self, params: &VaultReportParams) -> bool {
        self.lazy_oracle
            .simulate_update_vault_data(params)
            .await
            .inspect_err(|error| {
                warn!(vault = %params.vault, %error, "Vault report submission simulation failed");
            })
            .is_ok()
    }

    async fn submit_vault_report(
        &self,
        params: &VaultReportParams,
    ) -> Result<TransactionReceipt, LedgerError> {
        let receipt = self.lazy_oracle.update_vault_data(params).await?;

        info!(
            vault = %params.vault,
            tx_hash = %receipt.transaction_hash,
            "Submitted vault accounting report"
        );
        Ok(receipt)
    }
}
