//! Shared test fixtures: a wallet over a mocked RPC transport and
//! receipt builders for decoding tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use alloy::hex;
use alloy::primitives::{Address, B256, Bytes, LogData, U256};
use alloy::providers::mock::Asserter;
use alloy::providers::{ProviderBuilder, RootProvider};
use alloy::rpc::types::TransactionReceipt;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use serde_json::json;

use native_yield_evm::{Evm, EvmError, Wallet};

pub(crate) const SIGNER: Address = Address::repeat_byte(0x5e);

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SentTransaction {
    pub(crate) contract: Address,
    pub(crate) calldata: Bytes,
    pub(crate) value: U256,
    pub(crate) note: String,
}

/// Wallet whose reads go to an [`Asserter`]-backed provider and whose
/// sends are recorded and answered with an empty successful receipt.
pub(crate) struct MockedWallet {
    provider: RootProvider,
    sent: Mutex<Vec<SentTransaction>>,
    fail_sends: AtomicBool,
}

impl MockedWallet {
    pub(crate) fn new(asserter: Asserter) -> Self {
        Self {
            provider: ProviderBuilder::new()
                .disable_recommended_fillers()
                .connect_mocked_client(asserter),
            sent: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
        }
    }

    pub(crate) fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<SentTransaction> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Evm for MockedWallet {
    type Provider = RootProvider;

    fn provider(&self) -> &RootProvider {
        &self.provider
    }
}

#[async_trait]
impl Wallet for MockedWallet {
    fn address(&self) -> Address {
        SIGNER
    }

    async fn send(
        &self,
        contract: Address,
        calldata: Bytes,
        value: U256,
        note: &str,
    ) -> Result<TransactionReceipt, EvmError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(EvmError::Reverted {
                tx_hash: B256::repeat_byte(0xee),
            });
        }

        self.sent.lock().unwrap().push(SentTransaction {
            contract,
            calldata,
            value,
            note: note.to_string(),
        });

        Ok(receipt_with_logs(&[]))
    }
}

fn receipt_log_json(address: Address, log_index: u64, data: &LogData) -> serde_json::Value {
    let topics: Vec<String> = data.topics().iter().map(hex::encode_prefixed).collect();
    json!({
        "address": hex::encode_prefixed(address),
        "topics": topics,
        "data": hex::encode_prefixed(&data.data),
        "blockHash": "0x1234567890123456789012345678901234567890123456789012345678901234",
        "blockNumber": "0x1",
        "transactionHash": "0xbeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee",
        "transactionIndex": "0x1",
        "logIndex": format!("0x{log_index:x}"),
        "removed": false
    })
}

/// Successful receipt carrying `logs`, each emitted by its paired address.
pub(crate) fn receipt_with_logs(logs: &[(Address, LogData)]) -> TransactionReceipt {
    let logs: Vec<serde_json::Value> = logs
        .iter()
        .enumerate()
        .map(|(index, (address, data))| receipt_log_json(*address, index as u64, data))
        .collect();

    serde_json::from_value(json!({
        "transactionHash": "0xbeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee",
        "transactionIndex": "0x1",
        "blockHash": "0x1234567890123456789012345678901234567890123456789012345678901234",
        "blockNumber": "0x1",
        "from": hex::encode_prefixed(SIGNER),
        "to": "0x5678901234567890123456789012345678901234",
        "gasUsed": "0x5208",
        "effectiveGasPrice": "0x77359400",
        "cumulativeGasUsed": "0x5208",
        "status": "0x1",
        "type": "0x2",
        "logsBloom": format!("0x{}", "0".repeat(512)),
        "logs": logs
    }))
    .unwrap()
}

/// Receipt with a single event emitted by `address`.
pub(crate) fn receipt_with_event<E: SolEvent>(address: Address, event: &E) -> TransactionReceipt {
    receipt_with_logs(&[(address, event.encode_log_data())])
}
