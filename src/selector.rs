//! Top-level control loop.
//!
//! Every iteration reads the two ossification flags, picks the matching
//! [`OperationMode`] and runs one cycle of its processor. Flag read failures
//! and failed cycles are logged and retried after a fixed delay; nothing
//! escapes the loop.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use tracing::{debug, error, info};

use crate::ledger::{LedgerError, YieldManager};
use crate::metrics::{AutomationMetrics, ExecutionStatus};
use crate::mode::OperationMode;
use crate::operation_loop::OperationLoop;
use crate::processors::OperationModeProcessor;

/// One processor per mode.
pub struct ModeProcessors {
    pub yield_reporting: Arc<dyn OperationModeProcessor>,
    pub ossification_pending: Arc<dyn OperationModeProcessor>,
    pub ossification_complete: Arc<dyn OperationModeProcessor>,
}

impl ModeProcessors {
    fn for_mode(&self, mode: OperationMode) -> &dyn OperationModeProcessor {
        match mode {
            OperationMode::YieldReporting => self.yield_reporting.as_ref(),
            OperationMode::OssificationPending => self.ossification_pending.as_ref(),
            OperationMode::OssificationComplete => self.ossification_complete.as_ref(),
        }
    }
}

pub struct OperationModeSelector {
    metrics: Arc<dyn AutomationMetrics>,
    yield_manager: Arc<dyn YieldManager>,
    yield_provider: Address,
    processors: ModeProcessors,
    contract_read_retry_time: Duration,
    operation_loop: OperationLoop,
}

impl OperationModeSelector {
    pub fn new(
        metrics: Arc<dyn AutomationMetrics>,
        yield_manager: Arc<dyn YieldManager>,
        yield_provider: Address,
        processors: ModeProcessors,
        contract_read_retry_time: Duration,
    ) -> Self {
        Self {
            metrics,
            yield_manager,
            yield_provider,
            processors,
            contract_read_retry_time,
            operation_loop: OperationLoop::new(),
        }
    }

    /// Runs cycles until [`stop`](Self::stop). Returns immediately if a loop
    /// is already running, including a stopped one still finishing its
    /// cycle.
    pub async fn start(&self) {
        let Some(_active) = self.operation_loop.try_begin() else {
            debug!("Operation mode selector already running");
            return;
        };

        info!(yield_provider = %self.yield_provider, "Starting operation mode selector");
        while self.operation_loop.is_running() {
            self.run_iteration().await;
        }
        info!("Operation mode selector stopped");
    }

    /// Lets the current cycle finish and prevents the next one.
    pub fn stop(&self) {
        if self.operation_loop.stop() {
            info!("Stopping operation mode selector");
        }
    }

    async fn read_mode(&self) -> Result<OperationMode, LedgerError> {
        let (ossification_initiated, ossified) = futures_util::try_join!(
            self.yield_manager
                .is_ossification_initiated(self.yield_provider),
            self.yield_manager.is_ossified(self.yield_provider),
        )?;

        Ok(OperationMode::select(ossification_initiated, ossified))
    }

    async fn run_iteration(&self) {
        let mode = match self.read_mode().await {
            Ok(mode) => mode,
            Err(error) => {
                error!(
                    %error,
                    retry_in = ?self.contract_read_retry_time,
                    "Failed to read ossification state, retrying"
                );
                self.operation_loop
                    .pause(self.contract_read_retry_time)
                    .await;
                return;
            }
        };

        info!(%mode, "Selected operation mode");
        match self.processors.for_mode(mode).process().await {
            Ok(()) => {
                self.metrics
                    .increment_operation_mode_execution(mode, ExecutionStatus::Success);
            }
            Err(error) => {
                self.metrics
                    .increment_operation_mode_execution(mode, ExecutionStatus::Failure);
                error!(
                    %mode,
                    %error,
                    retry_in = ?self.contract_read_retry_time,
                    "Operation mode cycle failed, retrying"
                );
                self.operation_loop
                    .pause(self.contract_read_retry_time)
                    .await;
            }
        }
    }
}
