//! Operating modes of the managed yield position.

use std::fmt;

/// Which processor owns the current control-loop cycle.
///
/// Recomputed every cycle from two ledger flags, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationMode {
    YieldReporting,
    OssificationPending,
    OssificationComplete,
}

impl OperationMode {
    /// Ossified wins over initiated, which wins over the steady state.
    pub fn select(ossification_initiated: bool, ossified: bool) -> Self {
        if ossified {
            Self::OssificationComplete
        } else if ossification_initiated {
            Self::OssificationPending
        } else {
            Self::YieldReporting
        }
    }

    pub const fn as_label(self) -> &'static str {
        match self {
            Self::YieldReporting => "YIELD_REPORTING_MODE",
            Self::OssificationPending => "OSSIFICATION_PENDING_MODE",
            Self::OssificationComplete => "OSSIFICATION_COMPLETE_MODE",
        }
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}
