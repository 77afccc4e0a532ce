//! The interpreter's record of executed inputs.
//!
//! The interpreter compiles its n-th execution as unit `<prefix><n>`, no
//! matter whether a debugger saw the cell. Mapping cells to units therefore
//! goes through the execution history rather than through the order of
//! `dumpCell` requests.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Lookup of executed inputs by text and by execution count.
///
/// Execution counts start at 1, as the kernel reports them.
#[async_trait]
pub trait ExecutionHistory: Send + Sync {
    /// Execution counts under which exactly `code` ran, oldest first.
    async fn execution_counts(&self, code: &str) -> Vec<u64>;

    /// Text that ran under `execution_count`.
    async fn code_at(&self, execution_count: u64) -> Option<String>;

    /// Highest execution count seen so far.
    async fn latest(&self) -> Option<u64>;

    /// Notes that `code` ran under `execution_count`.
    ///
    /// Histories backed by the interpreter itself already know this.
    async fn record(&self, _execution_count: u64, _code: &str) {}
}

/// History filled in by the kernel over the control channel.
///
/// The kernel reports every execution with a `recordExecution` request,
/// replaying the inputs that ran before the debugger was started.
#[derive(Default)]
pub struct RecordedHistory {
    inputs: RwLock<BTreeMap<u64, String>>,
}

impl RecordedHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionHistory for RecordedHistory {
    async fn execution_counts(&self, code: &str) -> Vec<u64> {
        self.inputs
            .read()
            .await
            .iter()
            .filter(|(_, text)| text.as_str() == code)
            .map(|(&count, _)| count)
            .collect()
    }

    async fn code_at(&self, execution_count: u64) -> Option<String> {
        self.inputs.read().await.get(&execution_count).cloned()
    }

    async fn latest(&self) -> Option<u64> {
        self.inputs.read().await.keys().next_back().copied()
    }

    async fn record(&self, execution_count: u64, code: &str) {
        debug!("Input {} recorded ({} bytes)", execution_count, code.len());
        self.inputs
            .write()
            .await
            .insert(execution_count, code.to_string());
    }
}
