use super::history::ExecutionHistory;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Note,
}

/// Compiler message attached to a cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub line: i64,
    pub severity: Severity,
    pub message: String,
}

/// Outcome of compiling one cell: the unit name the engine knows the code
/// by, plus any non-fatal diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledUnit {
    pub unit_name: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// Turns cell text into a compiled unit.
///
/// Returns [`Error::Compile`] when the text does not compile; the cell is
/// then not registered.
#[async_trait]
pub trait CellCompiler: Send + Sync {
    async fn compile(&self, path: &str, code: &str) -> Result<CompiledUnit>;

    /// Text the interpreter compiled as `unit`, for units that no dumped cell
    /// owns (cells executed while nobody was debugging).
    async fn unit_code(&self, _unit: &str) -> Option<String> {
        None
    }

    /// The kernel ran `code` under `execution_count`.
    async fn record_execution(&self, _execution_count: u64, _code: &str) {}
}

/// Compiler for kernels whose interpreter compiles cells on its own.
///
/// The interpreter names the input it runs under execution count `c` as
/// `<prefix><c - 1 + first_index>`. A dumped cell that already ran takes the
/// unit of its latest run; one that has not run yet is expected to run next.
pub struct InputLineCompiler {
    prefix: String,
    first_index: u64,
    history: Arc<dyn ExecutionHistory>,
    next_predicted: AtomicU64,
}

impl InputLineCompiler {
    pub fn new(prefix: impl Into<String>, first_index: u64, history: Arc<dyn ExecutionHistory>) -> Self {
        Self {
            prefix: prefix.into(),
            first_index,
            history,
            next_predicted: AtomicU64::new(1),
        }
    }

    fn unit_name(&self, execution_count: u64) -> String {
        let index = execution_count.saturating_sub(1).saturating_add(self.first_index);
        format!("{}{}", self.prefix, index)
    }

    fn execution_count(&self, unit: &str) -> Option<u64> {
        let index: u64 = unit.strip_prefix(&self.prefix)?.parse().ok()?;
        index.checked_sub(self.first_index)?.checked_add(1)
    }

    /// Count a not yet executed cell will most likely run under.
    async fn predict_next(&self) -> u64 {
        let floor = self.history.latest().await.map_or(1, |latest| latest + 1);
        self.next_predicted.fetch_max(floor, Ordering::SeqCst);
        self.next_predicted.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl CellCompiler for InputLineCompiler {
    async fn compile(&self, path: &str, code: &str) -> Result<CompiledUnit> {
        if code.trim().is_empty() {
            return Err(Error::Compile("cell is empty".to_string()));
        }

        let count = match self.history.execution_counts(code).await.last() {
            Some(&count) => count,
            None => self.predict_next().await,
        };
        let unit_name = self.unit_name(count);
        debug!("Cell {} maps to {} (execution {})", path, unit_name, count);

        Ok(CompiledUnit {
            unit_name,
            diagnostics: Vec::new(),
        })
    }

    async fn unit_code(&self, unit: &str) -> Option<String> {
        let count = self.execution_count(unit)?;
        self.history.code_at(count).await
    }

    async fn record_execution(&self, execution_count: u64, code: &str) {
        self.history.record(execution_count, code).await;
    }
}
