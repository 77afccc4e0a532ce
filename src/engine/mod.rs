//! Native debugger engine boundary.
//!
//! The session never talks to a debugger directly: it calls a [`DebugEngine`]
//! and receives asynchronous [`EngineEvent`]s on a channel. Every call is
//! answered promptly; calls that need a halted process fail with
//! [`crate::Error::NotStopped`] instead of waiting for a stop.

pub mod lldb;

use crate::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Stepping primitive requested by `next`, `stepIn` and `stepOut`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    In,
    Out,
    Over,
}

/// One requested breakpoint line within a compiled unit (1-based).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRequest {
    pub line: i64,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
}

/// A breakpoint the engine actually bound to code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineBreakpoint {
    pub id: i64,
    /// Line the engine bound to; may differ from the requested one.
    pub line: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineThread {
    pub id: i64,
    pub name: String,
}

/// A stack frame as the engine reports it.
///
/// `unit` is the compiled-unit name the frame's code came from, or `None`
/// for code that does not belong to any cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFrame {
    pub id: i64,
    pub name: String,
    pub unit: Option<String>,
    pub line: i64,
    pub column: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineScope {
    pub name: String,
    pub reference: i64,
    pub expensive: bool,
}

/// A variable value; `reference` is non-zero when it has children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineVariable {
    pub name: String,
    pub value: String,
    pub type_name: Option<String>,
    pub reference: i64,
}

/// Result of an expression evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineValue {
    pub result: String,
    pub type_name: Option<String>,
    pub reference: i64,
}

/// What to attach to: the running kernel process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachTarget {
    pub pid: u32,
    pub init_commands: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Breakpoint,
    Step,
    Exception,
    Pause,
    Entry,
    Other(String),
}

impl StopReason {
    pub fn as_str(&self) -> &str {
        match self {
            StopReason::Breakpoint => "breakpoint",
            StopReason::Step => "step",
            StopReason::Exception => "exception",
            StopReason::Pause => "pause",
            StopReason::Entry => "entry",
            StopReason::Other(reason) => reason,
        }
    }
}

impl From<&str> for StopReason {
    fn from(reason: &str) -> Self {
        match reason {
            "breakpoint" | "function breakpoint" | "data breakpoint" => StopReason::Breakpoint,
            "step" | "goto" => StopReason::Step,
            "exception" => StopReason::Exception,
            "pause" => StopReason::Pause,
            "entry" => StopReason::Entry,
            other => StopReason::Other(other.to_string()),
        }
    }
}

/// Asynchronous notification produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Stopped {
        reason: StopReason,
        thread_id: Option<i64>,
        description: Option<String>,
        all_threads_stopped: bool,
    },
    Continued {
        thread_id: Option<i64>,
        all_threads: bool,
    },
    Exited {
        exit_code: i64,
    },
    Terminated,
    Output {
        category: String,
        output: String,
    },
}

pub type EventSender = mpsc::UnboundedSender<EngineEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// Unbounded so engine callbacks never block and no event is dropped.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[async_trait]
pub trait DebugEngine: Send + Sync {
    async fn attach(&self, target: &AttachTarget) -> Result<()>;

    async fn configuration_done(&self) -> Result<()>;

    /// Replaces every breakpoint of `unit` with `lines`; one entry per
    /// request, `None` where no code was emitted for that line.
    async fn set_breakpoints(
        &self,
        unit: &str,
        lines: &[LineRequest],
    ) -> Result<Vec<Option<EngineBreakpoint>>>;

    async fn clear_breakpoints(&self, unit: &str) -> Result<()>;

    async fn resume(&self, thread_id: i64) -> Result<()>;

    async fn step(&self, thread_id: i64, kind: StepKind) -> Result<()>;

    async fn pause(&self, thread_id: i64) -> Result<()>;

    async fn threads(&self) -> Result<Vec<EngineThread>>;

    /// Innermost frame first.
    async fn stack(&self, thread_id: i64) -> Result<Vec<EngineFrame>>;

    async fn scopes(&self, frame_id: i64) -> Result<Vec<EngineScope>>;

    async fn variables(&self, reference: i64) -> Result<Vec<EngineVariable>>;

    async fn evaluate(&self, expression: &str, frame_id: Option<i64>) -> Result<EngineValue>;

    async fn detach(&self) -> Result<()>;
}
