use crate::dap::types::{Capabilities, InitializeRequestArguments};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    Attached,
    Running,
    Stopped,
    Terminated,
}

impl SessionState {
    /// Engine is bound to the kernel process.
    pub fn is_attached(self) -> bool {
        matches!(
            self,
            SessionState::Attached | SessionState::Running | SessionState::Stopped
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Initialized => "initialized",
            SessionState::Attached => "attached",
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
            SessionState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client preferences negotiated by `initialize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCapabilities {
    pub client_id: Option<String>,
    pub lines_start_at_1: bool,
    pub columns_start_at_1: bool,
    pub supports_variable_type: bool,
}

impl Default for ClientCapabilities {
    fn default() -> Self {
        Self {
            client_id: None,
            lines_start_at_1: true,
            columns_start_at_1: true,
            supports_variable_type: false,
        }
    }
}

impl From<&InitializeRequestArguments> for ClientCapabilities {
    fn from(args: &InitializeRequestArguments) -> Self {
        Self {
            client_id: args.client_id.clone(),
            lines_start_at_1: args.lines_start_at_1.unwrap_or(true),
            columns_start_at_1: args.columns_start_at_1.unwrap_or(true),
            supports_variable_type: args.supports_variable_type.unwrap_or(false),
        }
    }
}

impl ClientCapabilities {
    /// Client line number to the 1-based numbering the engine uses.
    pub fn engine_line(&self, line: i64) -> i64 {
        if self.lines_start_at_1 {
            line
        } else {
            line.saturating_add(1)
        }
    }

    pub fn client_line(&self, line: i64) -> i64 {
        if self.lines_start_at_1 {
            line
        } else {
            line.saturating_sub(1)
        }
    }

    pub fn client_column(&self, column: i64) -> i64 {
        if self.columns_start_at_1 {
            column
        } else {
            column.saturating_sub(1).max(0)
        }
    }
}

/// Features this adapter supports, returned from `initialize`.
pub fn adapter_capabilities() -> Capabilities {
    Capabilities {
        supports_configuration_done_request: Some(true),
        supports_function_breakpoints: Some(false),
        supports_conditional_breakpoints: Some(true),
        supports_hit_conditional_breakpoints: Some(true),
        supports_evaluate_for_hovers: Some(true),
        supports_set_variable: Some(false),
        supports_step_back: Some(false),
        supports_terminate_request: Some(true),
        supports_delayed_stack_trace_loading: Some(true),
        supports_value_formatting_options: Some(false),
    }
}
