use crate::dap::types::*;
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A decoded control-channel request.
#[derive(Debug, Clone)]
pub enum DebugRequest {
    Initialize(InitializeRequestArguments),
    /// `attach` and `launch`: both bind to the already running kernel.
    Attach,
    ConfigurationDone,
    DumpCell(DumpCellArguments),
    /// Kernel-side notice that a cell ran, debugged or not.
    RecordExecution(RecordExecutionArguments),
    SetBreakpoints(SetBreakpointsArguments),
    Continue(ThreadArguments),
    Next(ThreadArguments),
    StepIn(ThreadArguments),
    StepOut(ThreadArguments),
    Pause(ThreadArguments),
    Threads,
    StackTrace(StackTraceArguments),
    Scopes(ScopesArguments),
    Variables(VariablesArguments),
    Evaluate(EvaluateArguments),
    Source(SourceArguments),
    DebugInfo,
    InspectVariables,
    RichInspectVariables(RichInspectVariablesArguments),
    Disconnect(DisconnectArguments),
}

impl DebugRequest {
    pub fn decode(command: &str, arguments: Option<Value>) -> Result<Self> {
        let request = match command {
            "initialize" => DebugRequest::Initialize(optional(command, arguments)?),
            "attach" | "launch" => DebugRequest::Attach,
            "configurationDone" => DebugRequest::ConfigurationDone,
            "dumpCell" => DebugRequest::DumpCell(required(command, arguments)?),
            "recordExecution" => DebugRequest::RecordExecution(required(command, arguments)?),
            "setBreakpoints" => DebugRequest::SetBreakpoints(required(command, arguments)?),
            "continue" => DebugRequest::Continue(required(command, arguments)?),
            "next" => DebugRequest::Next(required(command, arguments)?),
            "stepIn" => DebugRequest::StepIn(required(command, arguments)?),
            "stepOut" => DebugRequest::StepOut(required(command, arguments)?),
            "pause" => DebugRequest::Pause(required(command, arguments)?),
            "threads" => DebugRequest::Threads,
            "stackTrace" => DebugRequest::StackTrace(required(command, arguments)?),
            "scopes" => DebugRequest::Scopes(required(command, arguments)?),
            "variables" => DebugRequest::Variables(required(command, arguments)?),
            "evaluate" => DebugRequest::Evaluate(required(command, arguments)?),
            "source" => DebugRequest::Source(required(command, arguments)?),
            "debugInfo" => DebugRequest::DebugInfo,
            "inspectVariables" => DebugRequest::InspectVariables,
            "richInspectVariables" => DebugRequest::RichInspectVariables(required(command, arguments)?),
            "disconnect" | "terminate" => DebugRequest::Disconnect(optional(command, arguments)?),
            other => return Err(Error::UnknownCommand(other.to_string())),
        };
        Ok(request)
    }

    pub fn command(&self) -> &'static str {
        match self {
            DebugRequest::Initialize(_) => "initialize",
            DebugRequest::Attach => "attach",
            DebugRequest::ConfigurationDone => "configurationDone",
            DebugRequest::DumpCell(_) => "dumpCell",
            DebugRequest::RecordExecution(_) => "recordExecution",
            DebugRequest::SetBreakpoints(_) => "setBreakpoints",
            DebugRequest::Continue(_) => "continue",
            DebugRequest::Next(_) => "next",
            DebugRequest::StepIn(_) => "stepIn",
            DebugRequest::StepOut(_) => "stepOut",
            DebugRequest::Pause(_) => "pause",
            DebugRequest::Threads => "threads",
            DebugRequest::StackTrace(_) => "stackTrace",
            DebugRequest::Scopes(_) => "scopes",
            DebugRequest::Variables(_) => "variables",
            DebugRequest::Evaluate(_) => "evaluate",
            DebugRequest::Source(_) => "source",
            DebugRequest::DebugInfo => "debugInfo",
            DebugRequest::InspectVariables => "inspectVariables",
            DebugRequest::RichInspectVariables(_) => "richInspectVariables",
            DebugRequest::Disconnect(_) => "disconnect",
        }
    }
}

fn required<T: DeserializeOwned>(command: &str, arguments: Option<Value>) -> Result<T> {
    let arguments =
        arguments.ok_or_else(|| Error::Protocol(format!("{} requires arguments", command)))?;
    serde_json::from_value(arguments)
        .map_err(|e| Error::Protocol(format!("Invalid {} arguments: {}", command, e)))
}

fn optional<T: DeserializeOwned + Default>(command: &str, arguments: Option<Value>) -> Result<T> {
    match arguments {
        None | Some(Value::Null) => Ok(T::default()),
        Some(arguments) => required(command, Some(arguments)),
    }
}
