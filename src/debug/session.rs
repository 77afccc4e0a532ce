//! Debug Session
//!
//! # Architecture Overview
//!
//! One session per kernel process. The session is an actor: a single tokio
//! task owns the source registry, the breakpoint table, the stop handles
//! and the state, and works through [`SessionCommand`]s one at a time.
//!
//! ```text
//! Dispatcher ──Request──┐
//!                       ├─→ command queue ─→ DebugSession task ─→ DebugEngine
//! event pump ──Engine───┘
//!     ↑
//! DebugEngine events ──→ EventPublisher ─→ output channel
//! ```
//!
//! Requests and engine notifications share the queue, so a request always
//! sees every state change that was reported before it arrived.
//!
//! ## States
//!
//! ```text
//! Uninitialized → Initialized → Attached → Running ⇄ Stopped → Terminated
//! ```
//!
//! `continue` and the step requests return as soon as the engine accepted
//! them; the resulting stop arrives later as an engine event. Terminated is
//! absorbing: every later request fails with [`Error::SessionClosed`].

use super::breakpoints::{Breakpoint, BreakpointTable};
use super::events::{self, EventPublisher};
use super::handles::StopHandles;
use super::inspect;
use super::request::DebugRequest;
use super::state::{adapter_capabilities, ClientCapabilities, SessionState};
use crate::config::DebuggerConfig;
use crate::dap::types::*;
use crate::engine::{AttachTarget, DebugEngine, EngineEvent, EngineFrame, EventReceiver, LineRequest, StepKind};
use crate::source::{CellCompiler, CompiledUnit, SourceRegistry};
use crate::{Error, Result};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Reply to one request: the response body, if any.
pub type RequestResult = Result<Option<Value>>;

#[derive(Debug)]
pub enum SessionCommand {
    Request {
        request: DebugRequest,
        reply: oneshot::Sender<RequestResult>,
    },
    Engine(EngineEvent),
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Collaborators a session is built from.
pub struct SessionParts {
    pub config: DebuggerConfig,
    pub engine: Arc<dyn DebugEngine>,
    pub compiler: Arc<dyn CellCompiler>,
    pub publisher: EventPublisher,
}

/// Cloneable handle to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<SessionCommand>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn request(&self, request: DebugRequest) -> RequestResult {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Request { request, reply })
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Resolves once the session reaches `target`.
    pub async fn wait_for(&self, target: SessionState) -> Result<()> {
        let mut state = self.state.clone();
        state
            .wait_for(|current| *current == target)
            .await
            .map(|_| ())
            .map_err(|_| Error::SessionClosed)
    }

    /// Detaches from the engine and stops the session task.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(SessionCommand::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}

pub struct DebugSession {
    id: Uuid,
    config: DebuggerConfig,
    engine: Arc<dyn DebugEngine>,
    compiler: Arc<dyn CellCompiler>,
    publisher: EventPublisher,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    client: ClientCapabilities,
    configured: bool,
    sources: SourceRegistry,
    breakpoints: BreakpointTable,
    handles: StopHandles,
    stopped_threads: BTreeSet<i64>,
}

impl DebugSession {
    /// Starts the session task and the engine event pump.
    pub fn spawn(parts: SessionParts, engine_events: EventReceiver) -> SessionHandle {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Uninitialized);

        tokio::spawn(events::pump(engine_events, parts.publisher.clone(), tx.clone()));

        let session = DebugSession {
            id,
            sources: SourceRegistry::new(&parts.config),
            config: parts.config,
            engine: parts.engine,
            compiler: parts.compiler,
            publisher: parts.publisher,
            state: SessionState::Uninitialized,
            state_tx,
            client: ClientCapabilities::default(),
            configured: false,
            breakpoints: BreakpointTable::new(),
            handles: StopHandles::new(),
            stopped_threads: BTreeSet::new(),
        };
        tokio::spawn(session.run(rx));

        info!("🆕 Debug session {} created", id);
        SessionHandle {
            id,
            tx,
            state: state_rx,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                SessionCommand::Request { request, reply } => {
                    let result = self.handle(request).await;
                    let _ = reply.send(result);
                }
                SessionCommand::Engine(event) => self.on_engine_event(event),
                SessionCommand::Shutdown { reply } => {
                    self.close().await;
                    let _ = reply.send(());
                    break;
                }
            }
        }
        debug!("Session {} task finished", self.id);
    }

    async fn handle(&mut self, request: DebugRequest) -> RequestResult {
        let command = request.command();
        if self.state == SessionState::Terminated {
            return Err(Error::SessionClosed);
        }
        debug!("Session {} handling '{}' in state {}", self.id, command, self.state);

        let result = match request {
            DebugRequest::Initialize(args) => self.initialize(&args),
            DebugRequest::Attach => self.attach().await,
            DebugRequest::ConfigurationDone => self.configuration_done().await,
            DebugRequest::DumpCell(args) => self.dump_cell(args.code).await,
            DebugRequest::RecordExecution(args) => {
                self.compiler
                    .record_execution(args.execution_count, &args.code)
                    .await;
                Ok(None)
            }
            DebugRequest::SetBreakpoints(args) => self.set_breakpoints(args).await,
            DebugRequest::Continue(args) => self.resume(command, args.thread_id, None).await,
            DebugRequest::Next(args) => self.resume(command, args.thread_id, Some(StepKind::Over)).await,
            DebugRequest::StepIn(args) => self.resume(command, args.thread_id, Some(StepKind::In)).await,
            DebugRequest::StepOut(args) => self.resume(command, args.thread_id, Some(StepKind::Out)).await,
            DebugRequest::Pause(args) => self.pause(args.thread_id).await,
            DebugRequest::Threads => self.threads().await,
            DebugRequest::StackTrace(args) => self.stack_trace(args).await,
            DebugRequest::Scopes(args) => self.scopes(args.frame_id).await,
            DebugRequest::Variables(args) => self.variables(args.variables_reference).await,
            DebugRequest::Evaluate(args) => self.evaluate(args).await,
            DebugRequest::Source(args) => self.source(args),
            DebugRequest::DebugInfo => Ok(Some(self.debug_info())),
            DebugRequest::InspectVariables => self.inspect_variables().await,
            DebugRequest::RichInspectVariables(args) => self.rich_inspect_variables(args).await,
            DebugRequest::Disconnect(_) => self.disconnect().await,
        };

        if let Err(e) = &result {
            if e.is_fatal() {
                error!("❌ Engine lost during '{}': {}", command, e);
                self.terminate();
            } else {
                debug!("'{}' failed: {}", command, e);
            }
        }
        result
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            info!("🔄 Session {}: {} → {}", self.id, self.state, state);
            self.state = state;
            self.state_tx.send_replace(state);
        }
    }

    fn require(&self, command: &str, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "{} is not allowed while {}",
                command, self.state
            )))
        }
    }

    fn require_stopped(&self, command: &str) -> Result<()> {
        self.require(command, &[SessionState::Stopped])
    }

    /// Everything handed out during a stop dies when the process moves on.
    fn leave_stop(&mut self) {
        self.handles.invalidate();
        self.stopped_threads.clear();
    }

    fn terminate(&mut self) {
        self.leave_stop();
        self.breakpoints.invalidate_all();
        self.set_state(SessionState::Terminated);
    }

    fn initialize(&mut self, args: &InitializeRequestArguments) -> RequestResult {
        self.require(
            "initialize",
            &[SessionState::Uninitialized, SessionState::Initialized],
        )?;

        self.client = ClientCapabilities::from(args);
        info!(
            "🤝 Client {:?} initialized (adapter '{}')",
            self.client.client_id, args.adapter_id
        );
        self.set_state(SessionState::Initialized);
        Ok(Some(serde_json::to_value(adapter_capabilities())?))
    }

    async fn attach(&mut self) -> RequestResult {
        match self.state {
            SessionState::Initialized => {}
            SessionState::Uninitialized => {
                return Err(Error::InvalidState("attach before initialize".to_string()))
            }
            state => {
                return Err(Error::InvalidState(format!(
                    "attach is not allowed while {}",
                    state
                )))
            }
        }

        let target = AttachTarget {
            pid: self.config.attach_pid(),
            init_commands: self.config.engine.init_commands.clone(),
        };
        self.engine.attach(&target).await?;
        self.set_state(SessionState::Attached);

        let verified = self.breakpoints.resolve_pending(self.engine.as_ref()).await;
        info!(
            "🔗 Attached to pid {} ({}/{} pending breakpoints verified)",
            target.pid,
            verified,
            self.breakpoints.len()
        );

        self.publisher.initialized();
        Ok(None)
    }

    async fn configuration_done(&mut self) -> RequestResult {
        self.require(
            "configurationDone",
            &[SessionState::Attached, SessionState::Stopped, SessionState::Running],
        )?;
        if self.configured {
            return Err(Error::InvalidState(
                "configurationDone was already received".to_string(),
            ));
        }

        self.engine.configuration_done().await?;
        self.configured = true;
        if self.state == SessionState::Attached {
            self.set_state(SessionState::Running);
        }
        Ok(None)
    }

    async fn dump_cell(&mut self, code: String) -> RequestResult {
        self.require(
            "dumpCell",
            &[
                SessionState::Initialized,
                SessionState::Attached,
                SessionState::Running,
                SessionState::Stopped,
            ],
        )?;

        let path = self.sources.next_path(&code);
        let compiled = self.compiler.compile(&path, &code).await?;
        let source = self.sources.insert(path, code, compiled).await?;

        let mut body = json!({ "sourcePath": source.path });
        if !source.diagnostics.is_empty() {
            body["diagnostics"] = serde_json::to_value(&source.diagnostics)?;
        }
        Ok(Some(body))
    }

    async fn set_breakpoints(&mut self, args: SetBreakpointsArguments) -> RequestResult {
        self.require(
            "setBreakpoints",
            &[
                SessionState::Initialized,
                SessionState::Attached,
                SessionState::Running,
                SessionState::Stopped,
            ],
        )?;

        let path = args
            .source
            .path
            .ok_or_else(|| Error::Protocol("setBreakpoints requires source.path".to_string()))?;
        let source = self
            .sources
            .get(&path)
            .ok_or_else(|| Error::UnknownSource(path.clone()))?;

        let requests: Vec<LineRequest> = args
            .breakpoints
            .unwrap_or_default()
            .into_iter()
            .map(|bp| LineRequest {
                line: self.client.engine_line(bp.line),
                condition: bp.condition,
                hit_condition: bp.hit_condition,
            })
            .collect();

        let pending = self.state == SessionState::Initialized;
        let table = if pending {
            self.breakpoints.store_pending(source, &requests)
        } else {
            self.breakpoints
                .replace(self.engine.as_ref(), source, &requests)
                .await?
        };

        let breakpoints: Vec<Breakpoint> = table.to_vec();
        let body: Vec<Value> = breakpoints
            .iter()
            .map(|bp| self.breakpoint_body(bp, pending))
            .collect();
        Ok(Some(json!({ "breakpoints": body })))
    }

    fn breakpoint_body(&self, bp: &Breakpoint, pending: bool) -> Value {
        let mut body = json!({
            "verified": bp.verified(),
            "line": self.client.client_line(bp.effective_line()),
            "source": Source::from_path(&bp.source.path),
        });
        match bp.handle {
            Some(handle) => body["id"] = json!(handle.id),
            None if pending => body["message"] = json!("Breakpoint will be resolved after attach"),
            None => body["message"] = json!("No executable code at this line"),
        }
        body
    }

    /// `continue` when `step` is `None`, otherwise one of the step requests.
    async fn resume(&mut self, command: &str, thread_id: i64, step: Option<StepKind>) -> RequestResult {
        self.require_stopped(command)?;

        match step {
            None => self.engine.resume(thread_id).await?,
            Some(kind) => self.engine.step(thread_id, kind).await?,
        }

        self.leave_stop();
        self.set_state(SessionState::Running);

        Ok(step
            .is_none()
            .then(|| json!({ "allThreadsContinued": true })))
    }

    async fn pause(&mut self, thread_id: i64) -> RequestResult {
        self.require("pause", &[SessionState::Running, SessionState::Attached])?;
        self.engine.pause(thread_id).await?;
        Ok(None)
    }

    async fn threads(&mut self) -> RequestResult {
        self.require(
            "threads",
            &[SessionState::Attached, SessionState::Running, SessionState::Stopped],
        )?;
        let threads: Vec<Thread> = self
            .engine
            .threads()
            .await?
            .into_iter()
            .map(|t| Thread { id: t.id, name: t.name })
            .collect();
        Ok(Some(json!({ "threads": threads })))
    }

    /// Protocol source for an engine frame, if it belongs to a cell.
    ///
    /// A unit no dumped cell owns was executed while nobody was debugging;
    /// its text is recovered from the interpreter and registered as a cell.
    async fn frame_source(&mut self, frame: &EngineFrame) -> Option<Source> {
        let unit = frame.unit.as_deref()?;
        if let Some(source) = self.sources.get_by_unit(unit) {
            return Some(Source::from_path(&source.path));
        }

        let code = self.compiler.unit_code(unit).await?;
        let path = self.sources.next_path(&code);
        let compiled = CompiledUnit {
            unit_name: unit.to_string(),
            diagnostics: Vec::new(),
        };
        match self.sources.insert(path, code, compiled).await {
            Ok(source) => Some(Source::from_path(&source.path)),
            Err(e) => {
                warn!("Could not register executed unit {}: {}", unit, e);
                None
            }
        }
    }

    async fn stack_trace(&mut self, args: StackTraceArguments) -> RequestResult {
        self.require_stopped("stackTrace")?;

        let frames = self.engine.stack(args.thread_id).await?;
        let mut visible: Vec<(EngineFrame, Option<Source>)> = Vec::new();
        for frame in frames {
            let source = self.frame_source(&frame).await;
            if source.is_some() || !self.config.cell_frames_only {
                visible.push((frame, source));
            }
        }

        let total = visible.len();
        let start = args.start_frame.unwrap_or(0).max(0) as usize;
        let levels = match args.levels {
            Some(levels) if levels > 0 => levels as usize,
            _ => total,
        };

        let mut stack_frames = Vec::new();
        for (frame, source) in visible.into_iter().skip(start).take(levels) {
            stack_frames.push(StackFrame {
                id: self.handles.frames.insert(frame.id),
                name: frame.name,
                source,
                line: self.client.client_line(frame.line),
                column: self.client.client_column(frame.column),
            });
        }

        Ok(Some(json!({
            "stackFrames": stack_frames,
            "totalFrames": total,
        })))
    }

    async fn scopes(&mut self, frame_id: i64) -> RequestResult {
        self.require_stopped("scopes")?;
        let engine_frame = self.handles.frames.get(frame_id)?;

        let mut scopes = Vec::new();
        for scope in self.engine.scopes(engine_frame).await? {
            scopes.push(Scope {
                name: scope.name,
                variables_reference: self.handles.variables_reference(scope.reference),
                expensive: scope.expensive,
            });
        }
        Ok(Some(json!({ "scopes": scopes })))
    }

    async fn read_variables(&mut self, engine_reference: i64) -> Result<Vec<Variable>> {
        let mut variables = Vec::new();
        for var in self.engine.variables(engine_reference).await? {
            variables.push(Variable {
                name: var.name,
                value: var.value,
                type_: var.type_name.filter(|_| self.client.supports_variable_type),
                variables_reference: self.handles.variables_reference(var.reference),
            });
        }
        Ok(variables)
    }

    async fn variables(&mut self, reference: i64) -> RequestResult {
        self.require_stopped("variables")?;
        let engine_reference = self.handles.variables.get(reference)?;
        let variables = self.read_variables(engine_reference).await?;
        Ok(Some(json!({ "variables": variables })))
    }

    async fn evaluate(&mut self, args: EvaluateArguments) -> RequestResult {
        self.require_stopped("evaluate")?;
        let frame = args
            .frame_id
            .map(|id| self.handles.frames.get(id))
            .transpose()?;

        let value = self.engine.evaluate(&args.expression, frame).await?;
        let body = EvaluateResponseBody {
            result: value.result,
            type_: value.type_name.filter(|_| self.client.supports_variable_type),
            variables_reference: self.handles.variables_reference(value.reference),
        };
        Ok(Some(serde_json::to_value(body)?))
    }

    fn source(&self, args: SourceArguments) -> RequestResult {
        let path = args
            .source
            .path
            .ok_or_else(|| Error::Protocol("source requires source.path".to_string()))?;
        let source = self
            .sources
            .get(&path)
            .ok_or_else(|| Error::UnknownSource(format!("source unavailable: {}", path)))?;
        Ok(Some(json!({ "content": source.code })))
    }

    fn debug_info(&self) -> Value {
        let breakpoints: Vec<Value> = self
            .breakpoints
            .iter()
            .map(|entries| {
                let lines: Vec<Value> = entries
                    .iter()
                    .map(|bp| json!({ "line": self.client.client_line(bp.line) }))
                    .collect();
                json!({
                    "source": entries[0].source.path,
                    "breakpoints": lines,
                })
            })
            .collect();

        json!({
            "isStarted": self.state.is_attached(),
            "hashMethod": "Sha256",
            "hashSeed": self.config.hash_seed,
            "tmpFilePrefix": self.config.tmp_file_prefix,
            "tmpFileSuffix": self.config.tmp_file_suffix,
            "breakpoints": breakpoints,
            "stoppedThreads": self.stopped_threads,
            "richRendering": true,
            "exceptionPaths": self.config.exception_paths,
            "copyToGlobals": false,
        })
    }

    /// Thread to inspect when the request does not name one.
    async fn current_thread(&self) -> Result<Option<i64>> {
        if let Some(&thread) = self.stopped_threads.iter().next() {
            return Ok(Some(thread));
        }
        Ok(self.engine.threads().await?.first().map(|t| t.id))
    }

    async fn inspect_variables(&mut self) -> RequestResult {
        if self.state != SessionState::Stopped {
            return Ok(Some(json!({ "variables": [] })));
        }

        let Some(thread) = self.current_thread().await? else {
            return Ok(Some(json!({ "variables": [] })));
        };
        let Some(frame) = self.engine.stack(thread).await?.into_iter().next() else {
            return Ok(Some(json!({ "variables": [] })));
        };
        let Some(scope) = self.engine.scopes(frame.id).await?.into_iter().next() else {
            return Ok(Some(json!({ "variables": [] })));
        };

        let variables = self.read_variables(scope.reference).await?;
        Ok(Some(json!({ "variables": variables })))
    }

    async fn rich_inspect_variables(&mut self, args: RichInspectVariablesArguments) -> RequestResult {
        if self.state != SessionState::Stopped {
            return Ok(Some(inspect::unavailable(&args.variable_name)));
        }

        let engine_frame = args
            .frame_id
            .map(|id| self.handles.frames.get(id))
            .transpose()?;
        let payload = inspect::inspect(
            self.engine.as_ref(),
            &args.variable_name,
            engine_frame,
            args.frame_id,
        )
        .await?;
        Ok(Some(payload))
    }

    async fn disconnect(&mut self) -> RequestResult {
        self.close().await;
        Ok(None)
    }

    /// Detaches if attached and enters `Terminated`.
    async fn close(&mut self) {
        if self.state.is_attached() {
            if let Err(e) = self.engine.detach().await {
                warn!("Detach failed: {}", e);
            }
        }
        if self.state != SessionState::Terminated {
            info!("👋 Session {} closed", self.id);
        }
        self.terminate();
    }

    fn on_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Stopped { thread_id, .. } => {
                if !self.state.is_attached() {
                    debug!("Ignoring stop in state {}", self.state);
                    return;
                }
                // a new stop invalidates handles from the previous one
                self.handles.invalidate();
                if let Some(thread) = thread_id {
                    self.stopped_threads.insert(thread);
                }
                self.set_state(SessionState::Stopped);
            }
            EngineEvent::Continued { thread_id, all_threads } => {
                if !matches!(self.state, SessionState::Stopped | SessionState::Attached) {
                    return;
                }
                match thread_id {
                    Some(thread) if !all_threads => {
                        self.stopped_threads.remove(&thread);
                    }
                    _ => self.stopped_threads.clear(),
                }
                if self.stopped_threads.is_empty() {
                    self.handles.invalidate();
                    self.set_state(SessionState::Running);
                }
            }
            EngineEvent::Exited { exit_code } => {
                info!("Debuggee exited with code {}", exit_code);
                self.terminate();
            }
            EngineEvent::Terminated => self.terminate(),
            EngineEvent::Output { .. } => {}
        }
    }
}
