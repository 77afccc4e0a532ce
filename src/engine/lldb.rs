//! lldb-dap backed engine
//!
//! # Overview
//!
//! The kernel JIT-compiles every cell into a unit named `input_line_<n>`.
//! lldb picks those units up through its GDB JIT loader plugin, so once we
//! are attached to the kernel process a unit name works as a breakpoint
//! source path and shows up again as the source of stack frames.
//!
//! # Transport
//!
//! **TCP socket**. lldb-dap is spawned as
//! `lldb-dap --connection listen://<host>:<port>` on a free port and we
//! connect with retries while it starts up. Its stdout and stderr are
//! forwarded to our log so they never mix with the control channel.
//!
//! # Stop tracking
//!
//! lldb-dap rejects inspection requests on a running process with an
//! unhelpful message. The engine tracks stop/continue events itself and
//! refuses those calls up front with [`Error::NotStopped`].

use super::*;
use crate::config::EngineConfig;
use crate::dap::client::{DapClient, DISCONNECTED_EVENT};
use crate::dap::socket_helper;
use crate::dap::types::{AttachRequestArguments, Source, SourceBreakpoint, StackFrame};
use crate::{Error, Result};
use serde_json::Value;
use std::future::Future;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

pub const ADAPTER_ID: &str = "lldb-dap";

pub struct LldbEngine {
    client: DapClient,
    unit_prefix: String,
    stopped: Arc<AtomicBool>,
}

impl LldbEngine {
    /// Spawn lldb-dap, connect to it and run the `initialize` handshake.
    pub async fn start(config: &EngineConfig, unit_prefix: &str, events: EventSender) -> Result<Self> {
        let port = socket_helper::find_free_port(&config.host)?;
        let listen = format!("listen://{}:{}", config.host, port);

        info!("🚀 Spawning {} on port {}", config.program, port);

        let mut child = Command::new(&config.program)
            .arg("--connection")
            .arg(&listen)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Process(format!("Failed to spawn {}: {}", config.program, e)))?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output("stdout", stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output("stderr", stderr));
        }

        let timeout = Duration::from_millis(config.connect_timeout_ms);
        let socket = socket_helper::connect_with_retry(&config.host, port, timeout).await?;

        let client = DapClient::from_socket(socket, Some(child));
        let engine = Self::with_client(client, unit_prefix, events).await;

        let caps = engine.client.initialize(ADAPTER_ID).await?;
        debug!("lldb-dap capabilities: {:?}", caps);

        info!("✅ lldb-dap ready on port {}", port);
        Ok(engine)
    }

    /// Wrap an already-connected client and start translating its events.
    pub async fn with_client(client: DapClient, unit_prefix: &str, events: EventSender) -> Self {
        let stopped = Arc::new(AtomicBool::new(false));
        let terminated = Arc::new(AtomicBool::new(false));

        {
            let events = events.clone();
            let stopped = stopped.clone();
            client
                .on_event("stopped", move |event| {
                    let body = event.body.unwrap_or(Value::Null);
                    stopped.store(true, Ordering::SeqCst);
                    let _ = events.send(EngineEvent::Stopped {
                        reason: StopReason::from(body["reason"].as_str().unwrap_or("unknown")),
                        thread_id: body["threadId"].as_i64(),
                        description: body["description"].as_str().map(str::to_string),
                        all_threads_stopped: body["allThreadsStopped"].as_bool().unwrap_or(false),
                    });
                })
                .await;
        }

        {
            let events = events.clone();
            let stopped = stopped.clone();
            client
                .on_event("continued", move |event| {
                    let body = event.body.unwrap_or(Value::Null);
                    stopped.store(false, Ordering::SeqCst);
                    let _ = events.send(EngineEvent::Continued {
                        thread_id: body["threadId"].as_i64(),
                        all_threads: body["allThreadsContinued"].as_bool().unwrap_or(true),
                    });
                })
                .await;
        }

        {
            let events = events.clone();
            let stopped = stopped.clone();
            client
                .on_event("exited", move |event| {
                    let body = event.body.unwrap_or(Value::Null);
                    stopped.store(false, Ordering::SeqCst);
                    let _ = events.send(EngineEvent::Exited {
                        exit_code: body["exitCode"].as_i64().unwrap_or(0),
                    });
                })
                .await;
        }

        {
            let events = events.clone();
            client
                .on_event("output", move |event| {
                    let body = event.body.unwrap_or(Value::Null);
                    let _ = events.send(EngineEvent::Output {
                        category: body["category"].as_str().unwrap_or("console").to_string(),
                        output: body["output"].as_str().unwrap_or_default().to_string(),
                    });
                })
                .await;
        }

        // `terminated` and a dropped connection both end the session; report it once
        for name in ["terminated", DISCONNECTED_EVENT] {
            let events = events.clone();
            let stopped = stopped.clone();
            let terminated = terminated.clone();
            client
                .on_event(name, move |event| {
                    stopped.store(false, Ordering::SeqCst);
                    if !terminated.swap(true, Ordering::SeqCst) {
                        info!("🛑 lldb-dap session ended ({})", event.event);
                        let _ = events.send(EngineEvent::Terminated);
                    }
                })
                .await;
        }

        Self {
            client,
            unit_prefix: unit_prefix.to_string(),
            stopped,
        }
    }

    fn require_stopped(&self, operation: &str) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::NotStopped(format!("{} needs a stopped process", operation)))
        }
    }

    /// Runs a request that lets the process go.
    ///
    /// The stop flag is cleared before the request is sent: lldb-dap may
    /// report the next stop right behind its reply, and that stop must
    /// survive. A rejected request leaves the process where it was.
    async fn leave_stop<F>(&self, operation: &str, request: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        if !self.stopped.swap(false, Ordering::SeqCst) {
            return Err(Error::NotStopped(format!("{} needs a stopped process", operation)));
        }

        match request.await {
            Ok(()) => Ok(()),
            Err(e) => {
                if !e.is_fatal() {
                    self.stopped.store(true, Ordering::SeqCst);
                }
                Err(e)
            }
        }
    }

    fn frame_from_dap(&self, frame: StackFrame) -> EngineFrame {
        EngineFrame {
            unit: frame
                .source
                .as_ref()
                .and_then(|source| unit_of(source, &self.unit_prefix)),
            id: frame.id,
            name: frame.name,
            line: frame.line,
            column: frame.column,
        }
    }
}

/// Compiled-unit name a DAP source refers to, if it is one of ours.
pub fn unit_of(source: &Source, unit_prefix: &str) -> Option<String> {
    let candidate = source
        .name
        .as_deref()
        .or(source.path.as_deref())?
        .rsplit(|c| c == '/' || c == '\\')
        .next()?;

    candidate
        .starts_with(unit_prefix)
        .then(|| candidate.to_string())
}

async fn forward_output<R: AsyncRead + Unpin>(stream: &'static str, reader: R) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "lldb_dap", "[{}] {}", stream, line);
    }
}

#[async_trait]
impl DebugEngine for LldbEngine {
    async fn attach(&self, target: &AttachTarget) -> Result<()> {
        info!("🔗 Attaching lldb-dap to pid {}", target.pid);
        let args = AttachRequestArguments {
            pid: target.pid,
            init_commands: target.init_commands.clone(),
        };
        self.client.attach(&args).await
    }

    async fn configuration_done(&self) -> Result<()> {
        self.client.configuration_done().await
    }

    async fn set_breakpoints(
        &self,
        unit: &str,
        lines: &[LineRequest],
    ) -> Result<Vec<Option<EngineBreakpoint>>> {
        let requested = lines
            .iter()
            .map(|req| SourceBreakpoint {
                line: req.line,
                column: None,
                condition: req.condition.clone(),
                hit_condition: req.hit_condition.clone(),
            })
            .collect();

        let bound = self
            .client
            .set_breakpoints(Source::from_path(unit), requested)
            .await?;

        if bound.len() != lines.len() {
            warn!(
                "lldb-dap answered {} breakpoints for {} requested in {}",
                bound.len(),
                lines.len(),
                unit
            );
        }

        Ok(lines
            .iter()
            .enumerate()
            .map(|(i, req)| {
                bound.get(i).and_then(|bp| match (bp.verified, bp.id) {
                    (true, Some(id)) => Some(EngineBreakpoint {
                        id,
                        line: bp.line.unwrap_or(req.line),
                    }),
                    _ => None,
                })
            })
            .collect())
    }

    async fn clear_breakpoints(&self, unit: &str) -> Result<()> {
        self.client
            .set_breakpoints(Source::from_path(unit), Vec::new())
            .await?;
        Ok(())
    }

    async fn resume(&self, thread_id: i64) -> Result<()> {
        self.leave_stop("continue", self.client.continue_execution(thread_id))
            .await
    }

    async fn step(&self, thread_id: i64, kind: StepKind) -> Result<()> {
        match kind {
            StepKind::In => self.leave_stop("stepIn", self.client.step_in(thread_id)).await,
            StepKind::Out => self.leave_stop("stepOut", self.client.step_out(thread_id)).await,
            StepKind::Over => self.leave_stop("next", self.client.next(thread_id)).await,
        }
    }

    async fn pause(&self, thread_id: i64) -> Result<()> {
        self.client.pause(thread_id).await
    }

    async fn threads(&self) -> Result<Vec<EngineThread>> {
        Ok(self
            .client
            .threads()
            .await?
            .into_iter()
            .map(|t| EngineThread { id: t.id, name: t.name })
            .collect())
    }

    async fn stack(&self, thread_id: i64) -> Result<Vec<EngineFrame>> {
        self.require_stopped("stackTrace")?;
        Ok(self
            .client
            .stack_trace(thread_id)
            .await?
            .into_iter()
            .map(|frame| self.frame_from_dap(frame))
            .collect())
    }

    async fn scopes(&self, frame_id: i64) -> Result<Vec<EngineScope>> {
        self.require_stopped("scopes")?;
        Ok(self
            .client
            .scopes(frame_id)
            .await?
            .into_iter()
            .map(|s| EngineScope {
                name: s.name,
                reference: s.variables_reference,
                expensive: s.expensive,
            })
            .collect())
    }

    async fn variables(&self, reference: i64) -> Result<Vec<EngineVariable>> {
        self.require_stopped("variables")?;
        Ok(self
            .client
            .variables(reference)
            .await?
            .into_iter()
            .map(|v| EngineVariable {
                name: v.name,
                value: v.value,
                type_name: v.type_,
                reference: v.variables_reference,
            })
            .collect())
    }

    async fn evaluate(&self, expression: &str, frame_id: Option<i64>) -> Result<EngineValue> {
        self.require_stopped("evaluate")?;
        let body = self.client.evaluate(expression, frame_id, "repl").await?;
        Ok(EngineValue {
            result: body.result,
            type_name: body.type_,
            reference: body.variables_reference,
        })
    }

    async fn detach(&self) -> Result<()> {
        info!("🔌 Detaching lldb-dap");
        match self.client.disconnect(false).await {
            Err(e) if e.is_fatal() => {
                debug!("lldb-dap already gone: {}", e);
                Ok(())
            }
            other => other,
        }
    }
}
