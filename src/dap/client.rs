use super::transport::decode_message;
use super::transport_trait::{MessageReader, MessageWriter};
use super::types::*;
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, error, info, warn};

type ResponseSender = oneshot::Sender<Response>;
type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;

/// Pseudo event delivered to callbacks once the connection is gone.
pub const DISCONNECTED_EVENT: &str = "$disconnected";

#[derive(Default)]
struct PendingRequests {
    senders: HashMap<i64, ResponseSender>,
    closed: bool,
}

impl PendingRequests {
    /// Drops every waiting sender so their requests fail, and refuses new ones.
    fn close(&mut self) {
        self.closed = true;
        self.senders.clear();
    }
}

/// DAP client used to drive the native debugger engine.
///
/// A reader task routes responses to their waiting requests and events to
/// registered callbacks; a writer task owns the sending half so requests
/// never contend with the reader.
pub struct DapClient {
    seq_counter: Arc<AtomicI64>,
    pending_requests: Arc<Mutex<PendingRequests>>,
    event_callbacks: Arc<RwLock<HashMap<String, Vec<EventCallback>>>>,
    write_tx: mpsc::UnboundedSender<Message>,
    _child: Option<Child>,
}

impl DapClient {
    /// Create a client over an already-connected TCP stream (lldb-dap listens on a port)
    pub fn from_socket(socket: tokio::net::TcpStream, child: Option<Child>) -> Self {
        info!("Creating DAP client from socket: {:?}", socket.peer_addr());

        let (reader, writer) = super::transport::split_socket(socket);
        Self::new_with_transport(Box::new(reader), Box::new(writer), child)
    }

    /// Create a client over arbitrary transport halves (used by tests)
    pub fn new_with_transport(
        reader: Box<dyn MessageReader>,
        writer: Box<dyn MessageWriter>,
        child: Option<Child>,
    ) -> Self {
        let seq_counter = Arc::new(AtomicI64::new(1));
        let pending_requests = Arc::new(Mutex::new(PendingRequests::default()));
        let event_callbacks = Arc::new(RwLock::new(HashMap::new()));
        let (write_tx, write_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::message_reader(
            reader,
            pending_requests.clone(),
            event_callbacks.clone(),
            seq_counter.clone(),
            write_tx.clone(),
        ));

        tokio::spawn(Self::message_writer(
            writer,
            write_rx,
            pending_requests.clone(),
        ));

        Self {
            seq_counter,
            pending_requests,
            event_callbacks,
            write_tx,
            _child: child,
        }
    }

    /// Message reader task - reads frames and dispatches them
    async fn message_reader(
        mut reader: Box<dyn MessageReader>,
        pending_requests: Arc<Mutex<PendingRequests>>,
        event_callbacks: Arc<RwLock<HashMap<String, Vec<EventCallback>>>>,
        seq_counter: Arc<AtomicI64>,
        write_tx: mpsc::UnboundedSender<Message>,
    ) {
        loop {
            let frame = match reader.read_frame().await {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("📖 message_reader: Engine connection lost: {}", e);
                    break;
                }
            };

            let msg = match decode_message(&frame) {
                Ok(msg) => msg,
                Err(e) => {
                    error!("📖 message_reader: Skipping undecodable message: {}", e);
                    continue;
                }
            };

            match msg {
                Message::Response(resp) => {
                    debug!("Received response for seq {}", resp.request_seq);
                    let sender = pending_requests.lock().await.senders.remove(&resp.request_seq);
                    match sender {
                        Some(sender) => {
                            if sender.send(resp).is_err() {
                                warn!("Failed to send response to waiting request");
                            }
                        }
                        None => warn!("Received response for unknown request: {}", resp.request_seq),
                    }
                }
                Message::Event(event) => {
                    debug!("🎯 EVENT RECEIVED: '{}' with body: {:?}", event.event, event.body);
                    Self::dispatch_event(&event_callbacks, event).await;
                }
                Message::Request(req) => {
                    // Reverse requests (runInTerminal, startDebugging) make no
                    // sense when attaching to a live process
                    warn!("Rejecting reverse request '{}' from engine", req.command);
                    let reply = Response {
                        seq: seq_counter.fetch_add(1, Ordering::SeqCst),
                        request_seq: req.seq,
                        command: req.command,
                        success: false,
                        message: Some("reverse requests are not supported".to_string()),
                        body: None,
                    };
                    let _ = write_tx.send(Message::Response(reply));
                }
            }
        }

        pending_requests.lock().await.close();
        Self::dispatch_event(
            &event_callbacks,
            Event {
                seq: 0,
                event: DISCONNECTED_EVENT.to_string(),
                body: None,
            },
        )
        .await;
    }

    async fn dispatch_event(
        event_callbacks: &RwLock<HashMap<String, Vec<EventCallback>>>,
        event: Event,
    ) {
        let callbacks = event_callbacks.read().await;
        match callbacks.get(&event.event) {
            Some(handlers) => {
                for callback in handlers {
                    callback(event.clone());
                }
            }
            None => debug!("  No callbacks registered for event '{}'", event.event),
        }
    }

    /// Message writer task - writes messages from the channel to the transport
    async fn message_writer(
        mut writer: Box<dyn MessageWriter>,
        mut write_rx: mpsc::UnboundedReceiver<Message>,
        pending_requests: Arc<Mutex<PendingRequests>>,
    ) {
        while let Some(message) = write_rx.recv().await {
            if let Err(e) = writer.write_message(&message).await {
                error!("📝 message_writer: Failed to write DAP message: {}", e);
                break;
            }
        }
        pending_requests.lock().await.close();
        debug!("📝 message_writer: Task exiting");
    }

    /// Register a callback invoked every time `event_name` is received
    pub async fn on_event<F>(&self, event_name: &str, callback: F)
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let mut callbacks = self.event_callbacks.write().await;
        callbacks
            .entry(event_name.to_string())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Send a request and wait for its response
    pub async fn send_request(&self, command: &str, arguments: Option<Value>) -> Result<Response> {
        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.pending_requests.lock().await;
            if pending.closed {
                return Err(Error::EngineDisconnected(format!(
                    "Cannot send '{}': connection closed",
                    command
                )));
            }
            pending.senders.insert(seq, tx);
        }

        debug!("✉️  send_request: Sending '{}' request (seq {})", command, seq);
        self.write_tx
            .send(Message::Request(Request {
                seq,
                command: command.to_string(),
                arguments,
            }))
            .map_err(|_| Error::EngineDisconnected("Write channel closed".to_string()))?;

        let response = rx.await.map_err(|_| {
            Error::EngineDisconnected(format!("Connection closed before '{}' response", command))
        })?;

        debug!(
            "✅ send_request: Received response for '{}' (seq {}), success: {}",
            command, seq, response.success
        );
        Ok(response)
    }

    /// Send a request, turning an unsuccessful response into an engine error
    async fn send_checked(&self, command: &str, arguments: Option<Value>) -> Result<Response> {
        let response = self.send_request(command, arguments).await?;

        if !response.success {
            return Err(Error::Engine(format!(
                "{} failed: {}",
                command,
                response.message.as_deref().unwrap_or("no message")
            )));
        }

        Ok(response)
    }

    fn parse_body<T: DeserializeOwned>(command: &str, response: Response) -> Result<T> {
        let body = response
            .body
            .ok_or_else(|| Error::Dap(format!("No body in {} response", command)))?;
        serde_json::from_value(body)
            .map_err(|e| Error::Dap(format!("Failed to parse {} response: {}", command, e)))
    }

    pub async fn initialize(&self, adapter_id: &str) -> Result<Capabilities> {
        let args = InitializeRequestArguments {
            client_id: Some("cell_debugger".to_string()),
            client_name: Some("cell_debugger".to_string()),
            adapter_id: adapter_id.to_string(),
            locale: Some("en-US".to_string()),
            lines_start_at_1: Some(true),
            columns_start_at_1: Some(true),
            path_format: Some("path".to_string()),
            supports_variable_type: Some(true),
            supports_variable_paging: Some(false),
            supports_run_in_terminal_request: Some(false),
        };

        let response = self
            .send_checked("initialize", Some(serde_json::to_value(args)?))
            .await?;

        match response.body {
            Some(body) => serde_json::from_value(body)
                .map_err(|e| Error::Dap(format!("Failed to parse capabilities: {}", e))),
            None => Ok(Capabilities::default()),
        }
    }

    pub async fn attach(&self, args: &AttachRequestArguments) -> Result<()> {
        self.send_checked("attach", Some(serde_json::to_value(args)?))
            .await?;
        Ok(())
    }

    pub async fn configuration_done(&self) -> Result<()> {
        self.send_checked("configurationDone", None).await?;
        Ok(())
    }

    pub async fn set_breakpoints(
        &self,
        source: Source,
        breakpoints: Vec<SourceBreakpoint>,
    ) -> Result<Vec<Breakpoint>> {
        debug!(
            "🔧 set_breakpoints: {:?}, {} breakpoints",
            source.path,
            breakpoints.len()
        );

        let args = SetBreakpointsArguments {
            source,
            breakpoints: Some(breakpoints),
            source_modified: Some(false),
        };

        #[derive(serde::Deserialize)]
        struct SetBreakpointsResponse {
            breakpoints: Vec<Breakpoint>,
        }

        let response = self
            .send_checked("setBreakpoints", Some(serde_json::to_value(args)?))
            .await?;
        let body: SetBreakpointsResponse = Self::parse_body("setBreakpoints", response)?;
        Ok(body.breakpoints)
    }

    pub async fn continue_execution(&self, thread_id: i64) -> Result<()> {
        let args = ThreadArguments { thread_id };
        self.send_checked("continue", Some(serde_json::to_value(args)?))
            .await?;
        Ok(())
    }

    pub async fn next(&self, thread_id: i64) -> Result<()> {
        let args = ThreadArguments { thread_id };
        self.send_checked("next", Some(serde_json::to_value(args)?))
            .await?;
        Ok(())
    }

    pub async fn step_in(&self, thread_id: i64) -> Result<()> {
        let args = ThreadArguments { thread_id };
        self.send_checked("stepIn", Some(serde_json::to_value(args)?))
            .await?;
        Ok(())
    }

    pub async fn step_out(&self, thread_id: i64) -> Result<()> {
        let args = ThreadArguments { thread_id };
        self.send_checked("stepOut", Some(serde_json::to_value(args)?))
            .await?;
        Ok(())
    }

    pub async fn pause(&self, thread_id: i64) -> Result<()> {
        let args = ThreadArguments { thread_id };
        self.send_checked("pause", Some(serde_json::to_value(args)?))
            .await?;
        Ok(())
    }

    pub async fn threads(&self) -> Result<Vec<Thread>> {
        #[derive(serde::Deserialize)]
        struct ThreadsResponse {
            threads: Vec<Thread>,
        }

        let response = self.send_checked("threads", None).await?;
        let body: ThreadsResponse = Self::parse_body("threads", response)?;
        Ok(body.threads)
    }

    pub async fn stack_trace(&self, thread_id: i64) -> Result<Vec<StackFrame>> {
        let args = StackTraceArguments {
            thread_id,
            start_frame: None,
            levels: None,
        };

        #[derive(serde::Deserialize)]
        struct StackTraceResponse {
            #[serde(rename = "stackFrames")]
            stack_frames: Vec<StackFrame>,
        }

        let response = self
            .send_checked("stackTrace", Some(serde_json::to_value(args)?))
            .await?;
        let body: StackTraceResponse = Self::parse_body("stackTrace", response)?;
        Ok(body.stack_frames)
    }

    pub async fn scopes(&self, frame_id: i64) -> Result<Vec<Scope>> {
        #[derive(serde::Deserialize)]
        struct ScopesResponse {
            scopes: Vec<Scope>,
        }

        let args = ScopesArguments { frame_id };
        let response = self
            .send_checked("scopes", Some(serde_json::to_value(args)?))
            .await?;
        let body: ScopesResponse = Self::parse_body("scopes", response)?;
        Ok(body.scopes)
    }

    pub async fn variables(&self, variables_reference: i64) -> Result<Vec<Variable>> {
        #[derive(serde::Deserialize)]
        struct VariablesResponse {
            variables: Vec<Variable>,
        }

        let args = VariablesArguments {
            variables_reference,
        };
        let response = self
            .send_checked("variables", Some(serde_json::to_value(args)?))
            .await?;
        let body: VariablesResponse = Self::parse_body("variables", response)?;
        Ok(body.variables)
    }

    pub async fn evaluate(
        &self,
        expression: &str,
        frame_id: Option<i64>,
        context: &str,
    ) -> Result<EvaluateResponseBody> {
        let args = EvaluateArguments {
            expression: expression.to_string(),
            frame_id,
            context: Some(context.to_string()),
        };

        let response = self
            .send_checked("evaluate", Some(serde_json::to_value(args)?))
            .await?;
        Self::parse_body("evaluate", response)
    }

    pub async fn disconnect(&self, terminate_debuggee: bool) -> Result<()> {
        let args = DisconnectArguments {
            restart: None,
            terminate_debuggee: Some(terminate_debuggee),
        };
        let response = self
            .send_request("disconnect", Some(serde_json::to_value(args)?))
            .await?;

        if !response.success {
            warn!("Disconnect failed: {:?}", response.message);
        }

        Ok(())
    }
}
