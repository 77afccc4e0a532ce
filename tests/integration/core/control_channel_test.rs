//! The whole server over in-memory streams: framed requests in, framed
//! replies and events out.

use cell_debugger::dap::transport::{decode_message, DapReader, DapWriter, SharedWriter};
use cell_debugger::dap::transport_trait::MessageReader;
use cell_debugger::dap::types::{Event, Message, Request, Response};
use cell_debugger::engine::event_channel;
use cell_debugger::{DebuggerConfig, KernelDebugServer};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

#[path = "../../helpers/mod.rs"]
mod helpers;
use helpers::sim_engine::{SimCompiler, SimEngine, MAIN_THREAD};

/// The kernel's side of the control channel.
struct ControlClient {
    reader: DapReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    seq: i64,
    backlog: Vec<Message>,
}

struct Running {
    client: ControlClient,
    engine: Arc<SimEngine>,
    server: JoinHandle<cell_debugger::Result<()>>,
    _dir: TempDir,
}

fn start_server() -> Running {
    let dir = TempDir::new().unwrap();
    let config = DebuggerConfig {
        tmp_file_prefix: format!("{}/", dir.path().display()),
        ..DebuggerConfig::default()
    };

    let (client_side, server_side) = tokio::io::duplex(256 * 1024);
    let (client_read, client_write) = tokio::io::split(client_side);
    let (server_read, server_write) = tokio::io::split(server_side);

    let (engine_tx, engine_rx) = event_channel();
    let engine = Arc::new(SimEngine::new(engine_tx));
    let compiler = Arc::new(SimCompiler::new(engine.clone()));
    let output = SharedWriter::new(Box::new(DapWriter::new(server_write)));

    let server = KernelDebugServer::new(
        config,
        engine.clone(),
        engine_rx,
        compiler,
        Box::new(DapReader::new(server_read)),
        Box::new(output.clone()),
        Box::new(output),
    );

    Running {
        client: ControlClient {
            reader: DapReader::new(client_read),
            writer: client_write,
            seq: 0,
            backlog: Vec::new(),
        },
        engine,
        server: tokio::spawn(server.run()),
        _dir: dir,
    }
}

impl ControlClient {
    async fn send_raw(&mut self, payload: &str) {
        let frame = format!("Content-Length: {}\r\n\r\n{}", payload.len(), payload);
        self.writer.write_all(frame.as_bytes()).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Sends a request without waiting for its reply.
    async fn send_request(&mut self, command: &str, arguments: Value) {
        self.seq += 1;
        let request = Message::Request(Request {
            seq: self.seq,
            command: command.to_string(),
            arguments: Some(arguments),
        });
        self.send_raw(&serde_json::to_string(&request).unwrap()).await;
    }

    async fn read_message(&mut self) -> Message {
        let frame = tokio::time::timeout(Duration::from_secs(5), self.reader.read_frame())
            .await
            .expect("timed out waiting for the server")
            .expect("server closed the channel");
        decode_message(&frame).unwrap()
    }

    async fn response_to(&mut self, request_seq: i64) -> Response {
        loop {
            match self.read_message().await {
                Message::Response(response) if response.request_seq == request_seq => {
                    return response
                }
                other => self.backlog.push(other),
            }
        }
    }

    async fn request(&mut self, command: &str, arguments: Value) -> Response {
        self.send_request(command, arguments).await;
        self.response_to(self.seq).await
    }

    async fn ok(&mut self, command: &str, arguments: Value) -> Value {
        let response = self.request(command, arguments).await;
        assert!(response.success, "{} failed: {:?}", command, response.message);
        response.body.unwrap_or(Value::Null)
    }

    async fn expect_event(&mut self, name: &str) -> Event {
        if let Some(pos) = self
            .backlog
            .iter()
            .position(|m| matches!(m, Message::Event(e) if e.event == name))
        {
            if let Message::Event(event) = self.backlog.remove(pos) {
                return event;
            }
        }
        loop {
            match self.read_message().await {
                Message::Event(event) if event.event == name => return event,
                other => self.backlog.push(other),
            }
        }
    }
}

#[tokio::test]
async fn test_debugging_a_cell_over_the_wire() {
    let Running {
        mut client,
        engine,
        server,
        _dir,
    } = start_server();

    let caps = client
        .ok("initialize", json!({"clientID": "jupyterlab", "adapterID": "xcpp17"}))
        .await;
    assert_eq!(caps["supportsConfigurationDoneRequest"], true);

    client.ok("attach", json!({})).await;
    client.expect_event("initialized").await;
    client.ok("configurationDone", json!({})).await;

    let dumped = client
        .ok("dumpCell", json!({"code": "int a = 1;\nint b = a + 1;"}))
        .await;
    let path = dumped["sourcePath"].as_str().unwrap().to_string();

    let bps = client
        .ok(
            "setBreakpoints",
            json!({"source": {"path": path}, "breakpoints": [{"line": 2}], "sourceModified": false}),
        )
        .await;
    assert_eq!(bps["breakpoints"][0]["verified"], true);

    engine.run_function("input_line_1");
    let stopped = client.expect_event("stopped").await;
    assert_eq!(stopped.body.unwrap()["reason"], "breakpoint");

    let trace = client.ok("stackTrace", json!({"threadId": MAIN_THREAD})).await;
    assert_eq!(trace["stackFrames"][0]["source"]["path"], path.as_str());

    client.ok("continue", json!({"threadId": MAIN_THREAD})).await;
    client.ok("disconnect", json!({})).await;
    assert!(engine.calls().contains(&"detach".to_string()));

    drop(client);
    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_malformed_frame_does_not_stop_the_server() {
    let Running { mut client, .. } = start_server();

    client.send_raw(r#"{"seq":9,"type":"request","command":"#).await;
    let failure = client.response_to(0).await;
    assert!(!failure.success);
    assert_eq!(failure.body.unwrap()["kind"], "protocol");

    let info = client.ok("debugInfo", json!({})).await;
    assert_eq!(info["isStarted"], false);
}

#[tokio::test]
async fn test_unknown_command_fails_uniformly() {
    let Running { mut client, .. } = start_server();

    let response = client.request("copyToGlobals", json!({})).await;
    assert!(!response.success);
    assert_eq!(response.command, "copyToGlobals");
    assert!(response.message.unwrap().contains("Unknown command"));
    assert_eq!(response.body.unwrap()["error"]["id"], 1001);
}

#[tokio::test]
async fn test_state_error_reply_shape() {
    let Running { mut client, .. } = start_server();
    client.ok("initialize", json!({"adapterID": "xcpp17"})).await;

    let response = client.request("stepIn", json!({"threadId": 1})).await;
    assert!(!response.success);
    assert!(response.message.is_some());
    assert_eq!(response.body.unwrap()["kind"], "state");
}

#[tokio::test]
async fn test_reply_sequence_numbers_increase() {
    let Running { mut client, .. } = start_server();

    let first = client.request("debugInfo", json!({})).await;
    let second = client.request("debugInfo", json!({})).await;
    assert_eq!(first.request_seq, 1);
    assert_eq!(second.request_seq, 2);
    assert!(second.seq > first.seq);
}

#[tokio::test]
async fn test_channel_close_detaches_engine() {
    let Running {
        mut client,
        engine,
        server,
        ..
    } = start_server();

    client.ok("initialize", json!({"adapterID": "xcpp17"})).await;
    client.ok("attach", json!({})).await;
    assert!(engine.is_attached());

    drop(client);
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!engine.is_attached());
    assert!(engine.calls().contains(&"detach".to_string()));
}

#[tokio::test]
async fn test_events_queued_at_channel_close_are_delivered() {
    let Running {
        mut client, server, ..
    } = start_server();
    client.ok("initialize", json!({"adapterID": "xcpp17"})).await;

    client.send_request("attach", json!({})).await;
    client.writer.shutdown().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let mut events = Vec::new();
    while let Ok(Ok(frame)) =
        tokio::time::timeout(Duration::from_secs(1), client.reader.read_frame()).await
    {
        if let Message::Event(event) = decode_message(&frame).unwrap() {
            events.push(event.event);
        }
    }
    assert!(events.contains(&"initialized".to_string()), "got {:?}", events);
}
