use crate::dap::transport::decode_message;
use crate::dap::types::{Message, Request, Response, SeqCounter};
use crate::debug::{DebugRequest, SessionHandle};
use crate::Error;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Turns control-channel frames into session requests and their replies.
pub struct Dispatcher {
    session: SessionHandle,
    seq: SeqCounter,
}

impl Dispatcher {
    pub fn new(session: SessionHandle, seq: SeqCounter) -> Self {
        Self { session, seq }
    }

    /// Handles one raw frame. Returns `None` for messages that get no reply
    /// (responses and events sent to us).
    pub async fn dispatch_frame(&self, frame: &str) -> Option<Response> {
        match decode_message(frame) {
            Ok(Message::Request(request)) => Some(self.dispatch(request).await),
            Ok(other) => {
                debug!("Ignoring non-request message: {:?}", other);
                None
            }
            Err(e) => {
                // Answer with whatever identification the frame still carries
                let raw: Value = serde_json::from_str(frame).unwrap_or(Value::Null);
                let request_seq = raw["seq"].as_i64().unwrap_or(0);
                let command = raw["command"].as_str().unwrap_or("unknown");
                warn!("Malformed control message: {}", e);
                Some(Response::failure(
                    self.seq.next(),
                    request_seq,
                    command,
                    &Error::Protocol(e.to_string()),
                ))
            }
        }
    }

    pub async fn dispatch(&self, request: Request) -> Response {
        info!("📨 {} (seq {})", request.command, request.seq);

        let result = match DebugRequest::decode(&request.command, request.arguments) {
            Ok(decoded) => self.session.request(decoded).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(body) => Response::success(self.seq.next(), request.seq, &request.command, body),
            Err(e) => {
                warn!("❌ {} (seq {}) failed: {}", request.command, request.seq, e);
                Response::failure(self.seq.next(), request.seq, &request.command, &e)
            }
        }
    }
}
