use super::session::SessionCommand;
use crate::dap::types::{Event, Message, SeqCounter, StoppedEventBody};
use crate::engine::{EngineEvent, EventReceiver};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Emits protocol events onto the output channel.
///
/// Sending never blocks; the receiving side is drained by the server's
/// event writer task.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    seq: SeqCounter,
    tx: mpsc::UnboundedSender<Message>,
}

impl EventPublisher {
    pub fn new(seq: SeqCounter, tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { seq, tx }
    }

    pub fn publish(&self, event: &str, body: Option<Value>) {
        let message = Message::Event(Event {
            seq: self.seq.next(),
            event: event.to_string(),
            body,
        });

        if self.tx.send(message).is_err() {
            warn!("Event '{}' dropped: output channel closed", event);
        }
    }

    pub fn initialized(&self) {
        self.publish("initialized", None);
    }

    pub fn stopped(&self, body: StoppedEventBody) {
        info!(
            "⏸️  Stopped: reason={}, thread={:?}",
            body.reason, body.thread_id
        );
        match serde_json::to_value(&body) {
            Ok(body) => self.publish("stopped", Some(body)),
            Err(e) => warn!("Could not encode stopped event: {}", e),
        }
    }

    pub fn continued(&self, thread_id: Option<i64>, all_threads: bool) {
        self.publish(
            "continued",
            Some(json!({
                "threadId": thread_id,
                "allThreadsContinued": all_threads,
            })),
        );
    }

    pub fn exited(&self, exit_code: i64) {
        self.publish("exited", Some(json!({ "exitCode": exit_code })));
    }

    pub fn terminated(&self) {
        self.publish("terminated", None);
    }

    pub fn output(&self, category: &str, output: &str) {
        self.publish(
            "output",
            Some(json!({
                "category": category,
                "output": output,
            })),
        );
    }

    /// Publishes the protocol event matching one engine notification.
    pub fn engine_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::Stopped {
                reason,
                thread_id,
                description,
                all_threads_stopped,
            } => self.stopped(StoppedEventBody {
                reason: reason.as_str().to_string(),
                description: description.clone(),
                thread_id: *thread_id,
                all_threads_stopped: *all_threads_stopped,
            }),
            EngineEvent::Continued {
                thread_id,
                all_threads,
            } => self.continued(*thread_id, *all_threads),
            EngineEvent::Exited { exit_code } => self.exited(*exit_code),
            EngineEvent::Terminated => self.terminated(),
            EngineEvent::Output { category, output } => self.output(category, output),
        }
    }
}

/// Moves engine notifications to the session and the output channel.
///
/// The session is told first so that a client reacting to the published
/// event already finds the session in the matching state.
pub async fn pump(
    mut events: EventReceiver,
    publisher: EventPublisher,
    session: mpsc::UnboundedSender<SessionCommand>,
) {
    while let Some(event) = events.recv().await {
        debug!("Engine event: {:?}", event);
        if session.send(SessionCommand::Engine(event.clone())).is_err() {
            debug!("Session gone, publishing engine event only");
        }
        publisher.engine_event(&event);
    }
    debug!("Engine event stream closed");
}
