pub mod dispatcher;

use crate::config::DebuggerConfig;
use crate::dap::transport_trait::{MessageReader, MessageWriter};
use crate::dap::types::{Message, SeqCounter};
use crate::debug::{DebugSession, EventPublisher, SessionHandle, SessionParts};
use crate::engine::{DebugEngine, EventReceiver};
use crate::source::CellCompiler;
use crate::{Error, Result};
use dispatcher::Dispatcher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Upper bound on writing out queued events once the control channel closed.
const EVENT_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// Serves one debug session over a kernel control channel.
///
/// Replies go to `replies` in request order; events go to `events`
/// from a separate task so they are never held up by a slow request.
pub struct KernelDebugServer {
    reader: Box<dyn MessageReader>,
    replies: Box<dyn MessageWriter>,
    events: Box<dyn MessageWriter>,
    event_rx: mpsc::UnboundedReceiver<Message>,
    dispatcher: Dispatcher,
    session: SessionHandle,
}

impl KernelDebugServer {
    pub fn new(
        config: DebuggerConfig,
        engine: Arc<dyn DebugEngine>,
        engine_events: EventReceiver,
        compiler: Arc<dyn CellCompiler>,
        reader: Box<dyn MessageReader>,
        replies: Box<dyn MessageWriter>,
        events: Box<dyn MessageWriter>,
    ) -> Self {
        let seq = SeqCounter::new();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let session = DebugSession::spawn(
            SessionParts {
                config,
                engine,
                compiler,
                publisher: EventPublisher::new(seq.clone(), event_tx),
            },
            engine_events,
        );

        Self {
            reader,
            replies,
            events,
            event_rx,
            dispatcher: Dispatcher::new(session.clone(), seq),
            session,
        }
    }

    pub fn session(&self) -> SessionHandle {
        self.session.clone()
    }

    /// Reads requests until the control channel closes.
    pub async fn run(self) -> Result<()> {
        let KernelDebugServer {
            mut reader,
            mut replies,
            mut events,
            mut event_rx,
            dispatcher,
            session,
        } = self;

        info!("🚀 Debug server started (session {})", session.id());

        let (flush_tx, mut flush_rx) = oneshot::channel::<()>();
        let mut event_writer = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    event = event_rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                    _ = &mut flush_rx => {
                        // senders outlive the server; write what is queued and stop
                        while let Ok(event) = event_rx.try_recv() {
                            if let Err(e) = events.write_message(&event).await {
                                error!("Failed to write event: {}", e);
                                break;
                            }
                        }
                        break;
                    }
                };
                if let Err(e) = events.write_message(&event).await {
                    error!("Failed to write event: {}", e);
                    break;
                }
            }
        });

        let result = loop {
            let frame = match reader.read_frame().await {
                Ok(frame) => frame,
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    info!("Control channel closed");
                    break Ok(());
                }
                Err(Error::Protocol(e)) => {
                    warn!("Skipping unreadable frame: {}", e);
                    continue;
                }
                Err(e) => {
                    error!("Failed to read control message: {}", e);
                    break Err(e);
                }
            };

            if let Some(response) = dispatcher.dispatch_frame(&frame).await {
                if let Err(e) = replies.write_message(&Message::Response(response)).await {
                    error!("Failed to write response: {}", e);
                    break Err(e);
                }
            }
        };

        session.shutdown().await;
        let _ = flush_tx.send(());
        if tokio::time::timeout(EVENT_FLUSH_TIMEOUT, &mut event_writer)
            .await
            .is_err()
        {
            warn!("Events still pending after {:?}, dropping them", EVENT_FLUSH_TIMEOUT);
            event_writer.abort();
        }
        debug!("Debug server stopped");
        result
    }
}
