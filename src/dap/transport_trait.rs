use super::types::Message;
use crate::Result;
use async_trait::async_trait;

/// Receiving half of a Content-Length framed DAP stream.
///
/// Returns the raw JSON payload of one frame so that callers decide how
/// strictly to decode it: the engine client expects well-formed messages,
/// the control channel has to answer malformed ones.
#[async_trait]
pub trait MessageReader: Send {
    async fn read_frame(&mut self) -> Result<String>;
}

/// Sending half of a Content-Length framed DAP stream.
#[async_trait]
pub trait MessageWriter: Send {
    async fn write_message(&mut self, msg: &Message) -> Result<()>;
}
