pub mod config;
pub mod dap;
pub mod debug;
pub mod engine;
pub mod error;
pub mod kernel;
pub mod source;

pub use config::DebuggerConfig;
pub use error::Error;
pub use kernel::KernelDebugServer;

use dap::transport::{self, SharedWriter};
use engine::lldb::LldbEngine;
use source::{InputLineCompiler, RecordedHistory};
use std::sync::Arc;

pub type Result<T> = std::result::Result<T, Error>;

/// Serves the debugger over stdin/stdout, driving lldb-dap attached to the kernel.
pub async fn serve(config: DebuggerConfig) -> Result<()> {
    let (events_tx, events_rx) = engine::event_channel();
    let engine = LldbEngine::start(&config.engine, &config.unit_name_prefix, events_tx).await?;
    let compiler = InputLineCompiler::new(
        config.unit_name_prefix.clone(),
        config.first_unit_index,
        Arc::new(RecordedHistory::new()),
    );

    let (reader, writer) = transport::stdio();
    let writer = SharedWriter::new(Box::new(writer));

    let server = KernelDebugServer::new(
        config,
        Arc::new(engine),
        events_rx,
        Arc::new(compiler),
        Box::new(reader),
        Box::new(writer.clone()),
        Box::new(writer),
    );
    server.run().await
}
