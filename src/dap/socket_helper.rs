/// Helper functions for reaching a socket-listening debug engine (lldb-dap)
use crate::{Error, Result};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Find an available TCP port on the given host
pub fn find_free_port(host: &str) -> Result<u16> {
    // Port 0 lets the OS pick
    let listener = std::net::TcpListener::bind((host, 0))
        .map_err(|e| Error::Process(format!("Failed to bind to {}: {}", host, e)))?;

    let port = listener
        .local_addr()
        .map_err(|e| Error::Process(format!("Failed to get local address: {}", e)))?
        .port();

    debug!("Found free port: {}", port);
    Ok(port)
}

/// Connect to a TCP socket, retrying every 100ms until `timeout` elapses.
///
/// The engine process needs a moment after spawning before it listens.
pub async fn connect_with_retry(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let start = std::time::Instant::now();
    let retry_interval = Duration::from_millis(100);

    info!("Connecting to {}:{} (timeout: {:?})", host, port, timeout);

    loop {
        match TcpStream::connect((host, port)).await {
            Ok(stream) => {
                info!("Connected to {}:{} after {:?}", host, port, start.elapsed());
                return Ok(stream);
            }
            Err(e) => {
                if start.elapsed() >= timeout {
                    return Err(Error::Process(format!(
                        "Failed to connect to {}:{} after {:?}: {}",
                        host, port, timeout, e
                    )));
                }
                tokio::time::sleep(retry_interval).await;
            }
        }
    }
}
