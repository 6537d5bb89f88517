//! Local IPC transport.
//!
//! One endpoint per broker: a named pipe restricted by ACL on Windows, a Unix
//! domain socket elsewhere. The wire protocol is newline-delimited JSON with
//! strictly alternating request and response lines.

mod client;
mod codec;
mod server;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

use std::time::Duration;

pub use client::BrokerClient;
pub use codec::{RequestFrame, RequestLineCodec};
pub use server::{PipeServer, serve_connection};

pub const DEFAULT_MAX_CONNECTIONS: usize = 4;
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;
pub const DEFAULT_ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_SOCKET_MODE: u32 = 0o666;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Pipe path (`\\.\pipe\...`) on Windows, socket path elsewhere.
    pub endpoint: String,
    /// Concurrent connection slots. Further clients wait for a free slot.
    pub max_connections: usize,
    /// Longest accepted request line, in bytes.
    pub max_line_bytes: usize,
    /// Pause after a failed accept before trying again.
    pub accept_retry_delay: Duration,
    /// Permission bits of the Unix socket file.
    pub socket_mode: u32,
}

impl TransportConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            accept_retry_delay: DEFAULT_ACCEPT_RETRY_DELAY,
            socket_mode: DEFAULT_SOCKET_MODE,
        }
    }
}

// ─── Platform dispatch ──────────────────────────────────────────────────

#[cfg(unix)]
pub(crate) use unix::{Listener, connect_stream};
#[cfg(windows)]
pub(crate) use windows::{Listener, connect_stream};
