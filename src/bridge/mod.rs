//! Adapter side of the bridge
//!
//! A session is created per client connection and lives until the client
//! disconnects or the runtime goes away. The server owns the transport to
//! the client; the session owns everything on the runtime side.

pub mod breakpoints;
pub mod handler;
pub mod handles;
pub mod pending;
pub mod server;
pub mod session;

use crate::common::{config::Config, Result};

pub use session::{Session, SessionState};

/// Where the adapter accepts its client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One client over stdin/stdout
    Stdio,
    /// Any number of clients over TCP
    Listen { port: u16 },
}

/// Run the adapter until its client(s) go away
pub async fn run(config: Config, mode: Mode) -> Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        ?mode,
        "Starting Nyx debug adapter"
    );

    match mode {
        Mode::Stdio => server::serve_stdio(config).await,
        Mode::Listen { port } => server::listen(config, port).await,
    }
}
