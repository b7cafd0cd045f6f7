//! Nyx runtime side of the bridge
//!
//! Everything that talks to the runtime process: spawning and supervising
//! it, connecting to its debug socket, and framing the newline-delimited
//! JSON it speaks.

pub mod connector;
pub mod framer;
pub mod protocol;
pub mod supervisor;
pub mod transport;

pub use connector::RetryPolicy;
pub use protocol::{RuntimeCommand, RuntimeEvent, RuntimeMessage};
pub use supervisor::RuntimeProcess;
pub use transport::RuntimeTransport;

/// Notification from one of the runtime-side tasks
///
/// The socket reader, both output pipes and the process wait task all post
/// into one ordered inbox per session.
#[derive(Debug)]
pub enum RuntimeInput {
    /// A well-formed message from the debug socket
    Message(RuntimeMessage),
    /// A line that was not valid JSON or not a known message shape
    ProtocolViolation(String),
    /// The socket failed mid-session
    SocketError(String),
    /// The runtime closed the socket
    SocketClosed,
    /// A chunk the process wrote to stdout or stderr
    ProcessOutput { category: &'static str, text: String },
    /// The process is gone
    ProcessExited { code: Option<i32> },
}
