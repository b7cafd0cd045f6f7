//! Debug Adapter Protocol (DAP), adapter side
//!
//! Message types and framing for the editor-facing half of the bridge.

pub mod codec;
pub mod types;

pub use types::*;
