//! Nyx debug adapter
//!
//! Bridges Debug Adapter Protocol clients (editors) to the Nyx runtime's
//! newline-delimited JSON debug socket.

pub mod bridge;
pub mod commands;
pub mod common;
pub mod dap;
pub mod runtime;

// Re-export commonly used types for tests
pub use common::{Error, Result};
