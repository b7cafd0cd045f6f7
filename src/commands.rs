//! CLI command definitions
//!
//! Defines the clap commands for the adapter binary.

use clap::Subcommand;

use crate::bridge::Mode;

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Speak DAP over stdin/stdout (what editors launch by default)
    Serve,

    /// Accept DAP clients over TCP, one session per connection
    Listen {
        /// Port to listen on
        #[arg(long, short, default_value_t = 4711)]
        port: u16,
    },
}

impl Commands {
    /// Transport mode selected by this command
    pub fn mode(&self) -> Mode {
        match self {
            Commands::Serve => Mode::Stdio,
            Commands::Listen { port } => Mode::Listen { port: *port },
        }
    }
}
