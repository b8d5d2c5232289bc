//! # alert-cli
//!
//! The `alert` command: builds a message from command-line arguments and
//! hands it to the local alerter daemon over its Unix socket.
//!
//! ```text
//! alert "Backup" "nightly backup failed" -l error -f host:db1
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod client;
pub mod error;

pub use cli::{Cli, DEFAULT_SOCKET};
pub use error::CliError;
