//! # DORA Engine application
//!
//! Command-line front end of the engine: argument parsing, logging
//! initialisation and the `run`, `validate` and `collect` commands.

pub mod cli;
pub mod commands;
pub mod logging;

pub use cli::{Cli, Command, CommonArgs, LogFormat};
pub use commands::Status;
