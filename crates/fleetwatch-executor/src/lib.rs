//! Remote command execution for fleetwatch agents.
//!
//! Provides:
//! - `CommandExecutor` - bounded-timeout shell execution with partial-output capture
//! - `CommandResponse` - the response document sent back to the hub
//! - Interpreter selection for Unix and Windows

pub mod command;
pub mod response;
pub mod shell;

pub use command::{CommandExecutor, CommandOutcome, DEFAULT_TIMEOUT_SECS, ExecError, ExecFailure};
pub use response::{CommandResponse, ResponseBody, ResponseStatus, encode_payload};
pub use shell::get_shell_command;
