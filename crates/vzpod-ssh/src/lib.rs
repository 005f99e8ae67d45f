//! SSH-backed guest exec channel.
//!
//! Streams a command into a running VM with or without a TTY. The guest
//! image is expected to run an SSH server reachable on port 22 with
//! password credentials; host-key verification is disabled (the accepted
//! key's fingerprint is logged on first connect).

mod cmd;
mod error;
mod io;
mod session;

pub use cmd::{build_exec_command_string, build_export_env_command};
pub use error::{Result, SshError};
pub use io::{default_term_size, terminal_type, ExecIO, TermSize, CONSOLE_SIZE_TIMEOUT};
pub use session::{dial_guest, GuestConnection, SshCredentials};
