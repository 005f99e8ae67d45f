//! The I/O bundle attached to an exec and terminal-size helpers.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

/// How long to wait for the first resize message before falling back to
/// the default console size.
pub const CONSOLE_SIZE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default terminal type when `TERM` is unset.
const DEFAULT_TERMINAL_TYPE: &str = "xterm-256color";

/// Default console width in columns.
const DEFAULT_TERM_WIDTH: u16 = 60;

/// Default console height in rows.
const DEFAULT_TERM_HEIGHT: u16 = 120;

/// A terminal size message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermSize {
    /// Columns.
    pub width: u16,
    /// Rows.
    pub height: u16,
}

/// Returns the default console size used when no resize arrives in time.
#[must_use]
pub const fn default_term_size() -> TermSize {
    TermSize {
        width: DEFAULT_TERM_WIDTH,
        height: DEFAULT_TERM_HEIGHT,
    }
}

/// Returns the terminal type from `TERM`, defaulting to xterm-256color.
#[must_use]
pub fn terminal_type() -> String {
    std::env::var("TERM").unwrap_or_else(|_| DEFAULT_TERMINAL_TYPE.to_string())
}

/// The streams and terminal wiring attached to one exec or attach.
pub struct ExecIO {
    /// Whether a PTY is requested.
    pub tty: bool,
    /// Input stream copied into the command's stdin.
    pub stdin: Option<Box<dyn AsyncRead + Send + Unpin>>,
    /// Output stream receiving the command's stdout.
    pub stdout: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    /// Output stream receiving the command's stderr; when absent, stderr
    /// is folded into stdout.
    pub stderr: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    /// Terminal resize messages, first one bootstrapping the console size.
    pub resize: Option<mpsc::Receiver<TermSize>>,
}

impl ExecIO {
    /// An I/O bundle that swallows all output; used by lifecycle hooks.
    #[must_use]
    pub fn discarding() -> Self {
        Self {
            tty: false,
            stdin: None,
            stdout: Some(Box::new(tokio::io::sink())),
            stderr: Some(Box::new(tokio::io::sink())),
            resize: None,
        }
    }

    /// Waits for the console size: the first resize message, or the
    /// default after [`CONSOLE_SIZE_TIMEOUT`]. Non-TTY bundles have no
    /// console size.
    pub async fn console_size(&mut self) -> Option<TermSize> {
        if !self.tty {
            return None;
        }

        let size = match self.resize.as_mut() {
            Some(resize) => {
                match tokio::time::timeout(CONSOLE_SIZE_TIMEOUT, resize.recv()).await {
                    Ok(Some(size)) => size,
                    Ok(None) | Err(_) => {
                        let fallback = default_term_size();
                        tracing::warn!(
                            width = fallback.width,
                            height = fallback.height,
                            "Failed to get terminal size, using default"
                        );
                        fallback
                    }
                }
            }
            None => default_term_size(),
        };

        if size.width == 0 || size.height == 0 {
            return None;
        }
        Some(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_console_size_none_without_tty() {
        let mut io = ExecIO::discarding();
        assert_eq!(io.console_size().await, None);
    }

    #[tokio::test]
    async fn test_console_size_first_resize_wins() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(TermSize {
            width: 80,
            height: 24,
        })
        .await
        .unwrap();

        let mut io = ExecIO {
            tty: true,
            stdin: None,
            stdout: None,
            stderr: None,
            resize: Some(rx),
        };
        assert_eq!(
            io.console_size().await,
            Some(TermSize {
                width: 80,
                height: 24
            })
        );
    }

    #[tokio::test]
    async fn test_console_size_defaults_without_resize_channel() {
        let mut io = ExecIO {
            tty: true,
            stdin: None,
            stdout: None,
            stderr: None,
            resize: None,
        };
        assert_eq!(io.console_size().await, Some(default_term_size()));
    }
}
