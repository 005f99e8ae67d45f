//! Dialing guests and running commands over SSH sessions.

use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect, Pty};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::cmd::{build_exec_command_string, build_export_env_command};
use crate::error::{Result, SshError};
use crate::io::{terminal_type, ExecIO};
use vzpod_error::CommonError;

/// Interval between `keepalive@openssh.com` requests.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Read buffer for stdin pumping.
const STDIN_BUF_SIZE: usize = 32 * 1024;

/// Password credentials for the guest's SSH server.
#[derive(Debug, Clone)]
pub struct SshCredentials {
    /// Login user.
    pub user: String,
    /// Login password.
    pub password: String,
}

struct ClientHandler;

#[async_trait::async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh_keys::key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        // Host-key verification is disabled; surface the fingerprint so
        // operators can at least observe what was accepted.
        tracing::debug!(
            fingerprint = %server_public_key.fingerprint(),
            "Accepting guest host key without verification"
        );
        Ok(true)
    }
}

/// An authenticated SSH connection into a guest.
pub struct GuestConnection {
    handle: Handle<ClientHandler>,
}

/// Connects and authenticates to `addr` (`host:port`).
///
/// The connection sends protocol keepalives every 30 s for its lifetime.
/// Cancelling `cancel` aborts an in-flight dial and, later, forces any
/// session blocked on the connection to unblock.
///
/// # Errors
///
/// Returns `Cancelled` when the token fires first, an authentication
/// error when the guest rejects the credentials, or a protocol error.
pub async fn dial_guest(
    addr: &str,
    credentials: &SshCredentials,
    cancel: &CancellationToken,
) -> Result<GuestConnection> {
    let config = Arc::new(client::Config {
        keepalive_interval: Some(KEEPALIVE_INTERVAL),
        ..client::Config::default()
    });

    let mut handle = tokio::select! {
        () = cancel.cancelled() => return Err(CommonError::Cancelled.into()),
        connected = client::connect(config, addr, ClientHandler) => connected?,
    };

    let authenticated = handle
        .authenticate_password(&credentials.user, &credentials.password)
        .await?;
    if !authenticated {
        return Err(SshError::AuthenticationFailed(credentials.user.clone()));
    }

    Ok(GuestConnection { handle })
}

impl GuestConnection {
    /// Executes a command in the guest, streaming through the I/O bundle.
    ///
    /// `sh -c`-shaped commands run as a single exec; other shapes open an
    /// interactive shell and write env exports plus the command words to
    /// its stdin. With a TTY the session waits for the command; without
    /// one, stdin is drained, the write half closed, then the session
    /// waited. Cancellation wins over any session error.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled`, `ExitStatus` for non-zero exits, or protocol
    /// errors.
    pub async fn exec(
        &self,
        env: &[(String, String)],
        cmd: &[String],
        mut io: ExecIO,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut channel = tokio::select! {
            () = cancel.cancelled() => return Err(CommonError::Cancelled.into()),
            channel = self.handle.channel_open_session() => channel?,
        };

        if let Some(size) = io.console_size().await {
            let modes = [
                (Pty::ECHO, 1),
                (Pty::TTY_OP_ISPEED, 14400),
                (Pty::TTY_OP_OSPEED, 14400),
            ];
            channel
                .request_pty(
                    true,
                    &terminal_type(),
                    u32::from(size.width),
                    u32::from(size.height),
                    0,
                    0,
                    &modes,
                )
                .await?;
        }

        match build_exec_command_string(cmd, env) {
            Some(cmd_str) => {
                channel.exec(true, cmd_str.as_bytes()).await?;
            }
            None => {
                // Shell fallback avoids having to escape arbitrary words.
                channel.request_shell(true).await?;
                for (name, value) in env {
                    let export = build_export_env_command(name, value);
                    channel.data(export.as_bytes()).await?;
                }
                for word in cmd {
                    let line = format!("{word}\n");
                    channel.data(line.as_bytes()).await?;
                }
            }
        }

        if io.stdin.is_none() {
            // Nothing more will be written; let the remote side see EOF so
            // a shell session terminates after running the lines above.
            channel.eof().await?;
        }

        let result = Self::pump_session(&mut channel, io, cancel).await;

        if cancel.is_cancelled() {
            return Err(CommonError::Cancelled.into());
        }
        result
    }

    /// Pumps stdin, resize messages, and channel output until the session
    /// ends.
    async fn pump_session(
        channel: &mut russh::Channel<client::Msg>,
        io: ExecIO,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let ExecIO {
            tty,
            stdin,
            stdout,
            stderr,
            resize,
            ..
        } = io;

        let mut stdin = stdin;
        let mut stdout = stdout;
        let mut stderr = stderr;
        let mut resize = resize;

        let mut stdin_open = stdin.is_some();
        let mut resize_open = tty && resize.is_some();
        let mut exit_status: Option<u32> = None;
        let mut buf = vec![0u8; STDIN_BUF_SIZE];

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(CommonError::Cancelled.into());
                }
                read = async {
                    match stdin.as_mut() {
                        Some(reader) => tokio::io::AsyncReadExt::read(reader, &mut buf).await,
                        None => Ok(0),
                    }
                }, if stdin_open => {
                    match read {
                        Ok(0) => {
                            stdin_open = false;
                            // Close the write half to flush the command.
                            channel.eof().await?;
                        }
                        Ok(n) => channel.data(&buf[..n]).await?,
                        Err(err) => {
                            stdin_open = false;
                            tracing::warn!(error = %err, "Failed to copy stdin to session");
                            channel.eof().await?;
                        }
                    }
                }
                size = async {
                    match resize.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => None,
                    }
                }, if resize_open => {
                    match size {
                        Some(size) => {
                            channel
                                .window_change(u32::from(size.width), u32::from(size.height), 0, 0)
                                .await?;
                        }
                        None => resize_open = false,
                    }
                }
                msg = channel.wait() => {
                    let Some(msg) = msg else { break };
                    match msg {
                        ChannelMsg::Data { ref data } => {
                            if let Some(out) = stdout.as_mut() {
                                out.write_all(data).await?;
                            }
                        }
                        ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                            match (stderr.as_mut(), stdout.as_mut()) {
                                (Some(err_out), _) => err_out.write_all(data).await?,
                                (None, Some(out)) => out.write_all(data).await?,
                                (None, None) => {}
                            }
                        }
                        ChannelMsg::ExitStatus { exit_status: status } => {
                            exit_status = Some(status);
                        }
                        _ => {}
                    }
                }
            }
        }

        if let Some(out) = stdout.as_mut() {
            out.flush().await?;
        }
        if let Some(err_out) = stderr.as_mut() {
            err_out.flush().await?;
        }

        match exit_status {
            Some(0) | None => Ok(()),
            Some(status) => Err(SshError::ExitStatus(status)),
        }
    }

    /// Closes the connection, unblocking any session waiting on it.
    pub async fn close(&self) -> Result<()> {
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await?;
        Ok(())
    }
}
