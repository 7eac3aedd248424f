//! SSH client connection driver.
//!
//! [`SshClient`] is the outer pump of the connection core: it owns the TCP
//! stream, feeds received bytes into the [`Session`] state machine and
//! drains the session's outbound queue, until the handshake reaches the
//! authenticating state or fails.
//!
//! Every outbound packet of the handshake is flushed to the wire before the
//! corresponding inbound packet is awaited; the pump writes before it reads.
//!
//! # Example
//!
//! ```rust,no_run
//! use skerry_proto::ssh::client::SshClient;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = SshClient::connect("127.0.0.1:22").await?;
//! client.request_service("ssh-userauth").await?;
//! println!("server: {:?}", client.session().peer_banner());
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use skerry_platform::{SkerryError, SkerryResult};

use crate::ssh::session::{Session, SessionConfig, SessionState};

/// SSH client configuration.
#[derive(Debug, Clone)]
pub struct SshClientConfig {
    /// TCP connection timeout.
    pub connect_timeout: Duration,
    /// Protocol-level session configuration.
    pub session: SessionConfig,
}

impl Default for SshClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            session: SessionConfig::default(),
        }
    }
}

/// SSH client: a connected stream plus the session state machine.
#[derive(Debug)]
pub struct SshClient {
    stream: TcpStream,
    session: Session,
    server_addr: String,
    /// Bytes received but not yet consumed by the session's decoder.
    pending: Vec<u8>,
}

impl SshClient {
    /// Connects to an SSH server and runs the handshake to the
    /// ready-for-authentication state.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use skerry_proto::ssh::client::SshClient;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let client = SshClient::connect("server:22").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(addr: &str) -> SkerryResult<Self> {
        Self::connect_with_config(addr, SshClientConfig::default()).await
    }

    /// Connects with custom configuration.
    pub async fn connect_with_config(addr: &str, config: SshClientConfig) -> SkerryResult<Self> {
        Self::connect_with_session(addr, config.connect_timeout, Session::new(config.session))
            .await
    }

    /// Connects using a caller-prepared session, so callbacks can be
    /// installed before the handshake starts.
    pub async fn connect_with_session(
        addr: &str,
        connect_timeout: Duration,
        mut session: Session,
    ) -> SkerryResult<Self> {
        session.begin_connect();

        let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await
        {
            Ok(Ok(stream)) => {
                session.on_connected(Ok(()));
                stream
            }
            Ok(Err(e)) => {
                session.on_connected(Err(e));
                return Err(session_error(&session));
            }
            Err(_) => {
                session.on_connected(Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connection timed out",
                )));
                return Err(session_error(&session));
            }
        };

        let mut client = Self {
            stream,
            session,
            server_addr: addr.to_string(),
            pending: Vec::new(),
        };
        client.run_handshake().await?;
        Ok(client)
    }

    /// Adopts an already-open stream (the pre-opened descriptor path) and
    /// runs the handshake on it.
    pub async fn connect_stream(stream: TcpStream, mut session: Session) -> SkerryResult<Self> {
        let server_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();

        session.begin_connect();
        session.on_connected(Ok(()));

        let mut client = Self {
            stream,
            session,
            server_addr,
            pending: Vec::new(),
        };
        client.run_handshake().await?;
        Ok(client)
    }

    /// Pumps the socket until the handshake completes or fails.
    async fn run_handshake(&mut self) -> SkerryResult<()> {
        self.pump_until(|session| session.state() == SessionState::Authenticating)
            .await?;

        if self.session.state() == SessionState::Authenticating {
            debug!("Handshake complete with {}", self.server_addr);
            Ok(())
        } else {
            Err(session_error(&self.session))
        }
    }

    /// Requests a named service (typically "ssh-userauth") over the
    /// now-encrypted transport and waits for the server to accept it.
    pub async fn request_service(&mut self, service: &str) -> SkerryResult<()> {
        self.session.request_service(service)?;
        self.pump_until(|session| session.service_accepted()).await?;

        if self.session.service_accepted() {
            Ok(())
        } else {
            Err(session_error(&self.session))
        }
    }

    /// Write-then-read event loop. Exits when `done` holds or the session
    /// entered its terminal error state; the caller inspects which.
    async fn pump_until(&mut self, done: impl Fn(&Session) -> bool) -> SkerryResult<()> {
        loop {
            while self.session.has_outbound() {
                let out = self.session.take_outbound();
                self.stream.write_all(&out).await.map_err(SkerryError::Io)?;
                self.session.advance();
            }

            if done(&self.session) || self.session.state() == SessionState::Error {
                return Ok(());
            }

            let mut buf = [0u8; 4096];
            let n = self.stream.read(&mut buf).await.map_err(SkerryError::Io)?;
            if n == 0 {
                self.session.on_exception(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                ));
                continue;
            }

            self.pending.extend_from_slice(&buf[..n]);
            let consumed = self.session.on_data(&self.pending);
            self.pending.drain(..consumed);
        }
    }

    /// Sends SSH_MSG_DISCONNECT and closes the stream. The session inside
    /// can be reused for a fresh connect.
    pub async fn disconnect(&mut self) -> SkerryResult<()> {
        self.session.queue_disconnect();
        let out = self.session.take_outbound();
        if !out.is_empty() {
            let _ = self.stream.write_all(&out).await;
        }
        let _ = self.stream.shutdown().await;
        Ok(())
    }

    /// Returns the server address this client connected to.
    pub fn server_address(&self) -> &str {
        &self.server_addr
    }

    /// Returns the session state machine.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Returns the session state machine mutably.
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Packed OpenSSH peer version, `0` when the peer is not OpenSSH.
    pub fn openssh_version(&self) -> u32 {
        self.session.openssh_version()
    }

    /// The issue banner the server provided after authentication, if any.
    pub fn issue_banner(&self) -> Option<&str> {
        self.session.issue_banner()
    }
}

/// Converts the session's stored diagnostic into an error value.
fn session_error(session: &Session) -> SkerryError {
    SkerryError::Protocol(
        session
            .last_error()
            .unwrap_or("connection failed")
            .to_string(),
    )
}
