//! SSH client session state machine.
//!
//! A [`Session`] drives a freshly opened transport from banner exchange
//! through version negotiation, key exchange, the Diffie-Hellman handshake,
//! session-key installation and the crossover to encrypted traffic, leaving
//! the connection ready for user authentication.
//!
//! The session performs no I/O of its own. The socket layer feeds it events
//! through three sinks — [`Session::on_connected`], [`Session::on_data`],
//! [`Session::on_exception`] — and drains queued wire bytes with
//! [`Session::take_outbound`]. Every progress event re-enters the single
//! [`Session::advance`] driver, which inspects the current state and
//! performs as many steps as the buffered data allows.
//!
//! The same byte stream carries three successive framings: the banner line,
//! cleartext SSH packets, then encrypted SSH packets. Only one decoder is
//! active at a time and replacement happens synchronously inside `advance`,
//! so no byte is ever mis-framed.
//!
//! # Example
//!
//! ```rust
//! use skerry_proto::ssh::session::{Session, SessionConfig, SessionState};
//!
//! let mut session = Session::new(SessionConfig::default());
//! session.begin_connect();
//! session.on_connected(Ok(()));
//!
//! let consumed = session.on_data(b"SSH-2.0-OpenSSH_7.9p1\r\n");
//! assert_eq!(consumed, 23);
//! assert_eq!(session.state(), SessionState::InitialKex);
//! assert_eq!(session.version(), Some(2));
//! ```

use bytes::{BufMut, BytesMut};
use tracing::{debug, trace, warn};

use skerry_platform::{SkerryError, SkerryResult};
use zeroize::Zeroizing;

use crate::ssh::buffer::{put_mpint, put_string, WireReader};
use crate::ssh::crypto::{CryptoPair, CryptoState, Role};
use crate::ssh::hostkey::HostPublicKey;
use crate::ssh::kex::{AlgorithmSuite, KexInit};
use crate::ssh::kex_dh::{exchange_hash, DhExchange};
use crate::ssh::message::{MessageType, SSH_DISCONNECT_BY_APPLICATION};
use crate::ssh::packet::PacketCodec;
use crate::ssh::version::{version_int, Banner, MAX_BANNER_LENGTH};

/// Connection-level state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Fresh session, no connection attempt yet.
    None,
    /// Socket connect initiated, completion pending.
    Connecting,
    /// Socket is up; waiting for the server banner.
    SocketConnected,
    /// Server banner parsed and stored; analysis pending.
    BannerReceived,
    /// Version negotiated, key exchange in progress.
    InitialKex,
    /// Handshake complete; ready for the authentication layer.
    Authenticating,
    /// Terminal failure; see [`Session::last_error`].
    Error,
}

/// Sub-state of the Diffie-Hellman handshake.
///
/// Advances monotonically `Init → … → Finished` within one handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DhState {
    /// Nothing sent yet.
    Init,
    /// KEXDH_INIT queued, flush pending.
    InitToSend,
    /// KEXDH_INIT on the wire; waiting for KEXDH_REPLY.
    InitSent,
    /// NEWKEYS queued, flush pending.
    NewkeysToSend,
    /// NEWKEYS on the wire; waiting for the peer's NEWKEYS.
    NewkeysSent,
    /// Keys rotated; handshake done.
    Finished,
}

/// Progress of a pending service request.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ServiceState {
    Idle,
    Requested(String),
    Accepted(String),
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Allow protocol major 1 (version selection only; the SSH-1 handshake
    /// itself is not implemented).
    pub allow_ssh1: bool,
    /// Allow protocol major 2.
    pub allow_ssh2: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            allow_ssh1: false,
            allow_ssh2: true,
        }
    }
}

/// User-supplied event handlers. Every field is optional; emission sites are
/// null-safe.
#[derive(Default)]
pub struct SessionCallbacks {
    /// Connection progress, called with milestones in `[0.0, 1.0]`.
    pub progress: Option<Box<dyn FnMut(f32) + Send>>,
}

impl std::fmt::Debug for SessionCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCallbacks")
            .field("progress", &self.progress.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

/// Which decoder currently owns incoming bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decoder {
    BannerLine,
    Packet,
}

/// Temporaries of one Diffie-Hellman handshake.
///
/// Dropping the context releases everything; the secret exponent and shared
/// secret zeroize themselves on drop. The context is dropped on completion
/// and on every failure path, so no DH temporary outlives the handshake.
#[derive(Debug)]
struct DhContext {
    exchange: DhExchange,
    host_key: Option<HostPublicKey>,
    server_public: Option<Vec<u8>>,
    shared_secret: Option<Zeroizing<Vec<u8>>>,
    server_signature: Option<Vec<u8>>,
}

impl DhContext {
    fn new(exchange: DhExchange) -> Self {
        Self {
            exchange,
            host_key: None,
            server_public: None,
            shared_secret: None,
            server_signature: None,
        }
    }
}

/// The SSH client connection state machine.
///
/// Exclusively owned by the caller. Inner buffers and crypto contexts are
/// created lazily and torn down when the session errors out or is reset.
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    callbacks: SessionCallbacks,

    state: SessionState,
    dh_state: DhState,
    decoder: Decoder,
    advancing: bool,

    version: Option<u8>,
    peer_banner: Option<Banner>,
    self_banner: Option<Banner>,
    peer_vendor_version: Option<(u32, u32)>,

    codec: PacketCodec,
    crypto: CryptoPair,
    outbox: BytesMut,

    client_kex: Option<KexInit>,
    server_kex: Option<KexInit>,
    client_kex_payload: Vec<u8>,
    server_kex_payload: Vec<u8>,
    suite: Option<AlgorithmSuite>,
    dh: Option<DhContext>,
    session_id: Option<Vec<u8>>,

    service: ServiceState,
    issue_banner: Option<String>,

    alive: bool,
    connected: bool,
    last_error: Option<String>,
}

impl Session {
    /// Creates a fresh session.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            callbacks: SessionCallbacks::default(),
            state: SessionState::None,
            dh_state: DhState::Init,
            decoder: Decoder::BannerLine,
            advancing: false,
            version: None,
            peer_banner: None,
            self_banner: None,
            peer_vendor_version: None,
            codec: PacketCodec::new(),
            crypto: CryptoPair::new(),
            outbox: BytesMut::new(),
            client_kex: None,
            server_kex: None,
            client_kex_payload: Vec::new(),
            server_kex_payload: Vec::new(),
            suite: None,
            dh: None,
            session_id: None,
            service: ServiceState::Idle,
            issue_banner: None,
            alive: false,
            connected: false,
            last_error: None,
        }
    }

    /// Installs the progress callback.
    pub fn set_progress_callback(&mut self, callback: impl FnMut(f32) + Send + 'static) {
        self.callbacks.progress = Some(Box::new(callback));
    }

    // ---- accessors ----------------------------------------------------

    /// Current connection state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current DH handshake sub-state.
    pub fn dh_state(&self) -> DhState {
        self.dh_state
    }

    /// Negotiated protocol major, once the banner has been analyzed.
    pub fn version(&self) -> Option<u8> {
        self.version
    }

    /// The server's identification banner.
    pub fn peer_banner(&self) -> Option<&Banner> {
        self.peer_banner.as_ref()
    }

    /// The banner this client sent.
    pub fn self_banner(&self) -> Option<&Banner> {
        self.self_banner.as_ref()
    }

    /// The session identifier: the exchange hash of the first handshake.
    pub fn session_id(&self) -> Option<&[u8]> {
        self.session_id.as_deref()
    }

    /// The negotiated algorithm suite, once chosen.
    pub fn algorithms(&self) -> Option<&AlgorithmSuite> {
        self.suite.as_ref()
    }

    /// The KEXINIT this client sent, once the exchange has started.
    pub fn client_kex(&self) -> Option<&KexInit> {
        self.client_kex.as_ref()
    }

    /// The KEXINIT the server sent, once received.
    pub fn server_kex(&self) -> Option<&KexInit> {
        self.server_kex.as_ref()
    }

    /// The name of the accepted service, once the peer confirmed it.
    pub fn accepted_service(&self) -> Option<&str> {
        match &self.service {
            ServiceState::Accepted(name) => Some(name),
            _ => None,
        }
    }

    /// True while the socket is considered live.
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// True once the handshake has completed.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Diagnostic message of the last fatal error.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Packed OpenSSH peer version, `0` when the peer is not OpenSSH.
    ///
    /// Compare with [`version_int`].
    pub fn openssh_version(&self) -> u32 {
        match self.peer_vendor_version {
            Some((major, minor)) => version_int(major, minor, 0),
            None => 0,
        }
    }

    /// The issue banner a higher layer stored, if any.
    pub fn issue_banner(&self) -> Option<&str> {
        self.issue_banner.as_deref()
    }

    /// Stores the post-auth issue banner (called by the auth layer).
    pub fn set_issue_banner(&mut self, banner: String) {
        self.issue_banner = Some(banner);
    }

    /// True once a requested service has been accepted by the peer.
    pub fn service_accepted(&self) -> bool {
        matches!(self.service, ServiceState::Accepted(_))
    }

    // ---- transport driver sinks ---------------------------------------

    /// Marks the start of a connection attempt and emits the first progress
    /// milestone. Resets all handshake state, so a session that previously
    /// disconnected can be reused.
    pub fn begin_connect(&mut self) {
        self.reset();
        self.state = SessionState::Connecting;
        self.alive = true;
        self.set_status(0.2);
        debug!("Socket connecting, now waiting for the callbacks to work");
    }

    /// Socket connect completion callback.
    ///
    /// On success the session starts waiting for the server banner; on
    /// failure it enters the terminal error state.
    pub fn on_connected(&mut self, result: std::io::Result<()>) {
        match result {
            Ok(()) => {
                if self.state == SessionState::Connecting {
                    self.state = SessionState::SocketConnected;
                }
                self.advance();
            }
            Err(e) => {
                self.fail(SkerryError::Io(std::io::Error::new(
                    e.kind(),
                    format!("Connection failed: {}", e),
                )));
            }
        }
    }

    /// Socket exception callback: transitions to the terminal error state.
    pub fn on_exception(&mut self, error: std::io::Error) {
        self.fail(SkerryError::Io(std::io::Error::new(
            error.kind(),
            format!("Socket error: {}", error),
        )));
    }

    /// Feeds received bytes to the active decoder and returns how many were
    /// consumed. The caller retains the unconsumed suffix and re-presents it
    /// together with later data.
    ///
    /// While the banner decoder is active, bytes are consumed only when a
    /// complete line is available; afterwards the packet decoder buffers
    /// everything it is given.
    pub fn on_data(&mut self, data: &[u8]) -> usize {
        match self.decoder {
            Decoder::BannerLine => self.receive_banner(data),
            Decoder::Packet => {
                self.codec.feed(data);
                self.advance();
                data.len()
            }
        }
    }

    /// Takes the wire bytes queued for transmission.
    pub fn take_outbound(&mut self) -> Vec<u8> {
        self.outbox.split().to_vec()
    }

    /// True when queued outbound bytes await the driver.
    pub fn has_outbound(&self) -> bool {
        !self.outbox.is_empty()
    }

    // ---- banner decoder -----------------------------------------------

    /// Scans for the first newline, strips preceding carriage returns and
    /// stores the banner. Consumes zero bytes until the line is complete.
    fn receive_banner(&mut self, data: &[u8]) -> usize {
        for (i, &byte) in data.iter().enumerate() {
            if byte == b'\n' {
                let line = String::from_utf8_lossy(&data[..i]).into_owned();
                let banner = Banner::from_line(&line);
                debug!("Received banner: {}", banner);
                self.peer_banner = Some(banner);
                self.state = SessionState::BannerReceived;
                self.advance();
                return i + 1;
            }
            if i >= MAX_BANNER_LENGTH - 1 {
                self.fail(SkerryError::Protocol(
                    "Receiving banner: too large banner".to_string(),
                ));
                return 0;
            }
        }
        0
    }

    // ---- the state machine driver -------------------------------------

    /// Advances the state machine as far as the buffered data allows.
    ///
    /// Invoked from all three sinks and by the outer pump after it drains
    /// the outbound queue. Never re-enters itself: nested invocations return
    /// immediately.
    pub fn advance(&mut self) {
        if self.advancing {
            return;
        }
        self.advancing = true;
        let result = self.advance_inner();
        self.advancing = false;
        if let Err(e) = result {
            self.fail(e);
        }
    }

    fn advance_inner(&mut self) -> SkerryResult<()> {
        loop {
            match self.state {
                SessionState::None
                | SessionState::Connecting
                | SessionState::SocketConnected => return Ok(()),
                SessionState::BannerReceived => {
                    self.negotiate_version()?;
                    // fall through into the key exchange
                }
                SessionState::InitialKex => {
                    match self.version {
                        Some(2) => {
                            if !self.initial_kex()? {
                                return Ok(());
                            }
                            self.set_status(1.0);
                            self.connected = true;
                        }
                        Some(1) => {
                            return Err(SkerryError::NotSupported(
                                "SSH-1 handshake is not implemented".to_string(),
                            ));
                        }
                        _ => {
                            return Err(SkerryError::InvalidState(
                                "Key exchange without a negotiated version".to_string(),
                            ));
                        }
                    }
                    self.state = SessionState::Authenticating;
                    // deliberately falls through: the Authenticating arm is
                    // where the outer pump observes completion
                }
                SessionState::Authenticating => {
                    self.poll_service()?;
                    return Ok(());
                }
                SessionState::Error => return Ok(()),
            }
        }
    }

    /// Analyzes the stored banner, chooses the protocol version, emits the
    /// client banner and hands the stream over to the packet decoder.
    fn negotiate_version(&mut self) -> SkerryResult<()> {
        let banner = self.peer_banner.clone().ok_or_else(|| {
            SkerryError::InvalidState("Banner state without a stored banner".to_string())
        })?;

        self.set_status(0.4);
        debug!("SSH server banner: {}", banner);

        let dialect = banner.analyze()?;

        if let Some((major, minor)) = banner.vendor_version() {
            debug!("Talking to an OpenSSH server, version {}.{}", major, minor);
            self.peer_vendor_version = Some((major, minor));
        }

        let version = if dialect.ssh2 && self.config.allow_ssh2 {
            2
        } else if dialect.ssh1 && self.config.allow_ssh1 {
            1
        } else {
            return Err(SkerryError::Protocol(format!(
                "No version of SSH protocol usable (banner: {})",
                banner
            )));
        };
        self.version = Some(version);

        // From here on the packet layer owns incoming bytes.
        let client_banner = Banner::client(version);
        self.outbox.put_slice(&client_banner.to_wire_format());
        self.self_banner = Some(client_banner);
        self.decoder = Decoder::Packet;

        self.set_status(0.5);
        self.state = SessionState::InitialKex;
        Ok(())
    }

    /// Runs the v2 initial key exchange. Returns true when the DH handshake
    /// has finished and the crypto has been rotated.
    fn initial_kex(&mut self) -> SkerryResult<bool> {
        if self.server_kex.is_none() {
            let Some(payload) = self.wait_packet(MessageType::KexInit as u8)? else {
                return Ok(false);
            };

            let server_kex = KexInit::from_bytes(&payload)?;
            trace!(
                "Server kex algorithms: {:?}",
                server_kex.kex_algorithms()
            );
            self.set_status(0.6);

            let client_kex = KexInit::new_client_default();
            self.client_kex_payload = client_kex.to_bytes();

            let suite = AlgorithmSuite::negotiate(&client_kex, &server_kex)?;
            debug!("Negotiated kex {} with host key {}", suite.kex, suite.host_key);
            self.suite = Some(suite);
            self.server_kex_payload = payload;
            self.server_kex = Some(server_kex);
            self.client_kex = Some(client_kex);

            let payload = self.client_kex_payload.clone();
            self.seal_and_queue(&payload)?;
            self.set_status(0.8);
        }

        self.dh_handshake()
    }

    /// The DH handshake sub-state machine.
    ///
    /// A single invocation advances through as many states as buffered data
    /// allows; each arm either completes its transition or returns `false`
    /// to suspend until the pump delivers more progress.
    fn dh_handshake(&mut self) -> SkerryResult<bool> {
        loop {
            match self.dh_state {
                DhState::Init => {
                    let suite = self.suite.as_ref().ok_or_else(|| {
                        SkerryError::InvalidState(
                            "DH handshake without negotiated algorithms".to_string(),
                        )
                    })?;
                    let exchange = DhExchange::from_kex_name(&suite.kex)?;

                    let mut payload = BytesMut::new();
                    payload.put_u8(MessageType::KexdhInit as u8);
                    put_mpint(&mut payload, exchange.public_key());

                    self.dh = Some(DhContext::new(exchange));
                    let payload = payload.to_vec();
                    self.seal_and_queue(&payload)?;

                    self.dh_state = DhState::InitToSend;
                }
                DhState::InitToSend => {
                    if self.has_outbound() {
                        return Ok(false);
                    }
                    self.dh_state = DhState::InitSent;
                }
                DhState::InitSent => {
                    let Some(payload) = self.wait_packet(MessageType::KexdhReply as u8)? else {
                        return Ok(false);
                    };
                    self.handle_dh_reply(&payload)?;

                    self.seal_and_queue(&[MessageType::NewKeys as u8])?;
                    self.dh_state = DhState::NewkeysToSend;
                }
                DhState::NewkeysToSend => {
                    if self.has_outbound() {
                        return Ok(false);
                    }
                    debug!("SSH_MSG_NEWKEYS sent");
                    self.dh_state = DhState::NewkeysSent;
                }
                DhState::NewkeysSent => {
                    if self.wait_packet(MessageType::NewKeys as u8)?.is_none() {
                        return Ok(false);
                    }
                    debug!("Got SSH_MSG_NEWKEYS");

                    self.install_new_keys()?;
                    self.dh_state = DhState::Finished;
                    return Ok(true);
                }
                DhState::Finished => return Ok(true),
            }
        }
    }

    /// Parses KEXDH_REPLY: host key blob, server public value `f`, and the
    /// host signature; then computes the shared secret.
    fn handle_dh_reply(&mut self, payload: &[u8]) -> SkerryResult<()> {
        let mut reader = WireReader::new(payload);
        reader.read_u8()?; // message code, already matched

        let host_key_blob = reader
            .read_string()
            .map_err(|_| SkerryError::Protocol("No public key in packet".to_string()))?;
        let host_key = HostPublicKey::from_blob(host_key_blob)?;

        let f = reader
            .read_mpint()
            .map_err(|_| SkerryError::Protocol("No F number in packet".to_string()))?;

        let signature = reader
            .read_string()
            .map_err(|_| SkerryError::Protocol("No signature in packet".to_string()))?;

        let dh = self.dh.as_mut().ok_or_else(|| {
            SkerryError::InvalidState("KEXDH_REPLY without a DH context".to_string())
        })?;

        let shared_secret = dh
            .exchange
            .compute_shared_secret(f)
            .map_err(|_| SkerryError::Protocol("Cannot build k number".to_string()))?;

        dh.host_key = Some(host_key);
        dh.server_public = Some(f.to_vec());
        dh.server_signature = Some(signature.to_vec());
        dh.shared_secret = Some(shared_secret);
        Ok(())
    }

    /// Computes the session id, derives and installs the next crypto,
    /// verifies the host signature, and rotates the crypto pair.
    ///
    /// The signature is verified after key derivation but before the
    /// rotation, so a failure can never leak a partially initialized
    /// encrypted state outward.
    fn install_new_keys(&mut self) -> SkerryResult<()> {
        // Taking the context means every exit path below releases the DH
        // temporaries; secret material zeroizes itself on drop.
        let dh = self.dh.take().ok_or_else(|| {
            SkerryError::InvalidState("NEWKEYS without a DH context".to_string())
        })?;

        let host_key = dh
            .host_key
            .as_ref()
            .ok_or_else(|| SkerryError::InvalidState("No host key imported".to_string()))?;
        let f = dh
            .server_public
            .as_deref()
            .ok_or_else(|| SkerryError::InvalidState("No F number imported".to_string()))?;
        let k = dh
            .shared_secret
            .as_deref()
            .ok_or_else(|| SkerryError::InvalidState("No shared secret built".to_string()))?;
        let signature = dh
            .server_signature
            .as_deref()
            .ok_or_else(|| SkerryError::InvalidState("No signature imported".to_string()))?;
        let suite = self.suite.as_ref().ok_or_else(|| {
            SkerryError::InvalidState("NEWKEYS without negotiated algorithms".to_string())
        })?;

        let client_banner = self
            .self_banner
            .as_ref()
            .map(Banner::as_str)
            .unwrap_or_default()
            .to_string();
        let server_banner = self
            .peer_banner
            .as_ref()
            .map(Banner::as_str)
            .unwrap_or_default()
            .to_string();

        let hash = dh.exchange.hash();
        let session_hash = exchange_hash(
            hash,
            &client_banner,
            &server_banner,
            &self.client_kex_payload,
            &self.server_kex_payload,
            &host_key.blob,
            dh.exchange.public_key(),
            f,
            k,
        );

        // The session id is the exchange hash of the first handshake; it is
        // committed only once the handshake is known good, so a failure
        // never exposes one.
        let session_id = self
            .session_id
            .clone()
            .unwrap_or_else(|| session_hash.clone());

        let next = CryptoState::derive(suite, Role::Client, hash, k, &session_hash, &session_id)?;
        self.crypto.install_next(next);

        if let Err(e) = host_key.verify_signature(&session_hash, signature) {
            self.crypto.discard_next();
            return Err(e);
        }

        self.crypto.rotate()?;
        if self.session_id.is_none() {
            self.session_id = Some(session_hash);
        }
        debug!("Session keys installed, switching to encrypted transport");
        Ok(())
    }

    // ---- service request ----------------------------------------------

    /// Issues SSH_MSG_SERVICE_REQUEST for a named service (typically
    /// `"ssh-userauth"`). The reply is consumed by [`Session::advance`];
    /// poll [`Session::service_accepted`].
    ///
    /// # Errors
    ///
    /// Returns [`SkerryError::InvalidState`] unless the handshake has
    /// completed.
    pub fn request_service(&mut self, service: &str) -> SkerryResult<()> {
        if self.state != SessionState::Authenticating {
            return Err(SkerryError::InvalidState(format!(
                "Service request in state {:?}",
                self.state
            )));
        }

        let mut payload = BytesMut::new();
        payload.put_u8(MessageType::ServiceRequest as u8);
        put_string(&mut payload, service.as_bytes());
        let payload = payload.to_vec();
        self.seal_and_queue(&payload)?;

        debug!("Sent SSH_MSG_SERVICE_REQUEST (service {})", service);
        self.service = ServiceState::Requested(service.to_string());
        Ok(())
    }

    /// Waits for SERVICE_ACCEPT while a request is outstanding. Any other
    /// reply is fatal.
    fn poll_service(&mut self) -> SkerryResult<()> {
        let ServiceState::Requested(service) = &self.service else {
            return Ok(());
        };
        let service = service.clone();

        if self
            .wait_packet(MessageType::ServiceAccept as u8)?
            .is_none()
        {
            return Ok(());
        }

        debug!("Received SSH_MSG_SERVICE_ACCEPT (service {})", service);
        self.service = ServiceState::Accepted(service);
        Ok(())
    }

    // ---- disconnect ----------------------------------------------------

    /// Queues SSH_MSG_DISCONNECT (reason: by application, description
    /// "Bye Bye") and marks the session dead. The driver flushes the bytes
    /// and closes the socket; the session can then be reused via
    /// [`Session::begin_connect`].
    pub fn queue_disconnect(&mut self) {
        if !self.alive {
            return;
        }

        let mut payload = BytesMut::new();
        payload.put_u8(MessageType::Disconnect as u8);
        payload.put_u32(SSH_DISCONNECT_BY_APPLICATION);
        put_string(&mut payload, b"Bye Bye");
        put_string(&mut payload, b""); // language tag
        let payload = payload.to_vec();

        if let Err(e) = self.seal_and_queue(&payload) {
            warn!("Failed to queue disconnect: {}", e);
        } else {
            debug!("Sent SSH_MSG_DISCONNECT");
        }
        self.alive = false;
        self.connected = false;
    }

    // ---- internals -----------------------------------------------------

    /// Drives the read side until a packet with the expected message code
    /// has been decoded, or no complete packet remains buffered.
    ///
    /// Ignorable transport messages (IGNORE, DEBUG) are skipped; DISCONNECT
    /// and unexpected codes are fatal.
    fn wait_packet(&mut self, expected: u8) -> SkerryResult<Option<Vec<u8>>> {
        loop {
            let Some(payload) = self.codec.next_packet(self.crypto.current_mut())? else {
                return Ok(None);
            };
            if payload.is_empty() {
                return Err(SkerryError::Protocol("Empty packet payload".to_string()));
            }

            let code = payload[0];
            if code == expected {
                return Ok(Some(payload));
            }

            match MessageType::from_u8(code) {
                Some(MessageType::Ignore) | Some(MessageType::Debug) => {
                    trace!("Skipping transport message {}", code);
                }
                Some(MessageType::Disconnect) => {
                    return Err(SkerryError::Protocol(
                        "Received SSH_MSG_DISCONNECT from peer".to_string(),
                    ));
                }
                _ => {
                    return Err(SkerryError::Protocol(format!(
                        "Unexpected message code {} (expected {})",
                        code, expected
                    )));
                }
            }
        }
    }

    /// Frames a payload with the live crypto and appends it to the outbound
    /// queue.
    fn seal_and_queue(&mut self, payload: &[u8]) -> SkerryResult<()> {
        let wire = self.codec.seal(self.crypto.current_mut(), payload)?;
        self.outbox.extend_from_slice(&wire);
        Ok(())
    }

    /// Emits a progress milestone if a callback is installed.
    fn set_status(&mut self, status: f32) {
        if let Some(progress) = self.callbacks.progress.as_mut() {
            progress(status);
        }
    }

    /// Enters the terminal error state: records the diagnostic, releases the
    /// DH temporaries and any pending crypto, and marks the connection dead.
    fn fail(&mut self, error: SkerryError) {
        warn!("Session failed: {}", error);
        self.last_error = Some(error.to_string());
        self.state = SessionState::Error;
        self.dh = None;
        self.crypto.discard_next();
        self.alive = false;
        self.connected = false;
    }

    /// Restores the pristine pre-connect state, keeping configuration and
    /// callbacks.
    fn reset(&mut self) {
        self.state = SessionState::None;
        self.dh_state = DhState::Init;
        self.decoder = Decoder::BannerLine;
        self.version = None;
        self.peer_banner = None;
        self.self_banner = None;
        self.peer_vendor_version = None;
        self.codec = PacketCodec::new();
        self.crypto = CryptoPair::new();
        self.outbox.clear();
        self.client_kex = None;
        self.server_kex = None;
        self.client_kex_payload.clear();
        self.server_kex_payload.clear();
        self.suite = None;
        self.dh = None;
        self.session_id = None;
        self.service = ServiceState::Idle;
        self.alive = false;
        self.connected = false;
        self.last_error = None;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::hostkey::Ed25519HostKey;
    use std::sync::{Arc, Mutex};

    fn connected_session() -> Session {
        let mut session = Session::new(SessionConfig::default());
        session.begin_connect();
        session.on_connected(Ok(()));
        assert_eq!(session.state(), SessionState::SocketConnected);
        session
    }

    /// Feeds data the way a socket layer does: growing buffer, consumed
    /// prefix drained, suffix re-presented with the next chunk.
    fn feed_chunks(session: &mut Session, data: &[u8], chunk: usize) {
        let mut pending: Vec<u8> = Vec::new();
        for piece in data.chunks(chunk) {
            pending.extend_from_slice(piece);
            let consumed = session.on_data(&pending);
            pending.drain(..consumed);
        }
    }

    #[test]
    fn test_openssh_banner_negotiation() {
        let mut session = connected_session();

        let consumed = session.on_data(b"SSH-2.0-OpenSSH_7.9p1\r\n");
        assert_eq!(consumed, 23);
        assert_eq!(session.version(), Some(2));
        assert_eq!(session.openssh_version(), version_int(7, 9, 0));
        assert_eq!(session.state(), SessionState::InitialKex);

        // client banner goes out before any packet
        let out = session.take_outbound();
        assert!(out.starts_with(b"SSH-2.0-Skerry_"));
        assert!(out.ends_with(b"\r\n"));
    }

    #[test]
    fn test_banner_1_99_selects_v2() {
        let mut session = connected_session();
        session.on_data(b"SSH-1.99-Foo\r\n");
        assert_eq!(session.version(), Some(2));
        assert_eq!(session.state(), SessionState::InitialKex);
    }

    #[test]
    fn test_banner_v1_only_is_unusable() {
        let mut session = connected_session();
        session.on_data(b"SSH-1.5-Old\r\n");
        assert_eq!(session.state(), SessionState::Error);
        assert!(session
            .last_error()
            .unwrap()
            .contains("No version of SSH protocol usable"));
        assert!(!session.is_alive());
    }

    #[test]
    fn test_banner_protocol_mismatch() {
        let mut session = connected_session();
        session.on_data(b"HTTP/1.1 200 OK\r\n");
        assert_eq!(session.state(), SessionState::Error);
        assert!(session.last_error().unwrap().contains("Protocol mismatch"));
    }

    #[test]
    fn test_banner_too_large() {
        let mut session = connected_session();
        let consumed = session.on_data(&[b'x'; 130]);
        assert_eq!(consumed, 0);
        assert_eq!(session.state(), SessionState::Error);
        assert!(session
            .last_error()
            .unwrap()
            .contains("Receiving banner: too large banner"));
    }

    #[test]
    fn test_banner_exactly_at_limit_is_accepted() {
        let mut session = connected_session();
        // 127 bytes + newline: the largest line the decoder accepts
        let mut line = b"SSH-2.0-".to_vec();
        line.resize(127, b'x');
        line.push(b'\n');
        let consumed = session.on_data(&line);
        assert_eq!(consumed, 128);
        assert_eq!(session.state(), SessionState::InitialKex);
    }

    #[test]
    fn test_banner_chunked_delivery_is_idempotent() {
        for chunk in [1usize, 2, 3, 7, 23] {
            let mut session = connected_session();
            feed_chunks(&mut session, b"SSH-2.0-OpenSSH_7.9p1\r\n", chunk);
            assert_eq!(session.version(), Some(2), "chunk size {}", chunk);
            assert_eq!(session.openssh_version(), version_int(7, 9, 0));
            assert_eq!(session.state(), SessionState::InitialKex);
        }
    }

    #[test]
    fn test_v1_handshake_not_implemented() {
        let mut session = Session::new(SessionConfig {
            allow_ssh1: true,
            allow_ssh2: false,
        });
        session.begin_connect();
        session.on_connected(Ok(()));
        session.on_data(b"SSH-1.99-Foo\r\n");
        assert_eq!(session.state(), SessionState::Error);
        assert!(session.last_error().unwrap().contains("SSH-1"));
    }

    #[test]
    fn test_connect_failure_message() {
        let mut session = Session::new(SessionConfig::default());
        session.begin_connect();
        session.on_connected(Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        )));
        assert_eq!(session.state(), SessionState::Error);
        assert!(session.last_error().unwrap().contains("Connection failed"));
    }

    #[test]
    fn test_socket_exception_message() {
        let mut session = connected_session();
        session.on_exception(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset by peer",
        ));
        assert_eq!(session.state(), SessionState::Error);
        assert!(session.last_error().unwrap().contains("Socket error"));
    }

    // ---- scripted server: full handshake without any socket ------------

    /// Minimal in-process SSH server used to exercise the whole handshake.
    struct ScriptedServer {
        codec: PacketCodec,
        crypto: CryptoPair,
        host_key: Ed25519HostKey,
        banner: Banner,
        kexinit: KexInit,
        kexinit_payload: Vec<u8>,
        client_banner: Option<String>,
        client_kexinit_payload: Option<Vec<u8>>,
        /// When set, the KEXDH_REPLY signature covers garbage.
        corrupt_signature: bool,
    }

    impl ScriptedServer {
        fn new() -> Self {
            let kexinit = KexInit::new_client_default();
            Self {
                codec: PacketCodec::new(),
                crypto: CryptoPair::new(),
                host_key: Ed25519HostKey::generate(),
                banner: Banner::from_line("SSH-2.0-Scripted_0.1"),
                kexinit_payload: kexinit.to_bytes(),
                kexinit,
                client_banner: None,
                client_kexinit_payload: None,
                corrupt_signature: false,
            }
        }

        fn send(&mut self, payload: &[u8]) -> Vec<u8> {
            self.codec
                .seal(self.crypto.current_mut(), payload)
                .unwrap()
        }

        fn recv(&mut self, wire: &[u8]) -> Vec<Vec<u8>> {
            self.codec.feed(wire);
            let mut payloads = Vec::new();
            while let Some(p) = self
                .codec
                .next_packet(self.crypto.current_mut())
                .unwrap()
            {
                payloads.push(p);
            }
            payloads
        }

        /// Consumes the client banner line from raw outbound bytes and
        /// returns the remaining packet bytes.
        fn strip_client_banner<'a>(&mut self, out: &'a [u8]) -> &'a [u8] {
            let newline = out.iter().position(|&b| b == b'\n').expect("banner line");
            let line = String::from_utf8_lossy(&out[..newline]).into_owned();
            self.client_banner = Some(line.trim_end_matches('\r').to_string());
            &out[newline + 1..]
        }

        /// Responds to KEXDH_INIT with KEXDH_REPLY + NEWKEYS and installs
        /// the server-side crypto.
        fn answer_dh_init(&mut self, payload: &[u8]) -> Vec<u8> {
            assert_eq!(payload[0], MessageType::KexdhInit as u8);
            let mut reader = WireReader::new(&payload[1..]);
            let e = reader.read_mpint().unwrap();

            let suite = AlgorithmSuite::negotiate(
                &KexInit::from_bytes(self.client_kexinit_payload.as_ref().unwrap()).unwrap(),
                &self.kexinit,
            )
            .unwrap();
            let exchange = DhExchange::from_kex_name(&suite.kex).unwrap();
            let k = exchange.compute_shared_secret(e).unwrap();

            let hash = exchange.hash();
            let blob = self.host_key.public_key_blob();
            let h = exchange_hash(
                hash,
                self.client_banner.as_ref().unwrap(),
                self.banner.as_str(),
                self.client_kexinit_payload.as_ref().unwrap(),
                &self.kexinit_payload,
                &blob,
                e,
                exchange.public_key(),
                &k,
            );

            let signature = if self.corrupt_signature {
                self.host_key.sign(b"not the exchange hash")
            } else {
                self.host_key.sign(&h)
            };

            let mut reply = BytesMut::new();
            reply.put_u8(MessageType::KexdhReply as u8);
            put_string(&mut reply, &blob);
            put_mpint(&mut reply, exchange.public_key());
            put_string(&mut reply, &signature);

            let mut wire = self.send(&reply);
            wire.extend(self.send(&[MessageType::NewKeys as u8]));

            let next =
                CryptoState::derive(&suite, Role::Server, hash, &k, &h, &h).unwrap();
            self.crypto.install_next(next);
            wire
        }
    }

    /// Drives a Session against the scripted server to completion (or
    /// error), reporting the DH sub-state after every step to `observe`.
    /// Returns the server for post-handshake exchanges.
    fn run_handshake_observed(
        session: &mut Session,
        mut server: ScriptedServer,
        mut observe: impl FnMut(DhState),
    ) -> ScriptedServer {
        session.begin_connect();
        session.on_connected(Ok(()));

        // server banner + server KEXINIT arrive together
        let mut wire = server.banner.to_wire_format();
        let kexinit = server.kexinit_payload.clone();
        wire.extend(server.send(&kexinit));

        let mut pending = wire;
        for _ in 0..100 {
            let consumed = session.on_data(&pending);
            pending.drain(..consumed);
            observe(session.dh_state());

            let out = session.take_outbound();
            if out.is_empty() {
                if session.state() == SessionState::Error {
                    return server;
                }
                session.advance();
                observe(session.dh_state());
                if !session.has_outbound()
                    && (session.state() == SessionState::Authenticating
                        || session.state() == SessionState::Error)
                {
                    return server;
                }
                continue;
            }

            let mut packet_bytes: &[u8] = &out;
            if server.client_banner.is_none() {
                packet_bytes = server.strip_client_banner(&out);
            }
            let owned = packet_bytes.to_vec();
            for payload in server.recv(&owned) {
                match payload[0] {
                    code if code == MessageType::KexInit as u8 => {
                        server.client_kexinit_payload = Some(payload);
                    }
                    code if code == MessageType::KexdhInit as u8 => {
                        let reply = server.answer_dh_init(&payload);
                        pending.extend_from_slice(&reply);
                    }
                    code if code == MessageType::NewKeys as u8 => {
                        server.crypto.rotate().unwrap();
                    }
                    other => panic!("server got unexpected message {}", other),
                }
            }
        }
        panic!("handshake did not converge");
    }

    /// Drives a Session against the scripted server to completion (or
    /// error). Returns the server for post-handshake exchanges.
    fn run_handshake(session: &mut Session, server: ScriptedServer) -> ScriptedServer {
        run_handshake_observed(session, server, |_| {})
    }

    #[test]
    fn test_full_handshake_reaches_authenticating() {
        let milestones = Arc::new(Mutex::new(Vec::new()));
        let sink = milestones.clone();

        let mut session = Session::new(SessionConfig::default());
        session.set_progress_callback(move |p| sink.lock().unwrap().push(p));

        run_handshake(&mut session, ScriptedServer::new());

        assert_eq!(session.state(), SessionState::Authenticating);
        assert_eq!(session.dh_state(), DhState::Finished);
        assert!(session.is_connected());
        assert!(session.session_id().is_some());
        assert_eq!(
            *milestones.lock().unwrap(),
            vec![0.2, 0.4, 0.5, 0.6, 0.8, 1.0]
        );
    }

    #[test]
    fn test_dh_state_is_monotone() {
        let mut session = Session::new(SessionConfig::default());
        let mut observed = vec![session.dh_state()];

        run_handshake_observed(&mut session, ScriptedServer::new(), |state| {
            observed.push(state)
        });

        assert_eq!(session.state(), SessionState::Authenticating);
        assert_eq!(*observed.last().unwrap(), DhState::Finished);
        for pair in observed.windows(2) {
            assert!(pair[0] <= pair[1], "dh_state regressed: {:?}", pair);
        }
    }

    #[test]
    fn test_signature_failure_keeps_cleartext_crypto() {
        let mut session = Session::new(SessionConfig::default());
        let mut server = ScriptedServer::new();
        server.corrupt_signature = true;

        run_handshake(&mut session, server);

        assert_eq!(session.state(), SessionState::Error);
        assert!(session
            .last_error()
            .unwrap()
            .contains("signature verification failed"));
        // the crypto switch never happened and no session id is exposed
        assert!(session.crypto.current().is_none());
        assert!(session.session_id().is_none());
        assert!(!session.is_connected());
        assert!(!session.is_alive());
    }

    #[test]
    fn test_dh_temporaries_cleared_after_failure() {
        let mut session = Session::new(SessionConfig::default());
        let mut server = ScriptedServer::new();
        server.corrupt_signature = true;

        run_handshake(&mut session, server);

        assert_eq!(session.state(), SessionState::Error);
        assert!(session.dh.is_none());
        assert!(!session.crypto.next_ready());
    }

    #[test]
    fn test_dh_temporaries_cleared_after_success() {
        let mut session = Session::new(SessionConfig::default());
        run_handshake(&mut session, ScriptedServer::new());

        assert_eq!(session.state(), SessionState::Authenticating);
        assert!(session.dh.is_none());
        assert!(session.crypto.current().is_some());
        assert!(!session.crypto.next_ready());
    }

    #[test]
    fn test_session_id_set_exactly_once() {
        let mut session = Session::new(SessionConfig::default());
        run_handshake(&mut session, ScriptedServer::new());

        let first = session.session_id().unwrap().to_vec();
        assert_eq!(first.len(), 32); // group14-sha256

        // nothing after the handshake may mutate it
        session.advance();
        assert_eq!(session.session_id().unwrap(), &first[..]);
    }

    #[test]
    fn test_service_request_over_encrypted_transport() {
        let mut session = Session::new(SessionConfig::default());
        let mut server = run_handshake(&mut session, ScriptedServer::new());
        assert_eq!(session.state(), SessionState::Authenticating);

        session.request_service("ssh-userauth").unwrap();
        let out = session.take_outbound();
        let requests = server.recv(&out);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0][0], MessageType::ServiceRequest as u8);

        let mut accept = BytesMut::new();
        accept.put_u8(MessageType::ServiceAccept as u8);
        put_string(&mut accept, b"ssh-userauth");
        let accept = accept.to_vec();
        let wire = server.send(&accept);

        session.on_data(&wire);
        assert!(session.service_accepted());
    }

    #[test]
    fn test_service_request_unexpected_reply_is_fatal() {
        let mut session = Session::new(SessionConfig::default());
        let mut server = run_handshake(&mut session, ScriptedServer::new());

        session.request_service("ssh-userauth").unwrap();
        let out = session.take_outbound();
        server.recv(&out);

        // server replies with something other than SERVICE_ACCEPT
        let wire = server.send(&[MessageType::KexInit as u8]);
        session.on_data(&wire);
        assert_eq!(session.state(), SessionState::Error);
    }

    #[test]
    fn test_service_request_requires_authenticating_state() {
        let mut session = Session::new(SessionConfig::default());
        assert!(matches!(
            session.request_service("ssh-userauth"),
            Err(SkerryError::InvalidState(_))
        ));
    }

    #[test]
    fn test_disconnect_and_reuse() {
        let mut session = Session::new(SessionConfig::default());
        let mut server = run_handshake(&mut session, ScriptedServer::new());
        assert!(session.is_alive());

        session.queue_disconnect();
        assert!(!session.is_alive());

        let out = session.take_outbound();
        let messages = server.recv(&out);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0][0], MessageType::Disconnect as u8);
        let mut reader = WireReader::new(&messages[0][1..]);
        assert_eq!(reader.read_u32().unwrap(), SSH_DISCONNECT_BY_APPLICATION);
        assert_eq!(reader.read_string().unwrap(), b"Bye Bye");

        // the session is reusable for a fresh connect
        session.begin_connect();
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(session.session_id().is_none());
    }

    #[test]
    fn test_issue_banner_accessor() {
        let mut session = Session::new(SessionConfig::default());
        assert!(session.issue_banner().is_none());
        session.set_issue_banner("Authorized use only".to_string());
        assert_eq!(session.issue_banner(), Some("Authorized use only"));
    }
}
