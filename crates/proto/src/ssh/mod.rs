//! SSH client transport implementation (RFC 4251, RFC 4253).
//!
//! This module implements the client side of SSH connection establishment:
//! banner exchange and version negotiation, algorithm negotiation, the
//! Diffie-Hellman handshake, session-key derivation and the crossover to an
//! encrypted channel ready for user authentication.
//!
//! # Architecture
//!
//! The implementation is layered, leaves first:
//!
//! 1. **Wire primitives** ([`buffer`]) - SSH strings, mpints, name-lists
//! 2. **Packet layer** ([`packet`]) - Binary packet protocol (RFC 4253 Section 6)
//! 3. **Negotiation** ([`version`], [`kex`]) - Banners and KEXINIT
//! 4. **Key exchange** ([`kex_dh`], [`hostkey`], [`crypto`]) - DH, host
//!    signatures, session keys
//! 5. **Session** ([`session`]) - The event-driven connection state machine
//! 6. **Client** ([`client`]) - The async socket pump
//!
//! # Security Considerations
//!
//! - **Input validation**: packet parsing enforces the 35000-byte limit and
//!   bounds-checks every field
//! - **Memory safety**: DH secrets, shared secrets and key material are
//!   zeroized on drop using [`zeroize`]
//! - **Fail fast**: any protocol anomaly is terminal for the connection
//! - **No unsafe code**
//!
//! # Example
//!
//! ```rust
//! use skerry_proto::ssh::session::{Session, SessionConfig, SessionState};
//!
//! let mut session = Session::new(SessionConfig::default());
//! session.begin_connect();
//! session.on_connected(Ok(()));
//! session.on_data(b"SSH-2.0-OpenSSH_7.9p1\r\n");
//! assert_eq!(session.state(), SessionState::InitialKex);
//! ```

pub mod buffer;
pub mod client;
pub mod crypto;
pub mod hostkey;
pub mod kex;
pub mod kex_dh;
pub mod message;
pub mod packet;
pub mod session;
pub mod version;

// Re-export main types
pub use client::{SshClient, SshClientConfig};
pub use crypto::{CipherAlgorithm, CryptoPair, CryptoState, MacAlgorithm, Role};
pub use hostkey::{Ed25519HostKey, HostKeyAlgorithm, HostPublicKey};
pub use kex::{negotiate_algorithm, AlgorithmSuite, KexInit};
pub use kex_dh::{derive_key, exchange_hash, DhExchange, DhGroup, KexHash};
pub use message::MessageType;
pub use packet::PacketCodec;
pub use session::{DhState, Session, SessionCallbacks, SessionConfig, SessionState};
pub use version::{version_int, Banner, Dialect};
