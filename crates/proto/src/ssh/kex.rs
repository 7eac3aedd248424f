//! SSH algorithm negotiation (RFC 4253 Section 7).
//!
//! This module implements:
//! - The SSH_MSG_KEXINIT message (cookie + ten name-lists)
//! - Algorithm negotiation (first client preference the server also lists)
//! - The full eight-slot negotiated suite used by the DH handshake
//!
//! # Example
//!
//! ```rust
//! use skerry_proto::ssh::kex::KexInit;
//!
//! let kexinit = KexInit::new_client_default();
//! let bytes = kexinit.to_bytes();
//! assert_eq!(bytes[0], 20); // SSH_MSG_KEXINIT
//! ```

use bytes::{BufMut, BytesMut};
use rand::RngCore;
use skerry_platform::{SkerryError, SkerryResult};

use crate::ssh::buffer::{put_bool, put_name_list, WireReader};
use crate::ssh::message::MessageType;

/// SSH_MSG_KEXINIT message (RFC 4253 Section 7.1).
///
/// Carries a random 16-byte cookie and ten algorithm name-lists, each
/// ordered by preference (most preferred first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexInit {
    /// Random cookie (16 bytes)
    cookie: [u8; 16],
    /// Key exchange algorithms
    kex_algorithms: Vec<String>,
    /// Server host key algorithms
    server_host_key_algorithms: Vec<String>,
    /// Encryption algorithms client to server
    encryption_client_to_server: Vec<String>,
    /// Encryption algorithms server to client
    encryption_server_to_client: Vec<String>,
    /// MAC algorithms client to server
    mac_client_to_server: Vec<String>,
    /// MAC algorithms server to client
    mac_server_to_client: Vec<String>,
    /// Compression algorithms client to server
    compression_client_to_server: Vec<String>,
    /// Compression algorithms server to client
    compression_server_to_client: Vec<String>,
    /// Languages client to server (usually empty)
    languages_client_to_server: Vec<String>,
    /// Languages server to client (usually empty)
    languages_server_to_client: Vec<String>,
    /// First KEX packet follows
    first_kex_packet_follows: bool,
}

impl KexInit {
    /// Creates a KEXINIT message with the default client algorithm
    /// preferences and a fresh random cookie.
    ///
    /// - KEX: diffie-hellman-group14-sha256, -group14-sha1, -group1-sha1
    /// - Host key: ssh-ed25519
    /// - Encryption: aes256-ctr, aes128-ctr
    /// - MAC: hmac-sha2-256, hmac-sha1
    /// - Compression: none
    pub fn new_client_default() -> Self {
        let mut cookie = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut cookie);

        Self {
            cookie,
            kex_algorithms: vec![
                "diffie-hellman-group14-sha256".to_string(),
                "diffie-hellman-group14-sha1".to_string(),
                "diffie-hellman-group1-sha1".to_string(),
            ],
            server_host_key_algorithms: vec!["ssh-ed25519".to_string()],
            encryption_client_to_server: vec![
                "aes256-ctr".to_string(),
                "aes128-ctr".to_string(),
            ],
            encryption_server_to_client: vec![
                "aes256-ctr".to_string(),
                "aes128-ctr".to_string(),
            ],
            mac_client_to_server: vec!["hmac-sha2-256".to_string(), "hmac-sha1".to_string()],
            mac_server_to_client: vec!["hmac-sha2-256".to_string(), "hmac-sha1".to_string()],
            compression_client_to_server: vec!["none".to_string()],
            compression_server_to_client: vec!["none".to_string()],
            languages_client_to_server: vec![],
            languages_server_to_client: vec![],
            first_kex_packet_follows: false,
        }
    }

    /// Returns the cookie.
    pub fn cookie(&self) -> &[u8; 16] {
        &self.cookie
    }

    /// Returns the key exchange algorithms.
    pub fn kex_algorithms(&self) -> &[String] {
        &self.kex_algorithms
    }

    /// Returns the server host key algorithms.
    pub fn server_host_key_algorithms(&self) -> &[String] {
        &self.server_host_key_algorithms
    }

    /// Returns the encryption algorithms (client to server).
    pub fn encryption_client_to_server(&self) -> &[String] {
        &self.encryption_client_to_server
    }

    /// Returns the encryption algorithms (server to client).
    pub fn encryption_server_to_client(&self) -> &[String] {
        &self.encryption_server_to_client
    }

    /// Returns the MAC algorithms (client to server).
    pub fn mac_client_to_server(&self) -> &[String] {
        &self.mac_client_to_server
    }

    /// Returns the MAC algorithms (server to client).
    pub fn mac_server_to_client(&self) -> &[String] {
        &self.mac_server_to_client
    }

    /// Returns whether the peer announced a guessed first KEX packet.
    pub fn first_kex_packet_follows(&self) -> bool {
        self.first_kex_packet_follows
    }

    /// Replaces an algorithm list; used by tests and server emulation.
    #[doc(hidden)]
    pub fn set_kex_algorithms(&mut self, algorithms: Vec<String>) {
        self.kex_algorithms = algorithms;
    }

    /// Serializes the KEXINIT message (without packet framing).
    ///
    /// Format (RFC 4253 Section 7.1):
    /// ```text
    /// byte         SSH_MSG_KEXINIT (20)
    /// byte[16]     cookie (random bytes)
    /// name-list    kex_algorithms
    /// name-list    server_host_key_algorithms
    /// name-list    encryption (client to server, server to client)
    /// name-list    mac (client to server, server to client)
    /// name-list    compression (client to server, server to client)
    /// name-list    languages (client to server, server to client)
    /// boolean      first_kex_packet_follows
    /// uint32       0 (reserved)
    /// ```
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();

        buf.put_u8(MessageType::KexInit as u8);
        buf.put_slice(&self.cookie);

        put_name_list(&mut buf, &self.kex_algorithms);
        put_name_list(&mut buf, &self.server_host_key_algorithms);
        put_name_list(&mut buf, &self.encryption_client_to_server);
        put_name_list(&mut buf, &self.encryption_server_to_client);
        put_name_list(&mut buf, &self.mac_client_to_server);
        put_name_list(&mut buf, &self.mac_server_to_client);
        put_name_list(&mut buf, &self.compression_client_to_server);
        put_name_list(&mut buf, &self.compression_server_to_client);
        put_name_list(&mut buf, &self.languages_client_to_server);
        put_name_list(&mut buf, &self.languages_server_to_client);

        put_bool(&mut buf, self.first_kex_packet_follows);
        buf.put_u32(0);

        buf.to_vec()
    }

    /// Parses a KEXINIT message from a packet payload.
    ///
    /// # Errors
    ///
    /// Returns [`SkerryError::Protocol`] if the message code is wrong or any
    /// field is truncated.
    pub fn from_bytes(data: &[u8]) -> SkerryResult<Self> {
        let mut reader = WireReader::new(data);

        let code = reader.read_u8()?;
        if code != MessageType::KexInit as u8 {
            return Err(SkerryError::Protocol(format!(
                "Invalid message type: expected 20 (SSH_MSG_KEXINIT), got {}",
                code
            )));
        }

        let mut cookie = [0u8; 16];
        cookie.copy_from_slice(reader.read_bytes(16)?);

        let kex_algorithms = reader.read_name_list()?;
        let server_host_key_algorithms = reader.read_name_list()?;
        let encryption_client_to_server = reader.read_name_list()?;
        let encryption_server_to_client = reader.read_name_list()?;
        let mac_client_to_server = reader.read_name_list()?;
        let mac_server_to_client = reader.read_name_list()?;
        let compression_client_to_server = reader.read_name_list()?;
        let compression_server_to_client = reader.read_name_list()?;
        let languages_client_to_server = reader.read_name_list()?;
        let languages_server_to_client = reader.read_name_list()?;

        let first_kex_packet_follows = reader.read_bool()?;
        // reserved uint32 must be present, value ignored
        reader.read_u32()?;

        Ok(Self {
            cookie,
            kex_algorithms,
            server_host_key_algorithms,
            encryption_client_to_server,
            encryption_server_to_client,
            mac_client_to_server,
            mac_server_to_client,
            compression_client_to_server,
            compression_server_to_client,
            languages_client_to_server,
            languages_server_to_client,
            first_kex_packet_follows,
        })
    }
}

/// Negotiates one algorithm slot between client and server lists.
///
/// Uses the first algorithm in the client's list that also appears in the
/// server's list (RFC 4253 Section 7.1). Given identical inputs the result
/// is deterministic.
///
/// # Errors
///
/// Returns [`SkerryError::Protocol`] if the lists do not intersect.
///
/// # Example
///
/// ```rust
/// use skerry_proto::ssh::kex::negotiate_algorithm;
///
/// let client = vec!["aes256-ctr".to_string(), "aes128-ctr".to_string()];
/// let server = vec!["aes128-ctr".to_string(), "aes256-ctr".to_string()];
///
/// assert_eq!(negotiate_algorithm("cipher", &client, &server).unwrap(), "aes256-ctr");
/// ```
pub fn negotiate_algorithm(
    slot: &str,
    client_list: &[String],
    server_list: &[String],
) -> SkerryResult<String> {
    for client_alg in client_list {
        if server_list.contains(client_alg) {
            return Ok(client_alg.clone());
        }
    }

    Err(SkerryError::Protocol(format!(
        "No common {} algorithm: client={:?}, server={:?}",
        slot, client_list, server_list
    )))
}

/// The eight negotiated algorithm slots of one key exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgorithmSuite {
    /// Key exchange method.
    pub kex: String,
    /// Server host key algorithm.
    pub host_key: String,
    /// Cipher, client to server.
    pub cipher_client_to_server: String,
    /// Cipher, server to client.
    pub cipher_server_to_client: String,
    /// MAC, client to server.
    pub mac_client_to_server: String,
    /// MAC, server to client.
    pub mac_server_to_client: String,
    /// Compression, client to server.
    pub compression_client_to_server: String,
    /// Compression, server to client.
    pub compression_server_to_client: String,
}

impl AlgorithmSuite {
    /// Negotiates every slot from the two KEXINIT messages.
    ///
    /// # Errors
    ///
    /// Returns [`SkerryError::Protocol`] naming the first slot with no
    /// intersection.
    pub fn negotiate(client: &KexInit, server: &KexInit) -> SkerryResult<Self> {
        Ok(Self {
            kex: negotiate_algorithm("kex", &client.kex_algorithms, &server.kex_algorithms)?,
            host_key: negotiate_algorithm(
                "host key",
                &client.server_host_key_algorithms,
                &server.server_host_key_algorithms,
            )?,
            cipher_client_to_server: negotiate_algorithm(
                "cipher",
                &client.encryption_client_to_server,
                &server.encryption_client_to_server,
            )?,
            cipher_server_to_client: negotiate_algorithm(
                "cipher",
                &client.encryption_server_to_client,
                &server.encryption_server_to_client,
            )?,
            mac_client_to_server: negotiate_algorithm(
                "MAC",
                &client.mac_client_to_server,
                &server.mac_client_to_server,
            )?,
            mac_server_to_client: negotiate_algorithm(
                "MAC",
                &client.mac_server_to_client,
                &server.mac_server_to_client,
            )?,
            compression_client_to_server: negotiate_algorithm(
                "compression",
                &client.compression_client_to_server,
                &server.compression_client_to_server,
            )?,
            compression_server_to_client: negotiate_algorithm(
                "compression",
                &client.compression_server_to_client,
                &server.compression_server_to_client,
            )?,
        })
    }
}
