//! Negotiated transport crypto state.
//!
//! After NEWKEYS every packet is protected by the negotiated cipher and MAC.
//! This module owns:
//!
//! - Cipher descriptors and engines (`aes128-ctr`, `aes256-ctr`)
//! - MAC descriptors and engines (`hmac-sha2-256`, `hmac-sha1`)
//! - [`CryptoState`], the per-connection live crypto for both directions
//! - [`CryptoPair`], the current/next pair whose single mutation is the
//!   atomic [`CryptoPair::rotate`] at the NEWKEYS boundary
//!
//! Key material is derived via [`crate::ssh::kex_dh::derive_key`] and
//! zeroized when a state is dropped or replaced.

use cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use skerry_platform::{SkerryError, SkerryResult};
use zeroize::Zeroizing;

use crate::ssh::kex::AlgorithmSuite;
use crate::ssh::kex_dh::{derive_key, KexHash};

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

/// Cipher algorithms implemented for packet encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlgorithm {
    /// AES-128 in counter mode
    Aes128Ctr,
    /// AES-256 in counter mode
    Aes256Ctr,
}

impl CipherAlgorithm {
    /// Returns the SSH algorithm name.
    pub fn name(&self) -> &'static str {
        match self {
            CipherAlgorithm::Aes128Ctr => "aes128-ctr",
            CipherAlgorithm::Aes256Ctr => "aes256-ctr",
        }
    }

    /// Parses a cipher algorithm from its SSH name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "aes128-ctr" => Some(CipherAlgorithm::Aes128Ctr),
            "aes256-ctr" => Some(CipherAlgorithm::Aes256Ctr),
            _ => None,
        }
    }

    /// Key size in bytes.
    pub fn key_size(&self) -> usize {
        match self {
            CipherAlgorithm::Aes128Ctr => 16,
            CipherAlgorithm::Aes256Ctr => 32,
        }
    }

    /// IV size in bytes.
    pub fn iv_size(&self) -> usize {
        16
    }

    /// Cipher block size in bytes, which also sets packet padding alignment.
    pub fn block_size(&self) -> usize {
        16
    }
}

/// MAC algorithms implemented for packet integrity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacAlgorithm {
    /// HMAC with SHA-1 (legacy)
    HmacSha1,
    /// HMAC with SHA-256
    HmacSha256,
}

impl MacAlgorithm {
    /// Returns the SSH algorithm name.
    pub fn name(&self) -> &'static str {
        match self {
            MacAlgorithm::HmacSha1 => "hmac-sha1",
            MacAlgorithm::HmacSha256 => "hmac-sha2-256",
        }
    }

    /// Parses a MAC algorithm from its SSH name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "hmac-sha1" => Some(MacAlgorithm::HmacSha1),
            "hmac-sha2-256" => Some(MacAlgorithm::HmacSha256),
            _ => None,
        }
    }

    /// Key size in bytes.
    pub fn key_size(&self) -> usize {
        match self {
            MacAlgorithm::HmacSha1 => 20,
            MacAlgorithm::HmacSha256 => 32,
        }
    }

    /// Tag size in bytes.
    pub fn tag_size(&self) -> usize {
        match self {
            MacAlgorithm::HmacSha1 => 20,
            MacAlgorithm::HmacSha256 => 32,
        }
    }
}

enum CipherEngine {
    Aes128(Aes128Ctr),
    Aes256(Aes256Ctr),
}

impl CipherEngine {
    fn new(algorithm: CipherAlgorithm, key: &[u8], iv: &[u8]) -> SkerryResult<Self> {
        let engine = match algorithm {
            CipherAlgorithm::Aes128Ctr => CipherEngine::Aes128(
                Aes128Ctr::new_from_slices(key, iv)
                    .map_err(|_| SkerryError::Security("Bad AES-128 key material".to_string()))?,
            ),
            CipherAlgorithm::Aes256Ctr => CipherEngine::Aes256(
                Aes256Ctr::new_from_slices(key, iv)
                    .map_err(|_| SkerryError::Security("Bad AES-256 key material".to_string()))?,
            ),
        };
        Ok(engine)
    }

    fn apply_keystream(&mut self, data: &mut [u8]) {
        match self {
            CipherEngine::Aes128(c) => c.apply_keystream(data),
            CipherEngine::Aes256(c) => c.apply_keystream(data),
        }
    }
}

struct MacEngine {
    algorithm: MacAlgorithm,
    key: Zeroizing<Vec<u8>>,
}

impl MacEngine {
    fn compute(&self, sequence: u32, packet: &[u8]) -> Vec<u8> {
        match self.algorithm {
            MacAlgorithm::HmacSha1 => {
                let mut mac = Hmac::<Sha1>::new_from_slice(&self.key)
                    .expect("HMAC accepts any key length");
                mac.update(&sequence.to_be_bytes());
                mac.update(packet);
                mac.finalize().into_bytes().to_vec()
            }
            MacAlgorithm::HmacSha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(&self.key)
                    .expect("HMAC accepts any key length");
                mac.update(&sequence.to_be_bytes());
                mac.update(packet);
                mac.finalize().into_bytes().to_vec()
            }
        }
    }

    /// Constant-time tag verification.
    fn verify(&self, sequence: u32, packet: &[u8], tag: &[u8]) -> bool {
        match self.algorithm {
            MacAlgorithm::HmacSha1 => {
                let mut mac = Hmac::<Sha1>::new_from_slice(&self.key)
                    .expect("HMAC accepts any key length");
                mac.update(&sequence.to_be_bytes());
                mac.update(packet);
                mac.verify_slice(tag).is_ok()
            }
            MacAlgorithm::HmacSha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(&self.key)
                    .expect("HMAC accepts any key length");
                mac.update(&sequence.to_be_bytes());
                mac.update(packet);
                mac.verify_slice(tag).is_ok()
            }
        }
    }
}

/// One direction of protected traffic: cipher stream plus MAC.
struct DirectionState {
    cipher: CipherEngine,
    mac: MacEngine,
}

/// Which side of the connection derives which key letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Client: encrypts with the client-to-server keys.
    Client,
    /// Server: encrypts with the server-to-client keys.
    Server,
}

/// Live crypto for both directions of one connection.
///
/// Built by [`CryptoState::derive`] from the negotiated suite and the key
/// exchange output; installed as `current` by [`CryptoPair::rotate`].
pub struct CryptoState {
    suite: AlgorithmSuite,
    outbound: DirectionState,
    inbound: DirectionState,
}

impl CryptoState {
    /// Derives both directions' keys and IVs (RFC 4253 Section 7.2) and
    /// instantiates the engines.
    ///
    /// # Errors
    ///
    /// Returns [`SkerryError::NotSupported`] for a cipher, MAC or
    /// compression name this library does not implement, and
    /// [`SkerryError::Security`] when engine construction rejects the key
    /// material.
    pub fn derive(
        suite: &AlgorithmSuite,
        role: Role,
        hash: KexHash,
        shared_secret: &[u8],
        session_hash: &[u8],
        session_id: &[u8],
    ) -> SkerryResult<Self> {
        let cipher_c2s = lookup_cipher(&suite.cipher_client_to_server)?;
        let cipher_s2c = lookup_cipher(&suite.cipher_server_to_client)?;
        let mac_c2s = lookup_mac(&suite.mac_client_to_server)?;
        let mac_s2c = lookup_mac(&suite.mac_server_to_client)?;

        if suite.compression_client_to_server != "none"
            || suite.compression_server_to_client != "none"
        {
            return Err(SkerryError::NotSupported(
                "Compression is not implemented".to_string(),
            ));
        }

        let letter = |key_type: u8, len: usize| {
            derive_key(hash, shared_secret, session_hash, session_id, key_type, len)
        };

        // RFC 4253 letters: A/B are IVs, C/D encryption keys, E/F integrity
        // keys; first of each pair is client-to-server.
        let iv_c2s = letter(b'A', cipher_c2s.iv_size());
        let iv_s2c = letter(b'B', cipher_s2c.iv_size());
        let key_c2s = letter(b'C', cipher_c2s.key_size());
        let key_s2c = letter(b'D', cipher_s2c.key_size());
        let mac_key_c2s = letter(b'E', mac_c2s.key_size());
        let mac_key_s2c = letter(b'F', mac_s2c.key_size());

        let c2s = DirectionState {
            cipher: CipherEngine::new(cipher_c2s, &key_c2s, &iv_c2s)?,
            mac: MacEngine {
                algorithm: mac_c2s,
                key: mac_key_c2s,
            },
        };
        let s2c = DirectionState {
            cipher: CipherEngine::new(cipher_s2c, &key_s2c, &iv_s2c)?,
            mac: MacEngine {
                algorithm: mac_s2c,
                key: mac_key_s2c,
            },
        };

        let (outbound, inbound) = match role {
            Role::Client => (c2s, s2c),
            Role::Server => (s2c, c2s),
        };

        Ok(Self {
            suite: suite.clone(),
            outbound,
            inbound,
        })
    }

    /// Returns the negotiated algorithm suite this state was derived from.
    pub fn suite(&self) -> &AlgorithmSuite {
        &self.suite
    }

    /// Block size of the outbound cipher (padding alignment).
    pub fn outbound_block_size(&self) -> usize {
        16
    }

    /// Block size of the inbound cipher.
    pub fn inbound_block_size(&self) -> usize {
        16
    }

    /// Tag length appended to outbound packets.
    pub fn outbound_mac_len(&self) -> usize {
        self.outbound.mac.algorithm.tag_size()
    }

    /// Tag length expected on inbound packets.
    pub fn inbound_mac_len(&self) -> usize {
        self.inbound.mac.algorithm.tag_size()
    }

    /// Encrypts an outbound packet in place (whole packet, length included).
    pub fn encrypt_out(&mut self, packet: &mut [u8]) {
        self.outbound.cipher.apply_keystream(packet);
    }

    /// Decrypts inbound ciphertext in place.
    pub fn decrypt_in(&mut self, data: &mut [u8]) {
        self.inbound.cipher.apply_keystream(data);
    }

    /// Computes the MAC for an outbound plaintext packet.
    pub fn mac_out(&self, sequence: u32, packet: &[u8]) -> Vec<u8> {
        self.outbound.mac.compute(sequence, packet)
    }

    /// Verifies the MAC of an inbound plaintext packet.
    pub fn mac_verify_in(&self, sequence: u32, packet: &[u8], tag: &[u8]) -> bool {
        self.inbound.mac.verify(sequence, packet, tag)
    }
}

impl std::fmt::Debug for CryptoState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoState")
            .field("suite", &self.suite)
            .field("keys", &"<redacted>")
            .finish()
    }
}

fn lookup_cipher(name: &str) -> SkerryResult<CipherAlgorithm> {
    CipherAlgorithm::from_name(name)
        .ok_or_else(|| SkerryError::NotSupported(format!("Cipher not implemented: {}", name)))
}

fn lookup_mac(name: &str) -> SkerryResult<MacAlgorithm> {
    MacAlgorithm::from_name(name)
        .ok_or_else(|| SkerryError::NotSupported(format!("MAC not implemented: {}", name)))
}

/// The current/next crypto pair of a session.
///
/// `current` protects all traffic on the wire; `next` is the state under
/// construction during a key exchange. [`CryptoPair::rotate`] is the only
/// operation that swaps them, and it does so atomically: the old current is
/// dropped, next becomes current, and a fresh empty next is allocated.
#[derive(Debug, Default)]
pub struct CryptoPair {
    current: Option<CryptoState>,
    next: Option<CryptoState>,
}

impl CryptoPair {
    /// Creates a pair with no negotiated crypto (cleartext).
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live crypto state, if any.
    pub fn current(&self) -> Option<&CryptoState> {
        self.current.as_ref()
    }

    /// Returns the live crypto state mutably, if any.
    pub fn current_mut(&mut self) -> Option<&mut CryptoState> {
        self.current.as_mut()
    }

    /// Returns true when a next state has been installed and awaits rotation.
    pub fn next_ready(&self) -> bool {
        self.next.is_some()
    }

    /// Installs the freshly derived state as next.
    pub fn install_next(&mut self, state: CryptoState) {
        self.next = Some(state);
    }

    /// Rotates next into current at the NEWKEYS boundary.
    ///
    /// # Errors
    ///
    /// Returns [`SkerryError::InvalidState`] when no next state has been
    /// installed.
    pub fn rotate(&mut self) -> SkerryResult<()> {
        let next = self.next.take().ok_or_else(|| {
            SkerryError::InvalidState("rotate() without a pending crypto state".to_string())
        })?;
        self.current = Some(next);
        Ok(())
    }

    /// Discards any pending next state (key exchange failure path).
    pub fn discard_next(&mut self) {
        self.next = None;
    }
}
