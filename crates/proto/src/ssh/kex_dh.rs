//! Diffie-Hellman key exchange (RFC 4253 Section 8, RFC 4253 Section 7.2).
//!
//! This module implements the classic MODP-group key exchange methods:
//! - diffie-hellman-group1-sha1 (1024-bit Oakley Group 2)
//! - diffie-hellman-group14-sha1 (2048-bit MODP group, RFC 3526)
//! - diffie-hellman-group14-sha256 (RFC 8268)
//!
//! It also computes the exchange hash over the canonical handshake
//! transcript and derives session key material from the shared secret.
//!
//! # Security
//!
//! - Secret exponents and shared secrets are zeroized on drop
//! - Peer public values are range-checked before use
//!
//! # Example
//!
//! ```rust
//! use skerry_proto::ssh::kex_dh::DhExchange;
//!
//! let client = DhExchange::from_kex_name("diffie-hellman-group14-sha256").unwrap();
//! assert!(!client.public_key().is_empty());
//! ```

use bytes::BytesMut;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use skerry_platform::{SkerryError, SkerryResult};
use zeroize::{Zeroize, Zeroizing};

use crate::ssh::buffer::{put_mpint, put_string};

/// MODP group parameters (RFC 2409 Section 6.2, RFC 3526 Section 3).
mod groups {
    use num_bigint::BigUint;
    use once_cell::sync::Lazy;

    /// Oakley Group 2 prime (1024-bit), used by diffie-hellman-group1.
    pub static P_GROUP1: Lazy<BigUint> = Lazy::new(|| {
        BigUint::from_bytes_be(
            &hex::decode(
                "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
                 29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
                 EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
                 E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
                 EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381\
                 FFFFFFFFFFFFFFFF",
            )
            .expect("Invalid hex"),
        )
    });

    /// MODP Group 14 prime (2048-bit).
    pub static P_GROUP14: Lazy<BigUint> = Lazy::new(|| {
        BigUint::from_bytes_be(
            &hex::decode(
                "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1\
                 29024E088A67CC74020BBEA63B139B22514A08798E3404DD\
                 EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245\
                 E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
                 EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D\
                 C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F\
                 83655D23DCA3AD961C62F356208552BB9ED529077096966D\
                 670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
                 E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9\
                 DE2BCBF6955817183995497CEA956AE515D2261898FA0510\
                 15728E5A8AACAA68FFFFFFFFFFFFFFFF",
            )
            .expect("Invalid hex"),
        )
    });

    /// Shared generator for both groups.
    pub static G: Lazy<BigUint> = Lazy::new(|| BigUint::from(2u32));
}

/// Forces construction of the group constants (library init).
pub(crate) fn warm_up() {
    once_cell::sync::Lazy::force(&groups::P_GROUP1);
    once_cell::sync::Lazy::force(&groups::P_GROUP14);
    once_cell::sync::Lazy::force(&groups::G);
}

/// The hash algorithm bound to a key exchange method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KexHash {
    /// SHA-1 (group1-sha1, group14-sha1)
    Sha1,
    /// SHA-256 (group14-sha256)
    Sha256,
}

impl KexHash {
    /// Digest length in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            KexHash::Sha1 => 20,
            KexHash::Sha256 => 32,
        }
    }

    /// Hashes a single buffer.
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            KexHash::Sha1 => Sha1::digest(data).to_vec(),
            KexHash::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

/// The MODP group of a key exchange method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhGroup {
    /// 1024-bit Oakley Group 2.
    Group1,
    /// 2048-bit MODP Group 14.
    Group14,
}

impl DhGroup {
    fn prime(&self) -> &'static num_bigint::BigUint {
        match self {
            DhGroup::Group1 => &groups::P_GROUP1,
            DhGroup::Group14 => &groups::P_GROUP14,
        }
    }
}

/// One side of a classic Diffie-Hellman exchange.
///
/// Generates a secret exponent `x` in `[2, p-2]` and the public value
/// `g^x mod p`. The same type serves both sides: each peer feeds the other's
/// public value to [`DhExchange::compute_shared_secret`].
pub struct DhExchange {
    group: DhGroup,
    hash: KexHash,
    /// Secret exponent bytes (big-endian), zeroized on drop.
    secret: Vec<u8>,
    /// Public value g^x mod p (big-endian).
    public: Vec<u8>,
}

impl DhExchange {
    /// Creates an exchange for a negotiated kex method name.
    ///
    /// # Errors
    ///
    /// Returns [`SkerryError::Protocol`] for a method this module does not
    /// implement.
    pub fn from_kex_name(name: &str) -> SkerryResult<Self> {
        match name {
            "diffie-hellman-group1-sha1" => Ok(Self::new(DhGroup::Group1, KexHash::Sha1)),
            "diffie-hellman-group14-sha1" => Ok(Self::new(DhGroup::Group14, KexHash::Sha1)),
            "diffie-hellman-group14-sha256" => Ok(Self::new(DhGroup::Group14, KexHash::Sha256)),
            _ => Err(SkerryError::Protocol(format!(
                "Unsupported KEX algorithm: {}",
                name
            ))),
        }
    }

    /// Generates a fresh key pair in the given group.
    pub fn new(group: DhGroup, hash: KexHash) -> Self {
        use num_bigint::{BigUint, RandBigInt};
        use rand::thread_rng;

        let mut rng = thread_rng();

        let p_minus_one = group.prime() - 1u32;
        let x = rng.gen_biguint_range(&BigUint::from(2u32), &p_minus_one);
        let e = groups::G.modpow(&x, group.prime());

        Self {
            group,
            hash,
            secret: x.to_bytes_be(),
            public: e.to_bytes_be(),
        }
    }

    /// Returns the public value (big-endian, no mpint framing).
    pub fn public_key(&self) -> &[u8] {
        &self.public
    }

    /// Returns the hash algorithm of the negotiated method.
    pub fn hash(&self) -> KexHash {
        self.hash
    }

    /// Computes the shared secret `peer^x mod p`.
    ///
    /// # Errors
    ///
    /// Returns [`SkerryError::Protocol`] when the peer value is outside
    /// `(1, p)`.
    pub fn compute_shared_secret(&self, peer_public: &[u8]) -> SkerryResult<Zeroizing<Vec<u8>>> {
        use num_bigint::BigUint;

        let peer = BigUint::from_bytes_be(peer_public);
        if peer <= BigUint::from(1u32) || peer >= *self.group.prime() {
            return Err(SkerryError::Protocol(
                "Invalid peer public key: out of range".to_string(),
            ));
        }

        let x = BigUint::from_bytes_be(&self.secret);
        let k = peer.modpow(&x, self.group.prime());

        Ok(Zeroizing::new(k.to_bytes_be()))
    }
}

impl Drop for DhExchange {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

impl std::fmt::Debug for DhExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhExchange")
            .field("group", &self.group)
            .field("hash", &self.hash)
            .field("secret", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// Computes the exchange hash H (RFC 4253 Section 8).
///
/// ```text
/// H = HASH(string V_C || string V_S || string I_C || string I_S ||
///          string K_S || mpint e || mpint f || mpint K)
/// ```
///
/// Where V_C/V_S are the identification banners without CR LF, I_C/I_S the
/// raw KEXINIT payloads, K_S the server host key blob, e/f the exchange
/// public values and K the shared secret.
#[allow(clippy::too_many_arguments)]
pub fn exchange_hash(
    hash: KexHash,
    client_banner: &str,
    server_banner: &str,
    client_kexinit: &[u8],
    server_kexinit: &[u8],
    host_key_blob: &[u8],
    e: &[u8],
    f: &[u8],
    k: &[u8],
) -> Vec<u8> {
    let mut transcript = BytesMut::new();

    put_string(&mut transcript, client_banner.as_bytes());
    put_string(&mut transcript, server_banner.as_bytes());
    put_string(&mut transcript, client_kexinit);
    put_string(&mut transcript, server_kexinit);
    put_string(&mut transcript, host_key_blob);
    put_mpint(&mut transcript, e);
    put_mpint(&mut transcript, f);
    put_mpint(&mut transcript, k);

    hash.digest(&transcript)
}

/// Derives session key material (RFC 4253 Section 7.2).
///
/// ```text
/// Initial IV client to server:     HASH(K || H || "A" || session_id)
/// Initial IV server to client:     HASH(K || H || "B" || session_id)
/// Encryption key client to server: HASH(K || H || "C" || session_id)
/// Encryption key server to client: HASH(K || H || "D" || session_id)
/// Integrity key client to server:  HASH(K || H || "E" || session_id)
/// Integrity key server to client:  HASH(K || H || "F" || session_id)
/// ```
///
/// `K` is hashed in mpint encoding. Output is extended with
/// `HASH(K || H || output-so-far)` blocks until `key_length` bytes exist.
pub fn derive_key(
    hash: KexHash,
    shared_secret: &[u8],
    session_hash: &[u8],
    session_id: &[u8],
    key_type: u8,
    key_length: usize,
) -> Zeroizing<Vec<u8>> {
    let mut k_mpint = BytesMut::new();
    put_mpint(&mut k_mpint, shared_secret);

    let mut block_input = Vec::with_capacity(k_mpint.len() + session_hash.len() + 1 + session_id.len());
    block_input.extend_from_slice(&k_mpint);
    block_input.extend_from_slice(session_hash);
    block_input.push(key_type);
    block_input.extend_from_slice(session_id);

    let mut key = Zeroizing::new(hash.digest(&block_input));
    block_input.zeroize();

    while key.len() < key_length {
        let mut next_input = Vec::with_capacity(k_mpint.len() + session_hash.len() + key.len());
        next_input.extend_from_slice(&k_mpint);
        next_input.extend_from_slice(session_hash);
        next_input.extend_from_slice(&key);
        let block = hash.digest(&next_input);
        next_input.zeroize();
        key.extend_from_slice(&block);
    }

    key.truncate(key_length);
    key
}
