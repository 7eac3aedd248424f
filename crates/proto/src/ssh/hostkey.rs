//! Server host key handling.
//!
//! During key exchange the server presents its host key blob and a signature
//! over the exchange hash. This module parses both SSH wire structures and
//! verifies the signature:
//!
//! - host key blob: `string algorithm-name, <algorithm specific data>`
//! - signature blob: `string algorithm-name, string signature-data`
//!
//! `ssh-ed25519` is the supported algorithm. The signing half of
//! [`Ed25519HostKey`] exists for the server side of tests.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH};
use skerry_platform::{SkerryError, SkerryResult};
use zeroize::Zeroizing;

use crate::ssh::buffer::WireReader;

/// Host key algorithms known to this library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyAlgorithm {
    /// ssh-ed25519 - EdDSA signature using Ed25519
    SshEd25519,
}

impl HostKeyAlgorithm {
    /// Returns the SSH algorithm name.
    pub fn name(&self) -> &'static str {
        match self {
            HostKeyAlgorithm::SshEd25519 => "ssh-ed25519",
        }
    }

    /// Parses an algorithm from its SSH name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ssh-ed25519" => Some(HostKeyAlgorithm::SshEd25519),
            _ => None,
        }
    }
}

/// A server host key blob, split into algorithm and key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPublicKey {
    /// The algorithm announced in the blob.
    pub algorithm: HostKeyAlgorithm,
    /// Algorithm-specific key material (for Ed25519: the 32 raw key bytes).
    pub key_data: Vec<u8>,
    /// The full wire blob, kept for the exchange-hash transcript.
    pub blob: Vec<u8>,
}

impl HostPublicKey {
    /// Parses a host key blob received in KEXDH_REPLY.
    ///
    /// # Errors
    ///
    /// Returns [`SkerryError::Protocol`] on truncation or an algorithm this
    /// library does not know.
    pub fn from_blob(blob: &[u8]) -> SkerryResult<Self> {
        let mut reader = WireReader::new(blob);

        let name_bytes = reader.read_string()?;
        let name = std::str::from_utf8(name_bytes)
            .map_err(|_| SkerryError::Protocol("Invalid host key algorithm name".to_string()))?;

        let algorithm = HostKeyAlgorithm::from_name(name).ok_or_else(|| {
            SkerryError::Protocol(format!("Unsupported host key algorithm: {}", name))
        })?;

        let key_data = reader.read_string()?.to_vec();

        Ok(Self {
            algorithm,
            key_data,
            blob: blob.to_vec(),
        })
    }

    /// Verifies a KEXDH_REPLY signature blob over `data`.
    ///
    /// The blob carries its own algorithm name; it must match the host key's.
    ///
    /// # Errors
    ///
    /// Returns [`SkerryError::Security`] when the signature does not verify,
    /// [`SkerryError::Protocol`] when the blob is malformed.
    pub fn verify_signature(&self, data: &[u8], signature_blob: &[u8]) -> SkerryResult<()> {
        let mut reader = WireReader::new(signature_blob);

        let name_bytes = reader.read_string()?;
        let name = std::str::from_utf8(name_bytes)
            .map_err(|_| SkerryError::Protocol("Invalid signature format name".to_string()))?;

        if name != self.algorithm.name() {
            return Err(SkerryError::Protocol(format!(
                "Signature algorithm mismatch: host key is {}, signature is {}",
                self.algorithm.name(),
                name
            )));
        }

        let signature = reader.read_string()?;

        match self.algorithm {
            HostKeyAlgorithm::SshEd25519 => {
                if ed25519_verify(&self.key_data, data, signature)? {
                    Ok(())
                } else {
                    Err(SkerryError::Security(
                        "Host key signature verification failed".to_string(),
                    ))
                }
            }
        }
    }
}

/// Verifies an Ed25519 signature.
///
/// # Arguments
///
/// * `public_key` - The 32-byte Ed25519 public key
/// * `data` - The data that was signed
/// * `signature` - The 64-byte signature
fn ed25519_verify(public_key: &[u8], data: &[u8], signature: &[u8]) -> SkerryResult<bool> {
    if public_key.len() != 32 {
        return Err(SkerryError::Security(
            "Ed25519 public key must be 32 bytes".to_string(),
        ));
    }
    if signature.len() != 64 {
        return Err(SkerryError::Security(
            "Ed25519 signature must be 64 bytes".to_string(),
        ));
    }

    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(public_key);
    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| SkerryError::Security(format!("Invalid Ed25519 public key: {}", e)))?;

    let mut sig_bytes = [0u8; 64];
    sig_bytes.copy_from_slice(signature);
    let signature = Signature::from_bytes(&sig_bytes);

    Ok(verifying_key.verify(data, &signature).is_ok())
}

/// Ed25519 host key pair (ssh-ed25519).
///
/// The client core only verifies; the signing half serves the server role in
/// tests and tools.
#[derive(Clone)]
pub struct Ed25519HostKey {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl Ed25519HostKey {
    /// Generates a new Ed25519 key pair.
    pub fn generate() -> Self {
        let mut csprng = rand::thread_rng();
        let secret_bytes: [u8; SECRET_KEY_LENGTH] = rand::Rng::gen(&mut csprng);
        let signing_key = SigningKey::from_bytes(&secret_bytes);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Creates a key pair from the 32-byte secret key.
    pub fn from_bytes(secret_bytes: &[u8]) -> SkerryResult<Self> {
        if secret_bytes.len() != SECRET_KEY_LENGTH {
            return Err(SkerryError::Security(
                "Ed25519 secret key must be 32 bytes".to_string(),
            ));
        }
        let mut key_bytes = [0u8; SECRET_KEY_LENGTH];
        key_bytes.copy_from_slice(secret_bytes);
        let signing_key = SigningKey::from_bytes(&key_bytes);
        let verifying_key = signing_key.verifying_key();
        Ok(Self {
            signing_key,
            verifying_key,
        })
    }

    /// Returns the secret key bytes.
    ///
    /// WARNING: This exposes the private key material. Handle with care.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing_key.to_bytes())
    }

    /// Returns the host key blob in SSH wire format.
    pub fn public_key_blob(&self) -> Vec<u8> {
        let mut bytes = Vec::new();

        let alg_name = b"ssh-ed25519";
        bytes.extend_from_slice(&(alg_name.len() as u32).to_be_bytes());
        bytes.extend_from_slice(alg_name);

        let public_key = self.verifying_key.as_bytes();
        bytes.extend_from_slice(&(public_key.len() as u32).to_be_bytes());
        bytes.extend_from_slice(public_key);

        bytes
    }

    /// Signs `data` and returns the signature blob in SSH wire format.
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        let signature = self.signing_key.sign(data);

        let mut bytes = Vec::new();

        let alg_name = b"ssh-ed25519";
        bytes.extend_from_slice(&(alg_name.len() as u32).to_be_bytes());
        bytes.extend_from_slice(alg_name);

        let sig_bytes = signature.to_bytes();
        bytes.extend_from_slice(&(sig_bytes.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&sig_bytes);

        bytes
    }
}

impl std::fmt::Debug for Ed25519HostKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519HostKey")
            .field("algorithm", &"ssh-ed25519")
            .field("public_key", &hex::encode(self.verifying_key.as_bytes()))
            .finish_non_exhaustive()
    }
}
