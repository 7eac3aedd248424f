//! SSH binary packet protocol (RFC 4253 Section 6).
//!
//! # Packet Format
//!
//! ```text
//! uint32    packet_length
//! byte      padding_length
//! byte[n1]  payload (n1 = packet_length - padding_length - 1)
//! byte[n2]  random padding (n2 = padding_length)
//! byte[m]   mac (encrypt-and-MAC, present once keys are live)
//! ```
//!
//! Before NEWKEYS packets travel in cleartext with 8-byte padding
//! alignment. Afterwards the whole packet (length field included) is
//! encrypted with the negotiated CTR cipher and followed by
//! `MAC(sequence || plaintext-packet)`; padding aligns to the cipher block.
//!
//! The codec is incremental: bytes arriving in arbitrary chunks are fed to
//! [`PacketCodec::feed`] and [`PacketCodec::next_packet`] yields a payload
//! only once the full packet (and its MAC) is present. Because the CTR
//! keystream advances as data is decrypted, a partially decrypted packet is
//! carried across calls.
//!
//! # Constraints
//!
//! - Maximum packet size: 35000 bytes (DoS limit per RFC 4253)
//! - Minimum padding: 4 bytes; padding is cryptographically random
//! - Send and receive sequence numbers count every packet from connection
//!   start and are never reset by a key exchange

use bytes::{BufMut, BytesMut};
use rand::RngCore;
use skerry_platform::{SkerryError, SkerryResult};

use crate::ssh::crypto::CryptoState;

/// Maximum packet size in bytes (RFC 4253 Section 6.1).
pub const MAX_PACKET_SIZE: usize = 35000;

/// Minimum padding length in bytes (RFC 4253 Section 6).
pub const MIN_PADDING_LEN: usize = 4;

/// Cleartext padding alignment before any cipher is negotiated.
const CLEARTEXT_BLOCK: usize = 8;

/// A packet whose first cipher block has been decrypted while the remainder
/// is still in flight.
#[derive(Debug)]
struct PartialPacket {
    plaintext: Vec<u8>,
    packet_length: usize,
}

/// Incremental SSH packet encoder/decoder with sequence counters.
#[derive(Debug, Default)]
pub struct PacketCodec {
    sequence_out: u32,
    sequence_in: u32,
    inbox: BytesMut,
    partial: Option<PartialPacket>,
}

impl PacketCodec {
    /// Creates a codec with both sequence counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the outbound sequence number of the next packet.
    pub fn sequence_out(&self) -> u32 {
        self.sequence_out
    }

    /// Returns the inbound sequence number of the next packet.
    pub fn sequence_in(&self) -> u32 {
        self.sequence_in
    }

    /// Appends received bytes to the decode buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.inbox.extend_from_slice(bytes);
    }

    /// Number of buffered, not yet decoded bytes.
    pub fn buffered(&self) -> usize {
        self.inbox.len()
    }

    /// Frames, pads and (when `crypto` is live) protects a payload.
    ///
    /// Returns the wire bytes and advances the outbound sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`SkerryError::Protocol`] for an oversized payload.
    pub fn seal(
        &mut self,
        crypto: Option<&mut CryptoState>,
        payload: &[u8],
    ) -> SkerryResult<Vec<u8>> {
        let block = crypto
            .as_ref()
            .map_or(CLEARTEXT_BLOCK, |c| c.outbound_block_size());

        // 4 length + 1 padding_length + payload + padding ≡ 0 (mod block)
        let mut padding_len = block - ((5 + payload.len()) % block);
        if padding_len < MIN_PADDING_LEN {
            padding_len += block;
        }

        let packet_length = 1 + payload.len() + padding_len;
        if 4 + packet_length > MAX_PACKET_SIZE {
            return Err(SkerryError::Protocol(format!(
                "Outbound packet too large: {} bytes",
                4 + packet_length
            )));
        }

        let mut packet = BytesMut::with_capacity(4 + packet_length);
        packet.put_u32(packet_length as u32);
        packet.put_u8(padding_len as u8);
        packet.put_slice(payload);

        let mut padding = vec![0u8; padding_len];
        rand::thread_rng().fill_bytes(&mut padding);
        packet.put_slice(&padding);

        let mut wire = packet.to_vec();
        if let Some(crypto) = crypto {
            let tag = crypto.mac_out(self.sequence_out, &wire);
            crypto.encrypt_out(&mut wire);
            wire.extend_from_slice(&tag);
        }

        self.sequence_out = self.sequence_out.wrapping_add(1);
        Ok(wire)
    }

    /// Decodes the next complete packet from the buffered bytes.
    ///
    /// Returns `Ok(None)` until a full packet is available. On success the
    /// framing (length, padding) is stripped and the payload returned.
    ///
    /// # Errors
    ///
    /// Returns [`SkerryError::Protocol`] for malformed framing and
    /// [`SkerryError::Security`] for a MAC mismatch.
    pub fn next_packet(
        &mut self,
        crypto: Option<&mut CryptoState>,
    ) -> SkerryResult<Option<Vec<u8>>> {
        match crypto {
            None => self.next_cleartext(),
            Some(crypto) => self.next_encrypted(crypto),
        }
    }

    fn next_cleartext(&mut self) -> SkerryResult<Option<Vec<u8>>> {
        if self.inbox.len() < 4 {
            return Ok(None);
        }

        let packet_length = u32::from_be_bytes([
            self.inbox[0],
            self.inbox[1],
            self.inbox[2],
            self.inbox[3],
        ]) as usize;
        validate_packet_length(packet_length)?;

        if self.inbox.len() < 4 + packet_length {
            return Ok(None);
        }

        let packet = self.inbox.split_to(4 + packet_length);
        self.sequence_in = self.sequence_in.wrapping_add(1);

        strip_framing(&packet, packet_length)
    }

    fn next_encrypted(&mut self, crypto: &mut CryptoState) -> SkerryResult<Option<Vec<u8>>> {
        let block = crypto.inbound_block_size();
        let mac_len = crypto.inbound_mac_len();

        if self.partial.is_none() {
            if self.inbox.len() < block {
                return Ok(None);
            }

            let mut first = self.inbox.split_to(block).to_vec();
            crypto.decrypt_in(&mut first);

            let packet_length =
                u32::from_be_bytes([first[0], first[1], first[2], first[3]]) as usize;
            validate_packet_length(packet_length)?;
            if (4 + packet_length) % block != 0 {
                return Err(SkerryError::Protocol(format!(
                    "Encrypted packet length {} not aligned to cipher block",
                    packet_length
                )));
            }

            self.partial = Some(PartialPacket {
                plaintext: first,
                packet_length,
            });
        }

        let Some(partial) = &mut self.partial else {
            return Ok(None);
        };

        let remaining = 4 + partial.packet_length - partial.plaintext.len();
        if self.inbox.len() < remaining + mac_len {
            return Ok(None);
        }

        let mut rest = self.inbox.split_to(remaining).to_vec();
        crypto.decrypt_in(&mut rest);
        partial.plaintext.extend_from_slice(&rest);

        let tag = self.inbox.split_to(mac_len);
        if !crypto.mac_verify_in(self.sequence_in, &partial.plaintext, &tag) {
            return Err(SkerryError::Security(
                "Packet MAC verification failed".to_string(),
            ));
        }

        let packet = match self.partial.take() {
            Some(p) => p,
            None => return Ok(None),
        };
        self.sequence_in = self.sequence_in.wrapping_add(1);

        strip_framing(&packet.plaintext, packet.packet_length)
    }
}

fn validate_packet_length(packet_length: usize) -> SkerryResult<()> {
    // 1 padding_length byte + minimum 4 bytes padding
    if packet_length < 1 + MIN_PADDING_LEN || 4 + packet_length > MAX_PACKET_SIZE {
        return Err(SkerryError::Protocol(format!(
            "Invalid packet length: {}",
            packet_length
        )));
    }
    Ok(())
}

fn strip_framing(packet: &[u8], packet_length: usize) -> SkerryResult<Option<Vec<u8>>> {
    let padding_length = packet[4] as usize;
    if padding_length < MIN_PADDING_LEN || padding_length + 1 > packet_length {
        return Err(SkerryError::Protocol(format!(
            "Invalid padding length: {}",
            padding_length
        )));
    }

    Ok(Some(
        packet[5..4 + packet_length - padding_length].to_vec(),
    ))
}
