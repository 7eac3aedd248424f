//! SSH wire-format encoding primitives (RFC 4251 Section 5).
//!
//! Every SSH message is assembled from a small set of primitive encodings:
//! bytes, booleans, 32-bit big-endian integers, length-prefixed strings,
//! multiple-precision integers (mpint) and comma-separated name-lists.
//! Writers append to a [`bytes::BytesMut`]; reads go through [`WireReader`],
//! a bounds-checked cursor over a received payload.
//!
//! # Example
//!
//! ```rust
//! use bytes::BytesMut;
//! use skerry_proto::ssh::buffer::{put_string, WireReader};
//!
//! let mut buf = BytesMut::new();
//! put_string(&mut buf, b"ssh-userauth");
//!
//! let mut reader = WireReader::new(&buf);
//! assert_eq!(reader.read_string().unwrap(), b"ssh-userauth");
//! ```

use bytes::{BufMut, BytesMut};
use skerry_platform::{SkerryError, SkerryResult};

/// Appends an SSH string (uint32 length + raw bytes).
pub fn put_string(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
}

/// Appends a boolean encoded as a single byte.
pub fn put_bool(buf: &mut BytesMut, value: bool) {
    buf.put_u8(if value { 1 } else { 0 });
}

/// Appends a name-list: an SSH string holding comma-separated names.
pub fn put_name_list(buf: &mut BytesMut, names: &[String]) {
    let list = names.join(",");
    put_string(buf, list.as_bytes());
}

/// Appends an mpint: the minimal big-endian two's-complement encoding of a
/// non-negative integer, as an SSH string.
///
/// Leading zero bytes are trimmed; a `0x00` byte is prepended when the high
/// bit of the first byte is set, so the value is never read as negative.
pub fn put_mpint(buf: &mut BytesMut, data: &[u8]) {
    let trimmed: Vec<u8> = data.iter().skip_while(|&&b| b == 0).copied().collect();

    if trimmed.is_empty() {
        buf.put_u32(0);
        return;
    }

    if trimmed[0] & 0x80 != 0 {
        buf.put_u32(trimmed.len() as u32 + 1);
        buf.put_u8(0);
    } else {
        buf.put_u32(trimmed.len() as u32);
    }
    buf.put_slice(&trimmed);
}

/// Bounds-checked cursor over a received SSH payload.
///
/// Every read either yields the decoded value or a
/// [`SkerryError::Protocol`] describing the truncation; the cursor never
/// advances past the end of the input.
#[derive(Debug)]
pub struct WireReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> WireReader<'a> {
    /// Creates a reader over a payload.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Reads a single byte.
    pub fn read_u8(&mut self) -> SkerryResult<u8> {
        if self.remaining() < 1 {
            return Err(SkerryError::Protocol(format!(
                "Cannot read byte at offset {}",
                self.offset
            )));
        }
        let value = self.data[self.offset];
        self.offset += 1;
        Ok(value)
    }

    /// Reads a boolean (any non-zero byte is true).
    pub fn read_bool(&mut self) -> SkerryResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a 32-bit big-endian integer.
    pub fn read_u32(&mut self) -> SkerryResult<u32> {
        if self.remaining() < 4 {
            return Err(SkerryError::Protocol(format!(
                "Cannot read uint32 at offset {}",
                self.offset
            )));
        }
        let value = u32::from_be_bytes([
            self.data[self.offset],
            self.data[self.offset + 1],
            self.data[self.offset + 2],
            self.data[self.offset + 3],
        ]);
        self.offset += 4;
        Ok(value)
    }

    /// Reads a fixed number of raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> SkerryResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(SkerryError::Protocol(format!(
                "Payload truncated: expected {} bytes at offset {}",
                len, self.offset
            )));
        }
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    /// Reads an SSH string (uint32 length + raw bytes).
    pub fn read_string(&mut self) -> SkerryResult<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.read_bytes(len)
    }

    /// Reads an mpint as its raw big-endian magnitude. Negative values are
    /// rejected; a leading zero pad byte, if present, is preserved.
    pub fn read_mpint(&mut self) -> SkerryResult<&'a [u8]> {
        let bytes = self.read_string()?;
        if !bytes.is_empty() && bytes[0] & 0x80 != 0 {
            return Err(SkerryError::Protocol(
                "Negative mpint in packet".to_string(),
            ));
        }
        Ok(bytes)
    }

    /// Reads a name-list into its component names.
    pub fn read_name_list(&mut self) -> SkerryResult<Vec<String>> {
        let bytes = self.read_string()?;
        let list = std::str::from_utf8(bytes)
            .map_err(|_| SkerryError::Protocol("Name-list contains invalid UTF-8".to_string()))?;

        if list.is_empty() {
            Ok(vec![])
        } else {
            Ok(list.split(',').map(String::from).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_round_trip() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, b"hello");

        let mut reader = WireReader::new(&buf);
        assert_eq!(reader.read_string().unwrap(), b"hello");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_name_list_round_trip() {
        let names = vec!["first".to_string(), "second".to_string()];
        let mut buf = BytesMut::new();
        put_name_list(&mut buf, &names);

        let mut reader = WireReader::new(&buf);
        assert_eq!(reader.read_name_list().unwrap(), names);
    }

    #[test]
    fn test_name_list_empty() {
        let mut buf = BytesMut::new();
        put_name_list(&mut buf, &[]);

        let mut reader = WireReader::new(&buf);
        assert_eq!(reader.read_name_list().unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_mpint_zero() {
        let mut buf = BytesMut::new();
        put_mpint(&mut buf, &[]);
        assert_eq!(&buf[..], &[0, 0, 0, 0]);

        let mut buf = BytesMut::new();
        put_mpint(&mut buf, &[0, 0]);
        assert_eq!(&buf[..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_mpint_high_bit_padding() {
        let mut buf = BytesMut::new();
        put_mpint(&mut buf, &[0x80, 0x01]);
        assert_eq!(&buf[..], &[0, 0, 0, 3, 0x00, 0x80, 0x01]);
    }

    #[test]
    fn test_mpint_leading_zeros_trimmed() {
        let mut buf = BytesMut::new();
        put_mpint(&mut buf, &[0x00, 0x00, 0x12, 0x34]);
        assert_eq!(&buf[..], &[0, 0, 0, 2, 0x12, 0x34]);
    }

    #[test]
    fn test_mpint_read_strips_sign_byte() {
        let mut buf = BytesMut::new();
        put_mpint(&mut buf, &[0xFF, 0x00]);

        let mut reader = WireReader::new(&buf);
        assert_eq!(reader.read_mpint().unwrap(), &[0x00, 0xFF, 0x00]);
    }

    #[test]
    fn test_truncated_string() {
        let data = [0, 0, 0, 10, b'a', b'b'];
        let mut reader = WireReader::new(&data);
        let result = reader.read_string();
        assert!(matches!(result, Err(SkerryError::Protocol(_))));
    }

    #[test]
    fn test_truncated_u32() {
        let data = [0, 0];
        let mut reader = WireReader::new(&data);
        assert!(reader.read_u32().is_err());
    }

    #[test]
    fn test_read_bool() {
        let data = [0, 1, 42];
        let mut reader = WireReader::new(&data);
        assert!(!reader.read_bool().unwrap());
        assert!(reader.read_bool().unwrap());
        assert!(reader.read_bool().unwrap());
    }
}
