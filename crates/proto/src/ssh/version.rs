//! SSH identification string (banner) handling (RFC 4253 Section 4.2).
//!
//! The SSH protocol begins with both sides sending an identification string:
//!
//! ```text
//! SSH-protoversion-softwareversion SP comments CR LF
//! ```
//!
//! Historical servers announce three dialects: `SSH-1.5-…` (protocol 1
//! only), `SSH-1.99-…` (protocol 1, also speaks protocol 2) and
//! `SSH-2.0-…` (protocol 2 only). This module parses a received banner into
//! the set of protocol majors the peer speaks and extracts the OpenSSH
//! vendor version when present.
//!
//! # Example
//!
//! ```rust
//! use skerry_proto::ssh::version::Banner;
//!
//! let banner = Banner::from_line("SSH-2.0-OpenSSH_7.9p1");
//! let dialect = banner.analyze().unwrap();
//! assert!(dialect.ssh2 && !dialect.ssh1);
//! assert_eq!(banner.vendor_version(), Some((7, 9)));
//! ```

use skerry_platform::{SkerryError, SkerryResult};

/// Maximum banner length in bytes, including the terminating newline.
///
/// RFC 4253 allows 255; this core keeps the historical 128-byte receive
/// limit.
pub const MAX_BANNER_LENGTH: usize = 128;

/// Protocol majors a peer announced in its banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    /// Peer speaks SSH protocol 1.
    pub ssh1: bool,
    /// Peer speaks SSH protocol 2.
    pub ssh2: bool,
}

/// An SSH identification string, stored without its CR LF terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    line: String,
}

impl Banner {
    /// Creates a banner from a received line. Trailing CR and LF are
    /// stripped; interior bytes are kept verbatim.
    pub fn from_line(line: &str) -> Self {
        Self {
            line: line.trim_end_matches('\n').trim_end_matches('\r').to_string(),
        }
    }

    /// Returns the client identification banner for a protocol major.
    ///
    /// # Example
    ///
    /// ```rust
    /// use skerry_proto::ssh::version::Banner;
    ///
    /// let banner = Banner::client(2);
    /// assert!(banner.as_str().starts_with("SSH-2.0-Skerry_"));
    /// ```
    pub fn client(version: u8) -> Self {
        let line = if version == 1 {
            format!("SSH-1.5-Skerry_{}", env!("CARGO_PKG_VERSION"))
        } else {
            format!("SSH-2.0-Skerry_{}", env!("CARGO_PKG_VERSION"))
        };
        Self { line }
    }

    /// Returns the banner text without terminator.
    pub fn as_str(&self) -> &str {
        &self.line
    }

    /// Determines which protocol majors the peer speaks.
    ///
    /// The banner must begin with the literal `SSH-`; the character at
    /// offset 4 selects the dialect (`1` with a `1.99` sub-version also
    /// enables protocol 2).
    ///
    /// # Errors
    ///
    /// Returns [`SkerryError::Protocol`] with a "Protocol mismatch" message
    /// when the banner is not an SSH identification string.
    pub fn analyze(&self) -> SkerryResult<Dialect> {
        let bytes = self.line.as_bytes();

        if !self.line.starts_with("SSH-") || bytes.len() < 5 {
            return Err(SkerryError::Protocol(format!(
                "Protocol mismatch: {}",
                self.line
            )));
        }

        match bytes[4] {
            b'1' => Ok(Dialect {
                ssh1: true,
                // "SSH-1.99-…" announces both majors
                ssh2: bytes.len() > 6 && bytes[6] == b'9',
            }),
            b'2' => Ok(Dialect {
                ssh1: false,
                ssh2: true,
            }),
            _ => Err(SkerryError::Protocol(format!(
                "Protocol mismatch: {}",
                self.line
            ))),
        }
    }

    /// Extracts the OpenSSH vendor version as `(major, minor)`.
    ///
    /// Scans for the `OpenSSH_` marker and parses the two decimal runs that
    /// follow it. Returns `None` when the peer is not OpenSSH or the fields
    /// do not parse; this is never an error.
    pub fn vendor_version(&self) -> Option<(u32, u32)> {
        let rest = &self.line[self.line.find("OpenSSH_")? + "OpenSSH_".len()..];

        let mut parts = rest.splitn(2, '.');
        let major = take_decimal_run(parts.next()?)?;
        let minor = take_decimal_run(parts.next()?)?;
        Some((major, minor))
    }

    /// Converts to wire format (with CR LF).
    pub fn to_wire_format(&self) -> Vec<u8> {
        format!("{}\r\n", self.line).into_bytes()
    }
}

impl std::fmt::Display for Banner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.line)
    }
}

/// Parses the leading decimal digit run of `s`, ignoring the suffix.
fn take_decimal_run(s: &str) -> Option<u32> {
    let digits: &str = &s[..s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len())];
    digits.parse().ok()
}

/// Packs an OpenSSH-style version triple into a comparable integer.
///
/// # Example
///
/// ```rust
/// use skerry_proto::ssh::version::version_int;
///
/// assert!(version_int(7, 9, 0) > version_int(6, 6, 1));
/// ```
pub const fn version_int(major: u32, minor: u32, patch: u32) -> u32 {
    (major << 16) | (minor << 8) | patch
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_v2() {
        let dialect = Banner::from_line("SSH-2.0-OpenSSH_7.9p1").analyze().unwrap();
        assert_eq!(
            dialect,
            Dialect {
                ssh1: false,
                ssh2: true
            }
        );
    }

    #[test]
    fn test_analyze_v1_only() {
        let dialect = Banner::from_line("SSH-1.5-Old").analyze().unwrap();
        assert_eq!(
            dialect,
            Dialect {
                ssh1: true,
                ssh2: false
            }
        );
    }

    #[test]
    fn test_analyze_v1_99_speaks_both() {
        let dialect = Banner::from_line("SSH-1.99-Foo").analyze().unwrap();
        assert_eq!(
            dialect,
            Dialect {
                ssh1: true,
                ssh2: true
            }
        );
    }

    #[test]
    fn test_analyze_protocol_mismatch() {
        for line in ["HTTP/1.1 400 Bad Request", "SSH-3.0-Future", "SSH", ""] {
            let result = Banner::from_line(line).analyze();
            match result {
                Err(SkerryError::Protocol(msg)) => {
                    assert!(msg.starts_with("Protocol mismatch:"), "{}", msg);
                }
                other => panic!("expected Protocol error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_vendor_version() {
        let banner = Banner::from_line("SSH-2.0-OpenSSH_7.9p1 Debian-10+deb10u2");
        assert_eq!(banner.vendor_version(), Some((7, 9)));
    }

    #[test]
    fn test_vendor_version_two_digit_major() {
        let banner = Banner::from_line("SSH-2.0-OpenSSH_10.1");
        assert_eq!(banner.vendor_version(), Some((10, 1)));
    }

    #[test]
    fn test_vendor_version_absent_or_garbled() {
        assert_eq!(Banner::from_line("SSH-2.0-Dropbear_2022.83").vendor_version(), None);
        assert_eq!(Banner::from_line("SSH-2.0-OpenSSH_x.y").vendor_version(), None);
    }

    #[test]
    fn test_client_banner_wire_format() {
        let banner = Banner::client(2);
        let wire = banner.to_wire_format();
        assert!(wire.starts_with(b"SSH-2.0-Skerry_"));
        assert!(wire.ends_with(b"\r\n"));
        assert!(wire.len() <= MAX_BANNER_LENGTH);

        assert!(Banner::client(1).as_str().starts_with("SSH-1.5-"));
    }

    #[test]
    fn test_from_line_strips_terminator() {
        let banner = Banner::from_line("SSH-2.0-OpenSSH_8.9\r\n");
        assert_eq!(banner.as_str(), "SSH-2.0-OpenSSH_8.9");
    }

    #[test]
    fn test_version_int_packing() {
        assert_eq!(version_int(7, 9, 0), (7 << 16) | (9 << 8));
        assert_eq!(version_int(0, 0, 0), 0);
    }
}
