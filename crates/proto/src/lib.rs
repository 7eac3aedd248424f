//! SSH client transport protocol for the Skerry library.
//!
//! This crate implements the client-side connection establishment core of
//! the SSH protocol: the state machine that drives a freshly opened
//! transport through banner exchange, version negotiation, key exchange,
//! Diffie-Hellman, session-key derivation and the switch to encrypted
//! traffic, up to the point where user authentication can begin.
//!
//! # Features
//!
//! - `ssh` (default) - SSH transport support
//!
//! # Example
//!
//! ```rust,no_run
//! use skerry_proto::ssh::client::SshClient;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! skerry_proto::init();
//!
//! let mut client = SshClient::connect("127.0.0.1:22").await?;
//! client.request_service("ssh-userauth").await?;
//! # Ok(())
//! # }
//! ```
//!
//! # References
//!
//! - [RFC 4251](https://datatracker.ietf.org/doc/html/rfc4251) - SSH Protocol Architecture
//! - [RFC 4253](https://datatracker.ietf.org/doc/html/rfc4253) - SSH Transport Layer Protocol
//! - [RFC 8268](https://datatracker.ietf.org/doc/html/rfc8268) - SHA-2 DH groups for SSH

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

#[cfg(feature = "ssh")]
pub mod ssh;

use std::sync::Once;

static INIT: Once = Once::new();

/// Performs the process-wide one-time library initialization.
///
/// Idempotent; may be called from any number of threads. Currently warms up
/// the Diffie-Hellman group constants so the first handshake does not pay
/// their construction cost.
pub fn init() {
    INIT.call_once(|| {
        #[cfg(feature = "ssh")]
        ssh::kex_dh::warm_up();
    });
}

/// Releases process-wide library state.
///
/// Idempotent. Present for lifecycle symmetry with [`init`]; the current
/// implementation holds no state that needs explicit teardown.
pub fn finalize() {}

/// Returns the library identification and licensing string.
pub fn copyright() -> &'static str {
    concat!(
        "Skerry ",
        env!("CARGO_PKG_VERSION"),
        " - SSH client library, distributed under the MIT OR Apache-2.0 licenses"
    )
}
