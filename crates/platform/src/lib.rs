//! # Skerry Platform
//!
//! Core platform types and utilities for the Skerry SSH library.
//!
//! This crate provides:
//! - Unified error types (`SkerryError`, `SkerryResult`)
//! - Error severity classification (`ErrorKind`)
//!
//! # Examples
//!
//! ```
//! use skerry_platform::{SkerryError, SkerryResult};
//!
//! fn example_function() -> SkerryResult<String> {
//!     Ok("Hello, Skerry!".to_string())
//! }
//!
//! # fn main() -> SkerryResult<()> {
//! let result = example_function()?;
//! assert_eq!(result, "Hello, Skerry!");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod error;

pub use error::{ErrorKind, SkerryError, SkerryResult};

/// Platform version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
