//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for the credential shared secret and
//! the Redis URL (which may embed a password). `SecretString` implements
//! `Debug` with redaction, so any struct deriving `Debug` over it is safe to
//! log, and the value is zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let secret = SecretString::from("client-secret");
//! assert!(!format!("{secret:?}").contains("client-secret"));
//! assert_eq!(secret.expose_secret(), "client-secret");
//! ```
//!
//! Use `SecretString` for:
//! - The credential shared secret
//! - Backend URLs carrying credentials (`redis://:password@host`)

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
