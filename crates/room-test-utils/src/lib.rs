//! # Room Test Utilities
//!
//! Shared test utilities for the leave-vote room service.
//!
//! ## Modules
//!
//! - `credentials` - Sealed connection credentials built like the host platform does
//! - `mocks` - Recording and failing store/bus implementations
//! - `fixtures` - Rooms and participants with unique identifiers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use room_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let room = TestRoom::random();
//!     let alice = room.participant("alice");
//!
//!     let token = TestCredential::for_participant(&alice)
//!         .with_secret("shared-secret")
//!         .seal();
//!
//!     let bus = RecordingFanoutBus::new();
//!     // Run your test...
//! }
//! ```

pub mod credentials;
pub mod fixtures;
pub mod mocks;

// Re-export commonly used items
pub use credentials::*;
pub use fixtures::*;
pub use mocks::*;
