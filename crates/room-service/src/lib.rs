//! Leave-Vote Room Service Library
//!
//! Participants in a room connect over WebSocket and may cast one vote to
//! leave. When the votes reach `ceil(participants / 2)` the room triggers,
//! irreversibly, and every connection receives the ending view.
//!
//! # Architecture
//!
//! ```text
//! connection -> credential -> store (add/vote/remove) -> trigger::evaluate
//!                                  |
//!                              render -> fanout bus -> every process
//!                                                        |
//!                                           registry -> local connections
//! ```
//!
//! Room state lives in Redis when configured, shared by every process, with
//! a 24h sliding expiry. Without Redis (or if it is unreachable at startup)
//! the process runs local-only with an in-memory store and a loopback bus.
//!
//! # Modules
//!
//! - [`trigger`] - Pure majority decision
//! - [`store`] - Room membership backends
//! - [`registry`] - Local connection index
//! - [`fanout`] - Cross-process event bus
//! - [`credential`] - Connection credential decoding
//! - [`room`] - Join/vote/leave orchestration
//! - [`transport`] - WebSocket boundary

pub mod backend;
pub mod config;
pub mod credential;
pub mod errors;
pub mod fanout;
pub mod observability;
pub mod registry;
pub mod render;
pub mod room;
pub mod store;
pub mod transport;
pub mod trigger;
