//! Redchat - a room-based chat relay implemented in Rust
//!
//! Clients connect over WebSockets, join named rooms and publish messages.
//! Each room with local members holds exactly one broker subscription,
//! through which every process serving that room receives its traffic.

pub mod broker;
pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod handlers;

// Re-export main components
pub use config::*;
pub use constants::*;
