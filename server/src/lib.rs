//! Bot Callback Relay
//!
//! Receives a bot platform's webhook stream on one public endpoint, answers the
//! platform's signature handshake, and fans every event out to the downstream
//! bot processes registered for its bot id, over HTTP or WebSocket.

pub mod api;
pub mod config;
pub mod correlation;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod observability;
pub mod store;
