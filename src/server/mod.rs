//! WebSocket server module
//!
//! Accepts WebSocket connections, keeps them in the connection registry and
//! broadcasts echoed frames to every connected peer.

mod registry;
mod websocket;

pub use registry::*;
pub use websocket::*;
