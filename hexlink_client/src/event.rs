//! Client events

use hexlink_core::SessionId;
use std::net::SocketAddr;

/// Client event
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Connected to server
    Connected {
        addr: SocketAddr,
        session_id: SessionId,
    },

    /// Disconnected from server
    Disconnected { reason: String },

    /// Message accepted by the session's send queue
    MessageSent { type_name: &'static str },
}
