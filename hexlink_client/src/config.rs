//! Client configuration

use hexlink_config::{HandshakeConfig, Protocol, SessionConfig};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address to connect to
    pub server_addr: SocketAddr,

    /// Transport protocol
    pub protocol: Protocol,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Default deadline for `request`
    pub request_timeout: Duration,

    /// Session send/receive settings
    pub session: SessionConfig,

    /// Handshake settings (UDP only)
    pub handshake: HandshakeConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            protocol: Protocol::Tcp,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            session: SessionConfig::default(),
            handshake: HandshakeConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create new client config
    pub fn new(server_addr: SocketAddr) -> Self {
        Self {
            server_addr,
            ..Default::default()
        }
    }

    /// Set transport protocol
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set session config
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Set handshake config
    pub fn with_handshake(mut self, handshake: HandshakeConfig) -> Self {
        self.handshake = handshake;
        self
    }
}
