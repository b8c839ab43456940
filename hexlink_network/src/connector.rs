//! 连接器
//!
//! 建立出站会话。无连接协议在会话可用前先完成握手，由服务器分配会话 ID。

use crate::protocol::handshake::client_handshake;
use crate::session::{Session, SessionHandler};
use crate::transport::{TcpTransport, Transport, UdpTransport};
use hexlink_config::{HandshakeConfig, Protocol, SessionConfig};
use hexlink_core::{HexlinkError, Result, SessionIdGenerator};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// 连接器
pub struct Connector {
    session: SessionConfig,
    handshake: HandshakeConfig,
    connect_timeout: Duration,
    ids: SessionIdGenerator,
}

impl Connector {
    /// 创建新的连接器
    pub fn new(session: SessionConfig, handshake: HandshakeConfig) -> Self {
        Self {
            session,
            handshake,
            connect_timeout: Duration::from_secs(5),
            ids: SessionIdGenerator::new(),
        }
    }

    /// 设置连接超时
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// 连接到服务器并启动会话
    pub async fn connect(
        &self,
        addr: SocketAddr,
        protocol: Protocol,
        handler: Arc<dyn SessionHandler>,
    ) -> Result<Arc<Session>> {
        debug!(addr = %addr, protocol = %protocol, "正在连接");

        let session = match protocol {
            Protocol::Tcp => {
                let transport = tokio::time::timeout(self.connect_timeout, TcpTransport::connect(addr))
                    .await
                    .map_err(|_| HexlinkError::timeout().with_context(addr))?
                    .map_err(|e| HexlinkError::network(format!("连接失败: {}", e)).with_context(addr))?;
                Session::new(self.ids.next(), Arc::new(transport), self.session.clone())
            }
            Protocol::Udp => {
                let transport = UdpTransport::connect(addr)
                    .await
                    .map_err(|e| HexlinkError::network(format!("连接失败: {}", e)).with_context(addr))?;
                let id = client_handshake(&transport, &self.handshake)
                    .await
                    .map_err(|e| e.with_context(addr))?;
                Session::new(id, Arc::new(transport), self.session.clone())
            }
        };

        session.start(handler);
        info!(session_id = %session.id(), addr = %addr, "出站会话建立");
        Ok(session)
    }

    /// 在已有传输上建立会话，不做握手
    pub fn connect_transport(
        &self,
        transport: Arc<dyn Transport>,
        handler: Arc<dyn SessionHandler>,
    ) -> Arc<Session> {
        let session = Session::new(self.ids.next(), transport, self.session.clone());
        session.start(handler);
        session
    }

    pub fn session_config(&self) -> &SessionConfig {
        &self.session
    }

    pub fn handshake_config(&self) -> &HandshakeConfig {
        &self.handshake
    }
}

impl Default for Connector {
    fn default() -> Self {
        Self::new(SessionConfig::default(), HandshakeConfig::default())
    }
}
