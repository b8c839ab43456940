//! UDP 传输
//!
//! 服务器端只绑定一个套接字，由后台任务按对端地址分流数据报；
//! 未知对端的第一个数据报必须是握手初始帧。
//!
//! 关闭端点只停止接纳新对端，已有对端的数据报继续分流，
//! 直到最后一个对端断开后分流任务才退出。

use crate::protocol::handshake::{HandshakeFrame, HandshakeState, server_handshake};
use crate::transport::{Accepted, Listener, Transport, TransportKind};
use async_trait::async_trait;
use bytes::Bytes;
use hexlink_config::HandshakeConfig;
use hexlink_core::{HexlinkError, Result, SessionIdGenerator};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// 单个数据报的最大长度
const MAX_DATAGRAM_SIZE: usize = 65_535;

/// 每个对端的待处理数据报数量
const PEER_BACKLOG: usize = 256;

/// 已握手对端表
#[derive(Default)]
struct PeerTable {
    senders: std::sync::Mutex<HashMap<SocketAddr, mpsc::Sender<Bytes>>>,
    emptied: Notify,
}

impl PeerTable {
    fn get(&self, peer: &SocketAddr) -> Option<mpsc::Sender<Bytes>> {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer)
            .cloned()
    }

    fn insert(&self, peer: SocketAddr, tx: mpsc::Sender<Bytes>) {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer, tx);
    }

    fn remove(&self, peer: &SocketAddr) {
        let mut senders = self.senders.lock().unwrap_or_else(PoisonError::into_inner);
        senders.remove(peer);
        if senders.is_empty() {
            self.emptied.notify_one();
        }
    }

    fn is_empty(&self) -> bool {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

type PeerMap = Arc<PeerTable>;

/// 客户端 UDP 传输（已 connect 的套接字）
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl UdpTransport {
    /// 绑定临时端口并连接到服务器
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let bind = if addr.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(addr).await?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            peer_addr: addr,
        })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Datagram
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer_addr)
    }

    async fn send_chunk(&self, data: &[u8]) -> io::Result<usize> {
        self.socket.send(data).await
    }

    async fn recv_chunk(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf).await
    }

    async fn shutdown(&self) -> io::Result<()> {
        Ok(())
    }
}

/// 服务器端单个对端的传输
pub struct UdpPeerTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    rx: Mutex<mpsc::Receiver<Bytes>>,
    peers: PeerMap,
    detached: AtomicBool,
}

impl UdpPeerTransport {
    fn detach(&self) {
        if !self.detached.swap(true, Ordering::AcqRel) {
            self.peers.remove(&self.peer_addr);
        }
    }
}

#[async_trait]
impl Transport for UdpPeerTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Datagram
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer_addr)
    }

    async fn send_chunk(&self, data: &[u8]) -> io::Result<usize> {
        self.socket.send_to(data, self.peer_addr).await
    }

    async fn recv_chunk(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self.rx.lock().await.recv().await {
            Some(datagram) => {
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }

    async fn shutdown(&self) -> io::Result<()> {
        self.detach();
        Ok(())
    }
}

impl Drop for UdpPeerTransport {
    fn drop(&mut self) {
        self.detach();
    }
}

/// UDP 监听端点
pub struct UdpEndpoint {
    local_addr: SocketAddr,
    accepted: Mutex<mpsc::Receiver<Accepted>>,
    cancel: CancellationToken,
}

impl UdpEndpoint {
    /// 绑定监听地址并启动分流任务
    ///
    /// 握手成功的对端使用 `ids` 分配会话 ID。
    pub async fn bind(
        addr: &str,
        ids: Arc<SessionIdGenerator>,
        handshake: HandshakeConfig,
    ) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let local_addr = socket.local_addr()?;
        let (accepted_tx, accepted_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();

        let demux = Demux {
            socket,
            local_addr,
            peers: Arc::new(PeerTable::default()),
            ids,
            handshake,
            accepted: Some(accepted_tx),
        };
        tokio::spawn(demux.run(cancel.clone()));

        Ok(Self {
            local_addr,
            accepted: Mutex::new(accepted_rx),
            cancel,
        })
    }
}

#[async_trait]
impl Listener for UdpEndpoint {
    async fn accept(&self) -> Result<Accepted> {
        self.accepted
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| HexlinkError::network("UDP 端点已关闭"))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }

    /// 停止接纳新对端，已有对端不受影响
    fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for UdpEndpoint {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Demux {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    peers: PeerMap,
    ids: Arc<SessionIdGenerator>,
    handshake: HandshakeConfig,
    /// 端点关闭后为 `None`，不再接纳新对端
    accepted: Option<mpsc::Sender<Accepted>>,
}

impl Demux {
    async fn run(mut self, closing: CancellationToken) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        debug!(addr = %self.local_addr, "UDP 分流任务启动");

        loop {
            if self.accepted.is_none() && self.peers.is_empty() {
                break;
            }

            let accepting = self.accepted.is_some();
            let received = tokio::select! {
                _ = closing.cancelled(), if accepting => None,
                _ = self.peers.emptied.notified(), if !accepting => continue,
                received = self.socket.recv_from(&mut buf) => Some(received),
            };

            let Some(received) = received else {
                self.accepted = None;
                debug!(addr = %self.local_addr, "UDP 端点关闭，继续为已有对端分流");
                continue;
            };

            let (n, peer) = match received {
                Ok(v) => v,
                Err(e) => {
                    // ICMP 端口不可达在部分平台上表现为 ConnectionReset
                    trace!(error = %e, "UDP 接收错误");
                    continue;
                }
            };
            self.route(peer, &buf[..n]);
        }

        debug!(addr = %self.local_addr, "UDP 分流任务退出");
    }

    fn route(&self, peer: SocketAddr, chunk: &[u8]) {
        if let Some(tx) = self.peers.get(&peer) {
            if tx.try_send(Bytes::copy_from_slice(chunk)).is_err() {
                debug!(peer = %peer, len = chunk.len(), "对端积压已满，丢弃数据报");
            }
            return;
        }

        let Some(accepted) = self.accepted.clone() else {
            trace!(peer = %peer, "端点已关闭，忽略新对端");
            return;
        };

        let request = match HandshakeFrame::decode(chunk) {
            Ok(frame) if frame.state == HandshakeState::Initial => frame,
            Ok(frame) => {
                debug!(peer = %peer, state = ?frame.state, "未知对端发送了非初始握手帧");
                return;
            }
            Err(e) => {
                debug!(peer = %peer, error = %e, "未知对端发送了非握手数据报");
                return;
            }
        };

        let (tx, rx) = mpsc::channel(PEER_BACKLOG);
        self.peers.insert(peer, tx);

        let transport = Arc::new(UdpPeerTransport {
            socket: self.socket.clone(),
            local_addr: self.local_addr,
            peer_addr: peer,
            rx: Mutex::new(rx),
            peers: self.peers.clone(),
            detached: AtomicBool::new(false),
        });
        let session_id = self.ids.next();
        let handshake = self.handshake.clone();

        tokio::spawn(async move {
            match server_handshake(transport.as_ref(), request, session_id, &handshake).await {
                Ok(()) => {
                    let item = Accepted {
                        transport,
                        remote_addr: Some(peer),
                        session_id: Some(session_id),
                    };
                    if accepted.send(item).await.is_err() {
                        debug!(peer = %peer, "端点已关闭，丢弃握手完成的连接");
                    }
                }
                Err(e) => {
                    warn!(peer = %peer, error = %e, "服务器握手失败");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::handshake::client_handshake;

    fn handshake_config() -> HandshakeConfig {
        HandshakeConfig {
            timeout_ms: 1000,
            retries: 2,
        }
    }

    #[tokio::test]
    async fn test_udp_handshake_and_exchange() {
        let ids = Arc::new(SessionIdGenerator::starting_at(10));
        let endpoint = UdpEndpoint::bind("127.0.0.1:0", ids, handshake_config())
            .await
            .unwrap();
        let addr = endpoint.local_addr().unwrap();

        let client = UdpTransport::connect(addr).await.unwrap();
        let config = handshake_config();
        let (id, accepted) = tokio::join!(client_handshake(&client, &config), endpoint.accept());
        let id = id.unwrap();
        let accepted = accepted.unwrap();

        assert_eq!(id.value(), 10);
        assert_eq!(accepted.session_id, Some(id));
        assert_eq!(
            accepted.remote_addr.map(|a| a.port()),
            client.local_addr().map(|a| a.port())
        );

        client.send_chunk(b"data").await.unwrap();
        let mut buf = [0u8; 16];
        let n = accepted.transport.recv_chunk(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"data");

        accepted.transport.send_chunk(b"back").await.unwrap();
        let n = client.recv_chunk(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"back");
    }

    #[tokio::test]
    async fn test_unknown_peer_without_handshake_is_ignored() {
        let ids = Arc::new(SessionIdGenerator::new());
        let endpoint = UdpEndpoint::bind("127.0.0.1:0", ids, handshake_config())
            .await
            .unwrap();
        let addr = endpoint.local_addr().unwrap();

        let client = UdpTransport::connect(addr).await.unwrap();
        client.send_chunk(b"not a handshake").await.unwrap();

        let accepted =
            tokio::time::timeout(std::time::Duration::from_millis(200), endpoint.accept()).await;
        assert!(accepted.is_err());
    }

    #[tokio::test]
    async fn test_close_keeps_known_peers_routed() {
        let ids = Arc::new(SessionIdGenerator::new());
        let endpoint = UdpEndpoint::bind("127.0.0.1:0", ids, handshake_config())
            .await
            .unwrap();
        let addr = endpoint.local_addr().unwrap();
        let config = handshake_config();

        let client = UdpTransport::connect(addr).await.unwrap();
        let (id, accepted) = tokio::join!(client_handshake(&client, &config), endpoint.accept());
        id.unwrap();
        let accepted = accepted.unwrap();

        endpoint.close();
        drop(endpoint);

        client.send_chunk(b"still routed").await.unwrap();
        let mut buf = [0u8; 32];
        let n = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            accepted.transport.recv_chunk(&mut buf),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(&buf[..n], b"still routed");

        // 新对端的握手不再被接纳
        let late = UdpTransport::connect(addr).await.unwrap();
        let late_config = HandshakeConfig {
            timeout_ms: 100,
            retries: 1,
        };
        assert!(client_handshake(&late, &late_config).await.is_err());
    }
}
