//! 内存传输
//!
//! 无需套接字即可驱动完整会话，主要用于测试。

use crate::transport::{Accepted, Listener, Transport, TransportKind};
use async_trait::async_trait;
use bytes::Bytes;
use hexlink_core::{HexlinkError, Result};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, mpsc};

enum Channel {
    Stream {
        reader: Mutex<ReadHalf<DuplexStream>>,
        writer: Mutex<WriteHalf<DuplexStream>>,
    },
    Datagram {
        tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
        rx: Mutex<mpsc::UnboundedReceiver<Bytes>>,
    },
}

/// 内存传输
pub struct MemoryTransport {
    channel: Channel,
    sendable: Arc<AtomicBool>,
}

impl MemoryTransport {
    /// 创建一对相连的字节流传输
    ///
    /// `capacity` 是单方向缓冲区大小，写满时发送方挂起。
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a, b) = tokio::io::duplex(capacity);
        (Self::stream(a), Self::stream(b))
    }

    /// 创建一对相连的数据报传输
    pub fn datagram_pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (Self::datagram(a_tx, b_rx), Self::datagram(b_tx, a_rx))
    }

    fn stream(stream: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            channel: Channel::Stream {
                reader: Mutex::new(reader),
                writer: Mutex::new(writer),
            },
            sendable: Arc::new(AtomicBool::new(true)),
        }
    }

    fn datagram(tx: mpsc::UnboundedSender<Bytes>, rx: mpsc::UnboundedReceiver<Bytes>) -> Self {
        Self {
            channel: Channel::Datagram {
                tx: Mutex::new(Some(tx)),
                rx: Mutex::new(rx),
            },
            sendable: Arc::new(AtomicBool::new(true)),
        }
    }

    /// 切换可写状态
    pub fn set_sendable(&self, sendable: bool) {
        self.sendable.store(sendable, Ordering::Release);
    }

    /// 可写状态开关的共享句柄
    pub fn sendable_handle(&self) -> Arc<AtomicBool> {
        self.sendable.clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn kind(&self) -> TransportKind {
        match self.channel {
            Channel::Stream { .. } => TransportKind::Stream,
            Channel::Datagram { .. } => TransportKind::Datagram,
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn is_sendable(&self) -> bool {
        self.sendable.load(Ordering::Acquire)
    }

    async fn send_chunk(&self, data: &[u8]) -> io::Result<usize> {
        match &self.channel {
            Channel::Stream { writer, .. } => writer.lock().await.write(data).await,
            Channel::Datagram { tx, .. } => {
                let guard = tx.lock().await;
                let tx = guard
                    .as_ref()
                    .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;
                tx.send(Bytes::copy_from_slice(data))
                    .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
                Ok(data.len())
            }
        }
    }

    async fn recv_chunk(&self, buf: &mut [u8]) -> io::Result<usize> {
        match &self.channel {
            Channel::Stream { reader, .. } => reader.lock().await.read(buf).await,
            Channel::Datagram { rx, .. } => match rx.lock().await.recv().await {
                Some(datagram) => {
                    // 与真实数据报一致：超出缓冲区的部分被截断
                    let n = datagram.len().min(buf.len());
                    buf[..n].copy_from_slice(&datagram[..n]);
                    Ok(n)
                }
                None => Ok(0),
            },
        }
    }

    async fn shutdown(&self) -> io::Result<()> {
        match &self.channel {
            Channel::Stream { writer, .. } => writer.lock().await.shutdown().await,
            Channel::Datagram { tx, .. } => {
                tx.lock().await.take();
                Ok(())
            }
        }
    }
}

/// 内存监听端点
pub struct MemoryEndpoint {
    incoming: Mutex<mpsc::Receiver<MemoryTransport>>,
}

/// 连接到 [`MemoryEndpoint`] 的拨号句柄
#[derive(Clone)]
pub struct MemoryDialer {
    tx: mpsc::Sender<MemoryTransport>,
    kind: TransportKind,
    capacity: usize,
}

impl MemoryEndpoint {
    /// 创建端点及其拨号句柄
    pub fn new(kind: TransportKind) -> (Self, MemoryDialer) {
        let (tx, rx) = mpsc::channel(64);
        let endpoint = Self {
            incoming: Mutex::new(rx),
        };
        let dialer = MemoryDialer {
            tx,
            kind,
            capacity: 64 * 1024,
        };
        (endpoint, dialer)
    }
}

impl MemoryDialer {
    /// 建立一条新连接，返回客户端一侧
    pub async fn dial(&self) -> Result<MemoryTransport> {
        let (client, server) = match self.kind {
            TransportKind::Stream => MemoryTransport::pair(self.capacity),
            TransportKind::Datagram => MemoryTransport::datagram_pair(),
        };
        self.tx
            .send(server)
            .await
            .map_err(|_| HexlinkError::network("内存端点已关闭"))?;
        Ok(client)
    }
}

#[async_trait]
impl Listener for MemoryEndpoint {
    async fn accept(&self) -> Result<Accepted> {
        let transport = self
            .incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| HexlinkError::network("所有拨号句柄已释放"))?;

        Ok(Accepted {
            transport: Arc::new(transport),
            remote_addr: None,
            session_id: None,
        })
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_pair() {
        let (a, b) = MemoryTransport::pair(64);
        assert_eq!(a.kind(), TransportKind::Stream);

        a.send_chunk(b"abc").await.unwrap();
        let mut buf = [0u8; 8];
        let n = b.recv_chunk(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abc");

        a.shutdown().await.unwrap();
        assert_eq!(b.recv_chunk(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_datagram_pair_keeps_boundaries() {
        let (a, b) = MemoryTransport::datagram_pair();
        assert_eq!(a.kind(), TransportKind::Datagram);

        a.send_chunk(b"one").await.unwrap();
        a.send_chunk(b"two").await.unwrap();

        let mut buf = [0u8; 8];
        let n = b.recv_chunk(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"one");
        let n = b.recv_chunk(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"two");
    }

    #[tokio::test]
    async fn test_datagram_shutdown_ends_peer() {
        let (a, b) = MemoryTransport::datagram_pair();
        a.shutdown().await.unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(b.recv_chunk(&mut buf).await.unwrap(), 0);
        assert!(a.send_chunk(b"late").await.is_err());
    }

    #[test]
    fn test_sendable_toggle() {
        let (a, _b) = MemoryTransport::pair(16);
        assert!(a.is_sendable());
        a.set_sendable(false);
        assert!(!a.is_sendable());
    }

    #[tokio::test]
    async fn test_endpoint_dial_accept() {
        let (endpoint, dialer) = MemoryEndpoint::new(TransportKind::Stream);
        let client = dialer.dial().await.unwrap();
        let accepted = endpoint.accept().await.unwrap();

        client.send_chunk(b"hi").await.unwrap();
        let mut buf = [0u8; 4];
        let n = accepted.transport.recv_chunk(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hi");
    }
}
