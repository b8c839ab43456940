//! TCP 传输

use crate::transport::{Accepted, Listener, Transport, TransportKind};
use async_trait::async_trait;
use hexlink_core::{HexlinkError, Result};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

/// TCP 传输
///
/// 读写两半分别加锁，收发循环互不阻塞。
pub struct TcpTransport {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl TcpTransport {
    /// 包装已建立的 TCP 流
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();

        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            local_addr,
            peer_addr,
        })
    }

    /// 连接到远程地址
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Self::from_stream(stream)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.peer_addr)
    }

    async fn send_chunk(&self, data: &[u8]) -> io::Result<usize> {
        self.writer.lock().await.write(data).await
    }

    async fn recv_chunk(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.lock().await.read(buf).await
    }

    async fn shutdown(&self) -> io::Result<()> {
        self.writer.lock().await.shutdown().await
    }
}

/// TCP 监听端点
pub struct TcpEndpoint {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpEndpoint {
    /// 绑定监听地址
    pub async fn bind(addr: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }
}

#[async_trait]
impl Listener for TcpEndpoint {
    async fn accept(&self) -> Result<Accepted> {
        let (stream, remote_addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| HexlinkError::network(format!("接受连接失败: {}", e)))?;
        let transport = TcpTransport::from_stream(stream)?;

        Ok(Accepted {
            transport: Arc::new(transport),
            remote_addr: Some(remote_addr),
            session_id: None,
        })
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tcp_chunk_exchange() {
        let endpoint = TcpEndpoint::bind("127.0.0.1:0").await.unwrap();
        let addr = endpoint.local_addr.clone();

        let client = tokio::spawn(async move { TcpTransport::connect(addr).await.unwrap() });
        let accepted = endpoint.accept().await.unwrap();
        let client = client.await.unwrap();

        assert_eq!(accepted.transport.kind(), TransportKind::Stream);
        assert!(accepted.session_id.is_none());
        assert_eq!(client.peer_addr(), Some(addr));

        client.send_chunk(b"hello").await.unwrap();
        let mut buf = [0u8; 16];
        let n = accepted.transport.recv_chunk(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");

        client.shutdown().await.unwrap();
        let n = accepted.transport.recv_chunk(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }
}
