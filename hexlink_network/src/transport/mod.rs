//! 传输层抽象
//!
//! 会话只依赖两个原语：发送一段字节、接收一段字节。
//! 监听器负责产生已就绪的传输句柄。

pub mod memory;
pub mod tcp;
pub mod udp;

use async_trait::async_trait;
use hexlink_core::{Result, SessionId};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

pub use memory::{MemoryDialer, MemoryEndpoint, MemoryTransport};
pub use tcp::{TcpEndpoint, TcpTransport};
pub use udp::{UdpEndpoint, UdpTransport};

/// 传输类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// 字节流，一次读取可能包含半帧或多帧
    Stream,
    /// 数据报，一次读取恰好一帧
    Datagram,
}

/// 传输句柄
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// 传输类别
    fn kind(&self) -> TransportKind;

    /// 本地地址
    fn local_addr(&self) -> Option<SocketAddr>;

    /// 对端地址
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// 当前是否可写
    ///
    /// 返回 `false` 时发送循环短暂等待后重试，而不是报错。
    fn is_sendable(&self) -> bool {
        true
    }

    /// 发送一段字节，返回实际写入的字节数
    async fn send_chunk(&self, data: &[u8]) -> io::Result<usize>;

    /// 接收一段字节，返回 0 表示对端有序关闭
    async fn recv_chunk(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// 关闭写方向并释放资源
    async fn shutdown(&self) -> io::Result<()>;
}

/// 监听器接受到的连接
pub struct Accepted {
    /// 传输句柄
    pub transport: Arc<dyn Transport>,
    /// 远程地址
    pub remote_addr: Option<SocketAddr>,
    /// 握手阶段已经分配的会话 ID
    pub session_id: Option<SessionId>,
}

impl std::fmt::Debug for Accepted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accepted")
            .field("kind", &self.transport.kind())
            .field("remote_addr", &self.remote_addr)
            .field("session_id", &self.session_id)
            .finish()
    }
}

/// 监听器
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    /// 等待下一个连接
    async fn accept(&self) -> Result<Accepted>;

    /// 监听地址
    fn local_addr(&self) -> Option<SocketAddr>;

    /// 停止监听
    fn close(&self) {}
}
