//! # Hexlink - 多协议网络框架的传输与消息路由核心
//!
//! Hexlink 把字节流或数据报传输抽象为统一的会话，按消息类型把解码后的消息
//! 分发给处理器，并支持绑定会话的一次性请求/回应等待。
//!
//! ## 特性
//!
//! - 基于 Tokio 的会话收发引擎，发送队列满时丢弃最旧消息，生产者从不阻塞
//! - 支持 TCP、UDP（三次握手分配会话 ID）与内存传输
//! - Protobuf 消息编解码
//! - 按类型路由的分发器与一次性等待
//!
//! ## 快速开始
//!
//! ### 服务器
//!
//! ```rust,no_run,ignore
//! use hexlink::Server;
//!
//! #[tokio::main]
//! async fn main() -> hexlink::Result<()> {
//!     let server = Server::bind("127.0.0.1:8080")
//!         .packet::<Pong>()
//!         .handler::<Ping, _>(|dispatcher, session, ping| {
//!             dispatcher.send(session, &Pong { nonce: ping.nonce });
//!             Ok(())
//!         })
//!         .start()
//!         .await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ### 客户端
//!
//! ```rust,no_run,ignore
//! use hexlink::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> hexlink::Result<()> {
//!     let registry = PacketRegistry::new().with::<Ping>()?.with::<Pong>()?;
//!     let client = Client::connect(ClientConfig::new("127.0.0.1:8080".parse()?), registry).await?;
//!     let pong = client.request::<Ping, Pong>(&Ping { nonce: 42 }).await?;
//!     client.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## 模块组织
//!
//! ### 配置模块
//! - ServerConfig / SessionConfig / HandshakeConfig
//!
//! ### 网络模块
//! - Session - 会话收发引擎
//! - Acceptor / Connector - 入站与出站会话
//! - Transport - 传输层抽象
//!
//! ### 分发模块
//! - Dispatcher - 按类型路由
//! - HandlerId - 处理器句柄

// ============================================================================
// Conditional Compilation Based on Features
// ============================================================================

// Client API
#[cfg(feature = "client")]
pub use hexlink_client::{Client, ClientConfig, ClientEvent};

// Server API
#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "server")]
pub use crate::server::{RunningServer, Server, ServerBuilder};

// ============================================================================
// Crate Re-exports (for advanced users)
// ============================================================================

pub use hexlink_codec;
pub use hexlink_config;
pub use hexlink_core;
pub use hexlink_dispatch;
pub use hexlink_network;

#[cfg(feature = "client")]
pub use hexlink_client;

// ============================================================================
// Prelude Module
// ============================================================================

/// 预导出常用类型
///
/// 通过 `use hexlink::prelude::*;` 导入所有常用类型
pub mod prelude {
    pub use hexlink_codec::prelude::*;
    pub use hexlink_config::{HexlinkConfig, Protocol, ServerConfig, SessionConfig};
    pub use hexlink_core::{HexlinkError, SessionId};
    pub use hexlink_dispatch::prelude::{Dispatcher, Envelope, Handler, HandlerId, OnceListener, Scheduler};
    pub use hexlink_network::prelude::*;

    #[cfg(feature = "client")]
    pub use hexlink_client::prelude::*;

    #[cfg(feature = "server")]
    pub use crate::server::{RunningServer, Server, ServerBuilder};

    pub use crate::{Error, Result};
}

// ============================================================================
// Error Types
// ============================================================================

/// Hexlink 统一结果类型
pub type Result<T> = std::result::Result<T, Error>;

/// Hexlink 统一错误枚举
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 框架错误
    #[error(transparent)]
    Core(#[from] hexlink_core::HexlinkError),

    /// 客户端错误
    #[cfg(feature = "client")]
    #[error(transparent)]
    Client(#[from] hexlink_client::ClientError),

    /// 配置错误
    #[error(transparent)]
    Config(#[from] hexlink_config::ConfigError),

    /// 编解码错误
    #[error(transparent)]
    Codec(#[from] hexlink_codec::CodecError),

    /// IO 错误
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Version Information
// ============================================================================

/// Hexlink 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Hexlink 包名
pub const NAME: &str = env!("CARGO_PKG_NAME");
