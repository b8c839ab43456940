//! Hexlink 框架核心错误类型
//!
//! 定义所有框架级别的错误类型。

use super::context::ErrorContext;
use hexlink_config::ConfigError;
use std::io;
use thiserror::Error;

/// Hexlink 框架核心错误类型
#[derive(Error, Debug)]
pub enum HexlinkError {
    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] io::Error),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 监听器创建失败等不可恢复的启动错误
    #[error("启动失败: {0}")]
    Setup(String),

    /// 网络错误
    #[error("网络错误: {0}")]
    Network(String),

    /// 帧格式错误
    #[error("协议错误: {0}")]
    Protocol(String),

    /// 握手失败
    #[error("握手失败: {0}")]
    Handshake(String),

    /// 编解码错误
    #[error("编解码错误: {0}")]
    Codec(String),

    /// 分发或处理器错误
    #[error("分发错误: {0}")]
    Dispatch(String),

    /// 会话错误
    #[error("会话错误: {0}")]
    Session(String),

    /// 超时错误
    #[error("操作超时")]
    Timeout,

    /// 操作被取消
    #[error("操作已取消")]
    Cancelled,

    /// 验证错误
    #[error("验证失败: {0}")]
    Validation(String),

    /// 带上下文的错误
    #[error("{0} ({1})")]
    WithContext(#[source] Box<HexlinkError>, ErrorContext),
}

impl HexlinkError {
    /// 获取错误类型
    pub fn kind(&self) -> HexlinkErrorKind {
        match self {
            HexlinkError::Io(_) => HexlinkErrorKind::Io,
            HexlinkError::Config(_) => HexlinkErrorKind::Config,
            HexlinkError::Setup(_) => HexlinkErrorKind::Setup,
            HexlinkError::Network(_) => HexlinkErrorKind::Network,
            HexlinkError::Protocol(_) => HexlinkErrorKind::Protocol,
            HexlinkError::Handshake(_) => HexlinkErrorKind::Handshake,
            HexlinkError::Codec(_) => HexlinkErrorKind::Codec,
            HexlinkError::Dispatch(_) => HexlinkErrorKind::Dispatch,
            HexlinkError::Session(_) => HexlinkErrorKind::Session,
            HexlinkError::Timeout => HexlinkErrorKind::Timeout,
            HexlinkError::Cancelled => HexlinkErrorKind::Cancelled,
            HexlinkError::Validation(_) => HexlinkErrorKind::Validation,
            HexlinkError::WithContext(inner, _) => inner.kind(),
        }
    }

    /// 是否为中止类 IO 错误
    ///
    /// 这类错误只意味着当前会话结束，而不是进程级故障。
    pub fn is_abort(&self) -> bool {
        match self {
            HexlinkError::Io(err) => is_abort_io(err),
            HexlinkError::WithContext(inner, _) => inner.is_abort(),
            _ => false,
        }
    }

    /// 添加上下文信息
    pub fn with_context<C>(self, context: C) -> Self
    where
        C: Into<ErrorContext>,
    {
        HexlinkError::WithContext(Box::new(self), context.into())
    }

    /// 创建配置错误
    pub fn config(msg: impl Into<String>) -> Self {
        HexlinkError::Config(msg.into())
    }

    /// 创建启动错误
    pub fn setup(msg: impl Into<String>) -> Self {
        HexlinkError::Setup(msg.into())
    }

    /// 创建网络错误
    pub fn network(msg: impl Into<String>) -> Self {
        HexlinkError::Network(msg.into())
    }

    /// 创建协议错误
    pub fn protocol(msg: impl Into<String>) -> Self {
        HexlinkError::Protocol(msg.into())
    }

    /// 创建握手错误
    pub fn handshake(msg: impl Into<String>) -> Self {
        HexlinkError::Handshake(msg.into())
    }

    /// 创建编解码错误
    pub fn codec(msg: impl Into<String>) -> Self {
        HexlinkError::Codec(msg.into())
    }

    /// 创建分发错误
    pub fn dispatch(msg: impl Into<String>) -> Self {
        HexlinkError::Dispatch(msg.into())
    }

    /// 创建会话错误
    pub fn session(msg: impl Into<String>) -> Self {
        HexlinkError::Session(msg.into())
    }

    /// 创建超时错误
    pub fn timeout() -> Self {
        HexlinkError::Timeout
    }

    /// 创建取消错误
    pub fn cancelled() -> Self {
        HexlinkError::Cancelled
    }

    /// 创建验证错误
    pub fn validation(msg: impl Into<String>) -> Self {
        HexlinkError::Validation(msg.into())
    }
}

impl From<ConfigError> for HexlinkError {
    fn from(err: ConfigError) -> Self {
        HexlinkError::Config(err.to_string())
    }
}

/// 判断 IO 错误是否属于连接被中止/重置一类
pub fn is_abort_io(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::Interrupted
            | io::ErrorKind::NotConnected
    )
}

/// 错误类型分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HexlinkErrorKind {
    /// IO 错误
    Io,
    /// 配置错误
    Config,
    /// 启动错误
    Setup,
    /// 网络错误
    Network,
    /// 协议错误
    Protocol,
    /// 握手错误
    Handshake,
    /// 编解码错误
    Codec,
    /// 分发错误
    Dispatch,
    /// 会话错误
    Session,
    /// 超时错误
    Timeout,
    /// 已取消
    Cancelled,
    /// 验证错误
    Validation,
}
