//! 错误上下文
//!
//! 为错误附加会话、对端等额外信息。

use crate::session_id::SessionId;
use std::fmt;
use std::net::SocketAddr;

/// 错误上下文信息
#[derive(Debug, Clone)]
pub enum ErrorContext {
    /// 发生错误的会话
    Session(SessionId),
    /// 发生错误的对端地址
    Peer(SocketAddr),
    /// 键值对上下文
    KeyValue(String, String),
    /// 自定义上下文
    Custom(String),
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorContext::Session(id) => write!(f, "session: {}", id),
            ErrorContext::Peer(addr) => write!(f, "peer: {}", addr),
            ErrorContext::KeyValue(key, value) => write!(f, "{}: {}", key, value),
            ErrorContext::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl From<SessionId> for ErrorContext {
    fn from(id: SessionId) -> Self {
        ErrorContext::Session(id)
    }
}

impl From<SocketAddr> for ErrorContext {
    fn from(addr: SocketAddr) -> Self {
        ErrorContext::Peer(addr)
    }
}

impl From<(&str, String)> for ErrorContext {
    fn from((key, value): (&str, String)) -> Self {
        ErrorContext::KeyValue(key.to_string(), value)
    }
}

impl From<(&str, &str)> for ErrorContext {
    fn from((key, value): (&str, &str)) -> Self {
        ErrorContext::KeyValue(key.to_string(), value.to_string())
    }
}

impl From<String> for ErrorContext {
    fn from(msg: String) -> Self {
        ErrorContext::Custom(msg)
    }
}

impl From<&str> for ErrorContext {
    fn from(msg: &str) -> Self {
        ErrorContext::Custom(msg.to_string())
    }
}
