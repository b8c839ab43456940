//! 编解码错误

use thiserror::Error;

/// 编解码错误
#[derive(Error, Debug)]
pub enum CodecError {
    /// 包 ID 未注册
    #[error("包 ID 未注册: {0}")]
    UnknownPacketId(u16),

    /// 消息类型未注册
    #[error("消息类型未注册: {0}")]
    UnregisteredType(&'static str),

    /// 包 ID 已存在
    #[error("包 ID 已存在: {0}")]
    DuplicatePacketId(u16),

    /// 消息类型已注册
    #[error("消息类型已注册: {0}")]
    DuplicateType(&'static str),

    /// 负载长度不足
    #[error("负载长度不足: 需要 {needed} 字节, 实际 {available} 字节")]
    Truncated { needed: usize, available: usize },

    /// 前缀数量超过上限
    #[error("前缀过多: {0}")]
    TooManyPrefixes(usize),

    /// 编码错误
    #[error("消息编码失败: {0}")]
    Encode(String),

    /// 解码错误
    #[error("消息解码失败: {0}")]
    Decode(#[from] prost::DecodeError),
}

impl From<CodecError> for hexlink_core::HexlinkError {
    fn from(err: CodecError) -> Self {
        hexlink_core::HexlinkError::codec(err.to_string())
    }
}
