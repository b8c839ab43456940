//! 包类型定义

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// 可在线上传输的消息
///
/// 每个类型拥有唯一的包 ID，解码时据此还原具体类型。
///
/// ```ignore
/// #[derive(Clone, PartialEq, prost::Message)]
/// struct Ping {
///     #[prost(uint64, tag = "1")]
///     nonce: u64,
/// }
///
/// impl Packet for Ping {
///     const PACKET_ID: u16 = 1;
/// }
/// ```
pub trait Packet: prost::Message + Default + Send + Sync + 'static {
    /// 包 ID
    const PACKET_ID: u16;

    /// 类型名称
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// 解码结果
#[derive(Clone)]
pub struct DecodedMessage {
    /// 包 ID
    pub packet_id: u16,
    /// 负载前缀（路由、序号等附加字段）
    pub prefixes: Vec<i64>,
    /// 具体类型
    pub type_id: TypeId,
    /// 类型名称
    pub type_name: &'static str,
    /// 消息对象
    pub message: Arc<dyn Any + Send + Sync>,
}

impl DecodedMessage {
    /// 转换为具体类型
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.message.clone().downcast::<T>().ok()
    }

    /// 是否为指定类型
    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl fmt::Debug for DecodedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedMessage")
            .field("packet_id", &self.packet_id)
            .field("prefixes", &self.prefixes)
            .field("type_name", &self.type_name)
            .finish()
    }
}
