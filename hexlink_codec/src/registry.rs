//! 包注册表
//!
//! 管理包 ID 与具体类型之间的双向映射，支持类型擦除的编解码。

use crate::error::CodecError;
use crate::packet::Packet;
use bytes::{Bytes, BytesMut};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

type DecodeFn = fn(&[u8]) -> Result<Arc<dyn Any + Send + Sync>, CodecError>;
type EncodeFn = fn(&dyn Any, &mut BytesMut) -> Result<(), CodecError>;

/// 单个已注册的包类型
#[derive(Clone, Copy)]
pub(crate) struct PacketEntry {
    pub(crate) packet_id: u16,
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) decode: DecodeFn,
    pub(crate) encode: EncodeFn,
}

fn decode_erased<P: Packet>(body: &[u8]) -> Result<Arc<dyn Any + Send + Sync>, CodecError> {
    Ok(Arc::new(P::decode(body)?))
}

fn encode_erased<P: Packet>(message: &dyn Any, dst: &mut BytesMut) -> Result<(), CodecError> {
    let message = message
        .downcast_ref::<P>()
        .ok_or(CodecError::UnregisteredType(P::type_name()))?;
    message
        .encode(dst)
        .map_err(|e| CodecError::Encode(e.to_string()))
}

/// 包注册表
#[derive(Clone, Default)]
pub struct PacketRegistry {
    /// 包 ID -> 条目
    by_id: HashMap<u16, PacketEntry>,
    /// 类型 -> 包 ID
    by_type: HashMap<TypeId, u16>,
}

impl PacketRegistry {
    /// 创建新的注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册包类型
    ///
    /// 包 ID 或类型重复时返回错误，注册表保持不变。
    pub fn register<P: Packet>(&mut self) -> Result<(), CodecError> {
        let type_id = TypeId::of::<P>();
        if self.by_type.contains_key(&type_id) {
            return Err(CodecError::DuplicateType(P::type_name()));
        }
        if self.by_id.contains_key(&P::PACKET_ID) {
            return Err(CodecError::DuplicatePacketId(P::PACKET_ID));
        }

        self.by_id.insert(
            P::PACKET_ID,
            PacketEntry {
                packet_id: P::PACKET_ID,
                type_id,
                type_name: P::type_name(),
                decode: decode_erased::<P>,
                encode: encode_erased::<P>,
            },
        );
        self.by_type.insert(type_id, P::PACKET_ID);
        Ok(())
    }

    /// 链式注册
    pub fn with<P: Packet>(mut self) -> Result<Self, CodecError> {
        self.register::<P>()?;
        Ok(self)
    }

    /// 检查包 ID 是否已注册
    pub fn contains(&self, packet_id: u16) -> bool {
        self.by_id.contains_key(&packet_id)
    }

    /// 获取类型对应的包 ID
    pub fn packet_id_of<P: Packet>(&self) -> Option<u16> {
        self.by_type.get(&TypeId::of::<P>()).copied()
    }

    /// 获取包 ID 对应的类型名称
    pub fn type_name(&self, packet_id: u16) -> Option<&'static str> {
        self.by_id.get(&packet_id).map(|entry| entry.type_name)
    }

    /// 获取已注册类型数量
    pub fn count(&self) -> usize {
        self.by_id.len()
    }

    /// 列出所有已注册的包 ID
    pub fn list_ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.by_id.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn entry_by_id(&self, packet_id: u16) -> Option<&PacketEntry> {
        self.by_id.get(&packet_id)
    }

    pub(crate) fn entry_by_type(&self, type_id: TypeId) -> Option<&PacketEntry> {
        self.by_type
            .get(&type_id)
            .and_then(|packet_id| self.by_id.get(packet_id))
    }
}

/// 编码 Protobuf 消息
///
/// 仅编码消息体，不含包头。
pub fn encode_message<M: prost::Message>(msg: &M) -> Bytes {
    Bytes::from(msg.encode_to_vec())
}

/// 解码 Protobuf 消息体
pub fn decode_message<M: prost::Message + Default>(data: &[u8]) -> Result<M, CodecError> {
    M::decode(data).map_err(CodecError::from)
}
