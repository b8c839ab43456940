//! 包编解码器
//!
//! 负载布局：
//!
//! ```text
//! +-----------+-------------+---------------------+------------+
//! | Packet ID | PrefixCount |  Prefix × count     |    Body    |
//! | u16 LE    | u8          |  i64 LE each        |  protobuf  |
//! +-----------+-------------+---------------------+------------+
//! ```

use crate::error::CodecError;
use crate::packet::DecodedMessage;
use crate::registry::PacketRegistry;
use bytes::{BufMut, BytesMut};
use std::any::Any;

/// 包头固定部分大小
pub const PACKET_HEADER_SIZE: usize = 3;

/// 单个负载允许的最大前缀数
pub const MAX_PREFIXES: usize = u8::MAX as usize;

/// 编解码器
///
/// 会话不解释负载内容，类型信息完全由编解码器定义。
pub trait PacketCodec: Send + Sync + 'static {
    /// 编码类型擦除的消息，返回写入的字节数
    fn encode_erased(
        &self,
        message: &dyn Any,
        prefixes: &[i64],
        dst: &mut BytesMut,
    ) -> Result<usize, CodecError>;

    /// 解码一个完整负载
    fn decode(&self, src: &[u8]) -> Result<DecodedMessage, CodecError>;
}

/// 泛型编码便捷方法
pub trait PacketCodecExt: PacketCodec {
    /// 编码消息
    fn encode<T: Any>(&self, message: &T, dst: &mut BytesMut) -> Result<usize, CodecError> {
        self.encode_erased(message, &[], dst)
    }

    /// 编码带前缀的消息
    fn encode_with_prefixes<T: Any>(
        &self,
        message: &T,
        prefixes: &[i64],
        dst: &mut BytesMut,
    ) -> Result<usize, CodecError> {
        self.encode_erased(message, prefixes, dst)
    }
}

impl<C: PacketCodec + ?Sized> PacketCodecExt for C {}

/// 基于 prost 的编解码器
#[derive(Clone, Default)]
pub struct ProtoCodec {
    registry: PacketRegistry,
}

impl ProtoCodec {
    /// 使用已填充的注册表创建
    pub fn new(registry: PacketRegistry) -> Self {
        Self { registry }
    }

    /// 注册表
    pub fn registry(&self) -> &PacketRegistry {
        &self.registry
    }
}

impl PacketCodec for ProtoCodec {
    fn encode_erased(
        &self,
        message: &dyn Any,
        prefixes: &[i64],
        dst: &mut BytesMut,
    ) -> Result<usize, CodecError> {
        if prefixes.len() > MAX_PREFIXES {
            return Err(CodecError::TooManyPrefixes(prefixes.len()));
        }

        let entry = self
            .registry
            .entry_by_type(message.type_id())
            .ok_or(CodecError::UnregisteredType("<unregistered>"))?;

        let start = dst.len();
        dst.reserve(PACKET_HEADER_SIZE + prefixes.len() * 8);
        dst.put_u16_le(entry.packet_id);
        dst.put_u8(prefixes.len() as u8);
        for prefix in prefixes {
            dst.put_i64_le(*prefix);
        }

        if let Err(e) = (entry.encode)(message, dst) {
            dst.truncate(start);
            return Err(e);
        }

        Ok(dst.len() - start)
    }

    fn decode(&self, src: &[u8]) -> Result<DecodedMessage, CodecError> {
        if src.len() < PACKET_HEADER_SIZE {
            return Err(CodecError::Truncated {
                needed: PACKET_HEADER_SIZE,
                available: src.len(),
            });
        }

        let packet_id = u16::from_le_bytes([src[0], src[1]]);
        let count = src[2] as usize;
        let body_start = PACKET_HEADER_SIZE + count * 8;
        if src.len() < body_start {
            return Err(CodecError::Truncated {
                needed: body_start,
                available: src.len(),
            });
        }

        let entry = self
            .registry
            .entry_by_id(packet_id)
            .ok_or(CodecError::UnknownPacketId(packet_id))?;

        let prefixes = src[PACKET_HEADER_SIZE..body_start]
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                i64::from_le_bytes(raw)
            })
            .collect();

        let message = (entry.decode)(&src[body_start..])?;

        Ok(DecodedMessage {
            packet_id,
            prefixes,
            type_id: entry.type_id,
            type_name: entry.type_name,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;

    #[derive(Clone, PartialEq, prost::Message)]
    struct Ping {
        #[prost(uint64, tag = "1")]
        nonce: u64,
    }

    impl Packet for Ping {
        const PACKET_ID: u16 = 1;
    }

    #[derive(Clone, PartialEq, prost::Message)]
    struct Chat {
        #[prost(string, tag = "1")]
        sender: String,
        #[prost(string, tag = "2")]
        content: String,
    }

    impl Packet for Chat {
        const PACKET_ID: u16 = 2;
    }

    #[derive(Clone, PartialEq, prost::Message)]
    struct Unregistered {
        #[prost(uint32, tag = "1")]
        value: u32,
    }

    impl Packet for Unregistered {
        const PACKET_ID: u16 = 99;
    }

    fn codec() -> ProtoCodec {
        ProtoCodec::new(
            PacketRegistry::new()
                .with::<Ping>()
                .unwrap()
                .with::<Chat>()
                .unwrap(),
        )
    }

    #[test]
    fn test_payload_layout() {
        let codec = codec();
        let mut buf = BytesMut::new();
        let written = codec
            .encode_with_prefixes(&Ping { nonce: 42 }, &[7, -1], &mut buf)
            .unwrap();

        assert_eq!(written, buf.len());
        assert_eq!(&buf[0..2], &1u16.to_le_bytes());
        assert_eq!(buf[2], 2);
        assert_eq!(&buf[3..11], &7i64.to_le_bytes());
        assert_eq!(&buf[11..19], &(-1i64).to_le_bytes());
    }

    #[test]
    fn test_decode_restores_type() {
        let codec = codec();
        let original = Chat {
            sender: "alice".into(),
            content: "hi".into(),
        };
        let mut buf = BytesMut::new();
        codec.encode(&original, &mut buf).unwrap();

        let decoded = codec.decode(&buf).unwrap();
        assert_eq!(decoded.packet_id, 2);
        assert!(decoded.prefixes.is_empty());
        assert!(decoded.is::<Chat>());
        assert_eq!(*decoded.downcast::<Chat>().unwrap(), original);
        assert!(decoded.downcast::<Ping>().is_none());
    }

    #[test]
    fn test_prefixes_survive_decode() {
        let codec = codec();
        let mut buf = BytesMut::new();
        codec
            .encode_with_prefixes(&Ping { nonce: 1 }, &[100, 200], &mut buf)
            .unwrap();

        assert_eq!(codec.decode(&buf).unwrap().prefixes, vec![100, 200]);
    }

    #[test]
    fn test_encode_unregistered_type() {
        let codec = codec();
        let mut buf = BytesMut::from(&b"keep"[..]);
        let err = codec.encode(&Unregistered { value: 1 }, &mut buf).unwrap_err();

        assert!(matches!(err, CodecError::UnregisteredType(_)));
        assert_eq!(&buf[..], b"keep");
    }

    #[test]
    fn test_decode_unknown_id() {
        let codec = codec();
        let err = codec.decode(&[0x63, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, CodecError::UnknownPacketId(99)));
    }

    #[test]
    fn test_decode_truncated() {
        let codec = codec();
        assert!(matches!(
            codec.decode(&[0x01]),
            Err(CodecError::Truncated { .. })
        ));
        // 声明 2 个前缀但只有 1 个
        let mut buf = vec![0x01, 0x00, 0x02];
        buf.extend_from_slice(&5i64.to_le_bytes());
        assert!(matches!(
            codec.decode(&buf),
            Err(CodecError::Truncated {
                needed: 19,
                available: 11
            })
        ));
    }

    #[test]
    fn test_decode_corrupt_body() {
        let codec = codec();
        let err = codec.decode(&[0x02, 0x00, 0x00, 0xFF, 0xFF]).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[test]
    fn test_too_many_prefixes() {
        let codec = codec();
        let prefixes = vec![0i64; MAX_PREFIXES + 1];
        let mut buf = BytesMut::new();
        assert!(matches!(
            codec.encode_with_prefixes(&Ping { nonce: 1 }, &prefixes, &mut buf),
            Err(CodecError::TooManyPrefixes(_))
        ));
    }

    #[test]
    fn test_codec_behind_trait_object() {
        let codec: Box<dyn PacketCodec> = Box::new(codec());
        let mut buf = BytesMut::new();
        codec.encode(&Ping { nonce: 5 }, &mut buf).unwrap();
        let decoded = codec.decode(&buf).unwrap();
        assert_eq!(decoded.downcast::<Ping>().unwrap().nonce, 5);
    }
}
