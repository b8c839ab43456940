//! Hexlink 消息编解码
//!
//! 提供包注册表与基于 Protobuf 的负载编解码器。

pub mod codec;
pub mod error;
pub mod packet;
pub mod registry;

pub use crate::codec::{MAX_PREFIXES, PACKET_HEADER_SIZE, PacketCodec, PacketCodecExt, ProtoCodec};
pub use crate::error::CodecError;
pub use crate::packet::{DecodedMessage, Packet};
pub use crate::registry::{PacketRegistry, decode_message, encode_message};

// 预导出
pub mod prelude {
    pub use crate::codec::{PacketCodec, PacketCodecExt, ProtoCodec};
    pub use crate::packet::{DecodedMessage, Packet};
    pub use crate::registry::PacketRegistry;
}
