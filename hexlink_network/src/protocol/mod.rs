//! 协议模块
//!
//! 帧格式、流式重组编解码器与握手子协议。

pub mod codec;
pub mod frame;
pub mod handshake;

// 重新导出主要类型
pub use codec::FrameCodec;
pub use frame::{Frame, FrameError};
pub use handshake::{
    HANDSHAKE_MARKER, HandshakeFrame, HandshakeState, client_handshake, server_handshake,
};
