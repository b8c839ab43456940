//! 消息帧
//!
//! 定义所有传输共用的帧格式。

use bytes::{Buf, BufMut, Bytes, BytesMut};
use hexlink_core::SessionId;
use std::fmt;
use thiserror::Error;

/// 消息帧
///
/// 长度前缀不包含自身，会话不解释负载内容。
///
/// ```text
/// +----------+------------+-----------+
/// |  Length  | Session ID |  Payload  |
/// | 2 bytes  |  4 bytes   | variable  |
/// +----------+------------+-----------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// 发送方会话 ID
    pub session_id: SessionId,
    /// 负载
    pub payload: Bytes,
}

impl Frame {
    /// 长度前缀大小
    pub const LENGTH_SIZE: usize = 2;

    /// 帧头大小（不含长度前缀）
    pub const HEADER_SIZE: usize = SessionId::WIRE_SIZE;

    /// 最大负载大小
    pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize - Self::HEADER_SIZE;

    /// 创建新的消息帧
    pub fn new(session_id: SessionId, payload: Bytes) -> Self {
        Self {
            session_id,
            payload,
        }
    }

    /// 完整帧大小（含长度前缀）
    pub fn frame_size(&self) -> usize {
        Self::LENGTH_SIZE + Self::HEADER_SIZE + self.payload.len()
    }

    /// 编码帧为新的缓冲区
    pub fn encode(&self) -> Result<BytesMut, FrameError> {
        let mut buf = BytesMut::with_capacity(self.frame_size());
        Self::encode_parts(self.session_id, &self.payload, &mut buf)?;
        Ok(buf)
    }

    /// 将帧写入可复用缓冲区
    ///
    /// 发送循环借此避免为每帧分配内存。
    pub fn encode_parts(
        session_id: SessionId,
        payload: &[u8],
        dst: &mut BytesMut,
    ) -> Result<usize, FrameError> {
        if payload.len() > Self::MAX_PAYLOAD_SIZE {
            return Err(FrameError::PayloadTooLarge(payload.len()));
        }

        let total_len = Self::HEADER_SIZE + payload.len();
        dst.reserve(Self::LENGTH_SIZE + total_len);
        dst.put_u16_le(total_len as u16);
        dst.put_slice(&session_id.to_le_bytes());
        dst.put_slice(payload);

        Ok(Self::LENGTH_SIZE + total_len)
    }

    /// 从流式缓冲区解码一个完整帧
    ///
    /// 数据不足时返回 `Ok(None)` 且不消耗任何字节。
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, FrameError> {
        if buf.len() < Self::LENGTH_SIZE {
            return Ok(None);
        }

        let declared = u16::from_le_bytes([buf[0], buf[1]]) as usize;
        if declared < Self::HEADER_SIZE {
            return Err(FrameError::Malformed(declared));
        }

        if buf.len() < Self::LENGTH_SIZE + declared {
            return Ok(None);
        }

        buf.advance(Self::LENGTH_SIZE);
        let session_id = SessionId::new(buf.get_u32_le());
        let payload = buf.split_to(declared - Self::HEADER_SIZE).freeze();

        Ok(Some(Self {
            session_id,
            payload,
        }))
    }

    /// 解析一次读取得到的单个数据报
    ///
    /// 一次读取即一帧，不做跨读取的重组；声明长度超出实际读取字节数视为协议错误。
    pub fn parse_datagram(chunk: &[u8]) -> Result<(SessionId, &[u8]), FrameError> {
        if chunk.len() < Self::LENGTH_SIZE {
            return Err(FrameError::Truncated {
                declared: 0,
                available: chunk.len(),
            });
        }

        let declared = u16::from_le_bytes([chunk[0], chunk[1]]) as usize;
        if declared < Self::HEADER_SIZE {
            return Err(FrameError::Malformed(declared));
        }

        let available = chunk.len() - Self::LENGTH_SIZE;
        if declared > available {
            return Err(FrameError::Truncated {
                declared,
                available,
            });
        }

        let body = &chunk[Self::LENGTH_SIZE..Self::LENGTH_SIZE + declared];
        let session_id = SessionId::from_le_bytes([body[0], body[1], body[2], body[3]]);

        Ok((session_id, &body[Self::HEADER_SIZE..]))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Frame[session={}, payload_len={}]",
            self.session_id,
            self.payload.len()
        )
    }
}

/// 帧错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// 负载超出长度前缀可表示的范围
    #[error("负载过大: {0} 字节")]
    PayloadTooLarge(usize),

    /// 帧超过配置的上限
    #[error("帧过大: {0} 字节")]
    FrameTooLarge(usize),

    /// 声明长度小于帧头
    #[error("无效的帧长度: {0}")]
    Malformed(usize),

    /// 声明长度超过实际读取的字节数
    #[error("帧被截断: 声明 {declared} 字节, 实际 {available} 字节")]
    Truncated { declared: usize, available: usize },

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(String),
}

impl From<std::io::Error> for FrameError {
    fn from(err: std::io::Error) -> Self {
        FrameError::Io(err.to_string())
    }
}

impl From<FrameError> for hexlink_core::HexlinkError {
    fn from(err: FrameError) -> Self {
        hexlink_core::HexlinkError::protocol(err.to_string())
    }
}
