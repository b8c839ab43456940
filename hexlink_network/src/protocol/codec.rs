//! 流式帧编解码器
//!
//! 流式传输的一次读取可能只包含半帧，也可能包含多帧。
//! 解码器以声明长度为键在残留缓冲区中重组，出错时跳过该帧剩余字节而不是断开会话。

use crate::protocol::frame::{Frame, FrameError};
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// 帧编解码器
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// 声明长度上限（不含长度前缀）
    max_frame_size: usize,
    /// 仍需丢弃的字节数
    skip: usize,
}

impl FrameCodec {
    /// 创建新的编解码器
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.clamp(Frame::HEADER_SIZE, u16::MAX as usize),
            skip: 0,
        }
    }

    /// 是否正在丢弃一个坏帧的剩余部分
    pub fn is_skipping(&self) -> bool {
        self.skip > 0
    }

    fn drain_skip(&mut self, src: &mut BytesMut) {
        let n = self.skip.min(src.len());
        src.advance(n);
        self.skip -= n;
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(u16::MAX as usize)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.skip > 0 {
            self.drain_skip(src);
            if self.skip > 0 {
                return Ok(None);
            }
        }

        if src.len() < Frame::LENGTH_SIZE {
            return Ok(None);
        }

        let declared = u16::from_le_bytes([src[0], src[1]]) as usize;
        if declared < Frame::HEADER_SIZE || declared > self.max_frame_size {
            // 丢弃整个声明范围，下一次调用从随后的长度前缀继续
            src.advance(Frame::LENGTH_SIZE);
            self.skip = declared;
            self.drain_skip(src);
            return if declared < Frame::HEADER_SIZE {
                Err(FrameError::Malformed(declared))
            } else {
                Err(FrameError::FrameTooLarge(declared))
            };
        }

        Frame::decode(src)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if Frame::HEADER_SIZE + item.payload.len() > self.max_frame_size {
            return Err(FrameError::FrameTooLarge(Frame::HEADER_SIZE + item.payload.len()));
        }
        Frame::encode_parts(item.session_id, &item.payload, dst)?;
        Ok(())
    }
}
