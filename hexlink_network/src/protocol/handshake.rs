//! 无连接传输的握手子协议
//!
//! 会话可用之前，客户端与服务器交换控制帧，每一帧的 `syn` 与 `state`
//! 都必须恰好比上一帧大 1，任何不匹配都会终止本次握手。
//!
//! ```text
//! client                         server
//!   | -- Initial(syn)          --> |
//!   | <-- ServerAck(syn+1)     --- |
//!   | <-- ServerFinished(syn+2, id)|
//!   | -- ClientFinished(syn+3) --> |
//! ```

use crate::transport::Transport;
use hexlink_config::HandshakeConfig;
use hexlink_core::{HexlinkError, Result, SessionId};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// 控制帧标记
pub const HANDSHAKE_MARKER: i32 = 0x0114_0403;

/// 握手状态计数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum HandshakeState {
    /// 客户端发起
    Initial = 0,
    /// 服务器确认
    ServerAck = 1,
    /// 服务器完成，携带分配的会话 ID
    ServerFinished = 2,
    /// 客户端完成
    ClientFinished = 3,
}

impl HandshakeState {
    /// 从线上数值解析
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Initial),
            1 => Some(Self::ServerAck),
            2 => Some(Self::ServerFinished),
            3 => Some(Self::ClientFinished),
            _ => None,
        }
    }

    /// 下一个状态
    pub fn next(self) -> Option<Self> {
        Self::from_i32(self as i32 + 1)
    }
}

/// 握手控制帧
///
/// `[Marker:i32][Syn:i32][State:i32][SessionId:u32]`，全部小端序。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeFrame {
    /// 递增序号
    pub syn: i32,
    /// 状态计数
    pub state: HandshakeState,
    /// 会话 ID（ServerFinished 之前为未分配）
    pub session_id: SessionId,
}

impl HandshakeFrame {
    /// 编码后大小
    pub const SIZE: usize = 12 + SessionId::WIRE_SIZE;

    /// 创建初始帧
    pub fn initial(syn: i32) -> Self {
        Self {
            syn,
            state: HandshakeState::Initial,
            session_id: SessionId::UNASSIGNED,
        }
    }

    /// 构造对本帧的合法响应
    pub fn respond(&self, session_id: SessionId) -> Result<Self> {
        let state = self
            .state
            .next()
            .ok_or_else(|| HexlinkError::handshake("握手已完成，无法继续响应"))?;

        Ok(Self {
            syn: self.syn.wrapping_add(1),
            state,
            session_id,
        })
    }

    /// 校验对端响应
    pub fn validate_response(&self, response: &HandshakeFrame) -> Result<()> {
        let expected_syn = self.syn.wrapping_add(1);
        if response.syn != expected_syn {
            return Err(HexlinkError::handshake(format!(
                "syn 不匹配: 期望 {}, 收到 {}",
                expected_syn, response.syn
            )));
        }

        if Some(response.state) != self.state.next() {
            return Err(HexlinkError::handshake(format!(
                "state 不匹配: 期望 {:?}, 收到 {:?}",
                self.state.next(),
                response.state
            )));
        }

        Ok(())
    }

    /// 编码为字节
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&HANDSHAKE_MARKER.to_le_bytes());
        buf[4..8].copy_from_slice(&self.syn.to_le_bytes());
        buf[8..12].copy_from_slice(&(self.state as i32).to_le_bytes());
        buf[12..16].copy_from_slice(&self.session_id.to_le_bytes());
        buf
    }

    /// 从字节解码
    pub fn decode(chunk: &[u8]) -> Result<Self> {
        if chunk.len() < Self::SIZE {
            return Err(HexlinkError::handshake(format!(
                "控制帧长度不足: {} 字节",
                chunk.len()
            )));
        }

        if !Self::is_handshake(chunk) {
            return Err(HexlinkError::handshake("控制帧标记错误"));
        }

        let syn = i32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
        let raw_state = i32::from_le_bytes([chunk[8], chunk[9], chunk[10], chunk[11]]);
        let state = HandshakeState::from_i32(raw_state)
            .ok_or_else(|| HexlinkError::handshake(format!("未知握手状态: {}", raw_state)))?;
        let session_id = SessionId::from_le_bytes([chunk[12], chunk[13], chunk[14], chunk[15]]);

        Ok(Self {
            syn,
            state,
            session_id,
        })
    }

    /// 是否以控制帧标记开头
    pub fn is_handshake(chunk: &[u8]) -> bool {
        chunk.len() >= 4 && chunk[0..4] == HANDSHAKE_MARKER.to_le_bytes()
    }
}

/// 客户端握手
///
/// 超时未收到 ServerAck 时按配置重发初始帧；成功后返回服务器分配的会话 ID。
pub async fn client_handshake(
    transport: &dyn Transport,
    config: &HandshakeConfig,
) -> Result<SessionId> {
    let request = HandshakeFrame::initial(initial_syn());
    let mut attempts = 0;

    let ack = loop {
        send_frame(transport, &request).await?;
        match tokio::time::timeout(config.timeout(), recv_frame(transport)).await {
            Ok(frame) => break frame?,
            Err(_) if attempts < config.retries => {
                attempts += 1;
                debug!(attempts, syn = request.syn, "握手响应超时，重发初始帧");
            }
            Err(_) => return Err(HexlinkError::timeout()),
        }
    };
    request.validate_response(&ack)?;

    let finished = tokio::time::timeout(config.timeout(), recv_frame(transport))
        .await
        .map_err(|_| HexlinkError::timeout())??;
    ack.validate_response(&finished)?;

    if !finished.session_id.is_assigned() {
        return Err(HexlinkError::handshake("服务器未分配会话 ID"));
    }

    let done = finished.respond(finished.session_id)?;
    send_frame(transport, &done).await?;

    debug!(session_id = %finished.session_id, "客户端握手完成");
    Ok(finished.session_id)
}

/// 服务器握手
///
/// `request` 是对端发来的初始帧；成功后 `session_id` 即可用于新会话。
pub async fn server_handshake(
    transport: &dyn Transport,
    request: HandshakeFrame,
    session_id: SessionId,
    config: &HandshakeConfig,
) -> Result<()> {
    if request.state != HandshakeState::Initial {
        return Err(HexlinkError::handshake(format!(
            "期望初始帧，收到 {:?}",
            request.state
        )));
    }

    let ack = request.respond(SessionId::UNASSIGNED)?;
    let finished = ack.respond(session_id)?;
    let mut duplicates = 0;

    loop {
        send_frame(transport, &ack).await?;
        send_frame(transport, &finished).await?;

        let reply = tokio::time::timeout(config.timeout(), recv_frame(transport))
            .await
            .map_err(|_| HexlinkError::timeout())??;

        // 客户端超时重发的初始帧
        if reply == request && duplicates < config.retries {
            duplicates += 1;
            continue;
        }

        finished.validate_response(&reply)?;
        if reply.session_id != session_id {
            warn!(expected = %session_id, got = %reply.session_id, "客户端确认的会话 ID 不一致");
            return Err(HexlinkError::handshake("客户端确认的会话 ID 不一致"));
        }

        debug!(session_id = %session_id, "服务器握手完成");
        return Ok(());
    }
}

async fn send_frame(transport: &dyn Transport, frame: &HandshakeFrame) -> Result<()> {
    let bytes = frame.encode();
    let sent = transport.send_chunk(&bytes).await?;
    if sent != bytes.len() {
        return Err(HexlinkError::handshake("控制帧发送不完整"));
    }
    Ok(())
}

async fn recv_frame(transport: &dyn Transport) -> Result<HandshakeFrame> {
    let mut buf = [0u8; 64];
    let n = transport.recv_chunk(&mut buf).await?;
    if n == 0 {
        return Err(HexlinkError::handshake("握手期间对端关闭"));
    }
    HandshakeFrame::decode(&buf[..n])
}

fn initial_syn() -> i32 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos & 0x3fff_ffff) as i32
}
