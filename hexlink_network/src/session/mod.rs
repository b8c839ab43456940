//! 会话
//!
//! 一个会话对应一条逻辑上的双工连接，由独立的发送循环和接收循环驱动。
//! 两个循环任意一个结束，会话即关闭；关闭是幂等的。

pub mod metrics;
pub mod queue;
pub mod registry;

pub use metrics::SessionMetrics;
pub use queue::{DeliveryClass, OutboundQueue, PushOutcome};
pub use registry::SessionRegistry;

use crate::protocol::codec::FrameCodec;
use crate::protocol::frame::Frame;
use crate::protocol::handshake::HandshakeFrame;
use crate::transport::{Transport, TransportKind};
use bytes::{Bytes, BytesMut};
use hexlink_config::SessionConfig;
use hexlink_core::error::is_abort_io;
use hexlink_core::{Result, SessionId};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// 会话关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// 本地主动关闭
    Local,
    /// 对端关闭或连接被重置
    RemoteClosed,
    /// 传输错误
    Error(String),
    /// 心跳超时
    HeartbeatTimeout,
}

impl CloseReason {
    /// 是否为应用主动关闭
    pub fn is_local(&self) -> bool {
        matches!(self, CloseReason::Local)
    }

    fn from_io(err: &io::Error) -> Self {
        if is_abort_io(err) {
            CloseReason::RemoteClosed
        } else {
            CloseReason::Error(err.to_string())
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Local => write!(f, "本地关闭"),
            CloseReason::RemoteClosed => write!(f, "对端关闭"),
            CloseReason::Error(msg) => write!(f, "传输错误: {}", msg),
            CloseReason::HeartbeatTimeout => write!(f, "心跳超时"),
        }
    }
}

/// 收到负载时的回调
///
/// 在接收循环上同步调用，实现不应长时间阻塞。
pub trait SessionHandler: Send + Sync + 'static {
    /// 处理一帧负载
    fn on_received(&self, session: &Arc<Session>, payload: &[u8]) -> Result<()>;
}

impl<F> SessionHandler for F
where
    F: Fn(&Arc<Session>, &[u8]) -> Result<()> + Send + Sync + 'static,
{
    fn on_received(&self, session: &Arc<Session>, payload: &[u8]) -> Result<()> {
        self(session, payload)
    }
}

/// 关闭回调
pub type CloseHook = Box<dyn FnOnce(SessionId, &CloseReason) + Send>;

#[derive(Default)]
struct Lifecycle {
    reason: Option<CloseReason>,
    hook: Option<CloseHook>,
}

/// 会话
pub struct Session {
    id: SessionId,
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    queue: OutboundQueue,
    can_send: AtomicBool,
    can_receive: AtomicBool,
    connected: AtomicBool,
    send_running: AtomicBool,
    recv_running: AtomicBool,
    closed: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
    last_heartbeat: Mutex<Instant>,
    created_at: Instant,
    cancel: CancellationToken,
    metrics: Option<Arc<SessionMetrics>>,
}

impl Session {
    /// 创建新的会话
    pub fn new(id: SessionId, transport: Arc<dyn Transport>, config: SessionConfig) -> Arc<Self> {
        Self::build(id, transport, config, None)
    }

    /// 创建带指标收集的会话
    pub fn with_metrics(
        id: SessionId,
        transport: Arc<dyn Transport>,
        config: SessionConfig,
        metrics: Arc<SessionMetrics>,
    ) -> Arc<Self> {
        Self::build(id, transport, config, Some(metrics))
    }

    fn build(
        id: SessionId,
        transport: Arc<dyn Transport>,
        config: SessionConfig,
        metrics: Option<Arc<SessionMetrics>>,
    ) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            id,
            transport,
            queue: OutboundQueue::new(config.send_queue_capacity),
            config,
            can_send: AtomicBool::new(false),
            can_receive: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            send_running: AtomicBool::new(false),
            recv_running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            lifecycle: Mutex::new(Lifecycle::default()),
            last_heartbeat: Mutex::new(now),
            created_at: now,
            cancel: CancellationToken::new(),
            metrics,
        })
    }

    /// 启动收发循环
    ///
    /// 重复调用不会产生第二个循环；已关闭的会话不会再启动。
    pub fn start(self: &Arc<Self>, handler: Arc<dyn SessionHandler>) {
        if self.is_closed() {
            return;
        }

        self.connected.store(true, Ordering::Release);
        self.can_send.store(true, Ordering::Release);
        self.can_receive.store(true, Ordering::Release);

        if self
            .send_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tokio::spawn(self.clone().send_loop());
        }

        if self
            .recv_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tokio::spawn(self.clone().recv_loop(handler));
        }

        debug!(session_id = %self.id, peer = ?self.peer_addr(), "会话已启动");
    }

    /// 发送负载（可丢弃类别）
    ///
    /// 只入队，不等待写出。返回数据是否进入了发送队列。
    pub fn send(&self, payload: Bytes) -> bool {
        self.send_with(payload, DeliveryClass::Droppable)
    }

    /// 以指定投递类别发送负载
    pub fn send_with(&self, payload: Bytes, class: DeliveryClass) -> bool {
        if !self.can_send.load(Ordering::Acquire) || self.is_closed() {
            return false;
        }

        if payload.len() > Frame::MAX_PAYLOAD_SIZE
            || Frame::HEADER_SIZE + payload.len() > self.config.max_frame_size
        {
            warn!(session_id = %self.id, len = payload.len(), "负载超过帧大小上限");
            return false;
        }

        let outcome = self.queue.push(payload, class);
        match outcome {
            PushOutcome::Queued => {}
            PushOutcome::QueuedDroppedOldest
            | PushOutcome::DroppedIncoming
            | PushOutcome::Rejected => {
                debug!(session_id = %self.id, ?outcome, "发送队列已满");
                if let Some(metrics) = &self.metrics {
                    metrics.record_frame_dropped();
                }
            }
            PushOutcome::Closed => {}
        }
        outcome.is_queued()
    }

    /// 主动关闭会话
    ///
    /// 不触发关闭事件之外的错误路径，重复调用无副作用。
    pub fn close(&self) {
        self.close_with_reason(CloseReason::Local);
    }

    /// 以指定原因关闭会话
    pub fn close_with_reason(&self, reason: CloseReason) {
        let hook = {
            let mut lifecycle = self.lock_lifecycle();
            if lifecycle.reason.is_some() {
                return;
            }
            lifecycle.reason = Some(reason.clone());
            self.closed.store(true, Ordering::Release);
            lifecycle.hook.take()
        };

        self.can_send.store(false, Ordering::Release);
        self.can_receive.store(false, Ordering::Release);
        self.connected.store(false, Ordering::Release);
        self.queue.close();
        self.cancel.cancel();

        if reason.is_local() {
            debug!(session_id = %self.id, "会话关闭");
        } else {
            info!(session_id = %self.id, reason = %reason, "会话关闭");
        }

        if let Some(hook) = hook {
            hook(self.id, &reason);
        }
    }

    /// 设置关闭回调
    ///
    /// 会话已经关闭时立即调用。
    pub fn set_close_hook(&self, hook: CloseHook) {
        let reason = {
            let mut lifecycle = self.lock_lifecycle();
            match &lifecycle.reason {
                Some(reason) => reason.clone(),
                None => {
                    lifecycle.hook = Some(hook);
                    return;
                }
            }
        };
        hook(self.id, &reason);
    }

    /// 等待会话关闭
    pub async fn wait_closed(&self) {
        self.cancel.cancelled().await;
    }

    /// 刷新心跳时间
    pub fn touch(&self) {
        *self.last_heartbeat.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// 距离上次收到数据的时间
    pub fn idle_for(&self) -> Duration {
        self.last_heartbeat().elapsed()
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.transport.peer_addr()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn can_send(&self) -> bool {
        self.can_send.load(Ordering::Acquire)
    }

    pub fn can_receive(&self) -> bool {
        self.can_receive.load(Ordering::Acquire)
    }

    pub fn is_send_running(&self) -> bool {
        self.send_running.load(Ordering::Acquire)
    }

    pub fn is_receive_running(&self) -> bool {
        self.recv_running.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.lock_lifecycle().reason.clone()
    }

    pub fn last_heartbeat(&self) -> Instant {
        *self.last_heartbeat.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// 发送队列中待写出的数量
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// 发送队列累计丢弃数
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn send_loop(self: Arc<Self>) {
        trace!(session_id = %self.id, "发送循环启动");
        let mut buf = BytesMut::with_capacity(Frame::LENGTH_SIZE + self.config.max_frame_size);
        let backoff = self.config.idle_backoff();

        let reason = loop {
            // 不可写只是顺序屏障，等待后重试
            if !self.transport.is_sendable() {
                tokio::select! {
                    _ = self.cancel.cancelled() => break None,
                    _ = tokio::time::sleep(backoff) => continue,
                }
            }

            let payload = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break None,
                item = self.queue.pop() => match item {
                    Some(payload) => payload,
                    None => break None,
                },
            };

            buf.clear();
            let written = match Frame::encode_parts(self.id, &payload, &mut buf) {
                Ok(n) => n,
                Err(e) => {
                    warn!(session_id = %self.id, error = %e, "帧编码失败，丢弃");
                    continue;
                }
            };

            match self.write_frame(&buf).await {
                Ok(()) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_frame_sent(written as u64);
                    }
                }
                Err(WriteEnd::Cancelled) => break None,
                Err(WriteEnd::Io(e)) => break Some(CloseReason::from_io(&e)),
            }
        };

        self.send_running.store(false, Ordering::Release);
        if let Err(e) = self.transport.shutdown().await {
            trace!(session_id = %self.id, error = %e, "关闭传输写方向失败");
        }
        trace!(session_id = %self.id, "发送循环退出");
        self.close_with_reason(reason.unwrap_or(CloseReason::Local));
    }

    /// 循环写出直到整帧写完；取消后不重试残余部分
    async fn write_frame(&self, mut data: &[u8]) -> std::result::Result<(), WriteEnd> {
        while !data.is_empty() {
            let sent = tokio::select! {
                _ = self.cancel.cancelled() => return Err(WriteEnd::Cancelled),
                sent = self.transport.send_chunk(data) => sent.map_err(WriteEnd::Io)?,
            };
            if sent == 0 {
                return Err(WriteEnd::Io(io::ErrorKind::WriteZero.into()));
            }
            data = &data[sent..];
        }
        Ok(())
    }

    async fn recv_loop(self: Arc<Self>, handler: Arc<dyn SessionHandler>) {
        trace!(session_id = %self.id, "接收循环启动");
        let mut buf = vec![0u8; self.config.receive_buffer_size.max(Frame::LENGTH_SIZE)];
        let mut carry = BytesMut::new();
        let mut codec = FrameCodec::new(self.config.max_frame_size);
        let kind = self.transport.kind();

        let reason = loop {
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break None,
                received = self.transport.recv_chunk(&mut buf) => received,
            };

            let n = match received {
                Ok(0) => break Some(CloseReason::RemoteClosed),
                Ok(n) => n,
                Err(e) => {
                    debug!(session_id = %self.id, error = %e, "接收失败");
                    break Some(CloseReason::from_io(&e));
                }
            };

            self.touch();
            if let Some(metrics) = &self.metrics {
                metrics.record_bytes_received(n as u64);
            }

            match kind {
                // 客户端重发初始帧后，服务器重复的握手响应可能晚于会话启动到达
                TransportKind::Datagram if is_late_handshake(&buf[..n]) => {
                    trace!(session_id = %self.id, "忽略迟到的握手帧");
                }
                TransportKind::Datagram => match Frame::parse_datagram(&buf[..n]) {
                    Ok((_, payload)) => self.deliver(handler.as_ref(), payload),
                    Err(e) => self.malformed(&e),
                },
                TransportKind::Stream => {
                    carry.extend_from_slice(&buf[..n]);
                    loop {
                        match codec.decode(&mut carry) {
                            Ok(Some(frame)) => self.deliver(handler.as_ref(), &frame.payload),
                            Ok(None) => break,
                            Err(e) => self.malformed(&e),
                        }
                    }
                }
            }
        };

        self.recv_running.store(false, Ordering::Release);
        trace!(session_id = %self.id, "接收循环退出");
        self.close_with_reason(reason.unwrap_or(CloseReason::Local));
    }

    fn deliver(self: &Arc<Self>, handler: &dyn SessionHandler, payload: &[u8]) {
        if let Some(metrics) = &self.metrics {
            metrics.record_frame_received();
        }
        if let Err(e) = handler.on_received(self, payload) {
            warn!(session_id = %self.id, error = %e, "消息处理失败");
        }
    }

    fn malformed(&self, err: &dyn std::error::Error) {
        warn!(session_id = %self.id, error = %err, "丢弃坏帧");
        if let Some(metrics) = &self.metrics {
            metrics.record_frame_malformed();
        }
    }
}

fn is_late_handshake(chunk: &[u8]) -> bool {
    chunk.len() == HandshakeFrame::SIZE && HandshakeFrame::is_handshake(chunk)
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("kind", &self.transport.kind())
            .field("peer", &self.peer_addr())
            .field("connected", &self.is_connected())
            .field("closed", &self.is_closed())
            .finish()
    }
}

enum WriteEnd {
    Cancelled,
    Io(io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    fn config() -> SessionConfig {
        SessionConfig::default()
    }

    fn collector() -> (Arc<dyn SessionHandler>, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = move |_: &Arc<Session>, payload: &[u8]| -> Result<()> {
            let _ = tx.send(payload.to_vec());
            Ok(())
        };
        (Arc::new(handler), rx)
    }

    fn noop() -> Arc<dyn SessionHandler> {
        Arc::new(|_: &Arc<Session>, _: &[u8]| -> Result<()> { Ok(()) })
    }

    #[tokio::test]
    async fn test_stream_sessions_exchange_frames() {
        let (a, b) = MemoryTransport::pair(1024);
        let left = Session::new(SessionId::new(1), Arc::new(a), config());
        let right = Session::new(SessionId::new(2), Arc::new(b), config());

        let (handler, mut rx) = collector();
        left.start(noop());
        right.start(handler);

        assert!(left.send(Bytes::from("one")));
        assert!(left.send(Bytes::from("two")));

        assert_eq!(rx.recv().await.unwrap(), b"one");
        assert_eq!(rx.recv().await.unwrap(), b"two");
        assert!(right.is_connected());
        assert!(left.is_send_running());
    }

    #[tokio::test]
    async fn test_frame_split_across_reads_is_reassembled() {
        let (raw, b) = MemoryTransport::pair(1024);
        let session = Session::new(SessionId::new(1), Arc::new(b), config());
        let (handler, mut rx) = collector();
        session.start(handler);

        let encoded = Frame::new(SessionId::new(9), Bytes::from("split payload"))
            .encode()
            .unwrap();
        raw.send_chunk(&encoded[..4]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        raw.send_chunk(&encoded[4..]).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), b"split payload");
    }

    #[tokio::test]
    async fn test_datagram_truncated_frame_is_dropped() {
        let (raw, b) = MemoryTransport::datagram_pair();
        let metrics = Arc::new(SessionMetrics::new());
        let session =
            Session::with_metrics(SessionId::new(1), Arc::new(b), config(), metrics.clone());
        let (handler, mut rx) = collector();
        session.start(handler);

        let good = Frame::new(SessionId::new(1), Bytes::from("good")).encode().unwrap();
        let mut bad = good.clone();
        bad[0] = 0xFF;

        raw.send_chunk(&bad).await.unwrap();
        raw.send_chunk(&good).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), b"good");
        assert_eq!(metrics.frames_malformed(), 1);
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn test_duplicate_handshake_reply_is_ignored() {
        let (raw, b) = MemoryTransport::datagram_pair();
        let metrics = Arc::new(SessionMetrics::new());
        let session =
            Session::with_metrics(SessionId::new(5), Arc::new(b), config(), metrics.clone());
        let (handler, mut rx) = collector();
        session.start(handler);

        let ack = HandshakeFrame::initial(7).respond(SessionId::new(5)).unwrap();
        let finished = ack.respond(SessionId::new(5)).unwrap();
        raw.send_chunk(&ack.encode()).await.unwrap();
        raw.send_chunk(&finished.encode()).await.unwrap();

        let good = Frame::new(SessionId::new(5), Bytes::from("data")).encode().unwrap();
        raw.send_chunk(&good).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), b"data");
        assert_eq!(metrics.frames_malformed(), 0);
        assert_eq!(metrics.frames_received(), 1);
    }

    #[tokio::test]
    async fn test_remote_close_fires_hook() {
        let (a, b) = MemoryTransport::pair(1024);
        let a = Arc::new(a);
        let session = Session::new(SessionId::new(3), Arc::new(b), config());

        let (tx, mut rx) = mpsc::unbounded_channel();
        session.set_close_hook(Box::new(move |id: SessionId, reason: &CloseReason| {
            let _ = tx.send((id, reason.clone()));
        }));
        session.start(noop());

        a.shutdown().await.unwrap();

        let (id, reason) = rx.recv().await.unwrap();
        assert_eq!(id, SessionId::new(3));
        assert_eq!(reason, CloseReason::RemoteClosed);
        assert!(session.is_closed());
        assert!(!session.can_send());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (a, _b) = MemoryTransport::pair(1024);
        let session = Session::new(SessionId::new(1), Arc::new(a), config());
        let count = Arc::new(AtomicUsize::new(0));

        let hits = count.clone();
        session.set_close_hook(Box::new(move |_: SessionId, _: &CloseReason| {
            hits.fetch_add(1, Ordering::SeqCst);
        }));
        session.start(noop());

        session.close();
        session.close();
        session.close_with_reason(CloseReason::RemoteClosed);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(session.close_reason(), Some(CloseReason::Local));
        assert!(!session.send(Bytes::from("late")));
        session.wait_closed().await;
    }

    #[tokio::test]
    async fn test_hook_set_after_close_runs_immediately() {
        let (a, _b) = MemoryTransport::pair(1024);
        let session = Session::new(SessionId::new(1), Arc::new(a), config());
        session.close();

        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        session.set_close_hook(Box::new(move |_: SessionId, reason: &CloseReason| {
            assert!(reason.is_local());
            flag.store(true, Ordering::SeqCst);
        }));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_not_sendable_is_a_barrier() {
        let (a, b) = MemoryTransport::pair(1024);
        let a = Arc::new(a);
        a.set_sendable(false);

        let left = Session::new(SessionId::new(1), a.clone(), config());
        let right = Session::new(SessionId::new(2), Arc::new(b), config());
        let (handler, mut rx) = collector();
        left.start(noop());
        right.start(handler);

        assert!(left.send(Bytes::from("held")));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(left.pending(), 1);
        assert!(!left.is_closed());

        a.set_sendable(true);
        assert_eq!(rx.recv().await.unwrap(), b"held");
    }

    #[tokio::test]
    async fn test_start_twice_runs_one_loop_each() {
        let (a, b) = MemoryTransport::pair(1024);
        let left = Session::new(SessionId::new(1), Arc::new(a), config());
        let right = Session::new(SessionId::new(2), Arc::new(b), config());
        let (handler, mut rx) = collector();

        left.start(noop());
        left.start(noop());
        right.start(handler.clone());
        right.start(handler);

        for i in 0..20 {
            assert!(left.send(Bytes::from(i.to_string())));
        }
        for i in 0..20 {
            assert_eq!(rx.recv().await.unwrap(), i.to_string().as_bytes());
        }
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let (a, _b) = MemoryTransport::pair(1024);
        let cfg = SessionConfig {
            max_frame_size: 16,
            ..SessionConfig::default()
        };
        let session = Session::new(SessionId::new(1), Arc::new(a), cfg);
        session.start(noop());

        assert!(!session.send(Bytes::from(vec![0u8; 32])));
        assert!(session.send(Bytes::from(vec![0u8; 8])));
    }

    #[tokio::test]
    async fn test_handler_error_does_not_close_session() {
        let (a, b) = MemoryTransport::pair(1024);
        let left = Session::new(SessionId::new(1), Arc::new(a), config());
        let right = Session::new(SessionId::new(2), Arc::new(b), config());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = move |_: &Arc<Session>, payload: &[u8]| -> Result<()> {
            let _ = tx.send(payload.to_vec());
            Err(hexlink_core::HexlinkError::dispatch("boom"))
        };
        left.start(noop());
        right.start(Arc::new(handler));

        left.send(Bytes::from("a"));
        left.send(Bytes::from("b"));
        assert_eq!(rx.recv().await.unwrap(), b"a");
        assert_eq!(rx.recv().await.unwrap(), b"b");
        assert!(!right.is_closed());
    }
}
