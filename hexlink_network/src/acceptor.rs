//! 连接接受器
//!
//! 负责监听、为每个新连接分配会话 ID 并创建会话。
//! 会话的生命周期独立于接受器：关闭接受器不会关闭已建立的会话。

use crate::session::{CloseReason, Session, SessionHandler, SessionMetrics, SessionRegistry};
use crate::transport::{Accepted, Listener, TcpEndpoint, UdpEndpoint};
use hexlink_config::{HexlinkConfig, Protocol};
use hexlink_core::{HexlinkError, HexlinkErrorKind, Result, SessionId, SessionIdGenerator};
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 会话事件回调
pub type SessionCallback = Arc<dyn Fn(SessionId, &Arc<Session>) + Send + Sync>;

/// 接受失败后的等待时间
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// 连接接受器
pub struct Acceptor {
    config: HexlinkConfig,
    handler: Arc<dyn SessionHandler>,
    listener: Mutex<Option<Arc<dyn Listener>>>,
    ids: Arc<SessionIdGenerator>,
    registry: SessionRegistry,
    on_created: RwLock<Vec<SessionCallback>>,
    on_closed: Arc<RwLock<Vec<SessionCallback>>>,
    closed: CancellationToken,
}

impl Acceptor {
    /// 创建新的接受器
    ///
    /// `handler` 接收所有会话的负载。
    pub fn new(config: HexlinkConfig, handler: Arc<dyn SessionHandler>) -> Self {
        Self {
            config,
            handler,
            listener: Mutex::new(None),
            ids: Arc::new(SessionIdGenerator::new()),
            registry: SessionRegistry::with_metrics(Arc::new(SessionMetrics::new())),
            on_created: RwLock::new(Vec::new()),
            on_closed: Arc::new(RwLock::new(Vec::new())),
            closed: CancellationToken::new(),
        }
    }

    /// 绑定监听地址
    ///
    /// 已经绑定时直接返回现有地址。
    pub async fn setup(&self, endpoint: &str) -> Result<SocketAddr> {
        let mut slot = self.listener.lock().await;
        if let Some(listener) = slot.as_ref() {
            return listener
                .local_addr()
                .ok_or_else(|| HexlinkError::setup("监听器没有网络地址"));
        }

        let listener: Arc<dyn Listener> = match self.config.server.protocol {
            Protocol::Tcp => Arc::new(TcpEndpoint::bind(endpoint).await.map_err(|e| {
                HexlinkError::setup(format!("无法绑定 TCP 地址 {}: {}", endpoint, e))
            })?),
            Protocol::Udp => Arc::new(
                UdpEndpoint::bind(endpoint, self.ids.clone(), self.config.handshake.clone())
                    .await
                    .map_err(|e| {
                        HexlinkError::setup(format!("无法绑定 UDP 地址 {}: {}", endpoint, e))
                    })?,
            ),
        };

        let addr = listener
            .local_addr()
            .ok_or_else(|| HexlinkError::setup("监听器没有网络地址"))?;
        *slot = Some(listener);

        info!(addr = %addr, protocol = %self.config.server.protocol, "监听已建立");
        Ok(addr)
    }

    /// 按配置中的地址绑定
    pub async fn setup_from_config(&self) -> Result<SocketAddr> {
        let endpoint = self.config.server.bind_addr();
        self.setup(&endpoint).await
    }

    /// 使用外部创建的监听器
    ///
    /// 已经绑定时返回 `false`，传入的监听器被丢弃。
    pub async fn setup_with_listener(&self, listener: Arc<dyn Listener>) -> bool {
        let mut slot = self.listener.lock().await;
        if slot.is_some() {
            return false;
        }
        *slot = Some(listener);
        true
    }

    /// 监听地址
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .lock()
            .await
            .as_ref()
            .and_then(|listener| listener.local_addr())
    }

    /// 注册会话建立回调
    pub fn on_created(&self, callback: SessionCallback) {
        self.on_created
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    /// 注册会话意外断开回调
    ///
    /// 应用主动调用 `close` 的会话不会触发此回调。
    pub fn on_closed(&self, callback: SessionCallback) {
        self.on_closed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(callback);
    }

    /// 接受一个连接并创建会话
    pub async fn do_once_accept(&self) -> Result<Arc<Session>> {
        let listener = self
            .listener
            .lock()
            .await
            .clone()
            .ok_or_else(|| HexlinkError::setup("接受器尚未绑定"))?;

        let accepted = listener.accept().await?;
        self.establish(accepted)
    }

    fn establish(&self, accepted: Accepted) -> Result<Arc<Session>> {
        let id = accepted.session_id.unwrap_or_else(|| self.ids.next());
        let session = Session::with_metrics(
            id,
            accepted.transport,
            self.config.session.clone(),
            self.registry.metrics().clone(),
        );

        if let Some(max) = self.config.server.max_connections
            && self.registry.len()? >= max as usize
        {
            warn!(session_id = %id, peer = ?accepted.remote_addr, max, "连接数已达上限，拒绝连接");
            session.close();
            return Err(HexlinkError::session(format!("连接数已达上限: {}", max)));
        }

        self.registry.add(session.clone())?;

        let registry = self.registry.clone();
        let on_closed = self.on_closed.clone();
        session.set_close_hook(Box::new(move |id: SessionId, reason: &CloseReason| {
            let removed = registry.remove(id).ok().flatten();
            if reason.is_local() {
                return;
            }
            if let Some(session) = removed {
                let callbacks = on_closed
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                for callback in callbacks {
                    callback(id, &session);
                }
            }
        }));

        let callbacks = self
            .on_created
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for callback in callbacks {
            callback(id, &session);
        }

        session.start(self.handler.clone());
        info!(session_id = %id, peer = ?accepted.remote_addr, "会话建立");
        Ok(session)
    }

    /// 启动接受循环
    ///
    /// 直到 `cancel` 触发或接受器关闭。单次接受失败只记录日志。
    pub fn start_accept_loop(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let acceptor = self.clone();

        tokio::spawn(async move {
            debug!("接受循环启动");

            loop {
                let result = tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = acceptor.closed.cancelled() => break,
                    result = acceptor.do_once_accept() => result,
                };

                match result {
                    Ok(_) => {}
                    Err(e) if e.kind() == HexlinkErrorKind::Setup => {
                        warn!(error = %e, "接受循环终止");
                        break;
                    }
                    Err(e) => {
                        debug!(error = %e, "接受连接失败");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                        }
                    }
                }
            }

            debug!("接受循环退出");
        })
    }

    /// 启动心跳清理任务
    ///
    /// 未配置心跳超时时返回 `None`。
    pub fn spawn_heartbeat(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let timeout = self.config.server.heartbeat_timeout()?;
        Some(self.registry.spawn_heartbeat_task(
            self.config.server.heartbeat_interval(),
            timeout,
            cancel,
        ))
    }

    /// 停止监听并释放监听器
    ///
    /// 已建立的会话保持不变，UDP 会话的数据报继续由原套接字分流。
    pub async fn close(&self) {
        self.closed.cancel();
        if let Some(listener) = self.listener.lock().await.take() {
            listener.close();
            info!("监听已关闭");
        }
    }

    /// 是否已关闭
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// 会话注册表
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// 会话指标
    pub fn metrics(&self) -> &Arc<SessionMetrics> {
        self.registry.metrics()
    }

    /// 当前配置
    pub fn config(&self) -> &HexlinkConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::Connector;
    use crate::transport::{MemoryEndpoint, Transport, TransportKind};
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn noop() -> Arc<dyn SessionHandler> {
        Arc::new(|_: &Arc<Session>, _: &[u8]| -> Result<()> { Ok(()) })
    }

    async fn memory_acceptor(config: HexlinkConfig) -> (Arc<Acceptor>, crate::transport::MemoryDialer) {
        let acceptor = Arc::new(Acceptor::new(config, noop()));
        let (endpoint, dialer) = MemoryEndpoint::new(TransportKind::Stream);
        assert!(acceptor.setup_with_listener(Arc::new(endpoint)).await);
        (acceptor, dialer)
    }

    #[tokio::test]
    async fn test_setup_is_idempotent() {
        let acceptor = Acceptor::new(HexlinkConfig::default(), noop());
        let first = acceptor.setup("127.0.0.1:0").await.unwrap();
        let second = acceptor.setup("127.0.0.1:0").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_setup_failure_is_setup_error() {
        let acceptor = Acceptor::new(HexlinkConfig::default(), noop());
        let err = acceptor.setup("not an address").await.unwrap_err();
        assert_eq!(err.kind(), HexlinkErrorKind::Setup);
    }

    #[tokio::test]
    async fn test_accept_without_setup_fails() {
        let acceptor = Acceptor::new(HexlinkConfig::default(), noop());
        let err = acceptor.do_once_accept().await.unwrap_err();
        assert_eq!(err.kind(), HexlinkErrorKind::Setup);
    }

    #[tokio::test]
    async fn test_accept_assigns_unique_ids_and_fires_created() {
        let (acceptor, dialer) = memory_acceptor(HexlinkConfig::default()).await;
        let created = Arc::new(AtomicUsize::new(0));
        let seen = created.clone();
        acceptor.on_created(Arc::new(move |_: SessionId, session: &Arc<Session>| {
            assert!(!session.is_closed());
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        let _c1 = dialer.dial().await.unwrap();
        let _c2 = dialer.dial().await.unwrap();
        let s1 = acceptor.do_once_accept().await.unwrap();
        let s2 = acceptor.do_once_accept().await.unwrap();

        assert_ne!(s1.id(), s2.id());
        assert!(s1.id().is_assigned());
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(acceptor.registry().len().unwrap(), 2);
        assert_eq!(acceptor.metrics().total_sessions(), 2);
    }

    #[tokio::test]
    async fn test_remote_disconnect_fires_closed_event() {
        let (acceptor, dialer) = memory_acceptor(HexlinkConfig::default()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        acceptor.on_closed(Arc::new(move |id: SessionId, session: &Arc<Session>| {
            let _ = tx.send((id, session.close_reason()));
        }));

        let client = dialer.dial().await.unwrap();
        let session = acceptor.do_once_accept().await.unwrap();
        client.shutdown().await.unwrap();

        let (id, reason) = rx.recv().await.unwrap();
        assert_eq!(id, session.id());
        assert_eq!(reason, Some(CloseReason::RemoteClosed));
        assert!(acceptor.registry().is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_local_close_does_not_fire_closed_event() {
        let (acceptor, dialer) = memory_acceptor(HexlinkConfig::default()).await;
        let fired = Arc::new(AtomicUsize::new(0));
        let hits = fired.clone();
        acceptor.on_closed(Arc::new(move |_: SessionId, _: &Arc<Session>| {
            hits.fetch_add(1, Ordering::SeqCst);
        }));

        let _client = dialer.dial().await.unwrap();
        let session = acceptor.do_once_accept().await.unwrap();
        session.close();
        session.wait_closed().await;
        tokio::task::yield_now().await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(acceptor.registry().is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_max_connections_enforced() {
        let mut config = HexlinkConfig::default();
        config.server.max_connections = Some(1);
        let (acceptor, dialer) = memory_acceptor(config).await;

        let _c1 = dialer.dial().await.unwrap();
        let _c2 = dialer.dial().await.unwrap();
        acceptor.do_once_accept().await.unwrap();
        let err = acceptor.do_once_accept().await.unwrap_err();

        assert_eq!(err.kind(), HexlinkErrorKind::Session);
        assert_eq!(acceptor.registry().len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_close_keeps_sessions() {
        let (acceptor, dialer) = memory_acceptor(HexlinkConfig::default()).await;
        let _client = dialer.dial().await.unwrap();
        let session = acceptor.do_once_accept().await.unwrap();

        acceptor.close().await;
        assert!(acceptor.is_closed());
        assert!(!session.is_closed());
        assert!(acceptor.do_once_accept().await.is_err());
    }

    #[tokio::test]
    async fn test_close_keeps_udp_sessions_receiving() {
        let mut config = HexlinkConfig::default();
        config.server.protocol = Protocol::Udp;
        let echo = |session: &Arc<Session>, payload: &[u8]| -> Result<()> {
            session.send(Bytes::copy_from_slice(payload));
            Ok(())
        };
        let acceptor = Arc::new(Acceptor::new(config, Arc::new(echo)));
        let addr = acceptor.setup("127.0.0.1:0").await.unwrap();
        acceptor.start_accept_loop(CancellationToken::new());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let collect = move |_: &Arc<Session>, payload: &[u8]| -> Result<()> {
            let _ = tx.send(payload.to_vec());
            Ok(())
        };
        let client = Connector::default()
            .connect(addr, Protocol::Udp, Arc::new(collect))
            .await
            .unwrap();

        assert!(client.send(Bytes::from("before")));
        assert_eq!(rx.recv().await.unwrap(), b"before");
        let server_side = acceptor.registry().get(client.id()).unwrap().unwrap();

        acceptor.close().await;
        assert!(!server_side.is_closed());

        assert!(client.send(Bytes::from("after")));
        let echoed = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(echoed, b"after");
    }

    #[tokio::test]
    async fn test_accept_loop_until_cancelled() {
        let (acceptor, dialer) = memory_acceptor(HexlinkConfig::default()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        acceptor.on_created(Arc::new(move |id: SessionId, _: &Arc<Session>| {
            let _ = tx.send(id);
        }));

        let cancel = CancellationToken::new();
        let handle = acceptor.start_accept_loop(cancel.clone());

        let _c1 = dialer.dial().await.unwrap();
        let _c2 = dialer.dial().await.unwrap();
        let a = rx.recv().await.unwrap();
        let b = rx.recv().await.unwrap();
        assert_ne!(a, b);

        cancel.cancel();
        handle.await.unwrap();
    }
}
