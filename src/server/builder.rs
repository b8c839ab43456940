//! Simplified server builder for common use cases
//!
//! Provides a high-level API for building Hexlink servers with minimal boilerplate.

use crate::Result;
use futures_util::future::join_all;
use hexlink_codec::{Packet, PacketRegistry, ProtoCodec};
use hexlink_config::{HandshakeConfig, HexlinkConfig, Protocol, SessionConfig};
use hexlink_core::{HexlinkError, SessionId};
use hexlink_dispatch::{Dispatcher, Scheduler};
use hexlink_network::{Acceptor, Session, SessionCallback, SessionRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

type Registration = Box<dyn FnOnce(&Dispatcher) + Send>;

/// Simplified server builder
///
/// Provides a fluent API for building servers with sensible defaults.
///
/// # Example
///
/// ```rust,no_run,ignore
/// use hexlink::Server;
///
/// #[tokio::main]
/// async fn main() -> hexlink::Result<()> {
///     let server = Server::bind("127.0.0.1:8080")
///         .packet::<Pong>()
///         .handler::<Ping, _>(|dispatcher, session, ping| {
///             dispatcher.send(session, &Pong { nonce: ping.nonce });
///             Ok(())
///         })
///         .start()
///         .await?;
///
///     tokio::signal::ctrl_c().await?;
///     server.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct ServerBuilder {
    /// Full configuration (server, session, handshake)
    config: HexlinkConfig,
    /// Packet types known to the codec
    packets: PacketRegistry,
    /// Handlers, applied once the dispatcher exists
    registrations: Vec<Registration>,
    created: Vec<SessionCallback>,
    closed: Vec<SessionCallback>,
    /// First error hit while building; reported by `start`
    error: Option<HexlinkError>,
}

impl ServerBuilder {
    /// Create a new server builder with default configuration
    pub fn new() -> Self {
        Self {
            config: HexlinkConfig::default(),
            packets: PacketRegistry::new(),
            registrations: Vec::new(),
            created: Vec::new(),
            closed: Vec::new(),
            error: None,
        }
    }

    /// Bind to a specific address
    ///
    /// # Arguments
    ///
    /// * `addr` - Address to bind to (e.g., "127.0.0.1:8080" or "0.0.0.0:0")
    pub fn bind(addr: impl Into<String>) -> Self {
        let addr_str = addr.into();
        let (bind_addr, port) = parse_addr(&addr_str);

        let mut builder = Self::new();
        builder.config.server.bind_address = bind_addr;
        builder.config.server.port = port;
        builder
    }

    /// Set full configuration
    ///
    /// Replaces the bind address given to [`ServerBuilder::bind`].
    pub fn config(mut self, config: HexlinkConfig) -> Self {
        self.config = config;
        self
    }

    /// Set transport protocol
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.config.server.protocol = protocol;
        self
    }

    /// Set per-session send/receive settings
    pub fn session_config(mut self, session: SessionConfig) -> Self {
        self.config.session = session;
        self
    }

    /// Set handshake settings (UDP only)
    pub fn handshake_config(mut self, handshake: HandshakeConfig) -> Self {
        self.config.handshake = handshake;
        self
    }

    /// Limit concurrent sessions
    pub fn max_connections(mut self, max: u32) -> Self {
        self.config.server.max_connections = Some(max);
        self
    }

    /// Register a packet type with the codec
    ///
    /// Needed for types the server only sends; handled types are registered by
    /// [`ServerBuilder::handler`].
    pub fn packet<P: Packet>(mut self) -> Self {
        self.register_packet::<P>();
        self
    }

    fn register_packet<P: Packet>(&mut self) {
        if self.packets.packet_id_of::<P>().is_some() {
            return;
        }
        if let Err(e) = self.packets.register::<P>()
            && self.error.is_none()
        {
            self.error = Some(e.into());
        }
    }

    /// Add a persistent handler run on the session's receive loop
    pub fn handler<T, F>(self, handler: F) -> Self
    where
        T: Packet,
        F: Fn(&Dispatcher, &Arc<Session>, Arc<T>) -> hexlink_core::Result<()> + Send + Sync + 'static,
    {
        self.handler_with::<T, F>(handler, Scheduler::Inline)
    }

    /// Add a persistent handler with an explicit scheduler
    pub fn handler_with<T, F>(mut self, handler: F, scheduler: Scheduler) -> Self
    where
        T: Packet,
        F: Fn(&Dispatcher, &Arc<Session>, Arc<T>) -> hexlink_core::Result<()> + Send + Sync + 'static,
    {
        self.register_packet::<T>();
        self.registrations.push(Box::new(move |dispatcher: &Dispatcher| {
            dispatcher.add_handler::<T, F>(handler, scheduler);
        }));
        self
    }

    /// Called for every new session before it starts receiving
    pub fn on_created<F>(mut self, callback: F) -> Self
    where
        F: Fn(SessionId, &Arc<Session>) + Send + Sync + 'static,
    {
        self.created.push(Arc::new(callback));
        self
    }

    /// Called when a session drops without the application closing it
    pub fn on_closed<F>(mut self, callback: F) -> Self
    where
        F: Fn(SessionId, &Arc<Session>) + Send + Sync + 'static,
    {
        self.closed.push(Arc::new(callback));
        self
    }

    /// Bind the listener and start accepting
    ///
    /// Returns once the listener is bound; accepting runs on background tasks.
    pub async fn start(self) -> Result<RunningServer> {
        if let Some(e) = self.error {
            return Err(e.into());
        }
        self.config.validate()?;

        let dispatcher = Dispatcher::new(ProtoCodec::new(self.packets));
        for register in self.registrations {
            register(&dispatcher);
        }

        let acceptor = Arc::new(Acceptor::new(self.config, Arc::new(dispatcher.clone())));
        for callback in self.created {
            acceptor.on_created(callback);
        }
        for callback in self.closed {
            acceptor.on_closed(callback);
        }

        let local_addr = acceptor.setup_from_config().await?;

        let cancel = CancellationToken::new();
        let mut tasks = vec![acceptor.start_accept_loop(cancel.child_token())];
        if let Some(heartbeat) = acceptor.spawn_heartbeat(cancel.child_token()) {
            tasks.push(heartbeat);
        }

        info!(addr = %local_addr, protocol = %acceptor.config().server.protocol, "Hexlink 服务器已启动");

        Ok(RunningServer {
            local_addr,
            dispatcher,
            acceptor,
            cancel,
            tasks,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Type alias for convenience
pub type Server = ServerBuilder;

/// A started server
pub struct RunningServer {
    local_addr: SocketAddr,
    dispatcher: Dispatcher,
    acceptor: Arc<Acceptor>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningServer {
    /// Bound address (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn acceptor(&self) -> &Arc<Acceptor> {
        &self.acceptor
    }

    /// Live sessions
    pub fn sessions(&self) -> &SessionRegistry {
        self.acceptor.registry()
    }

    /// Stop accepting, close every live session and wait for background tasks
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.acceptor.close().await;

        match self.acceptor.registry().close_all() {
            Ok(count) => info!(count, "关闭全部会话"),
            Err(e) => warn!(error = %e, "关闭会话失败"),
        }

        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "后台任务异常退出");
            }
        }
        info!(addr = %self.local_addr, "Hexlink 服务器已停止");
    }
}

/// Parse address string into (host, port) tuple
///
/// The port is taken after the last `:`; a missing or invalid port falls back to 8080.
fn parse_addr(addr: &str) -> (String, u16) {
    match addr.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.parse().unwrap_or(8080)),
        None => (addr.to_string(), 8080),
    }
}
