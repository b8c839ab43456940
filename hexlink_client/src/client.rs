//! High-level client built on a session and a dispatcher

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::event::ClientEvent;
use hexlink_codec::{PacketRegistry, ProtoCodec};
use hexlink_core::{HexlinkErrorKind, SessionId};
use hexlink_dispatch::{Dispatcher, HandlerId, Scheduler};
use hexlink_network::{CloseReason, Connector, Session};
use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const EVENT_CAPACITY: usize = 100;

/// High-level client
///
/// Owns one outbound session. Incoming messages are routed through the
/// dispatcher, so persistent handlers and one-shot waits share the same path.
pub struct Client {
    session: Arc<Session>,
    dispatcher: Dispatcher,
    event_tx: broadcast::Sender<ClientEvent>,
    config: ClientConfig,
}

impl Client {
    /// Connect using the given packet registry
    pub async fn connect(config: ClientConfig, registry: PacketRegistry) -> Result<Self> {
        Self::connect_with_dispatcher(config, Dispatcher::new(ProtoCodec::new(registry))).await
    }

    /// Connect with a preconfigured dispatcher
    ///
    /// Handlers already registered on `dispatcher` see messages from the first frame on.
    pub async fn connect_with_dispatcher(config: ClientConfig, dispatcher: Dispatcher) -> Result<Self> {
        let connector = Connector::new(config.session.clone(), config.handshake.clone())
            .with_connect_timeout(config.connect_timeout);

        let session = connector
            .connect(config.server_addr, config.protocol, Arc::new(dispatcher.clone()))
            .await
            .map_err(|e| match e.kind() {
                HexlinkErrorKind::Timeout => {
                    ClientError::Timeout(format!("connect to {}", config.server_addr))
                }
                _ => ClientError::ConnectionFailed(e.to_string()),
            })?;

        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let closed_tx = event_tx.clone();
        session.set_close_hook(Box::new(move |id: SessionId, reason: &CloseReason| {
            debug!(session_id = %id, reason = %reason, "client session closed");
            let _ = closed_tx.send(ClientEvent::Disconnected {
                reason: reason.to_string(),
            });
        }));

        let _ = event_tx.send(ClientEvent::Connected {
            addr: config.server_addr,
            session_id: session.id(),
        });
        info!(session_id = %session.id(), addr = %config.server_addr, "client connected");

        Ok(Self {
            session,
            dispatcher,
            event_tx,
            config,
        })
    }

    /// Dispatcher routing this client's incoming messages
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Underlying session
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn session_id(&self) -> SessionId {
        self.session.id()
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.config.server_addr
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Register a persistent message handler
    pub fn on_message<T, F>(&self, handler: F) -> HandlerId
    where
        T: Any + Send + Sync,
        F: Fn(&Dispatcher, &Arc<Session>, Arc<T>) -> hexlink_core::Result<()> + Send + Sync + 'static,
    {
        self.dispatcher.add_handler::<T, F>(handler, Scheduler::Inline)
    }

    /// Send a message
    pub fn send<T: Any>(&self, message: &T) -> Result<()> {
        if self.session.is_closed() {
            return Err(ClientError::NotConnected);
        }
        if !self.dispatcher.send(&self.session, message) {
            return Err(ClientError::SendFailed(format!(
                "{} was not queued",
                std::any::type_name::<T>()
            )));
        }

        let _ = self.event_tx.send(ClientEvent::MessageSent {
            type_name: std::any::type_name::<T>(),
        });
        Ok(())
    }

    /// Send a request and wait for one reply of type `Resp`
    ///
    /// Fails with `Timeout` after `request_timeout`.
    pub async fn request<Req, Resp>(&self, request: &Req) -> Result<Arc<Resp>>
    where
        Req: Any,
        Resp: Any + Send + Sync,
    {
        let cancel = CancellationToken::new();
        let timeout = self.config.request_timeout;

        tokio::select! {
            reply = self.request_with_cancel::<Req, Resp>(request, &cancel) => reply,
            _ = tokio::time::sleep(timeout) => {
                cancel.cancel();
                Err(ClientError::Timeout(format!(
                    "no {} within {:?}",
                    std::any::type_name::<Resp>(),
                    timeout
                )))
            }
        }
    }

    /// Send a request and wait for a reply until `cancel` fires
    pub async fn request_with_cancel<Req, Resp>(
        &self,
        request: &Req,
        cancel: &CancellationToken,
    ) -> Result<Arc<Resp>>
    where
        Req: Any,
        Resp: Any + Send + Sync,
    {
        if self.session.is_closed() {
            return Err(ClientError::NotConnected);
        }

        let listener = self.dispatcher.listen_once::<Resp>(&self.session);
        self.send(request)?;

        match listener.wait(cancel).await {
            Some(reply) => Ok(reply),
            None if self.session.is_closed() => Err(ClientError::NotConnected),
            None => Err(ClientError::Cancelled),
        }
    }

    /// Subscribe to client events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.event_tx.subscribe()
    }

    /// Close the connection
    pub async fn close(self) -> Result<()> {
        self.session.close();
        self.session.wait_closed().await;
        Ok(())
    }
}
