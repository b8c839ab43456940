//! 一次性等待
//!
//! 注册绑定到单个会话的临时处理器，等待下一条指定类型的消息。
//! 等待以任何方式结束（收到消息、取消、会话关闭）时临时处理器都会被移除。

use crate::dispatcher::Dispatcher;
use crate::handler::{Handler, HandlerId, Scheduler};
use hexlink_core::Result;
use hexlink_network::Session;
use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 一次性监听
///
/// 创建时处理器已经注册，丢弃时自动移除。
pub struct OnceListener<T> {
    dispatcher: Dispatcher,
    session: Arc<Session>,
    id: HandlerId,
    rx: Option<oneshot::Receiver<Arc<T>>>,
}

impl<T: Any + Send + Sync> OnceListener<T> {
    /// 临时处理器的句柄
    pub fn handler_id(&self) -> HandlerId {
        self.id
    }

    /// 等待消息
    ///
    /// 取消或会话关闭时返回 `None`，已经取消的信号直接返回 `None`。
    pub async fn wait(mut self, cancel: &CancellationToken) -> Option<Arc<T>> {
        if cancel.is_cancelled() {
            return None;
        }
        let rx = self.rx.take()?;

        tokio::select! {
            biased;
            message = rx => message.ok(),
            _ = cancel.cancelled() => None,
            _ = self.session.wait_closed() => None,
        }
    }
}

impl<T> Drop for OnceListener<T> {
    fn drop(&mut self) {
        if self.dispatcher.remove_handler(self.id) {
            debug!(handler = %self.id, session_id = %self.session.id(), "移除一次性处理器");
        }
    }
}

impl Dispatcher {
    /// 注册一次性监听
    ///
    /// 处理器只接受 `session` 上的消息，并且只交付第一条。
    pub fn listen_once<T>(&self, session: &Arc<Session>) -> OnceListener<T>
    where
        T: Any + Send + Sync,
    {
        let (tx, rx) = oneshot::channel::<Arc<T>>();
        let slot = Mutex::new(Some(tx));

        let handler: Handler<T> = Arc::new(
            move |_: &Dispatcher, _: &Arc<Session>, message: Arc<T>| -> Result<()> {
                let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(sender) = sender {
                    // 接收端已放弃等待时忽略
                    let _ = sender.send(message);
                }
                Ok(())
            },
        );

        let id = self.register::<T>(
            handler,
            Scheduler::Inline,
            Some(Arc::downgrade(session)),
            0,
        );

        OnceListener {
            dispatcher: self.clone(),
            session: Arc::clone(session),
            id,
            rx: Some(rx),
        }
    }

    /// 等待会话上的下一条 `T` 消息
    pub async fn handle_once<T>(
        &self,
        session: &Arc<Session>,
        cancel: &CancellationToken,
    ) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.listen_once::<T>(session).wait(cancel).await
    }

    /// 发送请求并等待一条回应
    ///
    /// 先注册监听再发送，发送失败时返回 `None`。
    pub async fn send_and_listen_once<Req, Resp>(
        &self,
        session: &Arc<Session>,
        request: &Req,
        cancel: &CancellationToken,
    ) -> Option<Arc<Resp>>
    where
        Req: Any,
        Resp: Any + Send + Sync,
    {
        let listener = self.listen_once::<Resp>(session);
        if !self.send(session, request) {
            debug!(session_id = %session.id(), "请求发送失败，放弃等待");
            return None;
        }
        listener.wait(cancel).await
    }
}
