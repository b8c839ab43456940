//! 消息分发器
//!
//! 以类型为键维护处理器列表。解码后的消息按注册顺序交给同类型的全部处理器，
//! 绑定了会话的处理器只响应该会话的消息。

use crate::handler::{Envelope, EnvelopeHandler, Handler, HandlerId, Scheduler};
use bytes::BytesMut;
use hexlink_codec::{PacketCodec, ProtoCodec};
use hexlink_core::{HexlinkError, Result};
use hexlink_network::{DeliveryClass, Session, SessionHandler};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tracing::{debug, warn};

type ErasedMessage = Envelope<dyn Any + Send + Sync>;

type ErasedHandler = Arc<dyn Fn(&Dispatcher, &Arc<Session>, &ErasedMessage) -> Result<()> + Send + Sync>;

pub(crate) struct Entry {
    type_id: TypeId,
    scheduler: Scheduler,
    bound: Option<Weak<Session>>,
    identity: usize,
    active: AtomicBool,
    call: ErasedHandler,
}

impl Entry {
    fn accepts(&self, session: &Arc<Session>) -> bool {
        match &self.bound {
            Some(bound) => std::ptr::eq(bound.as_ptr(), Arc::as_ptr(session)),
            None => true,
        }
    }
}

#[derive(Default)]
struct HandlerTable {
    /// 类型 -> 按注册顺序排列的处理器
    by_type: HashMap<TypeId, Vec<HandlerId>>,
    entries: HashMap<HandlerId, Arc<Entry>>,
}

struct Inner {
    codec: Arc<dyn PacketCodec>,
    table: RwLock<HandlerTable>,
    next_id: AtomicU64,
}

/// 消息分发器
///
/// 克隆得到的是同一个分发器的句柄。
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// 使用指定编解码器创建
    pub fn new(codec: impl PacketCodec) -> Self {
        Self::with_codec(Arc::new(codec))
    }

    /// 使用共享编解码器创建
    pub fn with_codec(codec: Arc<dyn PacketCodec>) -> Self {
        Self {
            inner: Arc::new(Inner {
                codec,
                table: RwLock::new(HandlerTable::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// 编解码器
    pub fn codec(&self) -> &Arc<dyn PacketCodec> {
        &self.inner.codec
    }

    fn read_table(&self) -> RwLockReadGuard<'_, HandlerTable> {
        self.inner.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_table(&self) -> RwLockWriteGuard<'_, HandlerTable> {
        self.inner.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// 注册持久处理器
    pub fn add_handler<T, F>(&self, handler: F, scheduler: Scheduler) -> HandlerId
    where
        T: Any + Send + Sync,
        F: Fn(&Dispatcher, &Arc<Session>, Arc<T>) -> Result<()> + Send + Sync + 'static,
    {
        self.add_shared_handler::<T>(Arc::new(handler), scheduler)
    }

    /// 注册共享处理器
    ///
    /// 之后可以用同一个 `Arc` 通过 [`Dispatcher::remove_shared_handler`] 移除。
    pub fn add_shared_handler<T>(&self, handler: Handler<T>, scheduler: Scheduler) -> HandlerId
    where
        T: Any + Send + Sync,
    {
        let identity = Arc::as_ptr(&handler) as *const () as usize;
        self.register::<T>(handler, scheduler, None, identity)
    }

    /// 注册需要读取包 ID 与前缀的持久处理器
    pub fn add_envelope_handler<T, F>(&self, handler: F, scheduler: Scheduler) -> HandlerId
    where
        T: Any + Send + Sync,
        F: Fn(&Dispatcher, &Arc<Session>, Envelope<T>) -> Result<()> + Send + Sync + 'static,
    {
        let handler: EnvelopeHandler<T> = Arc::new(handler);
        let identity = Arc::as_ptr(&handler) as *const () as usize;
        self.register_envelope::<T>(handler, scheduler, None, identity)
    }

    pub(crate) fn register<T>(
        &self,
        handler: Handler<T>,
        scheduler: Scheduler,
        bound: Option<Weak<Session>>,
        identity: usize,
    ) -> HandlerId
    where
        T: Any + Send + Sync,
    {
        let handler: EnvelopeHandler<T> = Arc::new(
            move |dispatcher: &Dispatcher, session: &Arc<Session>, envelope: Envelope<T>| {
                handler(dispatcher, session, envelope.into_message())
            },
        );
        self.register_envelope::<T>(handler, scheduler, bound, identity)
    }

    fn register_envelope<T>(
        &self,
        handler: EnvelopeHandler<T>,
        scheduler: Scheduler,
        bound: Option<Weak<Session>>,
        identity: usize,
    ) -> HandlerId
    where
        T: Any + Send + Sync,
    {
        let call: ErasedHandler = Arc::new(
            move |dispatcher: &Dispatcher,
                  session: &Arc<Session>,
                  message: &ErasedMessage|
                  -> Result<()> {
                let envelope = message.downcast::<T>().ok_or_else(|| {
                    HexlinkError::dispatch(format!(
                        "消息类型不匹配: 期望 {}",
                        std::any::type_name::<T>()
                    ))
                })?;
                handler(dispatcher, session, envelope)
            },
        );

        let id = HandlerId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(Entry {
            type_id: TypeId::of::<T>(),
            scheduler,
            bound,
            identity,
            active: AtomicBool::new(true),
            call,
        });

        let mut table = self.write_table();
        table.by_type.entry(entry.type_id).or_default().push(id);
        table.entries.insert(id, entry);
        debug!(handler = %id, message = std::any::type_name::<T>(), "注册处理器");
        id
    }

    /// 按句柄移除处理器
    ///
    /// 未注册或已移除时返回 `false`。
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut table = self.write_table();
        let Some(entry) = table.entries.remove(&id) else {
            return false;
        };

        entry.active.store(false, Ordering::Release);
        if let Some(ids) = table.by_type.get_mut(&entry.type_id) {
            ids.retain(|existing| *existing != id);
            if ids.is_empty() {
                table.by_type.remove(&entry.type_id);
            }
        }
        true
    }

    /// 按处理器身份移除最近一次注册
    pub fn remove_shared_handler<T>(&self, handler: &Handler<T>) -> bool
    where
        T: Any + Send + Sync,
    {
        let identity = Arc::as_ptr(handler) as *const () as usize;
        let found = {
            let table = self.read_table();
            table.by_type.get(&TypeId::of::<T>()).and_then(|ids| {
                ids.iter()
                    .rev()
                    .find(|id| {
                        table
                            .entries
                            .get(id)
                            .is_some_and(|entry| entry.identity == identity && entry.bound.is_none())
                    })
                    .copied()
            })
        };

        match found {
            Some(id) => self.remove_handler(id),
            None => false,
        }
    }

    /// 指定类型当前注册的处理器数量
    pub fn handler_count<T: Any>(&self) -> usize {
        self.read_table()
            .by_type
            .get(&TypeId::of::<T>())
            .map_or(0, Vec::len)
    }

    /// 解码原始负载并分发
    ///
    /// 解码失败只记录日志，不返回错误。包 ID 与前缀随消息一起交给处理器。
    pub fn dispatch_raw(&self, session: &Arc<Session>, payload: &[u8]) -> Result<()> {
        let decoded = match self.inner.codec.decode(payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(session_id = %session.id(), len = payload.len(), error = %e, "消息解码失败，丢弃");
                return Ok(());
            }
        };

        let envelope = Envelope::new(
            Some(decoded.packet_id),
            decoded.prefixes.into(),
            decoded.message,
        );
        self.dispatch_envelope(session, decoded.type_id, envelope)
    }

    /// 分发一个已构造的消息
    pub fn dispatch_message<T: Any + Send + Sync>(
        &self,
        session: &Arc<Session>,
        message: T,
    ) -> Result<()> {
        self.dispatch(session, TypeId::of::<T>(), Arc::new(message))
    }

    /// 分发类型擦除的消息
    ///
    /// 按注册顺序调用全部匹配的处理器；某个处理器出错不影响其余处理器，
    /// 返回第一个错误。
    pub fn dispatch(
        &self,
        session: &Arc<Session>,
        type_id: TypeId,
        message: Arc<dyn Any + Send + Sync>,
    ) -> Result<()> {
        self.dispatch_envelope(session, type_id, Envelope::new(None, Arc::from([]), message))
    }

    fn dispatch_envelope(
        &self,
        session: &Arc<Session>,
        type_id: TypeId,
        message: ErasedMessage,
    ) -> Result<()> {
        let entries: Vec<Arc<Entry>> = {
            let table = self.read_table();
            match table.by_type.get(&type_id) {
                Some(ids) => ids
                    .iter()
                    .filter_map(|id| table.entries.get(id).cloned())
                    .collect(),
                None => Vec::new(),
            }
        };

        if entries.is_empty() {
            debug!(session_id = %session.id(), "没有匹配的处理器");
            return Ok(());
        }

        let mut first_error = None;
        for entry in entries {
            if !entry.active.load(Ordering::Acquire) || !entry.accepts(session) {
                continue;
            }

            match entry.scheduler {
                Scheduler::Inline => {
                    if let Err(e) = (entry.call)(self, session, &message) {
                        first_error.get_or_insert(e);
                    }
                }
                Scheduler::Spawn => {
                    let dispatcher = self.clone();
                    let session = session.clone();
                    let message = message.clone();
                    tokio::spawn(async move {
                        if let Err(e) = (entry.call)(&dispatcher, &session, &message) {
                            warn!(session_id = %session.id(), error = %e, "处理器执行失败");
                        }
                    });
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 编码消息并交给会话发送
    ///
    /// 返回消息是否进入了会话的发送队列。
    pub fn send<T: Any>(&self, session: &Session, message: &T) -> bool {
        self.send_with(session, message, DeliveryClass::Droppable)
    }

    /// 以指定投递类别发送
    pub fn send_with<T: Any>(&self, session: &Session, message: &T, class: DeliveryClass) -> bool {
        self.encode_and_send(session, message, &[], class)
    }

    /// 发送带前缀的消息
    ///
    /// 前缀按顺序写在包头之后，接收方通过 [`Envelope::prefixes`] 读取。
    pub fn send_with_prefixes<T: Any>(
        &self,
        session: &Session,
        message: &T,
        prefixes: &[i64],
        class: DeliveryClass,
    ) -> bool {
        self.encode_and_send(session, message, prefixes, class)
    }

    fn encode_and_send(
        &self,
        session: &Session,
        message: &dyn Any,
        prefixes: &[i64],
        class: DeliveryClass,
    ) -> bool {
        let mut buf = BytesMut::new();
        if let Err(e) = self.inner.codec.encode_erased(message, prefixes, &mut buf) {
            warn!(session_id = %session.id(), error = %e, "消息编码失败");
            return false;
        }
        session.send_with(buf.freeze(), class)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(ProtoCodec::default())
    }
}

impl SessionHandler for Dispatcher {
    fn on_received(&self, session: &Arc<Session>, payload: &[u8]) -> Result<()> {
        self.dispatch_raw(session, payload)
    }
}
