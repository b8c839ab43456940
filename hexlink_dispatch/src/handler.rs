//! 处理器类型

use crate::dispatcher::Dispatcher;
use hexlink_core::Result;
use hexlink_network::Session;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// 处理器注册句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }

    /// 获取内部值
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

/// 处理器执行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheduler {
    /// 在分发线程（会话接收循环）上直接执行
    #[default]
    Inline,
    /// 派生到新的 tokio 任务，错误只记录日志
    Spawn,
}

/// 类型化处理器
pub type Handler<T> = Arc<dyn Fn(&Dispatcher, &Arc<Session>, Arc<T>) -> Result<()> + Send + Sync>;

/// 读取包头信息的处理器
pub type EnvelopeHandler<T> =
    Arc<dyn Fn(&Dispatcher, &Arc<Session>, Envelope<T>) -> Result<()> + Send + Sync>;

/// 分发中的消息及其包头信息
///
/// 从线上解码的消息带有包 ID 与中间节点注入的前缀；
/// 本地直接分发的消息没有包 ID，前缀为空。
pub struct Envelope<T: ?Sized> {
    packet_id: Option<u16>,
    prefixes: Arc<[i64]>,
    message: Arc<T>,
}

impl<T: ?Sized> Envelope<T> {
    pub(crate) fn new(packet_id: Option<u16>, prefixes: Arc<[i64]>, message: Arc<T>) -> Self {
        Self {
            packet_id,
            prefixes,
            message,
        }
    }

    /// 包 ID
    pub fn packet_id(&self) -> Option<u16> {
        self.packet_id
    }

    /// 按顺序排列的前缀
    pub fn prefixes(&self) -> &[i64] {
        &self.prefixes
    }

    /// 消息对象
    pub fn message(&self) -> &Arc<T> {
        &self.message
    }

    pub fn into_message(self) -> Arc<T> {
        self.message
    }
}

impl Envelope<dyn Any + Send + Sync> {
    /// 转换为具体类型，类型不符时返回 `None`
    pub(crate) fn downcast<T: Any + Send + Sync>(&self) -> Option<Envelope<T>> {
        let message = self.message.clone().downcast::<T>().ok()?;
        Some(Envelope::new(self.packet_id, self.prefixes.clone(), message))
    }
}

impl<T: ?Sized> Clone for Envelope<T> {
    fn clone(&self) -> Self {
        Self {
            packet_id: self.packet_id,
            prefixes: self.prefixes.clone(),
            message: self.message.clone(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Envelope<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("packet_id", &self.packet_id)
            .field("prefixes", &self.prefixes)
            .finish_non_exhaustive()
    }
}
