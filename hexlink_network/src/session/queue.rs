//! 发送队列
//!
//! 多生产者、单消费者的有界队列。入队永不阻塞，溢出时按投递类别淘汰。

use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// 投递类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryClass {
    /// 溢出时可以被丢弃（心跳、状态同步等）
    #[default]
    Droppable,
    /// 溢出时不会被淘汰（事务性请求）
    Retained,
}

/// 入队结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// 已入队
    Queued,
    /// 已入队，同时淘汰了最旧的可丢弃项
    QueuedDroppedOldest,
    /// 队列中全部是保留项，新的可丢弃项被丢弃
    DroppedIncoming,
    /// 队列中全部是保留项，新的保留项被拒绝
    Rejected,
    /// 队列已关闭
    Closed,
}

impl PushOutcome {
    /// 数据是否已进入队列
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued | Self::QueuedDroppedOldest)
    }
}

struct State {
    items: VecDeque<(Bytes, DeliveryClass)>,
    closed: bool,
}

/// 有界发送队列
pub struct OutboundQueue {
    state: Mutex<State>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
}

impl OutboundQueue {
    /// 创建指定容量的队列
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 入队，永不阻塞
    pub fn push(&self, data: Bytes, class: DeliveryClass) -> PushOutcome {
        let outcome = {
            let mut state = self.lock();
            if state.closed {
                return PushOutcome::Closed;
            }

            if state.items.len() < self.capacity {
                state.items.push_back((data, class));
                PushOutcome::Queued
            } else if let Some(pos) = state
                .items
                .iter()
                .position(|(_, c)| *c == DeliveryClass::Droppable)
            {
                state.items.remove(pos);
                state.items.push_back((data, class));
                PushOutcome::QueuedDroppedOldest
            } else if class == DeliveryClass::Droppable {
                PushOutcome::DroppedIncoming
            } else {
                PushOutcome::Rejected
            }
        };

        match outcome {
            PushOutcome::Queued => self.notify.notify_one(),
            PushOutcome::QueuedDroppedOldest => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.notify.notify_one();
            }
            PushOutcome::DroppedIncoming | PushOutcome::Rejected => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            PushOutcome::Closed => {}
        }
        outcome
    }

    /// 立即取出队首
    pub fn try_pop(&self) -> Option<Bytes> {
        self.lock().items.pop_front().map(|(data, _)| data)
    }

    /// 等待并取出队首
    ///
    /// 队列关闭且已取空时返回 `None`。
    pub async fn pop(&self) -> Option<Bytes> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.lock();
                if let Some((data, _)) = state.items.pop_front() {
                    return Some(data);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// 关闭队列，唤醒消费者
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// 是否已关闭
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// 当前长度
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// 容量
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 累计丢弃数
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
