//! 会话注册表
//!
//! 管理活跃会话的集合，并负责心跳超时清理。

use crate::session::{CloseReason, Session, SessionMetrics};
use hexlink_core::{HexlinkError, Result, SessionId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 会话注册表
#[derive(Clone, Default)]
pub struct SessionRegistry {
    /// 会话映射: ID -> Session
    sessions: Arc<RwLock<HashMap<SessionId, Arc<Session>>>>,
    /// 会话指标
    metrics: Arc<SessionMetrics>,
}

impl SessionRegistry {
    /// 创建新的注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用共享指标创建
    pub fn with_metrics(metrics: Arc<SessionMetrics>) -> Self {
        Self {
            sessions: Arc::default(),
            metrics,
        }
    }

    /// 添加会话
    pub fn add(&self, session: Arc<Session>) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| HexlinkError::session(format!("获取写锁失败: {}", e)))?;

        let id = session.id();
        if sessions.contains_key(&id) {
            return Err(HexlinkError::session("会话 ID 重复").with_context(id));
        }
        sessions.insert(id, session);
        self.metrics.inc_sessions();
        Ok(())
    }

    /// 移除会话
    pub fn remove(&self, id: SessionId) -> Result<Option<Arc<Session>>> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| HexlinkError::session(format!("获取写锁失败: {}", e)))?;

        let removed = sessions.remove(&id);
        if removed.is_some() {
            self.metrics.dec_sessions();
        }
        Ok(removed)
    }

    /// 获取会话
    pub fn get(&self, id: SessionId) -> Result<Option<Arc<Session>>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| HexlinkError::session(format!("获取读锁失败: {}", e)))?;

        Ok(sessions.get(&id).cloned())
    }

    /// 检查会话是否存在
    pub fn contains(&self, id: SessionId) -> Result<bool> {
        Ok(self.get(id)?.is_some())
    }

    /// 获取会话数量
    pub fn len(&self) -> Result<usize> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| HexlinkError::session(format!("获取读锁失败: {}", e)))?;

        Ok(sessions.len())
    }

    /// 是否为空
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// 获取所有会话 ID
    pub fn all_ids(&self) -> Result<Vec<SessionId>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| HexlinkError::session(format!("获取读锁失败: {}", e)))?;

        Ok(sessions.keys().copied().collect())
    }

    /// 获取所有会话的快照
    pub fn sessions(&self) -> Result<Vec<Arc<Session>>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|e| HexlinkError::session(format!("获取读锁失败: {}", e)))?;

        Ok(sessions.values().cloned().collect())
    }

    /// 会话指标
    pub fn metrics(&self) -> &Arc<SessionMetrics> {
        &self.metrics
    }

    /// 关闭超过指定空闲时间的会话
    ///
    /// 关闭回调在释放锁之后调用，返回被关闭的会话。
    pub fn cleanup_idle(&self, timeout: Duration) -> Result<Vec<Arc<Session>>> {
        let expired: Vec<Arc<Session>> = self
            .sessions()?
            .into_iter()
            .filter(|session| session.idle_for() > timeout)
            .collect();

        for session in &expired {
            info!(session_id = %session.id(), idle = ?session.idle_for(), "心跳超时");
            session.close_with_reason(CloseReason::HeartbeatTimeout);
            self.remove(session.id())?;
        }

        Ok(expired)
    }

    /// 关闭全部会话
    pub fn close_all(&self) -> Result<usize> {
        let sessions = self.sessions()?;
        for session in &sessions {
            session.close();
            self.remove(session.id())?;
        }
        Ok(sessions.len())
    }

    /// 启动心跳清理任务
    ///
    /// 每隔 `interval` 检查一次，直到 `cancel` 被触发。
    pub fn spawn_heartbeat_task(
        &self,
        interval: Duration,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = self.clone();

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            interval_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval_timer.tick() => {}
                }

                match registry.cleanup_idle(timeout) {
                    Ok(expired) if !expired.is_empty() => {
                        debug!(count = expired.len(), "清理了空闲会话");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "清理会话失败");
                    }
                }
            }
        })
    }
}
