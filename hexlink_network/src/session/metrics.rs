//! 会话指标
//!
//! 收集和统计会话相关的指标。

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// 会话指标
#[derive(Debug, Default)]
pub struct SessionMetrics {
    /// 当前会话数
    current_sessions: AtomicUsize,
    /// 总会话数（累计）
    total_sessions: AtomicU64,
    /// 总接收字节数
    bytes_received: AtomicU64,
    /// 总发送字节数
    bytes_sent: AtomicU64,
    /// 总接收帧数
    frames_received: AtomicU64,
    /// 总发送帧数
    frames_sent: AtomicU64,
    /// 发送队列溢出丢弃的帧数
    frames_dropped: AtomicU64,
    /// 接收到的坏帧数
    frames_malformed: AtomicU64,
}

impl SessionMetrics {
    /// 创建新的会话指标
    pub fn new() -> Self {
        Self::default()
    }

    /// 增加会话数
    pub fn inc_sessions(&self) {
        self.current_sessions.fetch_add(1, Ordering::Relaxed);
        self.total_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// 减少会话数
    pub fn dec_sessions(&self) {
        // 不会减到 0 以下
        let _ = self
            .current_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// 记录接收字节
    pub fn record_bytes_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    /// 记录发送的一帧
    pub fn record_frame_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录接收的一帧
    pub fn record_frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录丢弃的帧
    pub fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录坏帧
    pub fn record_frame_malformed(&self) {
        self.frames_malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// 获取当前会话数
    pub fn current_sessions(&self) -> usize {
        self.current_sessions.load(Ordering::Relaxed)
    }

    /// 获取总会话数
    pub fn total_sessions(&self) -> u64 {
        self.total_sessions.load(Ordering::Relaxed)
    }

    /// 获取总接收字节数
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// 获取总发送字节数
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// 获取总接收帧数
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// 获取总发送帧数
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// 获取丢弃帧数
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    /// 获取坏帧数
    pub fn frames_malformed(&self) -> u64 {
        self.frames_malformed.load(Ordering::Relaxed)
    }

    /// 生成摘要报告
    pub fn summary(&self) -> String {
        format!(
            "会话指标:\n\
             - 当前会话: {}\n\
             - 总会话数: {}\n\
             - 接收字节: {}\n\
             - 发送字节: {}\n\
             - 接收帧: {}\n\
             - 发送帧: {}\n\
             - 丢弃帧: {}\n\
             - 坏帧: {}",
            self.current_sessions(),
            self.total_sessions(),
            self.bytes_received(),
            self.bytes_sent(),
            self.frames_received(),
            self.frames_sent(),
            self.frames_dropped(),
            self.frames_malformed()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_inc_dec() {
        let metrics = SessionMetrics::new();

        metrics.inc_sessions();
        assert_eq!(metrics.current_sessions(), 1);
        assert_eq!(metrics.total_sessions(), 1);

        metrics.dec_sessions();
        metrics.dec_sessions();
        assert_eq!(metrics.current_sessions(), 0);
        assert_eq!(metrics.total_sessions(), 1); // 总数不变
    }

    #[test]
    fn test_metrics_frames() {
        let metrics = SessionMetrics::new();

        metrics.record_frame_sent(10);
        metrics.record_frame_sent(6);
        metrics.record_bytes_received(32);
        metrics.record_frame_received();
        metrics.record_frame_dropped();
        metrics.record_frame_malformed();

        assert_eq!(metrics.frames_sent(), 2);
        assert_eq!(metrics.bytes_sent(), 16);
        assert_eq!(metrics.bytes_received(), 32);
        assert_eq!(metrics.frames_received(), 1);
        assert_eq!(metrics.frames_dropped(), 1);
        assert_eq!(metrics.frames_malformed(), 1);
    }

    #[test]
    fn test_metrics_summary() {
        let metrics = SessionMetrics::new();
        let summary = metrics.summary();
        assert!(summary.contains("会话指标"));
        assert!(summary.contains("当前会话: 0"));
    }
}
