//! 会话 ID
//!
//! 进程内唯一的会话标识及其单调生成器。

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// 会话唯一标识符
///
/// 线上格式为 4 字节小端序；0 保留为"未分配"。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SessionId(u32);

impl SessionId {
    /// 线上宽度（字节）
    pub const WIRE_SIZE: usize = 4;

    /// 未分配的会话 ID
    pub const UNASSIGNED: SessionId = SessionId(0);

    /// 创建新的会话 ID
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// 获取内部值
    pub fn value(&self) -> u32 {
        self.0
    }

    /// 是否已分配
    pub fn is_assigned(&self) -> bool {
        self.0 != 0
    }

    /// 小端序字节
    pub fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// 从小端序字节读取
    pub fn from_le_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(bytes))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SessionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// 会话 ID 生成器
///
/// 从 1 开始单调递增，跳过保留值 0。
#[derive(Debug)]
pub struct SessionIdGenerator {
    next_id: AtomicU32,
}

impl SessionIdGenerator {
    /// 创建新的生成器
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// 从指定值开始生成
    pub fn starting_at(first: u32) -> Self {
        Self {
            next_id: AtomicU32::new(first.max(1)),
        }
    }

    /// 生成下一个 ID
    pub fn next(&self) -> SessionId {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            if id != 0 {
                return SessionId(id);
            }
        }
    }
}

impl Default for SessionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id() {
        let id1 = SessionId::new(1);
        let id2 = SessionId::new(2);
        assert_ne!(id1, id2);
        assert_eq!(id1.value(), 1);
        assert!(!SessionId::UNASSIGNED.is_assigned());
    }

    #[test]
    fn test_id_generator_monotonic() {
        let generator = SessionIdGenerator::new();
        let id1 = generator.next();
        let id2 = generator.next();
        assert_eq!(id1.value(), 1);
        assert_eq!(id2.value(), 2);
    }

    #[test]
    fn test_id_generator_skips_zero_on_wrap() {
        let generator = SessionIdGenerator::starting_at(u32::MAX);
        assert_eq!(generator.next().value(), u32::MAX);
        assert_eq!(generator.next().value(), 1);
    }

    #[test]
    fn test_le_bytes() {
        let id = SessionId::new(0x0102_0304);
        assert_eq!(id.to_le_bytes(), [0x04, 0x03, 0x02, 0x01]);
        assert_eq!(SessionId::from_le_bytes(id.to_le_bytes()), id);
    }
}
