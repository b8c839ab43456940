//! Hexlink 核心类型
//!
//! 提供统一错误类型、会话 ID 及其生成器，供其余 crate 共享。

pub mod error;
pub mod session_id;

// 导出主要类型到 crate root
pub use crate::error::{ErrorContext, HexlinkError, HexlinkErrorKind, Result};
pub use crate::session_id::{SessionId, SessionIdGenerator};

// 预导出
pub mod prelude {
    pub use crate::error::{ErrorContext, HexlinkError, HexlinkErrorKind, Result};
    pub use crate::session_id::{SessionId, SessionIdGenerator};
}
