//! Hexlink 消息分发
//!
//! 按消息类型把解码后的消息路由到已注册的处理器，
//! 并提供绑定会话的一次性等待与请求/回应辅助方法。

pub mod dispatcher;
pub mod handler;
pub mod once;

pub use crate::dispatcher::Dispatcher;
pub use crate::handler::{Envelope, EnvelopeHandler, Handler, HandlerId, Scheduler};
pub use crate::once::OnceListener;

// 重新导出错误类型
pub use hexlink_core::{HexlinkError, Result};

// 预导出
pub mod prelude {
    pub use crate::dispatcher::Dispatcher;
    pub use crate::handler::{Envelope, EnvelopeHandler, Handler, HandlerId, Scheduler};
    pub use crate::once::OnceListener;
    pub use hexlink_core::{HexlinkError, Result};
}
