//! Hexlink 网络层
//!
//! 帧格式、会话收发引擎、握手子协议、接受器与连接器，以及 TCP、UDP 和内存传输。

pub mod acceptor;
pub mod connector;
pub mod protocol;
pub mod session;
pub mod transport;

// 导出主要类型到 crate root
pub use crate::acceptor::{Acceptor, SessionCallback};
pub use crate::connector::Connector;
pub use crate::protocol::{Frame, FrameCodec, FrameError, HandshakeFrame, HandshakeState};
pub use crate::session::{
    CloseReason, DeliveryClass, PushOutcome, Session, SessionHandler, SessionMetrics,
    SessionRegistry,
};
pub use crate::transport::{Listener, MemoryTransport, Transport, TransportKind};
// 重新导出 hexlink_core 的错误类型
pub use hexlink_core::{HexlinkError, Result, SessionId};

// 预导出
pub mod prelude {
    pub use crate::acceptor::Acceptor;
    pub use crate::connector::Connector;
    pub use crate::session::{CloseReason, DeliveryClass, Session, SessionHandler};
    pub use crate::transport::{Transport, TransportKind};
    pub use hexlink_core::{HexlinkError, Result, SessionId};
}
