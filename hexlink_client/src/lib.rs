//! # Hexlink Client
//!
//! Client library for connecting to Hexlink servers.
//!
//! ## Features
//!
//! - TCP and UDP (with handshake) transports
//! - Protobuf messages routed by type through a [`Dispatcher`](hexlink_dispatch::Dispatcher)
//! - Request/reply with a deadline
//! - Connection events over a broadcast channel
//!
//! ## Quick Start
//!
//! ```rust,no_run,ignore
//! use hexlink_client::{Client, ClientConfig};
//! use hexlink_codec::PacketRegistry;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = PacketRegistry::new().with::<Ping>()?.with::<Pong>()?;
//!     let client = Client::connect(ClientConfig::new("127.0.0.1:8080".parse()?), registry).await?;
//!
//!     let pong = client.request::<Ping, Pong>(&Ping { nonce: 42 }).await?;
//!     println!("pong: {}", pong.nonce);
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod event;

// Re-export main types
pub use crate::client::Client;
pub use crate::config::ClientConfig;
pub use crate::error::{ClientError, Result};
pub use crate::event::ClientEvent;

// Prelude module for common imports
pub mod prelude {
    pub use crate::client::Client;
    pub use crate::config::ClientConfig;
    pub use crate::error::{ClientError, Result};
    pub use crate::event::ClientEvent;
}
