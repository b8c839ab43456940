//! High-level server API
//!
//! Wires an [`Acceptor`](hexlink_network::Acceptor) to a
//! [`Dispatcher`](hexlink_dispatch::Dispatcher) with a fluent builder.

mod builder;

pub use builder::{RunningServer, Server, ServerBuilder};
