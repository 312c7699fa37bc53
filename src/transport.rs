//! The client transport and the pieces it is built from.
//!
//! 客户端传输及其组成部分。

pub mod client;
pub mod command;
pub(crate) mod handler;
pub mod identity;
pub mod keepalive;
pub mod lifecycle;
pub mod negotiator;
pub mod ping;
pub mod stream;
pub mod translate;
pub mod write_queue;

pub use client::{ClientTransport, ClientTransportBuilder, PendingTermination};
pub use command::Command;
pub use identity::{Attributes, LogId};
pub use keepalive::KeepAliveAdapter;
pub use lifecycle::{LifecycleManager, LifecycleState, TransportListener};
pub use negotiator::{PlaintextNegotiator, ProtocolNegotiator, Scheme};
pub use ping::PingCallback;
pub use stream::{ClientStream, StreamListener};
pub use translate::status_from_failure;
pub use write_queue::WriteQueue;
