#![deny(clippy::expect_used, clippy::unwrap_used)]

//! The root of the RPC client transport library.
//! RPC 客户端传输库的根。
//!
//! A [`ClientTransport`] owns one connection to a server. It registers a
//! channel on an event loop, connects it, and runs the protocol there, while
//! callers on any thread open streams, send pings and shut it down.
//!
//! [`ClientTransport`] 拥有一条到服务器的连接。它在事件循环上注册通道、建立连接并在其上
//! 运行协议；任意线程上的调用方都可以打开流、发送 ping 以及关闭传输。

pub mod channel;
pub mod config;
pub mod error;
pub mod frame;
pub mod metadata;
pub mod status;
pub mod transport;

pub use channel::{Address, EventLoopGroup};
pub use config::Config;
pub use error::{Error, Result};
pub use metadata::{CallOptions, Metadata, MethodDescriptor};
pub use status::{Code, Status};
pub use transport::{
    ClientStream, ClientTransport, PendingTermination, PingCallback, StreamListener,
    TransportListener,
};
