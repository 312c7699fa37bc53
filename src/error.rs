//! 定义了库中所有可能的错误类型。
//! Defines all possible error types in the library.

use crate::status::Status;
use std::net::SocketAddr;
use thiserror::Error;

/// The primary error type for the RPC client transport.
/// RPC 客户端传输的主要错误类型。
#[derive(Debug, Error)]
pub enum Error {
    /// An underlying I/O error occurred.
    /// 发生了底层的I/O错误。
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The channel was already closed when the operation reached it.
    ///
    /// This is usually an artifact of teardown ordering rather than the real
    /// cause of the failure.
    ///
    /// 操作到达时通道已经关闭。这通常是拆除顺序的副产物，而不是失败的真正原因。
    #[error("Channel is closed")]
    ChannelClosed,

    /// The channel closed while stream creations were still buffered waiting
    /// for the connection to become ready.
    ///
    /// 通道关闭时仍有等待连接就绪的流创建请求处于缓冲状态。
    #[error("Channel closed while streams were still buffered")]
    StreamsBufferedAtClose,

    /// The event loop group has been shut down and cannot host new channels.
    /// 事件循环组已关闭，无法再承载新的通道。
    #[error("Event loop group is shut down")]
    EventLoopShutdown,

    /// `start` was called more than once on the same transport.
    /// 同一个传输上多次调用了 `start`。
    #[error("Transport was already started")]
    AlreadyStarted,

    /// An operation needed a started transport.
    /// 操作需要一个已启动的传输。
    #[error("Transport has not been started")]
    NotStarted,

    /// The address cannot be reached through the selected channel kind.
    /// 所选通道类型无法连接该地址。
    #[error("Address {address} is not supported by {kind} channels")]
    AddressMismatch { kind: &'static str, address: String },

    /// `connect` was issued on a channel that is already connecting or connected.
    /// 在已在连接或已连接的通道上再次发起了 `connect`。
    #[error("Channel is already connecting or connected")]
    AlreadyConnected,

    /// The outbound connect did not complete within the configured timeout.
    /// 出站连接未在配置的超时时间内完成。
    #[error("Connection timed out")]
    ConnectTimeout,

    /// The connection was asked to bind to an address it could not use.
    /// 连接无法绑定到请求的本地地址。
    #[error("Cannot bind local address {0}")]
    Bind(SocketAddr, #[source] std::io::Error),

    /// The peer violated the framing protocol.
    /// 对端违反了帧协议。
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An error that already carries a final status.
    /// 已经携带最终状态的错误。
    #[error("{0}")]
    Status(Status),
}

/// A specialized `Result` type for this library.
/// 本库专用的 `Result` 类型。
pub type Result<T> = std::result::Result<T, Error>;

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        Error::Status(status)
    }
}
