//! Commands the transport writes to its channel.
//!
//! 传输写入其通道的命令。

use super::{ping::PingCallback, stream::StreamState};
use crate::status::Status;
use std::{fmt, sync::Arc};
use tokio::runtime::Handle;

/// A command processed by the connection's handler on the channel task.
/// 由连接处理器在通道任务上处理的命令。
pub enum Command {
    /// Does nothing. Written once at registration so a channel that dies
    /// before it ever becomes active still reports a failure.
    ///
    /// 不执行任何操作。在注册时写入一次，使得在激活前就失效的通道仍能报告失败。
    Noop,
    /// Sends a PING, or joins the one already in flight.
    /// 发送 PING，或加入已在途的 PING。
    SendPing {
        callback: Arc<dyn PingCallback>,
        executor: Handle,
    },
    /// Stops accepting new streams and closes once active streams finish.
    /// 停止接受新流，并在活跃流结束后关闭。
    GracefulClose { status: Status },
    /// Closes every active stream with `status` immediately.
    /// 立即以 `status` 关闭所有活跃流。
    ForcefulClose { status: Status },
    /// Opens a new stream.
    /// 打开一个新流。
    CreateStream { stream: StreamState },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Noop => "noop",
            Command::SendPing { .. } => "send-ping",
            Command::GracefulClose { .. } => "graceful-close",
            Command::ForcefulClose { .. } => "forceful-close",
            Command::CreateStream { .. } => "create-stream",
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::GracefulClose { status } | Command::ForcefulClose { status } => f
                .debug_struct(self.name())
                .field("status", status)
                .finish(),
            Command::CreateStream { stream } => f
                .debug_struct(self.name())
                .field("method", &stream.method().full_name())
                .finish(),
            _ => f.write_str(self.name()),
        }
    }
}
