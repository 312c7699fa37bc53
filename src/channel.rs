//! The connection substrate: channels, their event loops and the handler
//! pipeline that runs on them.
//!
//! Every channel is driven by one task on one event loop. All socket I/O and
//! all handler callbacks for that channel happen on that task, in the order
//! the operations were submitted. The public [`Channel`] handle can be used
//! from any thread; it only ever sends operations to the task.
//!
//! 连接基础设施：通道、事件循环以及运行在其上的处理器管线。
//!
//! 每个通道由某个事件循环上的一个任务驱动。该通道的所有套接字 I/O 与处理器回调
//! 都在这个任务上按提交顺序执行。公共的 [`Channel`] 句柄可在任意线程使用，
//! 它只负责把操作发送给该任务。

mod actor;
pub mod bootstrap;
pub mod connector;
pub mod event_loop;
pub mod future;
pub mod handler;

pub use bootstrap::{Bootstrap, Registration};
pub use connector::{BoxedIo, Connector, Socket};
pub use event_loop::{EventLoop, EventLoopGroup};
pub use future::{ChannelFuture, Promise};
pub use handler::{ChannelContext, ChannelHandler, Task};

use crate::{
    error::{Error, Result},
    transport::command::Command,
};
use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use tokio::sync::mpsc;

/// The remote end of a channel.
/// 通道的远端地址。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Tcp(SocketAddr),
    #[cfg(unix)]
    Unix(std::path::PathBuf),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Tcp(addr) => write!(f, "{addr}"),
            #[cfg(unix)]
            Address::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::Tcp(addr)
    }
}

/// A process-unique channel identifier, used in logs.
/// 进程内唯一的通道标识，用于日志。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(u64);

impl ChannelId {
    fn allocate() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ChannelId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{:x}", self.0)
    }
}

/// Operations sent from `Channel` handles to the channel task.
/// 从 `Channel` 句柄发送到通道任务的操作。
pub(crate) enum ChannelOp {
    Connect { address: Address, promise: Promise },
    Write { command: Command, promise: Promise },
    Close { promise: Promise },
    Execute(Task),
}

/// State shared between the channel task and its handles.
pub(crate) struct ChannelShared {
    id: ChannelId,
    event_loop: EventLoop,
    open: AtomicBool,
}

impl ChannelShared {
    pub(crate) fn new(event_loop: EventLoop) -> Self {
        Self {
            id: ChannelId::allocate(),
            event_loop,
            open: AtomicBool::new(true),
        }
    }

    pub(crate) fn id(&self) -> ChannelId {
        self.id
    }

    pub(crate) fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) -> bool {
        self.open.swap(false, Ordering::AcqRel)
    }
}

/// A handle to a live channel.
///
/// Cloning is cheap. When the last handle is dropped the channel closes.
///
/// 指向一个存活通道的句柄。克隆开销很小；最后一个句柄被丢弃时通道关闭。
#[derive(Clone)]
pub struct Channel {
    shared: Arc<ChannelShared>,
    ops: mpsc::UnboundedSender<ChannelOp>,
}

impl Channel {
    pub(crate) fn new(shared: Arc<ChannelShared>, ops: mpsc::UnboundedSender<ChannelOp>) -> Self {
        Self { shared, ops }
    }

    pub fn id(&self) -> ChannelId {
        self.shared.id()
    }

    /// The event loop this channel is bound to for its whole life.
    /// 此通道终生绑定的事件循环。
    pub fn event_loop(&self) -> &EventLoop {
        self.shared.event_loop()
    }

    /// Whether the channel has not been closed yet. A channel is open before
    /// it is connected.
    ///
    /// 通道是否尚未关闭。通道在连接之前也处于打开状态。
    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Starts connecting to `address`. The future fails if the connect fails,
    /// in which case the channel closes.
    ///
    /// 开始连接 `address`。连接失败时 future 失败，且通道随之关闭。
    pub fn connect(&self, address: Address) -> ChannelFuture {
        let (promise, future) = future::promise();
        self.submit(ChannelOp::Connect { address, promise });
        future
    }

    /// Writes a command through the channel's handler pipeline.
    /// 通过通道的处理器管线写入一条命令。
    pub fn write(&self, command: Command) -> ChannelFuture {
        let (promise, future) = future::promise();
        self.submit(ChannelOp::Write { command, promise });
        future
    }

    pub fn close(&self) -> ChannelFuture {
        let (promise, future) = future::promise();
        self.submit(ChannelOp::Close { promise });
        future
    }

    /// Runs `task` on the channel task. Fails with [`Error::ChannelClosed`]
    /// if the channel task is gone, in which case the task is dropped.
    ///
    /// 在通道任务上运行 `task`。若通道任务已不存在则以 [`Error::ChannelClosed`] 失败，任务被丢弃。
    pub(crate) fn execute(&self, task: Task) -> Result<()> {
        self.ops
            .send(ChannelOp::Execute(task))
            .map_err(|_| Error::ChannelClosed)
    }

    fn submit(&self, op: ChannelOp) {
        // A rejected op drops its promise, which fails the caller's future.
        let _ = self.ops.send(op);
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id())
            .field("event_loop", &self.event_loop().id())
            .field("open", &self.is_open())
            .finish()
    }
}
