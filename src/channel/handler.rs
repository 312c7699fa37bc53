//! The handler contract for events on a channel.
//!
//! 通道事件的处理器契约。

use super::{
    ChannelShared, EventLoop,
    future::{self, ChannelFuture, Promise},
};
use crate::{
    channel::ChannelId,
    error::{Error, Result},
    frame::Frame,
    transport::command::Command,
};
use bytes::BytesMut;
use std::collections::VecDeque;
use tracing::warn;

/// A unit of work that runs on the channel task.
/// 在通道任务上运行的一段工作。
pub type Task = Box<dyn FnOnce(&mut ChannelContext<'_>) + Send>;

/// Receives the events of a single channel. All methods run on the channel task.
///
/// 接收单个通道的事件。所有方法都在通道任务上运行。
pub trait ChannelHandler: Send + 'static {
    /// The channel finished connecting.
    /// 通道完成连接。
    fn channel_active(&mut self, _ctx: &mut ChannelContext<'_>) {}

    /// New bytes arrived. The handler consumes whatever it can from `buf`
    /// and leaves partial input in place. An error closes the channel.
    ///
    /// 有新的字节到达。处理器从 `buf` 中消费能处理的部分，并保留不完整的输入。
    /// 返回错误会关闭通道。
    fn channel_read(&mut self, ctx: &mut ChannelContext<'_>, buf: &mut BytesMut) -> Result<()>;

    /// A command was written to the channel. The handler owns `promise` and
    /// must complete it or let it drop.
    ///
    /// 有命令写入通道。处理器拥有 `promise`，必须完成它或将其丢弃。
    fn write(&mut self, ctx: &mut ChannelContext<'_>, command: Command, promise: Promise);

    /// The channel closed. This is the last event the handler sees; it is
    /// delivered even if the channel never became active.
    ///
    /// 通道已关闭。这是处理器看到的最后一个事件；即使通道从未激活也会送达。
    fn channel_inactive(&mut self, _ctx: &mut ChannelContext<'_>) {}
}

/// The handler's view of its channel while an event is being processed.
///
/// Outbound bytes are buffered and flushed once the event returns. Commands
/// written through the context are fed back into the handler right after the
/// current event, in order.
///
/// 事件处理期间处理器对通道的视图。出站字节先缓冲，事件返回后统一刷出。
/// 通过上下文写入的命令会在当前事件之后按顺序重新送入处理器。
pub struct ChannelContext<'a> {
    shared: &'a ChannelShared,
    outbox: &'a mut Outbox,
}

/// Output produced by handlers while processing one event.
/// 处理器在处理单个事件期间产生的输出。
#[derive(Default)]
pub(crate) struct Outbox {
    pub(crate) bytes: BytesMut,
    pub(crate) pending: VecDeque<(Command, Promise)>,
    pub(crate) close_requested: bool,
}

impl<'a> ChannelContext<'a> {
    pub(crate) fn new(shared: &'a ChannelShared, outbox: &'a mut Outbox) -> Self {
        Self { shared, outbox }
    }

    pub fn id(&self) -> ChannelId {
        self.shared.id()
    }

    pub fn event_loop(&self) -> &EventLoop {
        self.shared.event_loop()
    }

    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Encodes `frame` for sending. Returns `false` and drops the frame if the
    /// channel is already closed.
    ///
    /// 编码 `frame` 以待发送。若通道已关闭，则丢弃该帧并返回 `false`。
    pub fn send_frame(&mut self, frame: &Frame) -> bool {
        match self.try_send_frame(frame) {
            Ok(()) => true,
            Err(Error::ChannelClosed) => false,
            Err(e) => {
                warn!(channel = %self.id(), error = %e, "dropping frame that cannot be encoded");
                false
            }
        }
    }

    /// Like [`send_frame`](Self::send_frame), but reports why the frame was
    /// not sent: `ChannelClosed`, or the encoding error.
    ///
    /// 与 [`send_frame`](Self::send_frame) 相同，但会报告帧未发送的原因：
    /// `ChannelClosed` 或编码错误。
    pub fn try_send_frame(&mut self, frame: &Frame) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ChannelClosed);
        }
        frame.encode(&mut self.outbox.bytes)
    }

    /// Queues raw bytes for sending.
    /// 将原始字节排队待发送。
    pub fn send_bytes(&mut self, bytes: &[u8]) -> bool {
        if !self.is_open() {
            return false;
        }
        self.outbox.bytes.extend_from_slice(bytes);
        true
    }

    /// Writes a command through the handler pipeline after the current event.
    /// 在当前事件之后，通过处理器管线写入一条命令。
    pub fn write(&mut self, command: Command) -> ChannelFuture {
        let (promise, future) = future::promise();
        self.write_with_promise(command, promise);
        future
    }

    pub fn write_with_promise(&mut self, command: Command, promise: Promise) {
        self.outbox.pending.push_back((command, promise));
    }

    /// Closes the channel. `is_open` turns false immediately; the handler sees
    /// `channel_inactive` once the current event and the commands it wrote
    /// have been processed.
    ///
    /// 关闭通道。`is_open` 立即变为 false；在当前事件及其写入的命令处理完毕后，
    /// 处理器才会收到 `channel_inactive`。
    pub fn close(&mut self) {
        self.shared.mark_closed();
        self.outbox.close_requested = true;
    }
}
