//! The task that owns a channel's socket and its handler.
//!
//! 拥有通道套接字与处理器的任务。

use super::{
    ChannelOp, ChannelShared,
    connector::{BoxedIo, Socket},
    future::Promise,
    handler::{ChannelContext, ChannelHandler, Outbox},
};
use crate::error::{Error, Result};
use bytes::BytesMut;
use std::{future::Future, io, pin::Pin, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::mpsc,
};
use tracing::{debug, trace, warn};

const READ_CHUNK: usize = 16 * 1024;

type ConnectFuture = Pin<Box<dyn Future<Output = Result<BoxedIo>> + Send>>;

/// Drives one channel: executes operations from its handles, reads from the
/// socket, and feeds every event through the handler in order.
///
/// 驱动单个通道：执行来自句柄的操作、从套接字读取数据，并按顺序将所有事件送入处理器。
pub(crate) struct ChannelActor {
    shared: Arc<ChannelShared>,
    socket: Option<Box<dyn Socket>>,
    connect_timeout: Option<Duration>,
    connecting: Option<(ConnectFuture, Promise)>,
    reader: Option<ReadHalf<BoxedIo>>,
    writer: Option<WriteHalf<BoxedIo>>,
    handler: Option<Box<dyn ChannelHandler>>,
    ops: mpsc::UnboundedReceiver<ChannelOp>,
    inbound: BytesMut,
    outbox: Outbox,
    close_promises: Vec<Promise>,
    torn_down: bool,
}

impl ChannelActor {
    pub(crate) fn new(
        shared: Arc<ChannelShared>,
        socket: Box<dyn Socket>,
        handler: Box<dyn ChannelHandler>,
        ops: mpsc::UnboundedReceiver<ChannelOp>,
        connect_timeout: Option<Duration>,
    ) -> Self {
        Self {
            shared,
            socket: Some(socket),
            connect_timeout,
            connecting: None,
            reader: None,
            writer: None,
            handler: Some(handler),
            ops,
            inbound: BytesMut::with_capacity(READ_CHUNK),
            outbox: Outbox::default(),
            close_promises: Vec::new(),
            torn_down: false,
        }
    }

    /// Runs until the channel is closed.
    /// 运行直到通道关闭。
    pub(crate) async fn run(mut self) {
        debug!(channel = %self.shared.id(), "channel registered");
        loop {
            tokio::select! {
                op = self.ops.recv() => match op {
                    Some(op) => self.handle_op(op),
                    None => {
                        debug!(channel = %self.shared.id(), "all channel handles dropped");
                        self.request_close();
                    }
                },
                result = Self::connecting(&mut self.connecting), if self.connecting.is_some() => {
                    self.on_connect(result);
                }
                read = Self::read(&mut self.reader, &mut self.inbound), if self.reader.is_some() => {
                    self.on_read(read);
                }
            }

            // Commands written during the event go through the handler before
            // anything else happens on the channel.
            // 事件期间写入的命令会先于通道上的其他任何事情经过处理器。
            self.drain_pending();
            self.flush().await;

            if self.outbox.close_requested {
                break;
            }
        }
        self.teardown();
    }

    fn handle_op(&mut self, op: ChannelOp) {
        match op {
            ChannelOp::Connect { address, promise } => {
                if !self.shared.is_open() {
                    promise.fail(Error::ChannelClosed);
                    return;
                }
                let Some(socket) = self.socket.take() else {
                    promise.fail(Error::AlreadyConnected);
                    return;
                };
                debug!(channel = %self.shared.id(), %address, "connecting");
                let timeout = self.connect_timeout;
                let future: ConnectFuture = Box::pin(async move {
                    let connect = socket.connect(address);
                    match timeout {
                        Some(limit) => tokio::time::timeout(limit, connect)
                            .await
                            .map_err(|_| Error::ConnectTimeout)?,
                        None => connect.await,
                    }
                });
                self.connecting = Some((future, promise));
            }
            ChannelOp::Write { command, promise } => {
                self.outbox.pending.push_back((command, promise));
            }
            ChannelOp::Close { promise } => {
                self.request_close();
                self.close_promises.push(promise);
            }
            ChannelOp::Execute(task) => {
                task(&mut ChannelContext::new(&self.shared, &mut self.outbox));
            }
        }
    }

    async fn connecting(connecting: &mut Option<(ConnectFuture, Promise)>) -> Result<BoxedIo> {
        match connecting {
            Some((future, _)) => future.as_mut().await,
            None => std::future::pending().await,
        }
    }

    fn on_connect(&mut self, result: Result<BoxedIo>) {
        let Some((_, promise)) = self.connecting.take() else {
            return;
        };
        match result {
            Ok(io) => {
                let (reader, writer) = tokio::io::split(io);
                self.reader = Some(reader);
                self.writer = Some(writer);
                debug!(channel = %self.shared.id(), "channel active");
                promise.succeed();
                if let Some(handler) = self.handler.as_mut() {
                    handler.channel_active(&mut ChannelContext::new(&self.shared, &mut self.outbox));
                }
            }
            Err(e) => {
                debug!(channel = %self.shared.id(), error = %e, "connect failed");
                promise.fail(e);
                self.request_close();
            }
        }
    }

    async fn read(reader: &mut Option<ReadHalf<BoxedIo>>, buf: &mut BytesMut) -> io::Result<usize> {
        match reader {
            Some(reader) => {
                buf.reserve(READ_CHUNK);
                reader.read_buf(buf).await
            }
            None => std::future::pending().await,
        }
    }

    fn on_read(&mut self, result: io::Result<usize>) {
        match result {
            Ok(0) => {
                debug!(channel = %self.shared.id(), "peer closed the connection");
                self.request_close();
            }
            Ok(n) => {
                trace!(channel = %self.shared.id(), bytes = n, "read");
                let Some(handler) = self.handler.as_mut() else {
                    self.inbound.clear();
                    return;
                };
                let mut ctx = ChannelContext::new(&self.shared, &mut self.outbox);
                if let Err(e) = handler.channel_read(&mut ctx, &mut self.inbound) {
                    warn!(channel = %self.shared.id(), error = %e, "handler failed to process inbound data");
                    ctx.close();
                }
            }
            Err(e) => {
                debug!(channel = %self.shared.id(), error = %e, "read failed");
                self.request_close();
            }
        }
    }

    fn drain_pending(&mut self) {
        while let Some((command, promise)) = self.outbox.pending.pop_front() {
            match self.handler.as_mut() {
                Some(handler) => handler.write(
                    &mut ChannelContext::new(&self.shared, &mut self.outbox),
                    command,
                    promise,
                ),
                None => promise.fail(Error::ChannelClosed),
            }
        }
    }

    /// Writes buffered output. Output produced before the connection exists
    /// stays buffered until it does.
    ///
    /// 写出缓冲的输出。连接建立前产生的输出会一直缓冲到连接建立。
    async fn flush(&mut self) {
        if self.outbox.bytes.is_empty() {
            return;
        }
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let mut result = writer.write_all(&self.outbox.bytes).await;
        if result.is_ok() {
            result = writer.flush().await;
        }
        self.outbox.bytes.clear();
        if let Err(e) = result {
            debug!(channel = %self.shared.id(), error = %e, "write failed");
            self.request_close();
        }
    }

    fn request_close(&mut self) {
        self.shared.mark_closed();
        self.outbox.close_requested = true;
    }

    /// Releases the socket, tells the handler, and settles everything still
    /// queued for this channel. Runs once, either when the loop exits or when
    /// the task is dropped with its event loop.
    ///
    /// 释放套接字、通知处理器，并了结该通道上所有仍在排队的操作。只运行一次：
    /// 在循环退出时，或在任务随事件循环一起被丢弃时。
    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.shared.mark_closed();
        self.reader = None;
        self.writer = None;
        self.socket = None;
        if let Some((_, promise)) = self.connecting.take() {
            promise.fail(Error::ChannelClosed);
        }

        if let Some(mut handler) = self.handler.take() {
            handler.channel_inactive(&mut ChannelContext::new(&self.shared, &mut self.outbox));
        }
        self.drain_pending();

        self.ops.close();
        while let Ok(op) = self.ops.try_recv() {
            match op {
                ChannelOp::Connect { promise, .. } | ChannelOp::Write { promise, .. } => {
                    promise.fail(Error::ChannelClosed);
                }
                ChannelOp::Close { promise } => self.close_promises.push(promise),
                ChannelOp::Execute(task) => {
                    task(&mut ChannelContext::new(&self.shared, &mut self.outbox));
                    self.drain_pending();
                }
            }
        }

        for promise in self.close_promises.drain(..) {
            promise.succeed();
        }
        debug!(channel = %self.shared.id(), "channel closed");
    }
}

impl Drop for ChannelActor {
    fn drop(&mut self) {
        if !self.torn_down {
            debug!(channel = %self.shared.id(), "channel task dropped before closing");
            self.teardown();
        }
    }
}
