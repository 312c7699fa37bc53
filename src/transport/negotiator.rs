//! Protocol negotiation: what happens on a fresh channel before the
//! connection handler takes over.
//!
//! 协议协商：在连接处理器接管之前，新通道上要做的事情。

use super::command::Command;
use crate::{
    channel::{ChannelContext, ChannelHandler, Promise},
    error::{Error, Result},
};
use bytes::BytesMut;
use std::{collections::VecDeque, fmt};
use tracing::trace;

/// The URI scheme a negotiator speaks.
/// 协商器所使用的 URI scheme。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wraps the connection handler with whatever a channel needs before it can
/// carry the protocol.
///
/// 为连接处理器包装一层，用于完成通道承载协议之前所需的步骤。
pub trait ProtocolNegotiator: Send + Sync + 'static {
    fn scheme(&self) -> Scheme;

    fn new_handler(&self, inner: Box<dyn ChannelHandler>) -> Box<dyn ChannelHandler>;
}

/// Speaks the protocol in the clear. Writes are held until the connection is
/// established.
///
/// 明文协议。写入会被暂存，直到连接建立。
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaintextNegotiator;

impl ProtocolNegotiator for PlaintextNegotiator {
    fn scheme(&self) -> Scheme {
        Scheme::Http
    }

    fn new_handler(&self, inner: Box<dyn ChannelHandler>) -> Box<dyn ChannelHandler> {
        Box::new(BufferUntilActive {
            inner,
            active: false,
            buffered: VecDeque::new(),
        })
    }
}

/// Holds writes until the channel is active, then replays them in order.
/// 在通道激活之前暂存写入，激活后按顺序重放。
pub(crate) struct BufferUntilActive {
    inner: Box<dyn ChannelHandler>,
    active: bool,
    buffered: VecDeque<(Command, Promise)>,
}

impl ChannelHandler for BufferUntilActive {
    fn channel_active(&mut self, ctx: &mut ChannelContext<'_>) {
        self.active = true;
        self.inner.channel_active(ctx);
        trace!(channel = %ctx.id(), replayed = self.buffered.len(), "negotiation complete");
        for (command, promise) in self.buffered.drain(..) {
            self.inner.write(ctx, command, promise);
        }
    }

    fn channel_read(&mut self, ctx: &mut ChannelContext<'_>, buf: &mut BytesMut) -> Result<()> {
        self.inner.channel_read(ctx, buf)
    }

    fn write(&mut self, ctx: &mut ChannelContext<'_>, command: Command, promise: Promise) {
        if self.active {
            self.inner.write(ctx, command, promise);
        } else {
            self.buffered.push_back((command, promise));
        }
    }

    fn channel_inactive(&mut self, ctx: &mut ChannelContext<'_>) {
        for (_, promise) in self.buffered.drain(..) {
            promise.fail(Error::ChannelClosed);
        }
        self.inner.channel_inactive(ctx);
    }
}
