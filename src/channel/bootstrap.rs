//! Assembles and registers channels.
//! 组装并注册通道。

use super::{
    Channel, ChannelShared, EventLoop,
    actor::ChannelActor,
    connector::{Connector, TcpConnector},
    future::{self, ChannelFuture},
    handler::ChannelHandler,
};
use crate::{
    config::{ChannelConfig, ChannelKind, ChannelOptions},
    error::Error,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// The outcome of [`Bootstrap::register`].
/// [`Bootstrap::register`] 的结果。
pub enum Registration {
    /// The channel exists. `future` completes once the channel task is
    /// running on its event loop, and fails if it never gets there.
    ///
    /// 通道已存在。`future` 在通道任务于事件循环上运行后完成；若始终未能运行则失败。
    Registered {
        channel: Channel,
        future: ChannelFuture,
    },
    /// No channel could be created.
    /// 无法创建通道。
    Failed(Error),
}

/// Builder for a single channel.
/// 单个通道的构建器。
pub struct Bootstrap {
    event_loop: EventLoop,
    kind: ChannelKind,
    options: ChannelOptions,
    handler: Option<Box<dyn ChannelHandler>>,
}

impl Bootstrap {
    pub fn new(event_loop: EventLoop, config: &ChannelConfig) -> Self {
        Self {
            event_loop,
            kind: config.kind.clone(),
            options: config.options.clone(),
            handler: None,
        }
    }

    pub fn handler(mut self, handler: Box<dyn ChannelHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Opens the socket and spawns the channel task on the event loop.
    ///
    /// Socket creation and option failures are reported synchronously as
    /// [`Registration::Failed`].
    ///
    /// 打开套接字并在事件循环上启动通道任务。套接字创建与选项失败会以
    /// [`Registration::Failed`] 同步返回。
    pub fn register(self) -> Registration {
        let Some(handler) = self.handler else {
            return Registration::Failed(Error::Protocol("channel registered without a handler".into()));
        };
        let connector: Arc<dyn Connector> = match &self.kind {
            ChannelKind::Tcp => Arc::new(TcpConnector),
            #[cfg(unix)]
            ChannelKind::Unix => Arc::new(super::connector::UnixConnector),
            ChannelKind::Custom(connector) => connector.clone(),
        };
        let socket = match connector.open(&self.options) {
            Ok(socket) => socket,
            Err(e) => {
                warn!(kind = self.kind.name(), error = %e, "failed to open channel");
                return Registration::Failed(e);
            }
        };

        let shared = Arc::new(ChannelShared::new(self.event_loop.clone()));
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let channel = Channel::new(shared.clone(), ops_tx);
        let (registered, future) = future::promise();
        let actor = ChannelActor::new(
            shared,
            socket,
            handler,
            ops_rx,
            self.options.connect_timeout,
        );
        debug!(channel = %channel.id(), event_loop = self.event_loop.id(), kind = self.kind.name(), "registering channel");
        self.event_loop.spawn(async move {
            registered.succeed();
            actor.run().await;
        });
        Registration::Registered { channel, future }
    }
}
