//! Keepalive for a client transport.
//!
//! The manager decides when to ping. This module connects it to the
//! transport: its pings go through the transport's ping path, and a failed or
//! unanswered ping shuts the transport down immediately.
//!
//! 客户端传输的保活。管理器决定何时发送 ping；本模块把它接到传输上：ping 走传输的
//! ping 路径，ping 失败或无应答时立即关闭传输。

pub mod manager;

pub use manager::{KeepAliveManager, KeepAlivePinger, KeepAliveSettings};

use super::{client::Inner, ping::PingCallback};
use crate::{channel::EventLoop, config::KeepAliveConfig, status::Status};
use std::{
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::runtime::Handle;
use tracing::warn;

/// Binds a [`KeepAliveManager`] to a transport.
/// 将 [`KeepAliveManager`] 绑定到一个传输。
#[derive(Debug)]
pub struct KeepAliveAdapter {
    manager: KeepAliveManager,
}

impl KeepAliveAdapter {
    pub(crate) fn new(transport: Weak<Inner>, event_loop: &EventLoop, config: &KeepAliveConfig, time: Duration) -> Self {
        let pinger = Arc::new(TransportPinger {
            transport,
            failure_status: config.failure_status.clone(),
            executor: event_loop.handle().clone(),
        });
        let settings = KeepAliveSettings {
            time,
            timeout: config.timeout,
            without_calls: config.without_calls,
        };
        Self {
            manager: KeepAliveManager::new(pinger, event_loop, settings),
        }
    }

    pub fn on_transport_started(&self) {
        self.manager.on_transport_started();
    }

    pub(crate) fn on_transport_active(&self) {
        self.manager.on_transport_active();
    }

    pub(crate) fn on_transport_idle(&self) {
        self.manager.on_transport_idle();
    }

    pub(crate) fn on_data_received(&self) {
        self.manager.on_data_received();
    }

    pub(crate) fn on_transport_termination(&self) {
        self.manager.on_transport_termination();
    }
}

struct TransportPinger {
    transport: Weak<Inner>,
    failure_status: Status,
    executor: Handle,
}

impl KeepAlivePinger for TransportPinger {
    fn ping(&self) {
        let Some(transport) = self.transport.upgrade() else {
            return;
        };
        let callback = Arc::new(ShutdownOnFailure {
            transport: self.transport.clone(),
            failure_status: self.failure_status.clone(),
        });
        transport.ping(callback, self.executor.clone());
    }

    fn on_ping_timeout(&self) {
        if let Some(transport) = self.transport.upgrade() {
            warn!(transport = %transport.log_id(), "keepalive ping timed out; closing transport");
            transport.shutdown_now(self.failure_status.clone());
        }
    }
}

struct ShutdownOnFailure {
    transport: Weak<Inner>,
    failure_status: Status,
}

impl PingCallback for ShutdownOnFailure {
    fn on_success(&self, _round_trip: Duration) {}

    fn on_failure(&self, status: Status) {
        if let Some(transport) = self.transport.upgrade() {
            warn!(transport = %transport.log_id(), %status, "keepalive ping failed; closing transport");
            transport.shutdown_now(self.failure_status.clone());
        }
    }
}
