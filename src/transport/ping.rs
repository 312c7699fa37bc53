//! Round-trip pings.
//!
//! 往返 ping。

use crate::status::Status;
use std::{sync::Arc, time::Duration};
use tokio::{runtime::Handle, time::Instant};
use tracing::trace;

/// Receives the outcome of a ping. Called on the executor supplied with the
/// ping, never on the connection's own task.
///
/// 接收 ping 的结果。在发起 ping 时提供的执行器上调用，而不是连接自身的任务上。
pub trait PingCallback: Send + Sync + 'static {
    fn on_success(&self, round_trip: Duration);
    fn on_failure(&self, status: Status);
}

/// A PING in flight. Callers that ping while one is outstanding share its
/// outcome.
///
/// 一个在途的 PING。在其未完成时发起 ping 的调用方共享它的结果。
pub(crate) struct Http2Ping {
    payload: u64,
    started: Instant,
    callbacks: Vec<(Arc<dyn PingCallback>, Handle)>,
}

impl Http2Ping {
    pub(crate) fn new(payload: u64) -> Self {
        Self {
            payload,
            started: Instant::now(),
            callbacks: Vec::new(),
        }
    }

    pub(crate) fn payload(&self) -> u64 {
        self.payload
    }

    pub(crate) fn add_callback(&mut self, callback: Arc<dyn PingCallback>, executor: Handle) {
        self.callbacks.push((callback, executor));
    }

    /// Delivers the round-trip time to every waiting callback.
    /// 将往返时间交付给所有等待中的回调。
    pub(crate) fn complete(self) -> Duration {
        let round_trip = self.started.elapsed();
        trace!(payload = self.payload, ?round_trip, callbacks = self.callbacks.len(), "ping acknowledged");
        for (callback, executor) in self.callbacks {
            executor.spawn(async move { callback.on_success(round_trip) });
        }
        round_trip
    }

    pub(crate) fn fail(self, status: Status) {
        for (callback, executor) in self.callbacks {
            Self::notify_failed(callback, &executor, status.clone());
        }
    }

    /// Fails a single callback without a ping ever being sent.
    /// 在从未发送 ping 的情况下使单个回调失败。
    pub(crate) fn notify_failed(callback: Arc<dyn PingCallback>, executor: &Handle, status: Status) {
        executor.spawn(async move { callback.on_failure(status) });
    }
}
