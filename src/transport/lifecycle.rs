//! 传输生命周期管理器 - 负责就绪、关闭与终止通知
//! Transport lifecycle manager - readiness, shutdown and termination notices
//!
//! 生命周期只会单向推进：Pending -> Ready -> Terminated，或直接 Pending -> Terminated。
//! 首个被记录的关闭状态会一直保留；终止通知恰好送达一次。
//!
//! The lifecycle only moves forward: Pending -> Ready -> Terminated, or
//! straight from Pending to Terminated. The first recorded shutdown status is
//! kept for good, and termination is delivered exactly once.

use super::identity::LogId;
use crate::status::Status;
use std::{
    fmt,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU8, Ordering},
    },
};
use tracing::{debug, info};

const PENDING: u8 = 0;
const READY: u8 = 1;
const TERMINATED: u8 = 2;

/// 接收传输生命周期通知的监听器
/// Receives lifecycle notifications for a transport.
pub trait TransportListener: Send + Sync + 'static {
    /// 传输已可以承载流
    /// The transport can carry streams.
    fn on_ready(&self);

    /// 传输不再接受新流
    /// The transport stopped accepting new streams.
    fn on_shutdown(&self, _status: &Status) {}

    /// 传输已彻底结束，这是最后一个通知
    /// The transport is gone. This is the last notification.
    fn on_terminated(&self, status: Status);
}

/// 生命周期所处的阶段
/// Where the lifecycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Pending,
    Ready,
    Terminated,
}

impl LifecycleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            PENDING => LifecycleState::Pending,
            READY => LifecycleState::Ready,
            _ => LifecycleState::Terminated,
        }
    }
}

/// 将传输的生命周期事件转发给监听器，并去除重复通知
/// Forwards lifecycle events to the listener, dropping duplicates.
///
/// 所有方法都可以从任意线程调用。
/// Every method can be called from any thread.
pub struct LifecycleManager {
    log_id: LogId,
    listener: Arc<dyn TransportListener>,
    state: AtomicU8,
    shutdown_status: OnceLock<Status>,
}

impl LifecycleManager {
    pub fn new(log_id: LogId, listener: Arc<dyn TransportListener>) -> Self {
        Self {
            log_id,
            listener,
            state: AtomicU8::new(PENDING),
            shutdown_status: OnceLock::new(),
        }
    }

    /// 通知监听器传输已就绪。仅在 Pending 状态下生效。
    /// Tells the listener the transport is ready. Only takes effect from Pending.
    pub fn notify_ready(&self) -> bool {
        if self
            .state
            .compare_exchange(PENDING, READY, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        debug!(transport = %self.log_id, "transport ready");
        self.listener.on_ready();
        true
    }

    /// 记录关闭状态并通知监听器。只有第一次调用生效。
    /// Records the shutdown status and tells the listener. Only the first call
    /// has any effect.
    pub fn notify_shutdown(&self, status: Status) -> bool {
        if self.shutdown_status.set(status).is_err() {
            return false;
        }
        if let Some(status) = self.shutdown_status.get() {
            info!(transport = %self.log_id, %status, "transport shutting down");
            self.listener.on_shutdown(status);
        }
        true
    }

    /// 终止传输。首次调用会在需要时记录关闭状态，然后通知监听器终止；
    /// 之后的调用只会被记录日志。
    ///
    /// Terminates the transport. The first call records `status` as the
    /// shutdown status if none exists yet, then reports termination. Later
    /// calls are only logged.
    ///
    /// `detail` names the step that failed and is appended to the status.
    /// `detail` 指明失败的步骤，会被附加到状态描述中。
    pub fn notify_terminated(&self, detail: Option<&str>, status: Status) -> bool {
        let previous = self.state.swap(TERMINATED, Ordering::AcqRel);
        if previous == TERMINATED {
            debug!(
                transport = %self.log_id,
                detail = detail.unwrap_or(""),
                %status,
                "transport already terminated; ignoring"
            );
            return false;
        }
        let status = match detail {
            Some(detail) => status.augment_description(detail),
            None => status,
        };
        self.notify_shutdown(status.clone());
        info!(transport = %self.log_id, %status, "transport terminated");
        self.listener.on_terminated(status);
        true
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// 首个被记录的关闭状态
    /// The first shutdown status recorded, if any.
    pub fn shutdown_status(&self) -> Option<&Status> {
        self.shutdown_status.get()
    }
}

impl fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("log_id", &self.log_id)
            .field("state", &self.state())
            .field("shutdown_status", &self.shutdown_status.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Code;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl TransportListener for Recorder {
        fn on_ready(&self) {
            self.events.lock().unwrap().push("ready".into());
        }

        fn on_shutdown(&self, status: &Status) {
            self.events.lock().unwrap().push(format!("shutdown:{}", status.code()));
        }

        fn on_terminated(&self, status: Status) {
            self.events.lock().unwrap().push(format!("terminated:{}", status.code()));
        }
    }

    fn manager() -> (Arc<Recorder>, LifecycleManager) {
        let recorder = Arc::new(Recorder::default());
        let manager = LifecycleManager::new(LogId::allocate("test"), recorder.clone());
        (recorder, manager)
    }

    #[test]
    fn test_termination_is_delivered_once() {
        let (recorder, manager) = manager();
        assert!(manager.notify_terminated(Some("connect"), Status::unavailable("refused")));
        assert!(!manager.notify_terminated(None, Status::internal("later")));

        assert_eq!(manager.state(), LifecycleState::Terminated);
        assert_eq!(
            recorder.events(),
            vec!["shutdown:UNAVAILABLE", "terminated:UNAVAILABLE"]
        );
    }

    #[test]
    fn test_first_shutdown_status_wins() {
        let (recorder, manager) = manager();
        assert!(manager.notify_shutdown(Status::cancelled("first")));
        assert!(!manager.notify_shutdown(Status::internal("second")));
        manager.notify_terminated(None, Status::unavailable("third"));

        assert_eq!(manager.shutdown_status().unwrap().description(), Some("first"));
        assert_eq!(
            recorder.events(),
            vec!["shutdown:CANCELLED", "terminated:UNAVAILABLE"]
        );
    }

    #[test]
    fn test_detail_is_appended_to_terminal_status() {
        let (_recorder, manager) = manager();
        manager.notify_terminated(Some("register"), Status::unavailable("io exception"));
        let status = manager.shutdown_status().unwrap();
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(status.description(), Some("io exception\nregister"));
    }

    #[test]
    fn test_ready_only_from_pending() {
        let (recorder, manager) = manager();
        assert!(manager.notify_ready());
        assert!(!manager.notify_ready());
        manager.notify_terminated(None, Status::unavailable("gone"));
        assert!(!manager.notify_ready());
        assert_eq!(recorder.events().iter().filter(|e| *e == "ready").count(), 1);
    }

    #[test]
    fn test_concurrent_termination_reports_once() {
        let (recorder, manager) = manager();
        let manager = Arc::new(manager);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let manager = manager.clone();
                std::thread::spawn(move || manager.notify_terminated(None, Status::unavailable(format!("t{i}"))))
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
        let terminated = recorder
            .events()
            .iter()
            .filter(|e| e.starts_with("terminated"))
            .count();
        assert_eq!(terminated, 1);
    }
}
