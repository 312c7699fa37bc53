//! 保活管理器 - 基于 tokio 任务的保活状态机
//! Keepalive manager - a keepalive state machine running as a tokio task
//!
//! 连接在 `time` 时间内没有收到任何数据时发送 ping；ping 发出后 `timeout` 时间内
//! 仍没有收到任何数据，则判定连接已失效。
//!
//! A ping is sent when nothing has been received for `time`. If nothing at
//! all arrives within `timeout` after the ping, the connection is declared
//! dead.

use crate::channel::EventLoop;
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, trace};

/// 保活管理器用来发送 ping 与报告超时的接口
/// What the keepalive manager uses to ping and to report a dead connection.
pub trait KeepAlivePinger: Send + Sync + 'static {
    fn ping(&self);
    fn on_ping_timeout(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// 没有活跃流，不调度 ping
    /// No active streams; nothing is scheduled.
    Idle,
    PingScheduled,
    /// ping 计划期间收到了数据，到期时需要重新计算
    /// Data arrived while a ping was scheduled; recompute when it fires.
    PingDelayed,
    PingSent,
    IdleAndPingSent,
    Disconnected,
}

#[derive(Debug, Clone, Copy)]
enum Event {
    Started,
    Active,
    Idle,
    DataReceived,
    Terminated,
}

/// 保活参数
/// Keepalive timing.
#[derive(Debug, Clone, Copy)]
pub struct KeepAliveSettings {
    pub time: Duration,
    pub timeout: Duration,
    pub without_calls: bool,
}

/// 保活管理器的句柄。丢弃句柄会停止保活任务。
/// Handle to the keepalive task. Dropping it stops the task.
#[derive(Debug)]
pub struct KeepAliveManager {
    events: mpsc::UnboundedSender<Event>,
}

impl KeepAliveManager {
    /// 在 `event_loop` 上启动保活任务
    /// Spawns the keepalive task on `event_loop`.
    pub fn new(pinger: Arc<dyn KeepAlivePinger>, event_loop: &EventLoop, settings: KeepAliveSettings) -> Self {
        let (events, rx) = mpsc::unbounded_channel();
        let engine = Engine {
            pinger,
            settings,
            state: State::Idle,
            deadline: None,
            last_data: Instant::now(),
        };
        event_loop.spawn(engine.run(rx));
        Self { events }
    }

    pub fn on_transport_started(&self) {
        self.send(Event::Started);
    }

    /// 第一个流被创建
    /// The first stream became active.
    pub fn on_transport_active(&self) {
        self.send(Event::Active);
    }

    /// 最后一个流已结束
    /// The last active stream finished.
    pub fn on_transport_idle(&self) {
        self.send(Event::Idle);
    }

    pub fn on_data_received(&self) {
        self.send(Event::DataReceived);
    }

    pub fn on_transport_termination(&self) {
        self.send(Event::Terminated);
    }

    fn send(&self, event: Event) {
        // The task is gone once the transport terminated.
        let _ = self.events.send(event);
    }
}

struct Engine {
    pinger: Arc<dyn KeepAlivePinger>,
    settings: KeepAliveSettings,
    state: State,
    deadline: Option<Instant>,
    last_data: Instant,
}

impl Engine {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        loop {
            let deadline = self.deadline;
            tokio::select! {
                // Events queued before a deadline must be seen before it fires.
                biased;
                event = events.recv() => match event {
                    Some(Event::Terminated) | None => break,
                    Some(event) => self.on_event(event),
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_deadline();
                }
            }
            if self.state == State::Disconnected {
                break;
            }
        }
        self.state = State::Disconnected;
        debug!("keepalive stopped");
    }

    fn on_event(&mut self, event: Event) {
        trace!(?event, state = ?self.state, "keepalive event");
        match event {
            Event::Started => {
                if self.settings.without_calls {
                    self.on_active();
                }
            }
            Event::Active => self.on_active(),
            Event::Idle => {
                if self.settings.without_calls {
                    return;
                }
                match self.state {
                    State::PingScheduled | State::PingDelayed => {
                        self.state = State::Idle;
                        self.deadline = None;
                    }
                    State::PingSent => self.state = State::IdleAndPingSent,
                    _ => {}
                }
            }
            Event::DataReceived => {
                self.last_data = Instant::now();
                match self.state {
                    State::PingScheduled => self.state = State::PingDelayed,
                    State::PingSent => {
                        self.state = State::PingScheduled;
                        self.deadline = Some(self.last_data + self.settings.time);
                    }
                    State::IdleAndPingSent => {
                        self.state = State::Idle;
                        self.deadline = None;
                    }
                    _ => {}
                }
            }
            // Handled by the run loop.
            Event::Terminated => {}
        }
    }

    fn on_active(&mut self) {
        match self.state {
            State::Idle => {
                self.state = State::PingScheduled;
                self.deadline = Some(self.last_data + self.settings.time);
            }
            State::IdleAndPingSent => self.state = State::PingSent,
            _ => {}
        }
    }

    fn on_deadline(&mut self) {
        match self.state {
            State::PingScheduled => {
                self.state = State::PingSent;
                self.deadline = Some(Instant::now() + self.settings.timeout);
                debug!("sending keepalive ping");
                self.pinger.ping();
            }
            State::PingDelayed => {
                self.state = State::PingScheduled;
                self.deadline = Some(self.last_data + self.settings.time);
            }
            State::PingSent | State::IdleAndPingSent => {
                self.state = State::Disconnected;
                self.deadline = None;
                debug!("keepalive ping timed out");
                self.pinger.on_ping_timeout();
            }
            State::Idle | State::Disconnected => self.deadline = None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::EventLoopGroup;

    #[derive(Debug, PartialEq, Eq)]
    enum Seen {
        Ping,
        Timeout,
    }

    struct RecordingPinger {
        tx: mpsc::UnboundedSender<Seen>,
    }

    impl KeepAlivePinger for RecordingPinger {
        fn ping(&self) {
            let _ = self.tx.send(Seen::Ping);
        }

        fn on_ping_timeout(&self) {
            let _ = self.tx.send(Seen::Timeout);
        }
    }

    fn manager(without_calls: bool) -> (KeepAliveManager, mpsc::UnboundedReceiver<Seen>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let event_loop = EventLoopGroup::current().next().unwrap();
        let manager = KeepAliveManager::new(
            Arc::new(RecordingPinger { tx }),
            &event_loop,
            KeepAliveSettings {
                time: Duration::from_secs(30),
                timeout: Duration::from_secs(10),
                without_calls,
            },
        );
        (manager, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_connection_is_pinged_then_declared_dead() {
        let start = Instant::now();
        let (manager, mut rx) = manager(true);
        manager.on_transport_started();

        assert_eq!(rx.recv().await, Some(Seen::Ping));
        assert!(start.elapsed() >= Duration::from_secs(30));

        assert_eq!(rx.recv().await, Some(Seen::Timeout));
        assert!(start.elapsed() >= Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_after_ping_prevents_timeout() {
        let (manager, mut rx) = manager(true);
        manager.on_transport_started();
        assert_eq!(rx.recv().await, Some(Seen::Ping));

        let acked = Instant::now();
        manager.on_data_received();
        // The next thing that happens is another ping, a full interval later.
        assert_eq!(rx.recv().await, Some(Seen::Ping));
        assert!(acked.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_transport_is_not_pinged_without_calls_disabled() {
        let (manager, mut rx) = manager(false);
        manager.on_transport_started();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());

        manager.on_transport_active();
        manager.on_transport_idle();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());

        manager.on_transport_active();
        assert_eq!(rx.recv().await, Some(Seen::Ping));
    }

    #[tokio::test(start_paused = true)]
    async fn test_termination_stops_the_task() {
        let (manager, mut rx) = manager(true);
        manager.on_transport_started();
        manager.on_transport_termination();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());
    }
}
