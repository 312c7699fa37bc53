//! Event loops and the pool they are drawn from.
//!
//! An event loop is a single-threaded tokio runtime. A channel is pinned to
//! the loop it was registered on, so everything that touches the channel runs
//! on one thread.
//!
//! 事件循环及其所在的池。一个事件循环就是一个单线程 tokio 运行时。通道固定在它注册时
//! 的事件循环上，因此所有涉及该通道的操作都运行在同一线程上。

use crate::error::{Error, Result};
use std::{
    fmt,
    future::Future,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
};
use tokio::{runtime, sync::oneshot, task::JoinHandle};
use tracing::{debug, info};

/// One loop of an [`EventLoopGroup`].
/// [`EventLoopGroup`] 中的一个事件循环。
#[derive(Clone)]
pub struct EventLoop {
    id: usize,
    handle: runtime::Handle,
}

impl EventLoop {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn handle(&self) -> &runtime::Handle {
        &self.handle
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop").field("id", &self.id).finish()
    }
}

struct GroupInner {
    loops: Vec<EventLoop>,
    next: AtomicUsize,
    shut_down: AtomicBool,
    stoppers: Mutex<Vec<oneshot::Sender<()>>>,
}

/// A pool of event loops handed out round-robin. Clones share the pool.
/// 以轮询方式分配的事件循环池。克隆体共享同一个池。
#[derive(Clone)]
pub struct EventLoopGroup {
    inner: Arc<GroupInner>,
}

impl EventLoopGroup {
    /// Starts `threads` dedicated loop threads.
    /// 启动 `threads` 个专用的事件循环线程。
    pub fn new(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let mut loops = Vec::with_capacity(threads);
        let mut stoppers = Vec::with_capacity(threads);
        for id in 0..threads {
            let rt = runtime::Builder::new_current_thread().enable_all().build()?;
            let handle = rt.handle().clone();
            let (stop_tx, stop_rx) = oneshot::channel::<()>();
            thread::Builder::new()
                .name(format!("kestrel-event-loop-{id}"))
                .spawn(move || {
                    rt.block_on(async {
                        let _ = stop_rx.await;
                    });
                    debug!(event_loop = id, "event loop stopped");
                })?;
            loops.push(EventLoop { id, handle });
            stoppers.push(stop_tx);
        }
        info!(threads, "event loop group started");
        Ok(Self::from_parts(loops, stoppers))
    }

    /// A single-loop group backed by an existing runtime, which the caller
    /// keeps ownership of.
    ///
    /// 由现有运行时支撑的单循环组，运行时仍归调用方所有。
    pub fn from_handle(handle: runtime::Handle) -> Self {
        Self::from_parts(vec![EventLoop { id: 0, handle }], Vec::new())
    }

    /// A group on the runtime the caller is running in.
    /// 使用调用方当前所在运行时的事件循环组。
    pub fn current() -> Self {
        Self::from_handle(runtime::Handle::current())
    }

    fn from_parts(loops: Vec<EventLoop>, stoppers: Vec<oneshot::Sender<()>>) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                loops,
                next: AtomicUsize::new(0),
                shut_down: AtomicBool::new(false),
                stoppers: Mutex::new(stoppers),
            }),
        }
    }

    /// Picks the next loop.
    /// 选取下一个事件循环。
    pub fn next(&self) -> Result<EventLoop> {
        if self.is_shut_down() {
            return Err(Error::EventLoopShutdown);
        }
        let index = self.inner.next.fetch_add(1, Ordering::Relaxed) % self.inner.loops.len();
        Ok(self.inner.loops[index].clone())
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Stops handing out loops and stops the threads this group owns. Channels
    /// still open on those loops are torn down as their tasks are dropped, so
    /// their handlers still see the channel go inactive.
    ///
    /// 停止分配事件循环，并停止本组拥有的线程。这些循环上仍打开的通道会在其任务被丢弃时
    /// 拆除，因此处理器仍会收到通道失活的通知。
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let stoppers = std::mem::take(
            &mut *self
                .inner
                .stoppers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for stop in stoppers {
            let _ = stop.send(());
        }
        info!("event loop group shut down");
    }
}

impl fmt::Debug for EventLoopGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoopGroup")
            .field("loops", &self.inner.loops.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loops_are_handed_out_round_robin() {
        let group = EventLoopGroup::new(3).unwrap();
        let ids: Vec<_> = (0..6).map(|_| group.next().unwrap().id()).collect();
        assert_eq!(ids, vec![0, 1, 2, 0, 1, 2]);
        group.shutdown();
    }

    #[test]
    fn shut_down_group_refuses_new_channels() {
        let group = EventLoopGroup::new(1).unwrap();
        group.shutdown();
        assert!(matches!(group.next(), Err(Error::EventLoopShutdown)));
    }

    #[test]
    fn dedicated_loops_run_tasks() {
        let group = EventLoopGroup::new(1).unwrap();
        let event_loop = group.next().unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        event_loop.spawn(async move {
            tx.send(thread::current().name().map(str::to_owned)).unwrap();
        });
        let name = rx.recv().unwrap();
        assert_eq!(name.as_deref(), Some("kestrel-event-loop-0"));
        group.shutdown();
    }
}
