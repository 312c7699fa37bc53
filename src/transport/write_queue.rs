//! Thread-safe queue of writes bound for the channel.
//!
//! Callers on any thread enqueue commands; the queue hops onto the channel
//! task and writes them in batches, in submission order. An entry marked
//! `jump` goes ahead of everything queued normally.
//!
//! 发往通道的线程安全写队列。任意线程上的调用方都可以入队命令；队列切换到通道任务上，
//! 按提交顺序批量写出。标记为 `jump` 的条目会排在所有普通条目之前。

use crate::channel::{
    Channel, ChannelContext, ChannelFuture, Promise, Task,
    future,
};
use super::command::Command;
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard, OnceLock, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::{debug, trace};

/// How many entries one flush writes before yielding the channel task.
/// 一次刷写在让出通道任务前最多写出的条目数。
const MAX_FLUSH_BATCH: usize = 128;

enum Entry {
    Command(Command),
    Task(Task),
}

#[derive(Default)]
struct Lanes {
    urgent: VecDeque<(Entry, Promise)>,
    normal: VecDeque<(Entry, Promise)>,
}

impl Lanes {
    /// Pops the next entry, also reporting whether it came from the urgent lane.
    fn pop(&mut self) -> Option<(Entry, Promise, bool)> {
        if let Some((entry, promise)) = self.urgent.pop_front() {
            return Some((entry, promise, true));
        }
        self.normal
            .pop_front()
            .map(|(entry, promise)| (entry, promise, false))
    }

    fn push_front(&mut self, urgent: bool, entry: Entry, promise: Promise) {
        if urgent {
            self.urgent.push_front((entry, promise));
        } else {
            self.normal.push_front((entry, promise));
        }
    }

    fn is_empty(&self) -> bool {
        self.urgent.is_empty() && self.normal.is_empty()
    }
}

struct Inner {
    lanes: Mutex<Lanes>,
    channel: OnceLock<Channel>,
    scheduled: AtomicBool,
}

impl Inner {
    fn lanes(&self) -> MutexGuard<'_, Lanes> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A cloneable handle to the queue.
/// 队列的可克隆句柄。
#[derive(Clone)]
pub struct WriteQueue {
    inner: Arc<Inner>,
}

impl Default for WriteQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteQueue {
    /// Creates a queue that holds writes until [`start`](Self::start) binds it
    /// to a channel.
    ///
    /// 创建一个队列，在 [`start`](Self::start) 将其绑定到通道之前暂存写入。
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                lanes: Mutex::new(Lanes::default()),
                channel: OnceLock::new(),
                scheduled: AtomicBool::new(false),
            }),
        }
    }

    /// Binds the queue to `channel` and flushes anything queued so far. Only
    /// the first call has an effect.
    ///
    /// 将队列绑定到 `channel`，并刷出目前已排队的内容。只有第一次调用生效。
    pub fn start(&self, channel: Channel) {
        if self.inner.channel.set(channel).is_err() {
            debug!("write queue already bound to a channel");
            return;
        }
        self.schedule_flush();
    }

    /// Queues a command. The future completes once the channel's handler has
    /// dealt with it, or fails if it never reaches the handler.
    ///
    /// 将命令入队。通道处理器处理完毕后 future 完成；若命令始终未到达处理器则失败。
    pub fn enqueue(&self, command: Command, jump: bool) -> ChannelFuture {
        self.push(Entry::Command(command), jump)
    }

    /// Queues work to run on the channel task in order with the commands.
    /// 将一段工作入队，使其在通道任务上与命令按序执行。
    pub fn enqueue_task(&self, task: Task, jump: bool) -> ChannelFuture {
        self.push(Entry::Task(task), jump)
    }

    fn push(&self, entry: Entry, jump: bool) -> ChannelFuture {
        let (promise, future) = future::promise();
        {
            let mut lanes = self.inner.lanes();
            if jump {
                lanes.urgent.push_back((entry, promise));
            } else {
                lanes.normal.push_back((entry, promise));
            }
        }
        self.schedule_flush();
        future
    }

    fn schedule_flush(&self) {
        let Some(channel) = self.inner.channel.get() else {
            return;
        };
        if self.inner.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = self.inner.clone();
        let task: Task = Box::new(move |ctx: &mut ChannelContext<'_>| Self::flush(&inner, ctx));
        if channel.execute(task).is_err() {
            // Nothing will ever run on this channel again.
            // 此通道上再也不会运行任何东西。
            self.inner.scheduled.store(false, Ordering::Release);
            let drained: Vec<_> = {
                let mut guard = self.inner.lanes();
                let lanes = &mut *guard;
                lanes.urgent.drain(..).chain(lanes.normal.drain(..)).collect()
            };
            trace!(dropped = drained.len(), "channel gone; failing queued writes");
            // Dropping the promises fails their futures.
            drop(drained);
        }
    }

    fn flush(inner: &Arc<Inner>, ctx: &mut ChannelContext<'_>) {
        inner.scheduled.store(false, Ordering::Release);
        let mut written = 0;
        let mut commands_written = false;
        while written < MAX_FLUSH_BATCH {
            let Some((entry, promise, urgent)) = inner.lanes().pop() else {
                return;
            };
            match entry {
                Entry::Command(command) => {
                    ctx.write_with_promise(command, promise);
                    commands_written = true;
                }
                Entry::Task(task) if commands_written => {
                    // The handler has to see the commands written so far
                    // before the task runs; finish this batch here.
                    // 任务运行前，处理器必须先处理完目前已写入的命令；在此结束本批次。
                    inner.lanes().push_front(urgent, Entry::Task(task), promise);
                    break;
                }
                Entry::Task(task) => {
                    task(ctx);
                    promise.succeed();
                }
            }
            written += 1;
        }
        if !inner.lanes().is_empty() {
            WriteQueue {
                inner: inner.clone(),
            }
            .schedule_flush();
        }
    }
}
