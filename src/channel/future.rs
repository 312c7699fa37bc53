//! Completion handles for channel operations.
//!
//! A [`Promise`] is completed exactly once by whoever executes the operation,
//! normally the channel task. Its [`ChannelFuture`] can either be awaited or
//! given a listener; a listener attached before completion runs on the thread
//! that completes the promise, so listeners observe completions in the order
//! the channel task produced them. Dropping a promise without completing it
//! fails the future with [`Error::ChannelClosed`].
//!
//! 通道操作的完成句柄。[`Promise`] 由执行操作的一方（通常是通道任务）恰好完成一次。
//! 对应的 [`ChannelFuture`] 可以被 await，也可以挂上监听器；完成前挂上的监听器会在
//! 完成 promise 的线程上运行。未完成就被丢弃的 promise 会以 [`Error::ChannelClosed`]
//! 使 future 失败。

use crate::error::{Error, Result};
use std::{
    future::Future,
    mem,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll, Waker},
};

type Listener = Box<dyn FnOnce(Result<()>) + Send>;

enum State {
    Pending,
    Waiting(Waker),
    Listening(Listener),
    Done(Result<()>),
    Consumed,
}

struct Shared {
    state: Mutex<State>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Creates a connected promise/future pair.
/// 创建一对相互关联的 promise 与 future。
pub fn promise() -> (Promise, ChannelFuture) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::Pending),
    });
    (
        Promise {
            shared: Some(shared.clone()),
        },
        ChannelFuture { shared },
    )
}

/// The completing side of a channel operation.
/// 通道操作的完成端。
pub struct Promise {
    shared: Option<Arc<Shared>>,
}

impl Promise {
    pub fn succeed(mut self) {
        self.complete(Ok(()));
    }

    pub fn fail(mut self, cause: Error) {
        self.complete(Err(cause));
    }

    fn complete(&mut self, result: Result<()>) {
        let Some(shared) = self.shared.take() else {
            return;
        };
        let mut state = shared.lock();
        match mem::replace(&mut *state, State::Consumed) {
            State::Listening(listener) => {
                drop(state);
                listener(result);
            }
            State::Waiting(waker) => {
                *state = State::Done(result);
                drop(state);
                waker.wake();
            }
            State::Pending => *state = State::Done(result),
            // A promise completes once; `shared` was taken above.
            done @ (State::Done(_) | State::Consumed) => *state = done,
        }
    }
}

impl Drop for Promise {
    fn drop(&mut self) {
        self.complete(Err(Error::ChannelClosed));
    }
}

/// The observing side of a channel operation.
/// 通道操作的观察端。
#[must_use = "dropping a ChannelFuture ignores the outcome of the operation"]
pub struct ChannelFuture {
    shared: Arc<Shared>,
}

impl ChannelFuture {
    /// A future that has already failed.
    /// 一个已经失败的 future。
    pub fn failed(cause: Error) -> Self {
        let (promise, future) = promise();
        promise.fail(cause);
        future
    }

    /// Runs `listener` with the outcome. If the operation already finished the
    /// listener runs immediately on the calling thread.
    ///
    /// 以操作结果调用 `listener`。若操作已完成，监听器立即在调用线程上运行。
    pub fn add_listener(self, listener: impl FnOnce(Result<()>) + Send + 'static) {
        let mut state = self.shared.lock();
        match mem::replace(&mut *state, State::Consumed) {
            State::Done(result) => {
                drop(state);
                listener(result);
            }
            _ => *state = State::Listening(Box::new(listener)),
        }
    }

    /// Runs `listener` only if the operation fails.
    /// 仅在操作失败时调用 `listener`。
    pub fn on_failure(self, listener: impl FnOnce(Error) + Send + 'static) {
        self.add_listener(move |result| {
            if let Err(cause) = result {
                listener(cause);
            }
        });
    }
}

impl Future for ChannelFuture {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.lock();
        match mem::replace(&mut *state, State::Consumed) {
            State::Done(result) => Poll::Ready(result),
            State::Consumed => Poll::Ready(Err(Error::ChannelClosed)),
            State::Pending | State::Waiting(_) => {
                *state = State::Waiting(cx.waker().clone());
                Poll::Pending
            }
            listening @ State::Listening(_) => {
                *state = listening;
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[tokio::test]
    async fn awaiting_sees_the_outcome() {
        let (promise, future) = promise();
        tokio::spawn(async move { promise.succeed() });
        assert!(future.await.is_ok());
    }

    #[test]
    fn dropped_promise_fails_with_channel_closed() {
        let (promise, future) = promise();
        let (tx, rx) = mpsc::channel();
        future.on_failure(move |cause| tx.send(cause).unwrap());
        drop(promise);
        assert!(matches!(rx.try_recv().unwrap(), Error::ChannelClosed));
    }

    #[test]
    fn listener_attached_after_completion_runs_immediately() {
        let (promise, future) = promise();
        promise.fail(Error::StreamsBufferedAtClose);
        let (tx, rx) = mpsc::channel();
        future.add_listener(move |result| tx.send(result.is_err()).unwrap());
        assert!(rx.try_recv().unwrap());
    }

    #[test]
    fn success_does_not_reach_failure_listener() {
        let (promise, future) = promise();
        let (tx, rx) = mpsc::channel::<Error>();
        future.on_failure(move |cause| tx.send(cause).unwrap());
        promise.succeed();
        assert!(rx.try_recv().is_err());
    }
}
