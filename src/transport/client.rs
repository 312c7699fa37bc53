//! 客户端传输 - 一条到服务器的连接
//! Client transport - one connection to a server
//!
//! 传输在 `start` 时注册通道并开始连接。之后所有对通道的操作都经由写队列在通道任务上执行；
//! 通道句柄只发布一次，发布后对任何线程都可见。
//!
//! `start` registers the channel and begins connecting. From then on every
//! operation on the channel goes through the write queue and runs on the
//! channel task. The channel handle is published once and is visible to all
//! threads afterwards.

use super::{
    command::Command,
    handler::{ClientHandler, TooManyPingsHook},
    identity::{Attributes, LogId},
    keepalive::KeepAliveAdapter,
    lifecycle::{LifecycleManager, TransportListener},
    negotiator::{PlaintextNegotiator, ProtocolNegotiator, Scheme},
    ping::{Http2Ping, PingCallback},
    stream::{ClientStream, StreamState},
    translate::status_from_failure,
    write_queue::WriteQueue,
};
use crate::{
    channel::{Address, Bootstrap, Channel, ChannelContext, EventLoopGroup, Registration},
    config::Config,
    error::{Error, Result},
    metadata::{CallOptions, Metadata, MethodDescriptor},
    status::Status,
};
use std::{
    fmt,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::runtime::Handle;
use tracing::{debug, info, info_span, warn};

/// 构建 [`ClientTransport`]
/// Builds a [`ClientTransport`].
pub struct ClientTransportBuilder {
    address: Address,
    group: EventLoopGroup,
    config: Config,
    negotiator: Arc<dyn ProtocolNegotiator>,
    too_many_pings: TooManyPingsHook,
}

impl ClientTransportBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn negotiator(mut self, negotiator: Arc<dyn ProtocolNegotiator>) -> Self {
        self.negotiator = negotiator;
        self
    }

    /// 服务器以 "too_many_pings" 拒绝 ping 时运行的回调
    /// Runs when the server rejects pings as "too_many_pings".
    pub fn on_too_many_pings(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.too_many_pings = Arc::new(hook);
        self
    }

    pub fn build(self) -> ClientTransport {
        ClientTransport {
            inner: Arc::new(Inner {
                log_id: LogId::allocate("ClientTransport"),
                address: self.address,
                group: self.group,
                config: self.config,
                negotiator: self.negotiator,
                too_many_pings: self.too_many_pings,
                started: AtomicBool::new(false),
                session: OnceLock::new(),
                channel: OnceLock::new(),
            }),
        }
    }
}

/// 在 `start` 时创建的状态
/// State created by `start`.
struct Session {
    lifecycle: Arc<LifecycleManager>,
    write_queue: WriteQueue,
    scheme: Scheme,
    keepalive: Option<Arc<KeepAliveAdapter>>,
}

/// 发布给所有线程的通道句柄：要么是存活的通道，要么是注册失败时记录的状态
/// The channel as published to all threads: either a live channel, or the
/// status recorded when registration failed.
enum ChannelSlot {
    Live(Channel),
    Absent(Status),
}

pub(crate) struct Inner {
    log_id: LogId,
    address: Address,
    group: EventLoopGroup,
    config: Config,
    negotiator: Arc<dyn ProtocolNegotiator>,
    too_many_pings: TooManyPingsHook,
    started: AtomicBool,
    session: OnceLock<Session>,
    channel: OnceLock<ChannelSlot>,
}

/// 需要在 `start` 返回后报告的终止。通道无法注册时返回；运行它会通知监听器传输已终止。
///
/// Termination that has to be reported after `start` returns.
///
/// Returned when the channel could not be registered. Running it tells the
/// listener the transport terminated.
#[must_use = "the listener only learns about the failed start when this runs"]
pub struct PendingTermination {
    lifecycle: Arc<LifecycleManager>,
    status: Status,
}

impl PendingTermination {
    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn run(self) {
        self.lifecycle.notify_terminated(None, self.status);
    }
}

impl fmt::Debug for PendingTermination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTermination")
            .field("status", &self.status)
            .finish()
    }
}

/// 一条到服务器的客户端连接。克隆体共享同一条连接。
/// A client connection to one server. Clones share the connection.
#[derive(Clone)]
pub struct ClientTransport {
    inner: Arc<Inner>,
}

impl ClientTransport {
    pub fn builder(address: impl Into<Address>, group: EventLoopGroup) -> ClientTransportBuilder {
        ClientTransportBuilder {
            address: address.into(),
            group,
            config: Config::default(),
            negotiator: Arc::new(PlaintextNegotiator),
            too_many_pings: Arc::new(|| {}),
        }
    }

    /// 启动传输：注册通道并开始连接。
    ///
    /// 若无法注册通道，返回 `Some(PendingTermination)`，调用方应在之后运行它。
    ///
    /// Starts the transport: registers the channel and starts connecting.
    ///
    /// If no channel could be registered, returns a [`PendingTermination`]
    /// for the caller to run afterwards; the listener is not called from
    /// inside `start`.
    pub fn start(&self, listener: Arc<dyn TransportListener>) -> Result<Option<PendingTermination>> {
        self.inner.start(&self.inner, listener)
    }

    /// 创建一个新流。在调用其 `start` 之前不会发送任何内容。
    /// Creates a stream. Nothing is sent until the stream is started.
    pub fn new_stream(&self, method: MethodDescriptor, headers: Metadata, options: CallOptions) -> ClientStream {
        self.inner.new_stream(method, headers, options)
    }

    /// 发送 ping。`callback` 在 `executor` 上被调用。
    /// Sends a ping. `callback` is invoked on `executor`.
    pub fn ping(&self, callback: Arc<dyn PingCallback>, executor: Handle) {
        self.inner.ping(callback, executor);
    }

    /// 优雅关闭：不再接受新流，现有流结束后关闭连接。
    /// Graceful shutdown: no new streams, close once existing streams finish.
    pub fn shutdown(&self, reason: Status) {
        self.inner.shutdown(reason);
    }

    /// 立即关闭：所有流以 `reason` 结束。
    /// Immediate shutdown: every stream ends with `reason`.
    pub fn shutdown_now(&self, reason: Status) {
        self.inner.shutdown_now(reason);
    }

    pub fn log_id(&self) -> LogId {
        self.inner.log_id
    }

    pub fn address(&self) -> &Address {
        &self.inner.address
    }

    /// 启动后可用的属性：scheme 与远端地址
    /// Available after start: the scheme and the remote address.
    pub fn attributes(&self) -> Attributes {
        let mut attributes = Attributes::default();
        if let Some(session) = self.inner.session.get() {
            attributes.insert(Attributes::SCHEME, session.scheme.as_str());
            attributes.insert(Attributes::REMOTE_ADDRESS, self.inner.address.to_string());
        }
        attributes
    }

    /// 已发布的通道。
    /// The channel, once published.
    pub fn channel(&self) -> Option<Channel> {
        match self.inner.channel.get() {
            Some(ChannelSlot::Live(channel)) => Some(channel.clone()),
            _ => None,
        }
    }

    pub fn keepalive(&self) -> Option<Arc<KeepAliveAdapter>> {
        self.inner.session.get().and_then(|session| session.keepalive.clone())
    }
}

impl fmt::Display for ClientTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.inner.log_id, self.inner.address)
    }
}

impl fmt::Debug for ClientTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientTransport")
            .field("log_id", &self.inner.log_id)
            .field("address", &self.inner.address)
            .field("channel", &self.channel())
            .finish()
    }
}

/// 将写入失败转换为终止通知的监听器
/// A failure listener that terminates the transport.
fn terminate_on_failure(lifecycle: Arc<LifecycleManager>, detail: &'static str) -> impl FnOnce(Error) + Send + 'static {
    move |cause| {
        let status = status_from_failure(cause, &lifecycle);
        lifecycle.notify_terminated(Some(detail), status);
    }
}

impl Inner {
    pub(crate) fn log_id(&self) -> LogId {
        self.log_id
    }

    fn start(&self, this: &Arc<Inner>, listener: Arc<dyn TransportListener>) -> Result<Option<PendingTermination>> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyStarted);
        }
        let lifecycle = Arc::new(LifecycleManager::new(self.log_id, listener));
        let event_loop = self.group.next();
        let keepalive = match (&event_loop, self.config.keepalive.time) {
            (Ok(event_loop), Some(time)) => Some(Arc::new(KeepAliveAdapter::new(
                Arc::downgrade(this),
                event_loop,
                &self.config.keepalive,
                time,
            ))),
            _ => None,
        };
        let handler = ClientHandler::new(
            self.log_id,
            lifecycle.clone(),
            keepalive.clone(),
            &self.config.connection,
            self.too_many_pings.clone(),
        );
        let handler = self.negotiator.new_handler(Box::new(handler));

        let write_queue = WriteQueue::new();
        // `started` guarantees this is the only writer.
        let _ = self.session.set(Session {
            lifecycle: lifecycle.clone(),
            write_queue: write_queue.clone(),
            scheme: self.negotiator.scheme(),
            keepalive: keepalive.clone(),
        });

        let registration = match event_loop {
            Ok(event_loop) => Bootstrap::new(event_loop, &self.config.channel)
                .handler(handler)
                .register(),
            Err(cause) => Registration::Failed(cause),
        };

        match registration {
            Registration::Failed(cause) => {
                let status = Status::from_error(cause);
                warn!(transport = %self.log_id, address = %self.address, %status, "channel registration failed");
                let _ = self.channel.set(ChannelSlot::Absent(status.clone()));
                Ok(Some(PendingTermination { lifecycle, status }))
            }
            Registration::Registered { channel, future } => {
                let _ = self.channel.set(ChannelSlot::Live(channel.clone()));
                future.on_failure(terminate_on_failure(lifecycle.clone(), "register"));

                channel
                    .write(Command::Noop)
                    .on_failure(terminate_on_failure(lifecycle.clone(), "noop write"));
                info!(transport = %self.log_id, address = %self.address, channel = %channel.id(), "transport starting");
                channel
                    .connect(self.address.clone())
                    .on_failure(terminate_on_failure(lifecycle, "connect"));
                write_queue.start(channel);

                if let Some(keepalive) = &keepalive {
                    keepalive.on_transport_started();
                }
                Ok(None)
            }
        }
    }

    /// 已发布的通道与会话，或调用方应以之失败的状态。
    ///
    /// The published channel and the session, or the status callers should
    /// fail with.
    fn live(&self) -> std::result::Result<(&Channel, &Session), Status> {
        let not_started = || Status::from_error(Error::NotStarted);
        match self.channel.get() {
            None => Err(not_started()),
            Some(ChannelSlot::Absent(status)) => Err(status.clone()),
            Some(ChannelSlot::Live(channel)) => {
                let session = self.session.get().ok_or_else(not_started)?;
                Ok((channel, session))
            }
        }
    }

    fn new_stream(&self, method: MethodDescriptor, headers: Metadata, options: CallOptions) -> ClientStream {
        let (_, session) = match self.live() {
            Ok(live) => live,
            Err(status) => return ClientStream::Failing(status),
        };
        let authority = options
            .authority
            .unwrap_or_else(|| self.config.connection.authority.clone());
        let span = info_span!(
            "rpc.stream",
            transport = %self.log_id,
            method = method.full_name(),
            authority = %authority,
        );
        let state = StreamState::new(
            method,
            headers,
            authority,
            session.scheme.as_str(),
            self.config.connection.rendered_user_agent(),
            options.timeout,
            span,
        );
        ClientStream::live(state, session.write_queue.clone(), session.lifecycle.clone())
    }

    pub(crate) fn ping(&self, callback: Arc<dyn PingCallback>, executor: Handle) {
        let (_, session) = match self.live() {
            Ok(live) => live,
            Err(status) => {
                Http2Ping::notify_failed(callback, &executor, status);
                return;
            }
        };
        let lifecycle = session.lifecycle.clone();
        let on_failure_callback = callback.clone();
        let on_failure_executor = executor.clone();
        session
            .write_queue
            .enqueue(Command::SendPing { callback, executor }, true)
            .on_failure(move |cause| {
                let status = status_from_failure(cause, &lifecycle);
                Http2Ping::notify_failed(on_failure_callback, &on_failure_executor, status);
            });
    }

    fn shutdown(&self, reason: Status) {
        let Ok((channel, session)) = self.live() else {
            return;
        };
        if !channel.is_open() {
            return;
        }
        debug!(transport = %self.log_id, %reason, "graceful shutdown requested");
        let _ = session
            .write_queue
            .enqueue(Command::GracefulClose { status: reason }, true);
    }

    pub(crate) fn shutdown_now(&self, reason: Status) {
        let Ok((channel, session)) = self.live() else {
            return;
        };
        if !channel.is_open() {
            return;
        }
        debug!(transport = %self.log_id, %reason, "immediate shutdown requested");
        let lifecycle = session.lifecycle.clone();
        let task = Box::new(move |ctx: &mut ChannelContext<'_>| {
            // Another immediate shutdown got here first.
            if !ctx.is_open() {
                return;
            }
            lifecycle.notify_shutdown(reason.clone());
            ctx.close();
            let _ = ctx.write(Command::ForcefulClose { status: reason });
        });
        let _ = session.write_queue.enqueue_task(task, true);
    }
}
