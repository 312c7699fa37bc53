//! 客户端连接处理器：在通道任务上运行协议
//! The client connection handler: runs the protocol on the channel task.
//!
//! 处理器拥有所有的流状态。它把来自传输的命令转换成帧，把收到的帧路由到对应的流，
//! 并在连接结束时负责通知生命周期终止。
//!
//! The handler owns all stream state. It turns commands from the transport
//! into frames, routes inbound frames to their streams, and reports
//! termination when the connection ends.

use super::{
    command::Command,
    identity::LogId,
    keepalive::KeepAliveAdapter,
    lifecycle::LifecycleManager,
    ping::{Http2Ping, PingCallback},
    stream::StreamState,
};
use crate::{
    channel::{ChannelContext, ChannelHandler, Promise},
    config::ConnectionConfig,
    error::{Error, Result},
    frame::{Frame, PREFACE, Reason, Settings},
    metadata::Metadata,
    status::{Code, Status},
};
use bytes::{Bytes, BytesMut};
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

const MAX_STREAM_ID: u32 = 0x7fff_ffff;

/// 服务器以 ENHANCE_YOUR_CALM 拒绝过于频繁的 ping 时附带的调试数据
/// Debug data a server sends with ENHANCE_YOUR_CALM when pings come too often.
const TOO_MANY_PINGS: &str = "too_many_pings";

pub(crate) type TooManyPingsHook = Arc<dyn Fn() + Send + Sync>;

pub(crate) struct ClientHandler {
    log_id: LogId,
    lifecycle: Arc<LifecycleManager>,
    keepalive: Option<Arc<KeepAliveAdapter>>,
    too_many_pings: TooManyPingsHook,
    local_settings: Settings,
    max_message_size: usize,
    streams: HashMap<u32, StreamState>,
    /// 等待连接就绪的流创建请求
    /// Stream creations waiting for the connection to become ready.
    buffered: VecDeque<(StreamState, Promise)>,
    next_stream_id: u32,
    ready: bool,
    draining: bool,
    ping: Option<Http2Ping>,
}

impl ClientHandler {
    pub(crate) fn new(
        log_id: LogId,
        lifecycle: Arc<LifecycleManager>,
        keepalive: Option<Arc<KeepAliveAdapter>>,
        config: &ConnectionConfig,
        too_many_pings: TooManyPingsHook,
    ) -> Self {
        Self {
            log_id,
            lifecycle,
            keepalive,
            too_many_pings,
            local_settings: Settings {
                max_concurrent_streams: None,
                initial_window_size: Some(config.flow_control_window),
                max_header_list_size: Some(config.max_header_list_size),
            },
            max_message_size: config.max_message_size,
            streams: HashMap::new(),
            buffered: VecDeque::new(),
            next_stream_id: 1,
            ready: false,
            draining: false,
            ping: None,
        }
    }

    fn on_frame(&mut self, ctx: &mut ChannelContext<'_>, frame: Frame) {
        match frame {
            Frame::Settings { ack: false, .. } => {
                ctx.send_frame(&Frame::settings_ack());
                if !self.ready {
                    self.ready = true;
                    self.lifecycle.notify_ready();
                    while let Some((stream, promise)) = self.buffered.pop_front() {
                        self.open_stream(ctx, stream, promise);
                    }
                }
            }
            Frame::Settings { ack: true, .. } => {
                trace!(transport = %self.log_id, "settings acknowledged");
            }
            Frame::Ping { ack: false, payload } => {
                ctx.send_frame(&Frame::Ping { ack: true, payload });
            }
            Frame::Ping { ack: true, payload } => match self.ping.take() {
                Some(ping) if ping.payload() == payload => {
                    ping.complete();
                }
                outstanding => {
                    self.ping = outstanding;
                    warn!(transport = %self.log_id, payload, "received unexpected ping ack");
                }
            },
            Frame::GoAway {
                last_stream_id,
                reason,
                debug_data,
            } => self.on_go_away(ctx, last_stream_id, reason, debug_data),
            Frame::Headers {
                stream_id,
                end_stream,
                headers,
            } => {
                if end_stream {
                    let status = trailers_status(&headers);
                    self.close_stream(ctx, stream_id, status);
                } else if let Some(stream) = self.streams.get(&stream_id) {
                    stream.on_headers(headers);
                } else {
                    trace!(transport = %self.log_id, stream_id, "headers for unknown stream");
                }
            }
            Frame::Data {
                stream_id,
                end_stream,
                payload,
            } => {
                let Some(stream) = self.streams.get(&stream_id) else {
                    trace!(transport = %self.log_id, stream_id, "data for unknown stream");
                    return;
                };
                if payload.len() > self.max_message_size {
                    ctx.send_frame(&Frame::RstStream {
                        stream_id,
                        reason: Reason::CANCEL,
                    });
                    let status = Status::resource_exhausted(format!(
                        "Received message larger than max ({} vs. {})",
                        payload.len(),
                        self.max_message_size
                    ));
                    self.close_stream(ctx, stream_id, status);
                    return;
                }
                stream.on_message(payload);
                if end_stream {
                    let status = Status::internal("Received unexpected EOS on DATA frame from server");
                    self.close_stream(ctx, stream_id, status);
                }
            }
            Frame::RstStream { stream_id, reason } => {
                let status = reason.to_status().augment_description("Received Rst Stream");
                self.close_stream(ctx, stream_id, status);
            }
        }
    }

    fn on_go_away(&mut self, ctx: &mut ChannelContext<'_>, last_stream_id: u32, reason: Reason, debug_data: Bytes) {
        let debug = String::from_utf8_lossy(&debug_data);
        if reason == Reason::ENHANCE_YOUR_CALM && debug == TOO_MANY_PINGS {
            warn!(transport = %self.log_id, "server reported too many pings");
            (self.too_many_pings)();
        }
        let mut status = reason.to_status().augment_description("Received Goaway");
        if !debug.is_empty() {
            status = status.augment_description(&debug);
        }
        debug!(transport = %self.log_id, last_stream_id, %status, "received GOAWAY");
        self.lifecycle.notify_shutdown(status.clone());

        // Streams above `last_stream_id` were never processed by the server.
        // 编号大于 `last_stream_id` 的流从未被服务器处理。
        let refused: Vec<u32> = self
            .streams
            .keys()
            .copied()
            .filter(|id| *id > last_stream_id)
            .collect();
        for stream_id in refused {
            if let Some(stream) = self.streams.remove(&stream_id) {
                stream.close(status.clone());
            }
        }
        self.start_draining(ctx, false);
    }

    fn send_ping(
        &mut self,
        ctx: &mut ChannelContext<'_>,
        callback: Arc<dyn PingCallback>,
        executor: Handle,
        promise: Promise,
    ) {
        promise.succeed();
        if let Some(ping) = self.ping.as_mut() {
            ping.add_callback(callback, executor);
            return;
        }
        let payload: u64 = rand::random();
        if !ctx.send_frame(&Frame::Ping { ack: false, payload }) {
            Http2Ping::notify_failed(callback, &executor, self.closing_status());
            return;
        }
        trace!(transport = %self.log_id, payload, "ping sent");
        let mut ping = Http2Ping::new(payload);
        ping.add_callback(callback, executor);
        self.ping = Some(ping);
    }

    fn create_stream(&mut self, ctx: &mut ChannelContext<'_>, stream: StreamState, promise: Promise) {
        if self.draining || !ctx.is_open() {
            drop(stream);
            promise.fail(Error::ChannelClosed);
            return;
        }
        if !self.ready {
            self.buffered.push_back((stream, promise));
            return;
        }
        self.open_stream(ctx, stream, promise);
    }

    fn open_stream(&mut self, ctx: &mut ChannelContext<'_>, stream: StreamState, promise: Promise) {
        promise.succeed();
        let stream_id = self.next_stream_id;
        if stream_id > MAX_STREAM_ID {
            let status = Status::unavailable("Stream IDs have been exhausted");
            stream.close(status.clone());
            self.lifecycle.notify_shutdown(status);
            self.start_draining(ctx, true);
            return;
        }
        self.next_stream_id += 2;

        {
            let _entered = stream.span().enter();
            debug!(stream_id, "stream created");
        }
        let headers = Frame::Headers {
            stream_id,
            end_stream: false,
            headers: stream.request_headers(),
        };
        match ctx.try_send_frame(&headers) {
            Ok(()) | Err(Error::ChannelClosed) => {}
            Err(e) => {
                warn!(transport = %self.log_id, stream_id, error = %e, "request headers cannot be sent");
                stream.close(Status::internal("failed to encode request headers").with_cause(e));
                return;
            }
        }
        let first = self.streams.is_empty();
        self.streams.insert(stream_id, stream);
        if first {
            if let Some(keepalive) = &self.keepalive {
                keepalive.on_transport_active();
            }
        }
    }

    fn close_stream(&mut self, ctx: &mut ChannelContext<'_>, stream_id: u32, status: Status) {
        let Some(stream) = self.streams.remove(&stream_id) else {
            trace!(transport = %self.log_id, stream_id, "close for unknown stream");
            return;
        };
        stream.close(status);
        if self.streams.is_empty() {
            if let Some(keepalive) = &self.keepalive {
                keepalive.on_transport_idle();
            }
            if self.draining {
                ctx.close();
            }
        }
    }

    /// Stops creating streams. Sends GOAWAY when `announce` is set, and closes
    /// the channel once no stream is left.
    ///
    /// 停止创建流。`announce` 为真时发送 GOAWAY，并在没有剩余流时关闭通道。
    fn start_draining(&mut self, ctx: &mut ChannelContext<'_>, announce: bool) {
        if !self.draining {
            self.draining = true;
            self.fail_buffered();
            if announce {
                ctx.send_frame(&Frame::GoAway {
                    last_stream_id: 0,
                    reason: Reason::NO_ERROR,
                    debug_data: Bytes::new(),
                });
            }
        }
        if self.streams.is_empty() && ctx.is_open() {
            ctx.close();
        }
    }

    fn fail_buffered(&mut self) {
        for (stream, promise) in self.buffered.drain(..) {
            drop(stream);
            promise.fail(Error::StreamsBufferedAtClose);
        }
    }

    fn closing_status(&self) -> Status {
        self.lifecycle
            .shutdown_status()
            .cloned()
            .unwrap_or_else(|| Status::unavailable("Channel is closed"))
    }

    /// Tells the peer about a connection error and closes the channel.
    /// 向对端告知连接错误并关闭通道。
    fn connection_error(&mut self, ctx: &mut ChannelContext<'_>, cause: Error) {
        warn!(transport = %self.log_id, error = %cause, "connection error");
        let debug_data = Bytes::from(cause.to_string());
        self.lifecycle.notify_shutdown(Status::from_error(cause));
        ctx.send_frame(&Frame::GoAway {
            last_stream_id: 0,
            reason: Reason::PROTOCOL_ERROR,
            debug_data,
        });
        ctx.close();
    }
}

impl ChannelHandler for ClientHandler {
    fn channel_active(&mut self, ctx: &mut ChannelContext<'_>) {
        debug!(transport = %self.log_id, channel = %ctx.id(), "connection established; sending preface");
        ctx.send_bytes(PREFACE);
        ctx.send_frame(&Frame::Settings {
            ack: false,
            settings: self.local_settings.clone(),
        });
    }

    fn channel_read(&mut self, ctx: &mut ChannelContext<'_>, buf: &mut BytesMut) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        if let Some(keepalive) = &self.keepalive {
            keepalive.on_data_received();
        }
        loop {
            match Frame::decode(buf) {
                Ok(Some(frame)) => {
                    trace!(transport = %self.log_id, ?frame, "frame received");
                    self.on_frame(ctx, frame);
                }
                Ok(None) => return Ok(()),
                Err(e) => {
                    buf.clear();
                    self.connection_error(ctx, e);
                    return Ok(());
                }
            }
            if !ctx.is_open() {
                buf.clear();
                return Ok(());
            }
        }
    }

    fn write(&mut self, ctx: &mut ChannelContext<'_>, command: Command, promise: Promise) {
        trace!(transport = %self.log_id, command = command.name(), "command");
        match command {
            Command::Noop => promise.succeed(),
            Command::SendPing { callback, executor } => self.send_ping(ctx, callback, executor, promise),
            Command::GracefulClose { status } => {
                promise.succeed();
                self.lifecycle.notify_shutdown(status);
                self.start_draining(ctx, true);
            }
            Command::ForcefulClose { status } => {
                promise.succeed();
                for (stream_id, stream) in self.streams.drain() {
                    ctx.send_frame(&Frame::RstStream {
                        stream_id,
                        reason: Reason::CANCEL,
                    });
                    stream.close(status.clone());
                }
                self.fail_buffered();
                if ctx.is_open() {
                    ctx.close();
                }
            }
            Command::CreateStream { stream } => self.create_stream(ctx, stream, promise),
        }
    }

    fn channel_inactive(&mut self, _ctx: &mut ChannelContext<'_>) {
        self.lifecycle
            .notify_shutdown(Status::unavailable("Network closed for unknown reason"));
        let status = self.closing_status();
        for (_, stream) in self.streams.drain() {
            stream.close(status.clone());
        }
        self.fail_buffered();
        if let Some(ping) = self.ping.take() {
            ping.fail(status.clone());
        }
        if let Some(keepalive) = &self.keepalive {
            keepalive.on_transport_termination();
        }
        self.lifecycle.notify_terminated(None, status);
    }
}

/// The status carried by a trailers-only or trailing header block.
/// 仅尾部或尾随头部块所携带的状态。
fn trailers_status(trailers: &Metadata) -> Status {
    let Some(raw) = trailers.get("grpc-status") else {
        return Status::unknown("missing GRPC status in response");
    };
    let code = raw
        .trim()
        .parse::<u32>()
        .map(Code::from_u32)
        .unwrap_or(Code::Unknown);
    let status = Status::new(code);
    match trailers.get("grpc-message") {
        Some(message) => status.with_description(message),
        None => status,
    }
}
