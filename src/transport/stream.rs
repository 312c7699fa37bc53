//! Client streams and the state the connection keeps for each of them.
//!
//! 客户端流以及连接为每个流保存的状态。

use super::{
    command::Command, lifecycle::LifecycleManager, translate::status_from_failure,
    write_queue::WriteQueue,
};
use crate::{
    metadata::{Metadata, MethodDescriptor},
    status::Status,
};
use bytes::Bytes;
use std::{fmt, sync::Arc, time::Duration};
use tracing::{Span, debug};

/// Receives what happens on a stream. `on_closed` is called exactly once and
/// is always the last call.
///
/// 接收流上发生的事件。`on_closed` 恰好调用一次，且总是最后一次调用。
pub trait StreamListener: Send + Sync + 'static {
    fn on_headers(&self, _headers: Metadata) {}
    fn on_message(&self, _message: Bytes) {}
    fn on_closed(&self, status: Status);
}

/// Everything the connection needs to open a stream and route its events.
/// 连接打开流并路由其事件所需的全部信息。
pub struct StreamState {
    method: MethodDescriptor,
    headers: Metadata,
    authority: String,
    scheme: &'static str,
    user_agent: String,
    timeout: Option<Duration>,
    span: Span,
    listener: Option<Arc<dyn StreamListener>>,
}

impl StreamState {
    pub(crate) fn new(
        method: MethodDescriptor,
        headers: Metadata,
        authority: String,
        scheme: &'static str,
        user_agent: String,
        timeout: Option<Duration>,
        span: Span,
    ) -> Self {
        Self {
            method,
            headers,
            authority,
            scheme,
            user_agent,
            timeout,
            span,
            listener: None,
        }
    }

    pub fn method(&self) -> &MethodDescriptor {
        &self.method
    }

    pub(crate) fn span(&self) -> &Span {
        &self.span
    }

    /// The request header block: pseudo-headers first, then the protocol
    /// headers, then whatever the caller supplied.
    ///
    /// 请求头部块：先是伪头部，然后是协议头部，最后是调用方提供的头部。
    pub(crate) fn request_headers(&self) -> Metadata {
        let mut headers = Metadata::new();
        headers.insert(":method", "POST");
        headers.insert(":scheme", self.scheme);
        headers.insert(":path", self.method.path());
        headers.insert(":authority", self.authority.as_str());
        headers.insert("content-type", "application/grpc");
        headers.insert("te", "trailers");
        headers.insert("user-agent", self.user_agent.as_str());
        if let Some(timeout) = self.timeout {
            headers.insert("grpc-timeout", encode_timeout(timeout));
        }
        for (name, value) in self.headers.iter() {
            headers.insert(name, value);
        }
        headers
    }

    pub(crate) fn on_headers(&self, headers: Metadata) {
        if let Some(listener) = &self.listener {
            listener.on_headers(headers);
        }
    }

    pub(crate) fn on_message(&self, message: Bytes) {
        if let Some(listener) = &self.listener {
            listener.on_message(message);
        }
    }

    /// Closes the stream. Consumes the state so a stream closes only once.
    /// 关闭流。消耗状态，确保流只被关闭一次。
    pub(crate) fn close(self, status: Status) {
        let _entered = self.span.enter();
        debug!(%status, "stream closed");
        if let Some(listener) = &self.listener {
            listener.on_closed(status);
        }
    }
}

impl fmt::Debug for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamState")
            .field("method", &self.method.full_name())
            .field("authority", &self.authority)
            .finish()
    }
}

/// `grpc-timeout` value: at most 8 digits followed by a unit.
/// `grpc-timeout` 的取值：最多 8 位数字加一个单位。
fn encode_timeout(timeout: Duration) -> String {
    const MAX: u128 = 99_999_999;
    let nanos = timeout.as_nanos();
    let units: [(u128, char); 6] = [
        (1, 'n'),
        (1_000, 'u'),
        (1_000_000, 'm'),
        (1_000_000_000, 'S'),
        (60_000_000_000, 'M'),
        (3_600_000_000_000, 'H'),
    ];
    for (per_unit, suffix) in units {
        let value = nanos.div_ceil(per_unit);
        if value <= MAX {
            return format!("{value}{suffix}");
        }
    }
    format!("{MAX}H")
}

/// A stream returned by `ClientTransport::new_stream`.
///
/// Nothing is sent until [`start`](ClientStream::start) is called.
///
/// 由 `ClientTransport::new_stream` 返回的流。在调用 [`start`](ClientStream::start)
/// 之前不会发送任何内容。
pub enum ClientStream {
    Live(LiveStream),
    /// The transport could not carry the stream. Starting it closes it
    /// right away with the recorded status.
    ///
    /// 传输无法承载该流。启动时会立即以记录的状态关闭它。
    Failing(Status),
}

/// A stream bound to a live connection.
/// 绑定到存活连接的流。
pub struct LiveStream {
    state: StreamState,
    write_queue: WriteQueue,
    lifecycle: Arc<LifecycleManager>,
}

impl ClientStream {
    pub(crate) fn live(state: StreamState, write_queue: WriteQueue, lifecycle: Arc<LifecycleManager>) -> Self {
        ClientStream::Live(LiveStream {
            state,
            write_queue,
            lifecycle,
        })
    }

    /// Starts the stream. Events are delivered to `listener`.
    /// 启动流，事件会交付给 `listener`。
    pub fn start(self, listener: Arc<dyn StreamListener>) {
        match self {
            ClientStream::Failing(status) => listener.on_closed(status),
            ClientStream::Live(stream) => stream.start(listener),
        }
    }

    /// The status a failing stream will close with.
    /// 失败流将要关闭时使用的状态。
    pub fn failure(&self) -> Option<&Status> {
        match self {
            ClientStream::Failing(status) => Some(status),
            ClientStream::Live(_) => None,
        }
    }
}

impl LiveStream {
    fn start(self, listener: Arc<dyn StreamListener>) {
        let LiveStream {
            mut state,
            write_queue,
            lifecycle,
        } = self;
        state.listener = Some(listener.clone());
        {
            let _entered = state.span.enter();
            debug!("stream starting");
        }
        write_queue
            .enqueue(Command::CreateStream { stream: state }, false)
            .on_failure(move |cause| {
                listener.on_closed(status_from_failure(cause, &lifecycle));
            });
    }
}

impl fmt::Debug for ClientStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientStream::Live(stream) => f.debug_tuple("Live").field(&stream.state).finish(),
            ClientStream::Failing(status) => f.debug_tuple("Failing").field(status).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_use_the_finest_unit_that_fits() {
        assert_eq!(encode_timeout(Duration::from_nanos(500)), "500n");
        assert_eq!(encode_timeout(Duration::from_millis(250)), "250000u");
        assert_eq!(encode_timeout(Duration::from_secs(5)), "5000000u");
        assert_eq!(encode_timeout(Duration::from_secs(1000)), "1000000m");
    }

    #[test]
    fn request_headers_put_pseudo_headers_first() {
        let state = StreamState::new(
            MethodDescriptor::new("echo.Echo/Say"),
            [("x-trace", "abc")].into_iter().collect(),
            "example.com:443".into(),
            "http",
            "kestrel-rpc/test".into(),
            None,
            Span::none(),
        );
        let headers = state.request_headers();
        let names: Vec<_> = headers.iter().map(|(name, _)| name).collect();
        assert_eq!(
            names,
            vec![":method", ":scheme", ":path", ":authority", "content-type", "te", "user-agent", "x-trace"]
        );
        assert_eq!(headers.get(":path"), Some("/echo.Echo/Say"));
        assert_eq!(headers.get(":scheme"), Some("http"));
    }
}
