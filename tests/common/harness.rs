//! Shared fixtures for the integration tests: an in-memory connector, a
//! scripted server speaking frames over it, and recording listeners.
//!
//! 集成测试的公共夹具：内存连接器、在其上收发帧的脚本化服务器，以及记录型监听器。

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use kestrel_rpc::{
    Address, ClientTransport, Config, Error, EventLoopGroup, Metadata, PingCallback, Result,
    Status, StreamListener, TransportListener,
    channel::{BoxedIo, Connector, Socket},
    config::{ChannelConfig, ChannelKind, ChannelOptions},
    frame::{Frame, Settings},
};
use std::{
    io,
    net::SocketAddr,
    sync::{Arc, Mutex, Once},
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream},
    sync::mpsc,
};
use tracing_subscriber::fmt::format::FmtSpan;

/// How long a test waits for any single expected event.
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Initializes tracing for tests, ensuring it's only done once.
pub fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "kestrel_rpc=debug".to_string());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::FULL)
            .with_test_writer()
            .init();
    });
}

pub fn server_address() -> SocketAddr {
    "127.0.0.1:50051".parse().unwrap()
}

#[derive(Debug)]
enum Mode {
    Pipe(DuplexStream),
    RefuseConnect,
    FailOpen,
}

/// A connector whose sockets are in-memory pipes.
/// 套接字为内存管道的连接器。
#[derive(Debug)]
pub struct PipeConnector {
    mode: Mutex<Option<Mode>>,
}

impl PipeConnector {
    /// A connector whose single connection reaches the returned server.
    pub fn pipe() -> (Arc<Self>, FakeServer) {
        let (client, server) = tokio::io::duplex(256 * 1024);
        let connector = Arc::new(Self {
            mode: Mutex::new(Some(Mode::Pipe(client))),
        });
        (connector, FakeServer::new(server))
    }

    /// A connector whose connect attempt is refused.
    pub fn refusing() -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(Some(Mode::RefuseConnect)),
        })
    }

    /// A connector that cannot even create a socket.
    pub fn unopenable() -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(Some(Mode::FailOpen)),
        })
    }
}

impl Connector for PipeConnector {
    fn open(&self, _options: &ChannelOptions) -> Result<Box<dyn Socket>> {
        match self.mode.lock().unwrap().take() {
            Some(Mode::FailOpen) => Err(Error::Bind(
                "127.0.0.1:1".parse().unwrap(),
                io::Error::new(io::ErrorKind::AddrInUse, "address in use"),
            )),
            Some(Mode::Pipe(io)) => Ok(Box::new(PendingPipe { io: Some(io) })),
            Some(Mode::RefuseConnect) | None => Ok(Box::new(PendingPipe { io: None })),
        }
    }
}

struct PendingPipe {
    io: Option<DuplexStream>,
}

#[async_trait]
impl Socket for PendingPipe {
    async fn connect(self: Box<Self>, _address: Address) -> Result<BoxedIo> {
        match self.io {
            Some(io) => Ok(Box::new(io)),
            None => Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused").into()),
        }
    }
}

/// Config that routes the transport's channel through `connector`.
pub fn config_with(connector: Arc<PipeConnector>) -> Config {
    Config {
        channel: ChannelConfig {
            kind: ChannelKind::Custom(connector),
            options: ChannelOptions::default(),
        },
        ..Config::default()
    }
}

/// A transport on the current runtime whose connection reaches a fake server.
pub fn transport_with(config: Config) -> ClientTransport {
    init_tracing();
    ClientTransport::builder(server_address(), EventLoopGroup::current())
        .config(config)
        .build()
}

/// The server end of a pipe, driven by the test one frame at a time.
/// 管道的服务器端，由测试逐帧驱动。
pub struct FakeServer {
    io: DuplexStream,
    buf: BytesMut,
    preface_seen: bool,
}

impl FakeServer {
    fn new(io: DuplexStream) -> Self {
        Self {
            io,
            buf: BytesMut::new(),
            preface_seen: false,
        }
    }

    /// Reads the client preface and SETTINGS, then sends the server's
    /// SETTINGS, which makes the transport ready.
    pub async fn handshake(&mut self) {
        match self.next_frame().await {
            Some(Frame::Settings { ack: false, .. }) => {}
            other => panic!("expected client SETTINGS, got {other:?}"),
        }
        self.send(Frame::Settings {
            ack: false,
            settings: Settings {
                max_concurrent_streams: Some(100),
                ..Settings::default()
            },
        })
        .await;
    }

    /// The next frame from the client, skipping SETTINGS acks. `None` once
    /// the client closed the connection.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        tokio::time::timeout(EVENT_TIMEOUT, self.read_frame())
            .await
            .expect("timed out waiting for a frame from the client")
    }

    async fn read_frame(&mut self) -> Option<Frame> {
        loop {
            if !self.preface_seen {
                self.preface_seen = Frame::strip_preface(&mut self.buf).unwrap();
            }
            if self.preface_seen {
                match Frame::decode(&mut self.buf).unwrap() {
                    Some(Frame::Settings { ack: true, .. }) => continue,
                    Some(frame) => return Some(frame),
                    None => {}
                }
            }
            match self.io.read_buf(&mut self.buf).await {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    /// Reads until the client closes the connection, returning what arrived.
    pub async fn frames_until_closed(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame().await {
            frames.push(frame);
        }
        frames
    }

    pub async fn send(&mut self, frame: Frame) {
        let mut out = BytesMut::new();
        frame.encode(&mut out).unwrap();
        // The client may already be gone; tests assert on its events instead.
        let _ = self.io.write_all(&out).await;
    }

    /// Sends a trailers-only response closing `stream_id` with `code`.
    pub async fn send_trailers(&mut self, stream_id: u32, code: u32, message: Option<&str>) {
        let mut trailers = Metadata::new();
        trailers.insert("grpc-status", code.to_string());
        if let Some(message) = message {
            trailers.insert("grpc-message", message);
        }
        self.send(Frame::Headers {
            stream_id,
            end_stream: true,
            headers: trailers,
        })
        .await;
    }
}

/// The receiving end of a recording listener.
/// 记录型监听器的接收端。
pub struct Events<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T: std::fmt::Debug> Events<T> {
    pub async fn next(&mut self) -> T {
        tokio::time::timeout(EVENT_TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("listener dropped")
    }

    /// An event that has already been delivered, if any.
    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Ready,
    Shutdown(Status),
    Terminated(Status),
}

pub struct RecordingTransport {
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportListener for RecordingTransport {
    fn on_ready(&self) {
        let _ = self.tx.send(TransportEvent::Ready);
    }

    fn on_shutdown(&self, status: &Status) {
        let _ = self.tx.send(TransportEvent::Shutdown(status.clone()));
    }

    fn on_terminated(&self, status: Status) {
        let _ = self.tx.send(TransportEvent::Terminated(status));
    }
}

pub fn transport_listener() -> (Arc<RecordingTransport>, Events<TransportEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(RecordingTransport { tx }), Events { rx })
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Headers(Metadata),
    Message(Bytes),
    Closed(Status),
}

pub struct RecordingStream {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl StreamListener for RecordingStream {
    fn on_headers(&self, headers: Metadata) {
        let _ = self.tx.send(StreamEvent::Headers(headers));
    }

    fn on_message(&self, message: Bytes) {
        let _ = self.tx.send(StreamEvent::Message(message));
    }

    fn on_closed(&self, status: Status) {
        let _ = self.tx.send(StreamEvent::Closed(status));
    }
}

pub fn stream_listener() -> (Arc<RecordingStream>, Events<StreamEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(RecordingStream { tx }), Events { rx })
}

pub struct RecordingPing {
    tx: mpsc::UnboundedSender<std::result::Result<Duration, Status>>,
}

impl PingCallback for RecordingPing {
    fn on_success(&self, round_trip: Duration) {
        let _ = self.tx.send(Ok(round_trip));
    }

    fn on_failure(&self, status: Status) {
        let _ = self.tx.send(Err(status));
    }
}

pub fn ping_callback() -> (
    Arc<RecordingPing>,
    Events<std::result::Result<Duration, Status>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(RecordingPing { tx }), Events { rx })
}
