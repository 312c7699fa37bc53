//! 定义了传输和连接的可配置参数。
//! Defines configurable parameters for the transport and its connection.

use crate::{channel::connector::Connector, status::Status};
use std::{fmt, net::SocketAddr, sync::Arc, time::Duration};

/// A structure containing all configurable parameters for a client transport.
///
/// 包含客户端传输所有可配置参数的结构体。
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Which channel implementation to use and how to set it up.
    /// 使用哪种通道实现以及如何配置它。
    pub channel: ChannelConfig,

    /// Protocol-level connection parameters.
    /// 协议层连接参数。
    pub connection: ConnectionConfig,

    /// Keepalive parameters.
    /// 保活参数。
    pub keepalive: KeepAliveConfig,
}

/// The channel-type selector.
///
/// 通道类型选择器。
#[derive(Clone, Default)]
pub enum ChannelKind {
    /// A TCP socket.
    #[default]
    Tcp,
    /// A Unix domain socket.
    #[cfg(unix)]
    Unix,
    /// A caller supplied connector, typically used to run over in-memory pipes.
    /// 调用方提供的连接器，通常用于内存管道。
    Custom(Arc<dyn Connector>),
}

impl ChannelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelKind::Tcp => "tcp",
            #[cfg(unix)]
            ChannelKind::Unix => "unix",
            ChannelKind::Custom(_) => "custom",
        }
    }
}

impl fmt::Debug for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Custom(connector) => f.debug_tuple("Custom").field(connector).finish(),
            other => f.write_str(other.name()),
        }
    }
}

/// The bag of options applied to a channel's socket.
///
/// Unset options keep the platform default, except `so_keepalive` which is
/// enabled for TCP channels unless set explicitly.
///
/// 应用于通道套接字的选项集合。未设置的选项保持平台默认值；
/// 但对 TCP 通道而言，`so_keepalive` 除非显式设置，否则默认开启。
#[derive(Debug, Clone, Default)]
pub struct ChannelOptions {
    pub tcp_nodelay: Option<bool>,
    pub so_keepalive: Option<bool>,
    pub reuse_address: Option<bool>,
    pub send_buffer_size: Option<u32>,
    pub recv_buffer_size: Option<u32>,
    /// Local address to bind before connecting.
    /// 连接前绑定的本地地址。
    pub local_address: Option<SocketAddr>,
    /// Upper bound for the asynchronous connect.
    /// 异步连接的时间上限。
    pub connect_timeout: Option<Duration>,
}

/// Channel selection and socket options.
///
/// 通道选择与套接字选项。
#[derive(Debug, Clone, Default)]
pub struct ChannelConfig {
    pub kind: ChannelKind,
    pub options: ChannelOptions,
}

/// Protocol-level connection parameters.
///
/// 协议层连接参数。
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// The authority (`host:port`) sent with every stream.
    /// 随每个流发送的 authority（`host:port`）。
    pub authority: String,
    /// Application user agent, prepended to the library's own agent.
    /// 应用程序的用户代理，会加在库自身的代理标识之前。
    pub user_agent: Option<String>,
    /// Initial flow control window advertised to the server.
    /// 向服务器通告的初始流控窗口。
    pub flow_control_window: u32,
    /// The largest inbound message accepted on a stream.
    /// 单个流上可接受的最大入站消息。
    pub max_message_size: usize,
    /// The largest header list accepted from the server.
    /// 可接受的服务器头部列表的最大大小。
    pub max_header_list_size: u32,
}

impl ConnectionConfig {
    /// The user agent string sent on every stream.
    /// 每个流上发送的用户代理字符串。
    pub fn rendered_user_agent(&self) -> String {
        let library = concat!("kestrel-rpc/", env!("CARGO_PKG_VERSION"));
        match &self.user_agent {
            Some(agent) => format!("{agent} {library}"),
            None => library.to_string(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            authority: "localhost".to_string(),
            user_agent: None,
            flow_control_window: 1024 * 1024, // 1 MiB
            max_message_size: 4 * 1024 * 1024,
            max_header_list_size: 8192,
        }
    }
}

/// Keepalive parameters.
///
/// 保活参数。
#[derive(Debug, Clone)]
pub struct KeepAliveConfig {
    /// Idle time before a keepalive ping is sent. `None` disables keepalive.
    /// 发送保活 ping 之前的空闲时间。`None` 表示禁用保活。
    pub time: Option<Duration>,
    /// How long to wait for any inbound data after a keepalive ping.
    /// 发送保活 ping 后等待任意入站数据的时长。
    pub timeout: Duration,
    /// Whether to ping even when no streams are active.
    /// 没有活跃流时是否仍然发送 ping。
    pub without_calls: bool,
    /// The status used to shut the transport down when keepalive fails.
    /// 保活失败时用于关闭传输的状态。
    pub failure_status: Status,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            time: None,
            timeout: Duration::from_secs(20),
            without_calls: false,
            failure_status: Status::unavailable("Keepalive failed. The connection is likely gone"),
        }
    }
}
