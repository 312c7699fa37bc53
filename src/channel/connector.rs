//! Abstractions over the byte streams a channel can run on.
//!
//! Creating a channel happens in two steps. [`Connector::open`] runs when the
//! channel is registered and applies the socket options; failures there (a
//! local address that cannot be bound, an option the platform rejects) mean
//! the channel never exists. [`Socket::connect`] then runs asynchronously on
//! the channel task.
//!
//! 通道可运行的字节流抽象。创建通道分两步：[`Connector::open`] 在通道注册时运行并应用
//! 套接字选项，此处的失败（无法绑定的本地地址、平台拒绝的选项）意味着通道根本不存在；
//! 随后 [`Socket::connect`] 在通道任务上异步运行。

use super::Address;
use crate::{
    config::ChannelOptions,
    error::{Error, Result},
};
use async_trait::async_trait;
use std::{fmt, net::SocketAddr};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpSocket,
};
use tracing::trace;

/// A connected, bidirectional byte stream.
/// 已连接的双向字节流。
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Io for T {}

pub type BoxedIo = Box<dyn Io>;

/// Produces unconnected sockets for one channel kind.
/// 为某一种通道类型创建未连接的套接字。
pub trait Connector: Send + Sync + fmt::Debug + 'static {
    fn open(&self, options: &ChannelOptions) -> Result<Box<dyn Socket>>;
}

/// A socket that has been opened and configured but not yet connected.
/// 已打开并配置、但尚未连接的套接字。
#[async_trait]
pub trait Socket: Send + 'static {
    async fn connect(self: Box<Self>, address: Address) -> Result<BoxedIo>;
}

/// Connects over TCP.
/// 通过 TCP 连接。
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn open(&self, options: &ChannelOptions) -> Result<Box<dyn Socket>> {
        // Without a local address the address family is only known at connect.
        let socket = match options.local_address {
            Some(local) => Some(bound_socket(local, options)?),
            None => None,
        };
        Ok(Box::new(PendingTcp {
            socket,
            options: options.clone(),
        }))
    }
}

struct PendingTcp {
    socket: Option<TcpSocket>,
    options: ChannelOptions,
}

#[async_trait]
impl Socket for PendingTcp {
    async fn connect(self: Box<Self>, address: Address) -> Result<BoxedIo> {
        let remote = match address {
            Address::Tcp(remote) => remote,
            #[allow(unreachable_patterns)]
            other => {
                return Err(Error::AddressMismatch {
                    kind: "tcp",
                    address: other.to_string(),
                });
            }
        };
        let socket = match self.socket {
            Some(socket) => socket,
            None => configured_socket(remote, &self.options)?,
        };
        let stream = socket.connect(remote).await?;
        if let Some(nodelay) = self.options.tcp_nodelay {
            stream.set_nodelay(nodelay)?;
        }
        trace!(%remote, local = ?stream.local_addr().ok(), "tcp connected");
        Ok(Box::new(stream))
    }
}

fn configured_socket(family_of: SocketAddr, options: &ChannelOptions) -> Result<TcpSocket> {
    let socket = if family_of.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_keepalive(options.so_keepalive.unwrap_or(true))?;
    if let Some(reuse) = options.reuse_address {
        socket.set_reuseaddr(reuse)?;
    }
    if let Some(size) = options.send_buffer_size {
        socket.set_send_buffer_size(size)?;
    }
    if let Some(size) = options.recv_buffer_size {
        socket.set_recv_buffer_size(size)?;
    }
    Ok(socket)
}

fn bound_socket(local: SocketAddr, options: &ChannelOptions) -> Result<TcpSocket> {
    let socket = configured_socket(local, options)?;
    socket.bind(local).map_err(|e| Error::Bind(local, e))?;
    Ok(socket)
}

/// Connects over a Unix domain socket.
/// 通过 Unix 域套接字连接。
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixConnector;

#[cfg(unix)]
impl Connector for UnixConnector {
    fn open(&self, _options: &ChannelOptions) -> Result<Box<dyn Socket>> {
        Ok(Box::new(PendingUnix))
    }
}

#[cfg(unix)]
struct PendingUnix;

#[cfg(unix)]
#[async_trait]
impl Socket for PendingUnix {
    async fn connect(self: Box<Self>, address: Address) -> Result<BoxedIo> {
        match address {
            Address::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(&path).await?;
                Ok(Box::new(stream))
            }
            other => Err(Error::AddressMismatch {
                kind: "unix",
                address: other.to_string(),
            }),
        }
    }
}
