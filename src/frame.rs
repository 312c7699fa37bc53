//! 定义了在连接上传输的帧以及它们的编解码。
//! Defines the frames carried on a connection and their wire encoding.
//!
//! The layout follows HTTP/2: a 9-byte header (24-bit length, type, flags,
//! 31-bit stream id) followed by the payload. Header blocks are written as
//! literal name/value pairs; header compression is not done at this layer.
//!
//! 布局遵循 HTTP/2：9 字节头部（24 位长度、类型、标志、31 位流 ID）加载荷。
//! 头部块以字面量名值对写入；本层不做头部压缩。

use crate::{
    error::{Error, Result},
    metadata::Metadata,
    status::{Code, Status},
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// The connection preface every client sends first.
/// 客户端最先发送的连接前言。
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

pub const FRAME_HEADER_SIZE: usize = 9;

/// Largest payload the 24-bit length field can describe.
/// 24 位长度字段所能描述的最大负载。
pub const MAX_FRAME_PAYLOAD: usize = (1 << 24) - 1;

const TYPE_DATA: u8 = 0x0;
const TYPE_HEADERS: u8 = 0x1;
const TYPE_RST_STREAM: u8 = 0x3;
const TYPE_SETTINGS: u8 = 0x4;
const TYPE_PING: u8 = 0x6;
const TYPE_GOAWAY: u8 = 0x7;

const FLAG_END_STREAM: u8 = 0x1;
const FLAG_ACK: u8 = 0x1;
const FLAG_END_HEADERS: u8 = 0x4;

const SETTING_MAX_CONCURRENT_STREAMS: u16 = 0x3;
const SETTING_INITIAL_WINDOW_SIZE: u16 = 0x4;
const SETTING_MAX_HEADER_LIST_SIZE: u16 = 0x6;

const STREAM_ID_MASK: u32 = 0x7fff_ffff;

/// An HTTP/2 error code, carried by RST_STREAM and GOAWAY.
/// HTTP/2 错误码，由 RST_STREAM 与 GOAWAY 携带。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reason(pub u32);

impl Reason {
    pub const NO_ERROR: Reason = Reason(0x0);
    pub const PROTOCOL_ERROR: Reason = Reason(0x1);
    pub const INTERNAL_ERROR: Reason = Reason(0x2);
    pub const FLOW_CONTROL_ERROR: Reason = Reason(0x3);
    pub const SETTINGS_TIMEOUT: Reason = Reason(0x4);
    pub const STREAM_CLOSED: Reason = Reason(0x5);
    pub const FRAME_SIZE_ERROR: Reason = Reason(0x6);
    pub const REFUSED_STREAM: Reason = Reason(0x7);
    pub const CANCEL: Reason = Reason(0x8);
    pub const COMPRESSION_ERROR: Reason = Reason(0x9);
    pub const CONNECT_ERROR: Reason = Reason(0xa);
    pub const ENHANCE_YOUR_CALM: Reason = Reason(0xb);
    pub const INADEQUATE_SECURITY: Reason = Reason(0xc);
    pub const HTTP_1_1_REQUIRED: Reason = Reason(0xd);

    /// The status a peer-reported error code stands for.
    ///
    /// 对端报告的错误码所对应的状态。
    pub fn to_status(self) -> Status {
        let (code, description) = match self {
            Reason::NO_ERROR => (Code::Unavailable, "No error: A GRPC status of OK should have been sent"),
            Reason::PROTOCOL_ERROR => (Code::Internal, "Protocol error"),
            Reason::INTERNAL_ERROR => (Code::Internal, "Internal error"),
            Reason::FLOW_CONTROL_ERROR => (Code::Internal, "Flow control error"),
            Reason::SETTINGS_TIMEOUT => (Code::Internal, "Settings timeout"),
            Reason::STREAM_CLOSED => (Code::Internal, "Stream closed"),
            Reason::FRAME_SIZE_ERROR => (Code::Internal, "Frame size error"),
            Reason::REFUSED_STREAM => (Code::Unavailable, "Refused stream"),
            Reason::CANCEL => (Code::Cancelled, "Cancelled"),
            Reason::COMPRESSION_ERROR => (Code::Internal, "Compression error"),
            Reason::CONNECT_ERROR => (Code::Internal, "Connect error"),
            Reason::ENHANCE_YOUR_CALM => (Code::ResourceExhausted, "Enhance your calm"),
            Reason::INADEQUATE_SECURITY => (Code::PermissionDenied, "Inadequate security"),
            Reason::HTTP_1_1_REQUIRED => (Code::Unknown, "HTTP/1.1 required"),
            _ => (Code::Unknown, "Unrecognized HTTP/2 error code"),
        };
        Status::new(code).with_description(description)
    }
}

/// The subset of settings this client reads and writes.
/// 本客户端读写的设置子集。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: Option<u32>,
    pub max_header_list_size: Option<u32>,
}

/// A complete protocol frame that can be sent or received.
/// 一个可以被发送或接收的完整协议帧。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data {
        stream_id: u32,
        end_stream: bool,
        payload: Bytes,
    },
    Headers {
        stream_id: u32,
        end_stream: bool,
        headers: Metadata,
    },
    RstStream {
        stream_id: u32,
        reason: Reason,
    },
    Settings {
        ack: bool,
        settings: Settings,
    },
    Ping {
        ack: bool,
        payload: u64,
    },
    GoAway {
        last_stream_id: u32,
        reason: Reason,
        debug_data: Bytes,
    },
}

impl Frame {
    pub fn settings_ack() -> Self {
        Frame::Settings {
            ack: true,
            settings: Settings::default(),
        }
    }

    /// Encodes the frame into a buffer. A frame whose fields do not fit their
    /// length prefixes is rejected and nothing is written.
    ///
    /// 将帧编码到缓冲区。字段超出其长度前缀范围的帧会被拒绝，且不写入任何内容。
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let mut payload = BytesMut::new();
        let (kind, flags, stream_id) = match self {
            Frame::Data {
                stream_id,
                end_stream,
                payload: data,
            } => {
                payload.put_slice(data);
                (TYPE_DATA, end_flag(*end_stream), *stream_id)
            }
            Frame::Headers {
                stream_id,
                end_stream,
                headers,
            } => {
                encode_header_block(headers, &mut payload)?;
                (
                    TYPE_HEADERS,
                    end_flag(*end_stream) | FLAG_END_HEADERS,
                    *stream_id,
                )
            }
            Frame::RstStream { stream_id, reason } => {
                payload.put_u32(reason.0);
                (TYPE_RST_STREAM, 0, *stream_id)
            }
            Frame::Settings { ack, settings } => {
                if !*ack {
                    let entries = [
                        (SETTING_MAX_CONCURRENT_STREAMS, settings.max_concurrent_streams),
                        (SETTING_INITIAL_WINDOW_SIZE, settings.initial_window_size),
                        (SETTING_MAX_HEADER_LIST_SIZE, settings.max_header_list_size),
                    ];
                    for (id, value) in entries {
                        if let Some(value) = value {
                            payload.put_u16(id);
                            payload.put_u32(value);
                        }
                    }
                }
                (TYPE_SETTINGS, if *ack { FLAG_ACK } else { 0 }, 0)
            }
            Frame::Ping { ack, payload: data } => {
                payload.put_u64(*data);
                (TYPE_PING, if *ack { FLAG_ACK } else { 0 }, 0)
            }
            Frame::GoAway {
                last_stream_id,
                reason,
                debug_data,
            } => {
                payload.put_u32(*last_stream_id & STREAM_ID_MASK);
                payload.put_u32(reason.0);
                payload.put_slice(debug_data);
                (TYPE_GOAWAY, 0, 0)
            }
        };

        if payload.len() > MAX_FRAME_PAYLOAD {
            return Err(Error::Protocol(format!(
                "frame payload of {} bytes exceeds {MAX_FRAME_PAYLOAD}",
                payload.len()
            )));
        }
        let len = payload.len() as u32;
        buf.reserve(FRAME_HEADER_SIZE + payload.len());
        buf.put_u8((len >> 16) as u8);
        buf.put_u16(len as u16);
        buf.put_u8(kind);
        buf.put_u8(flags);
        buf.put_u32(stream_id & STREAM_ID_MASK);
        buf.put_slice(&payload);
        Ok(())
    }

    /// Decodes the next complete frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Frames of unknown type
    /// are skipped.
    ///
    /// 从 `buf` 头部解码下一个完整帧。需要更多字节时返回 `Ok(None)`，未知类型的帧会被跳过。
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>> {
        loop {
            if buf.len() < FRAME_HEADER_SIZE {
                return Ok(None);
            }
            let len = ((buf[0] as usize) << 16) | ((buf[1] as usize) << 8) | buf[2] as usize;
            if buf.len() < FRAME_HEADER_SIZE + len {
                return Ok(None);
            }

            let mut header = buf.split_to(FRAME_HEADER_SIZE);
            header.advance(3);
            let kind = header.get_u8();
            let flags = header.get_u8();
            let stream_id = header.get_u32() & STREAM_ID_MASK;
            let mut payload = buf.split_to(len);

            let frame = match kind {
                TYPE_DATA => Frame::Data {
                    stream_id: require_stream(stream_id, "DATA")?,
                    end_stream: flags & FLAG_END_STREAM != 0,
                    payload: payload.freeze(),
                },
                TYPE_HEADERS => Frame::Headers {
                    stream_id: require_stream(stream_id, "HEADERS")?,
                    end_stream: flags & FLAG_END_STREAM != 0,
                    headers: decode_header_block(&mut payload)?,
                },
                TYPE_RST_STREAM => {
                    require_len(&payload, 4, "RST_STREAM")?;
                    Frame::RstStream {
                        stream_id: require_stream(stream_id, "RST_STREAM")?,
                        reason: Reason(payload.get_u32()),
                    }
                }
                TYPE_SETTINGS => {
                    if len % 6 != 0 {
                        return Err(Error::Protocol(format!("SETTINGS length {len} is not a multiple of 6")));
                    }
                    let mut settings = Settings::default();
                    while payload.has_remaining() {
                        let id = payload.get_u16();
                        let value = payload.get_u32();
                        match id {
                            SETTING_MAX_CONCURRENT_STREAMS => settings.max_concurrent_streams = Some(value),
                            SETTING_INITIAL_WINDOW_SIZE => settings.initial_window_size = Some(value),
                            SETTING_MAX_HEADER_LIST_SIZE => settings.max_header_list_size = Some(value),
                            _ => {}
                        }
                    }
                    Frame::Settings {
                        ack: flags & FLAG_ACK != 0,
                        settings,
                    }
                }
                TYPE_PING => {
                    if len != 8 {
                        return Err(Error::Protocol(format!("PING payload must be 8 bytes, got {len}")));
                    }
                    Frame::Ping {
                        ack: flags & FLAG_ACK != 0,
                        payload: payload.get_u64(),
                    }
                }
                TYPE_GOAWAY => {
                    require_len(&payload, 8, "GOAWAY")?;
                    let last_stream_id = payload.get_u32() & STREAM_ID_MASK;
                    let reason = Reason(payload.get_u32());
                    Frame::GoAway {
                        last_stream_id,
                        reason,
                        debug_data: payload.freeze(),
                    }
                }
                _ => continue,
            };
            return Ok(Some(frame));
        }
    }

    /// Consumes the connection preface from the front of `buf`.
    ///
    /// Returns `Ok(false)` when more bytes are needed.
    ///
    /// 从 `buf` 头部消费连接前言；需要更多字节时返回 `Ok(false)`。
    pub fn strip_preface(buf: &mut BytesMut) -> Result<bool> {
        let available = buf.len().min(PREFACE.len());
        if buf[..available] != PREFACE[..available] {
            return Err(Error::Protocol("invalid connection preface".into()));
        }
        if available < PREFACE.len() {
            return Ok(false);
        }
        buf.advance(PREFACE.len());
        Ok(true)
    }
}

fn end_flag(end_stream: bool) -> u8 {
    if end_stream { FLAG_END_STREAM } else { 0 }
}

fn require_stream(stream_id: u32, kind: &str) -> Result<u32> {
    if stream_id == 0 {
        return Err(Error::Protocol(format!("{kind} frame on stream 0")));
    }
    Ok(stream_id)
}

fn require_len(payload: &BytesMut, min: usize, kind: &str) -> Result<()> {
    if payload.len() < min {
        return Err(Error::Protocol(format!("{kind} payload too short")));
    }
    Ok(())
}

fn length_prefix(len: usize, what: &str) -> Result<u16> {
    u16::try_from(len).map_err(|_| Error::Protocol(format!("{what} of {len} exceeds {}", u16::MAX)))
}

fn encode_header_block(headers: &Metadata, buf: &mut BytesMut) -> Result<()> {
    buf.put_u16(length_prefix(headers.len(), "header count")?);
    for (name, value) in headers.iter() {
        buf.put_u16(length_prefix(name.len(), "header name length")?);
        buf.put_slice(name.as_bytes());
        buf.put_u16(length_prefix(value.len(), "header value length")?);
        buf.put_slice(value.as_bytes());
    }
    Ok(())
}

fn decode_header_block(buf: &mut BytesMut) -> Result<Metadata> {
    let truncated = || Error::Protocol("truncated header block".into());
    if buf.remaining() < 2 {
        return Err(truncated());
    }
    let count = buf.get_u16();
    let mut headers = Metadata::new();
    for _ in 0..count {
        let name = read_string(buf).ok_or_else(truncated)??;
        let value = read_string(buf).ok_or_else(truncated)??;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn read_string(buf: &mut BytesMut) -> Option<Result<String>> {
    if buf.remaining() < 2 {
        return None;
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return None;
    }
    let raw = buf.split_to(len);
    Some(
        String::from_utf8(raw.to_vec())
            .map_err(|_| Error::Protocol("header is not valid UTF-8".into())),
    )
}

#[cfg(test)]
mod tests;
