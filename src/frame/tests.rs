//! Tests for frame encoding and decoding.
//! 帧编解码的测试。

use super::*;

fn encoded(frame: &Frame) -> BytesMut {
    let mut buf = BytesMut::new();
    frame.encode(&mut buf).unwrap();
    buf
}

#[test]
fn test_partial_frame_waits_for_more_bytes() {
    let full = encoded(&Frame::Ping {
        ack: false,
        payload: 42,
    });

    let mut partial = BytesMut::from(&full[..FRAME_HEADER_SIZE + 3]);
    assert_eq!(Frame::decode(&mut partial).unwrap(), None);
    // Nothing is consumed until the frame is complete.
    assert_eq!(partial.len(), FRAME_HEADER_SIZE + 3);

    partial.extend_from_slice(&full[FRAME_HEADER_SIZE + 3..]);
    assert_eq!(
        Frame::decode(&mut partial).unwrap(),
        Some(Frame::Ping {
            ack: false,
            payload: 42
        })
    );
    assert!(partial.is_empty());
}

#[test]
fn test_headers_keep_order_and_flags() {
    let headers: Metadata = [(":path", "/echo.Echo/Say"), ("te", "trailers")]
        .into_iter()
        .collect();
    let mut buf = encoded(&Frame::Headers {
        stream_id: 3,
        end_stream: false,
        headers: headers.clone(),
    });

    match Frame::decode(&mut buf).unwrap() {
        Some(Frame::Headers {
            stream_id,
            end_stream,
            headers: decoded,
        }) => {
            assert_eq!(stream_id, 3);
            assert!(!end_stream);
            assert_eq!(decoded, headers);
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[test]
fn test_unknown_frame_types_are_skipped() {
    let mut buf = BytesMut::new();
    // A PRIORITY frame (type 0x2) with 5 bytes of payload.
    buf.extend_from_slice(&[0, 0, 5, 0x2, 0, 0, 0, 0, 1, 0, 0, 0, 0, 16]);
    Frame::GoAway {
        last_stream_id: 7,
        reason: Reason::ENHANCE_YOUR_CALM,
        debug_data: Bytes::from_static(b"too_many_pings"),
    }
    .encode(&mut buf)
    .unwrap();

    match Frame::decode(&mut buf).unwrap() {
        Some(Frame::GoAway {
            last_stream_id,
            reason,
            debug_data,
        }) => {
            assert_eq!(last_stream_id, 7);
            assert_eq!(reason, Reason::ENHANCE_YOUR_CALM);
            assert_eq!(&debug_data[..], b"too_many_pings");
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[test]
fn test_malformed_ping_is_a_protocol_error() {
    let mut buf = BytesMut::from(&[0u8, 0, 4, TYPE_PING, 0, 0, 0, 0, 0, 1, 2, 3, 4][..]);
    assert!(matches!(Frame::decode(&mut buf), Err(Error::Protocol(_))));
}

#[test]
fn test_settings_only_carry_present_values() {
    let frame = Frame::Settings {
        ack: false,
        settings: Settings {
            initial_window_size: Some(65_535),
            ..Default::default()
        },
    };
    let mut buf = encoded(&frame);
    assert_eq!(buf.len(), FRAME_HEADER_SIZE + 6);
    assert_eq!(Frame::decode(&mut buf).unwrap(), Some(frame));
}

#[test]
fn test_preface_is_stripped_incrementally() {
    let mut buf = BytesMut::from(&PREFACE[..10]);
    assert!(!Frame::strip_preface(&mut buf).unwrap());

    buf.extend_from_slice(&PREFACE[10..]);
    buf.extend_from_slice(b"rest");
    assert!(Frame::strip_preface(&mut buf).unwrap());
    assert_eq!(&buf[..], b"rest");

    let mut garbage = BytesMut::from(&b"GET / HTTP/1.1\r\n"[..]);
    assert!(Frame::strip_preface(&mut garbage).is_err());
}

#[test]
fn test_reason_maps_to_status() {
    assert_eq!(Reason::ENHANCE_YOUR_CALM.to_status().code(), Code::ResourceExhausted);
    assert_eq!(Reason::CANCEL.to_status().code(), Code::Cancelled);
    assert_eq!(Reason::NO_ERROR.to_status().code(), Code::Unavailable);
    assert_eq!(Reason(0xff).to_status().code(), Code::Unknown);
}

#[test]
fn test_oversized_header_value_is_rejected() {
    let mut headers = Metadata::new();
    headers.insert("x-big", "v".repeat(u16::MAX as usize + 1));
    let mut buf = BytesMut::new();
    let result = Frame::Headers {
        stream_id: 1,
        end_stream: false,
        headers,
    }
    .encode(&mut buf);
    assert!(matches!(result, Err(Error::Protocol(_))));
    assert!(buf.is_empty());
}

#[test]
fn test_payload_beyond_length_field_is_rejected() {
    let mut buf = BytesMut::new();
    let result = Frame::Data {
        stream_id: 1,
        end_stream: true,
        payload: Bytes::from(vec![0u8; MAX_FRAME_PAYLOAD + 1]),
    }
    .encode(&mut buf);
    assert!(matches!(result, Err(Error::Protocol(_))));
    assert!(buf.is_empty());
}
