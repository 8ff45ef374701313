//! Frame codec for the five packet kinds.
//!
//! Decoding is strict: the header is validated before the payload is looked
//! at, string length fields are bounds-checked against what is actually left
//! in the buffer, and trailing bytes are rejected. Encoding refuses any
//! frame that would not fit in one datagram.

use crate::{DEFAULT_MAX_MESSAGE_LEN, DEFAULT_MAX_TOKEN_LEN, HEADER_LEN, MAX_DATAGRAM_LEN};
use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Closed set of packet kinds, tagged by the first byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    Auth = 0,
    State = 1,
    Event = 2,
    Message = 3,
    Disconnect = 4,
}

impl PacketKind {
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PacketKind {
    type Error = CodecError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(PacketKind::Auth),
            1 => Ok(PacketKind::State),
            2 => Ok(PacketKind::Event),
            3 => Ok(PacketKind::Message),
            4 => Ok(PacketKind::Disconnect),
            other => Err(CodecError::UnknownKind(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The buffer ends before the header or the declared payload does.
    #[error("truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("unknown packet kind {0}")]
    UnknownKind(u8),
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("frame of {len} bytes exceeds the {max}-byte datagram limit")]
    TooLarge { len: usize, max: usize },
}

/// A fully decoded packet.
///
/// The same shapes are used in both directions. A client's State record is
/// an opaque blob owned by the simulation; the hub's outbound State record is
/// an encoded [`Snapshot`](crate::Snapshot).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Auth { token: String },
    State { record: Vec<u8> },
    Event { tag: u8, payload: Vec<u8> },
    Message { text: String },
    Disconnect,
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Auth { .. } => PacketKind::Auth,
            Packet::State { .. } => PacketKind::State,
            Packet::Event { .. } => PacketKind::Event,
            Packet::Message { .. } => PacketKind::Message,
            Packet::Disconnect => PacketKind::Disconnect,
        }
    }
}

/// Validates a frame header and returns the kind with its exact payload.
pub fn split_frame(bytes: &[u8]) -> Result<(PacketKind, &[u8]), CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::Truncated {
            needed: HEADER_LEN,
            available: bytes.len(),
        });
    }

    let kind = PacketKind::try_from(bytes[0])?;
    let declared = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    let body = &bytes[HEADER_LEN..];

    if body.len() < declared {
        return Err(CodecError::Truncated {
            needed: declared,
            available: body.len(),
        });
    }
    if body.len() > declared {
        return Err(CodecError::Malformed(format!(
            "{} trailing bytes after {}-byte payload",
            body.len() - declared,
            declared
        )));
    }

    Ok((kind, body))
}

/// Encodes a packet into a complete frame of at most [`MAX_DATAGRAM_LEN`] bytes.
pub fn encode(packet: &Packet) -> Result<Vec<u8>, CodecError> {
    let mut payload = BytesMut::new();
    match packet {
        Packet::Auth { token } => put_string(&mut payload, token)?,
        Packet::State { record } => payload.put_slice(record),
        Packet::Event { tag, payload: body } => {
            payload.put_u8(*tag);
            payload.put_slice(body);
        }
        Packet::Message { text } => put_string(&mut payload, text)?,
        Packet::Disconnect => {}
    }

    let len = HEADER_LEN + payload.len();
    if len > MAX_DATAGRAM_LEN {
        return Err(CodecError::TooLarge {
            len,
            max: MAX_DATAGRAM_LEN,
        });
    }

    let mut frame = BytesMut::with_capacity(len);
    frame.put_u8(packet.kind().tag());
    frame.put_u32(length_field(payload.len())?);
    frame.put_slice(&payload);
    Ok(frame.to_vec())
}

fn put_string(buf: &mut BytesMut, value: &str) -> Result<(), CodecError> {
    buf.put_u32(length_field(value.len())?);
    buf.put_slice(value.as_bytes());
    Ok(())
}

fn length_field(len: usize) -> Result<u32, CodecError> {
    u32::try_from(len).map_err(|_| CodecError::TooLarge {
        len,
        max: MAX_DATAGRAM_LEN,
    })
}

/// Payload decoder carrying the configured size limits.
#[derive(Debug, Clone)]
pub struct Codec {
    pub max_message_len: usize,
    pub max_token_len: usize,
}

impl Default for Codec {
    fn default() -> Self {
        Self {
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            max_token_len: DEFAULT_MAX_TOKEN_LEN,
        }
    }
}

impl Codec {
    pub fn new(max_message_len: usize, max_token_len: usize) -> Self {
        Self {
            max_message_len,
            max_token_len,
        }
    }

    /// Decodes the payload of a frame whose header declared `kind`.
    pub fn decode(&self, kind: PacketKind, payload: &[u8]) -> Result<Packet, CodecError> {
        match kind {
            PacketKind::Auth => Ok(Packet::Auth {
                token: self.decode_auth(payload)?,
            }),
            PacketKind::State => Ok(Packet::State {
                record: self.decode_state(payload)?,
            }),
            PacketKind::Event => {
                let (tag, payload) = self.decode_event(payload)?;
                Ok(Packet::Event { tag, payload })
            }
            PacketKind::Message => Ok(Packet::Message {
                text: self.decode_message(payload)?,
            }),
            PacketKind::Disconnect => {
                self.decode_disconnect(payload)?;
                Ok(Packet::Disconnect)
            }
        }
    }

    pub fn decode_auth(&self, payload: &[u8]) -> Result<String, CodecError> {
        read_string(payload, self.max_token_len, "auth token")
    }

    /// State records are opaque to the codec.
    pub fn decode_state(&self, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(payload.to_vec())
    }

    pub fn decode_event(&self, payload: &[u8]) -> Result<(u8, Vec<u8>), CodecError> {
        match payload.split_first() {
            Some((tag, body)) => Ok((*tag, body.to_vec())),
            None => Err(CodecError::Malformed("event without a type tag".into())),
        }
    }

    pub fn decode_message(&self, payload: &[u8]) -> Result<String, CodecError> {
        read_string(payload, self.max_message_len, "message")
    }

    pub fn decode_disconnect(&self, payload: &[u8]) -> Result<(), CodecError> {
        if payload.is_empty() {
            Ok(())
        } else {
            Err(CodecError::Malformed(format!(
                "disconnect carries {} payload bytes",
                payload.len()
            )))
        }
    }

    /// Validates the header and decodes a complete frame.
    pub fn decode_frame(&self, bytes: &[u8]) -> Result<Packet, CodecError> {
        let (kind, payload) = split_frame(bytes)?;
        self.decode(kind, payload)
    }
}

fn read_string(mut buf: &[u8], limit: usize, what: &str) -> Result<String, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::Malformed(format!("{} is missing its length", what)));
    }

    let len = buf.get_u32() as usize;
    if len > buf.remaining() {
        return Err(CodecError::Malformed(format!(
            "{} length {} exceeds remaining {} bytes",
            what,
            len,
            buf.remaining()
        )));
    }
    if len > limit {
        return Err(CodecError::Malformed(format!(
            "{} of {} bytes exceeds limit of {}",
            what, len, limit
        )));
    }
    if len < buf.remaining() {
        return Err(CodecError::Malformed(format!(
            "{} followed by {} stray bytes",
            what,
            buf.remaining() - len
        )));
    }

    String::from_utf8(buf[..len].to_vec())
        .map_err(|_| CodecError::Malformed(format!("{} is not valid UTF-8", what)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(kind: u8, declared: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![kind];
        out.extend_from_slice(&declared.to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_valid_packets_decode_to_themselves() {
        let codec = Codec::default();
        let packets = vec![
            Packet::Auth {
                token: "secret".to_string(),
            },
            Packet::State {
                record: vec![9, 8, 7, 6],
            },
            Packet::State { record: vec![] },
            Packet::Event {
                tag: 3,
                payload: vec![1, 2],
            },
            Packet::Message {
                text: "héllo wörld".to_string(),
            },
            Packet::Disconnect,
        ];

        for packet in packets {
            let bytes = encode(&packet).unwrap();
            assert_eq!(codec.decode_frame(&bytes), Ok(packet));
        }
    }

    #[test]
    fn test_header_layout_is_big_endian() {
        let bytes = encode(&Packet::State {
            record: vec![0xAA; 258],
        })
        .unwrap();
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..5], &[0, 0, 1, 2]);
        assert_eq!(bytes.len(), HEADER_LEN + 258);
    }

    #[test]
    fn test_short_header_is_truncated() {
        let codec = Codec::default();
        assert_eq!(
            codec.decode_frame(&[1, 0, 0]),
            Err(CodecError::Truncated {
                needed: HEADER_LEN,
                available: 3
            })
        );
        assert!(matches!(
            codec.decode_frame(&[]),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn test_declared_length_beyond_buffer_is_truncated() {
        let codec = Codec::default();
        let bytes = frame(1, 12, &[0u8; 8]);
        assert_eq!(
            codec.decode_frame(&bytes),
            Err(CodecError::Truncated {
                needed: 12,
                available: 8
            })
        );
    }

    #[test]
    fn test_every_prefix_of_a_frame_is_truncated() {
        let codec = Codec::default();
        let bytes = encode(&Packet::Message {
            text: "prefixes".to_string(),
        })
        .unwrap();

        for cut in 0..bytes.len() {
            assert!(
                matches!(
                    codec.decode_frame(&bytes[..cut]),
                    Err(CodecError::Truncated { .. })
                ),
                "prefix of {} bytes",
                cut
            );
        }
    }

    #[test]
    fn test_unknown_kind() {
        let codec = Codec::default();
        assert_eq!(
            codec.decode_frame(&frame(9, 0, &[])),
            Err(CodecError::UnknownKind(9))
        );
        assert_eq!(PacketKind::try_from(5), Err(CodecError::UnknownKind(5)));
    }

    #[test]
    fn test_trailing_bytes_are_malformed() {
        let codec = Codec::default();
        let bytes = frame(4, 0, &[1]);
        assert!(matches!(
            codec.decode_frame(&bytes),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_string_length_past_buffer_is_malformed() {
        let codec = Codec::default();
        let mut payload = 50u32.to_be_bytes().to_vec();
        payload.extend_from_slice(b"short");
        let bytes = frame(3, payload.len() as u32, &payload);

        assert!(matches!(
            codec.decode_frame(&bytes),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_string_missing_length_is_malformed() {
        let codec = Codec::default();
        assert!(matches!(
            codec.decode(PacketKind::Auth, &[0, 1]),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_oversized_message_is_malformed() {
        let codec = Codec::new(4, 16);
        let bytes = encode(&Packet::Message {
            text: "too long".to_string(),
        })
        .unwrap();
        assert!(matches!(
            codec.decode_frame(&bytes),
            Err(CodecError::Malformed(_))
        ));

        let fits = encode(&Packet::Message {
            text: "ok".to_string(),
        })
        .unwrap();
        assert!(codec.decode_frame(&fits).is_ok());
    }

    #[test]
    fn test_oversized_token_is_malformed() {
        let codec = Codec::new(512, 3);
        let bytes = encode(&Packet::Auth {
            token: "abcd".to_string(),
        })
        .unwrap();
        assert!(matches!(
            codec.decode_frame(&bytes),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let codec = Codec::default();
        let mut payload = 2u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&[0xC3, 0x28]);
        assert!(matches!(
            codec.decode(PacketKind::Message, &payload),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn test_event_requires_tag() {
        let codec = Codec::default();
        assert!(matches!(
            codec.decode(PacketKind::Event, &[]),
            Err(CodecError::Malformed(_))
        ));
        assert_eq!(
            codec.decode(PacketKind::Event, &[7]),
            Ok(Packet::Event {
                tag: 7,
                payload: vec![]
            })
        );
    }

    #[test]
    fn test_packet_kind_matches_tag() {
        for tag in 0..=4u8 {
            let kind = PacketKind::try_from(tag).unwrap();
            assert_eq!(kind.tag(), tag);
        }
        assert_eq!(Packet::Disconnect.kind(), PacketKind::Disconnect);
    }

    #[test]
    fn test_frame_larger_than_a_datagram_is_refused() {
        let result = encode(&Packet::State {
            record: vec![0; MAX_DATAGRAM_LEN],
        });
        assert_eq!(
            result,
            Err(CodecError::TooLarge {
                len: HEADER_LEN + MAX_DATAGRAM_LEN,
                max: MAX_DATAGRAM_LEN
            })
        );

        let largest = encode(&Packet::State {
            record: vec![0; MAX_DATAGRAM_LEN - HEADER_LEN],
        })
        .unwrap();
        assert_eq!(largest.len(), MAX_DATAGRAM_LEN);
    }
}
