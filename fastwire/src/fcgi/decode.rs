use super::error::RecordError;
use super::params::decode_params;
use super::record::{ProtocolStatus, Record, RecordType, Role};
use super::{BODY_LEN, FLAG_KEEP_CONN, HEADER_LEN, VERSION_1};

use bytes::{Buf, BytesMut};

/// Fixed 8-byte record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub version: u8,
    pub kind: RecordType,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
}

impl RecordHeader {
    /// Parses a header from the first 8 bytes of `bytes`.
    ///
    /// Returns `None` if fewer than 8 bytes are available.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let header: &[u8; HEADER_LEN] = bytes.get(..HEADER_LEN)?.try_into().ok()?;

        Some(Self {
            version: header[0],
            kind: RecordType::from_code(header[1]),
            request_id: u16::from_be_bytes([header[2], header[3]]),
            content_length: u16::from_be_bytes([header[4], header[5]]),
            padding_length: header[6],
        })
    }

    /// Length of the whole frame including header and padding.
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.content_length as usize + self.padding_length as usize
    }
}

/// Takes one complete frame off the front of `buf`.
///
/// Returns `Ok(None)` and leaves `buf` untouched while the frame is still
/// incomplete. A frame with an unknown type is returned as
/// [`RecordType::Other`] with its raw content so the caller can skip it.
///
/// A PARAMS record always keeps its raw content. Its `params` are filled
/// when the content holds whole pairs; a pair split across records leaves
/// them empty, and the caller joins the stream and decodes it whole.
pub fn decode_record(buf: &mut BytesMut) -> Result<Option<Record>, RecordError> {
    let Some(header) = RecordHeader::parse(&buf[..]) else {
        return Ok(None);
    };

    if header.version != VERSION_1 {
        return Err(RecordError::UnsupportedVersion(header.version));
    }

    let frame_len = header.frame_len();
    if buf.len() < frame_len {
        buf.reserve(frame_len - buf.len());
        return Ok(None);
    }

    let mut frame = buf.split_to(frame_len);
    frame.advance(HEADER_LEN);

    let content = &frame[..header.content_length as usize];

    let mut record = Record {
        kind: header.kind,
        request_id: header.request_id,
        ..Record::default()
    };

    match header.kind {
        RecordType::BeginRequest => {
            let body = fixed_body(header.kind, content)?;

            record.role = Role::from_code(u16::from_be_bytes([body[0], body[1]]));
            record.keep_alive = body[2] & FLAG_KEEP_CONN != 0;
        }

        RecordType::EndRequest => {
            let body = fixed_body(header.kind, content)?;

            record.app_status = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
            record.protocol_status = ProtocolStatus::from_code(body[4]);
        }

        RecordType::Params => {
            record.content = content.to_vec();
            record.params = decode_params(content).unwrap_or_default();
        }

        _ => record.content = content.to_vec(),
    }

    Ok(Some(record))
}

fn fixed_body(kind: RecordType, content: &[u8]) -> Result<&[u8], RecordError> {
    if content.len() != BODY_LEN {
        return Err(RecordError::InvalidContentLength {
            kind,
            expected: BODY_LEN,
            actual: content.len(),
        });
    }

    Ok(content)
}

/// Incremental decoder fed with arbitrary byte chunks.
///
/// Bytes are buffered until a whole frame is present, so chunk
/// boundaries never have to line up with record boundaries.
#[derive(Debug, Default)]
pub struct RecordDecoder {
    buffer: BytesMut,
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Returns the next complete record, if any.
    pub fn next_record(&mut self) -> Result<Option<Record>, RecordError> {
        decode_record(&mut self.buffer)
    }

    /// Bytes received but not yet consumed by a complete record.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
