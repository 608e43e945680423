use super::error::RecordError;
use super::params::encode_params;
use super::record::{Record, RecordType, Role};
use super::{BODY_LEN, FLAG_KEEP_CONN, HEADER_LEN, MAX_CONTENT_LEN, NULL_REQUEST_ID, VERSION_1};

use bytes::{BufMut, Bytes, BytesMut};
use std::borrow::Cow;

/// Padding that brings `len` up to the next multiple of 8.
pub fn padding_for(len: usize) -> usize {
    (8 - len % 8) % 8
}

impl Record {
    /// The variable payload of a stream record.
    ///
    /// PARAMS records encode their pairs; when `params` is empty the raw
    /// `content` is used instead, which covers both the stream terminator
    /// and pre-encoded chunks.
    fn payload(&self) -> Cow<'_, [u8]> {
        if self.kind == RecordType::Params && !self.params.is_empty() {
            let pairs = self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()));
            Cow::Owned(encode_params(pairs).bytes.to_vec())
        } else {
            Cow::Borrowed(&self.content)
        }
    }

    /// Checks that the record can be serialized.
    ///
    /// Rules, in order:
    /// - the kind is one of the five supported kinds (`InvalidType`)
    /// - an END_REQUEST carries a defined completion code (`InvalidSubType`)
    /// - a BEGIN_REQUEST asks for the responder role (`InvalidRole`)
    /// - the request id is not the reserved 0 (`InvalidRequestId`)
    /// - the payload fits in 65535 bytes (`OversizeData`)
    pub fn validate(&self) -> Result<(), RecordError> {
        self.check(self.payload().len())
    }

    fn check(&self, payload_len: usize) -> Result<(), RecordError> {
        if !self.kind.is_supported() {
            return Err(RecordError::InvalidType(self.kind.code()));
        }

        if self.kind == RecordType::EndRequest && !self.protocol_status.is_defined() {
            return Err(RecordError::InvalidSubType(self.protocol_status.code()));
        }

        if self.kind == RecordType::BeginRequest && self.role != Role::Responder {
            return Err(RecordError::InvalidRole(self.role.code()));
        }

        if self.request_id == NULL_REQUEST_ID {
            return Err(RecordError::InvalidRequestId);
        }

        if payload_len > MAX_CONTENT_LEN {
            return Err(RecordError::OversizeData(payload_len));
        }

        Ok(())
    }

    /// Validates the record and serializes it into a new frame.
    pub fn encode(&self) -> Result<Bytes, RecordError> {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Validates the record and appends its frame to `buf`.
    ///
    /// `buf` is left untouched when validation fails.
    pub fn encode_into(&self, buf: &mut BytesMut) -> Result<(), RecordError> {
        let payload = self.payload();
        self.check(payload.len())?;

        match self.kind {
            RecordType::BeginRequest => {
                buf.reserve(HEADER_LEN + BODY_LEN);
                put_header(buf, self.kind, self.request_id, BODY_LEN as u16, 0);

                buf.put_u16(self.role.code());
                buf.put_u8(if self.keep_alive { FLAG_KEEP_CONN } else { 0 });
                buf.put_bytes(0, 5);
            }

            RecordType::EndRequest => {
                buf.reserve(HEADER_LEN + BODY_LEN);
                put_header(buf, self.kind, self.request_id, BODY_LEN as u16, 0);

                buf.put_u32(self.app_status);
                buf.put_u8(self.protocol_status.code());
                buf.put_bytes(0, 3);
            }

            _ => {
                let padding = padding_for(payload.len());

                buf.reserve(HEADER_LEN + payload.len() + padding);
                put_header(
                    buf,
                    self.kind,
                    self.request_id,
                    payload.len() as u16,
                    padding as u8,
                );

                buf.put_slice(&payload);
                buf.put_bytes(0, padding);
            }
        }

        Ok(())
    }
}

/// version, type, request id, content length, padding length, reserved.
fn put_header(buf: &mut BytesMut, kind: RecordType, request_id: u16, len: u16, padding: u8) {
    buf.put_u8(VERSION_1);
    buf.put_u8(kind.code());
    buf.put_u16(request_id);
    buf.put_u16(len);
    buf.put_u8(padding);
    buf.put_u8(0);
}

/// Encodes several records back to back, stopping at the first invalid one.
pub fn encode_all<'a>(records: impl IntoIterator<Item = &'a Record>) -> Result<Bytes, RecordError> {
    let mut buf = BytesMut::new();

    for record in records {
        record.encode_into(&mut buf)?;
    }

    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fcgi::record::ProtocolStatus;

    #[test]
    fn test_begin_request_layout() {
        let frame = Record::begin_request(7, Role::Responder, true)
            .encode()
            .unwrap();

        assert_eq!(
            &frame[..],
            &[1, 1, 0, 7, 0, 8, 0, 0, 0, 1, 1, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_begin_request_without_keep_alive() {
        let frame = Record::begin_request(0x1234, Role::Responder, false)
            .encode()
            .unwrap();

        assert_eq!(&frame[2..4], &[0x12, 0x34]);
        assert_eq!(frame[10], 0);
    }

    #[test]
    fn test_end_request_layout() {
        let frame = Record::end_request(258, ProtocolStatus::Overloaded, 0)
            .encode()
            .unwrap();

        assert_eq!(
            &frame[..],
            &[1, 3, 1, 2, 0, 8, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0]
        );
    }

    #[test]
    fn test_stdout_is_padded_to_eight() {
        let frame = Record::stdout(1, b"hello".to_vec()).encode().unwrap();

        assert_eq!(&frame[..8], &[1, 6, 0, 1, 0, 5, 3, 0]);
        assert_eq!(&frame[8..13], b"hello");
        assert_eq!(&frame[13..], &[0, 0, 0]);
    }

    #[test]
    fn test_aligned_payload_has_no_padding() {
        let frame = Record::stdin(1, vec![0xaa; 16]).encode().unwrap();

        assert_eq!(frame[6], 0);
        assert_eq!(frame.len(), 8 + 16);
    }

    #[test]
    fn test_empty_stream_terminator() {
        let frame = Record::end_of_stream(RecordType::Stdin, 3)
            .encode()
            .unwrap();

        assert_eq!(&frame[..], &[1, 5, 0, 3, 0, 0, 0, 0]);
    }

    #[test]
    fn test_params_record_carries_encoded_pairs() {
        let frame = Record::params(1, [("A", "B")]).encode().unwrap();

        assert_eq!(&frame[..8], &[1, 4, 0, 1, 0, 4, 4, 0]);
        assert_eq!(&frame[8..12], &[1, 1, b'A', b'B']);
        assert_eq!(&frame[12..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_invalid_kind_is_rejected() {
        let record = Record {
            request_id: 1,
            ..Record::default()
        };
        assert_eq!(record.encode(), Err(RecordError::InvalidType(0)));

        let record = Record {
            kind: RecordType::Other(2),
            request_id: 1,
            ..Record::default()
        };
        assert_eq!(record.encode(), Err(RecordError::InvalidType(2)));
    }

    #[test]
    fn test_undefined_protocol_status_is_rejected() {
        let record = Record::end_request(1, ProtocolStatus::Other(9), 0);
        assert_eq!(record.encode(), Err(RecordError::InvalidSubType(9)));
    }

    #[test]
    fn test_non_responder_role_is_rejected() {
        let record = Record::begin_request(1, Role::Filter, false);
        assert_eq!(record.encode(), Err(RecordError::InvalidRole(3)));
    }

    #[test]
    fn test_reserved_request_id_is_rejected() {
        assert_eq!(
            Record::stdout(0, b"x".to_vec()).encode(),
            Err(RecordError::InvalidRequestId)
        );
        assert_eq!(
            Record::begin_request(0, Role::Responder, false).encode(),
            Err(RecordError::InvalidRequestId)
        );
    }

    #[test]
    fn test_oversize_payload_is_rejected() {
        let record = Record::stdin(1, vec![0; MAX_CONTENT_LEN + 1]);
        assert_eq!(
            record.encode(),
            Err(RecordError::OversizeData(MAX_CONTENT_LEN + 1))
        );

        let record = Record::stdin(1, vec![0; MAX_CONTENT_LEN]);
        assert_eq!(record.encode().unwrap().len(), 8 + MAX_CONTENT_LEN + 1);
    }

    #[test]
    fn test_oversize_params_are_rejected() {
        let value = "v".repeat(MAX_CONTENT_LEN);
        let record = Record::params(1, [("NAME", value)]);

        assert!(matches!(
            record.validate(),
            Err(RecordError::OversizeData(_))
        ));
    }

    #[test]
    fn test_failed_encode_leaves_buffer_untouched() {
        let mut buf = BytesMut::from(&b"prefix"[..]);
        let record = Record::begin_request(1, Role::Authorizer, false);

        assert!(record.encode_into(&mut buf).is_err());
        assert_eq!(&buf[..], b"prefix");
    }

    #[test]
    fn test_encode_all_concatenates_frames() {
        let records = [
            Record::stdout(1, b"ab".to_vec()),
            Record::end_of_stream(RecordType::Stdout, 1),
        ];

        let bytes = encode_all(&records).unwrap();
        assert_eq!(bytes.len(), 16 + 8);
    }

    #[test]
    fn test_stream_chunks_split_at_max_content() {
        let data = vec![1u8; MAX_CONTENT_LEN * 2 + 10];
        let chunks = Record::stream_chunks(RecordType::Stdin, 4, &data);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].content.len(), MAX_CONTENT_LEN);
        assert_eq!(chunks[2].content.len(), 10);
        assert!(chunks.iter().all(|c| c.validate().is_ok()));
        assert!(Record::stream_chunks(RecordType::Stdin, 4, &[]).is_empty());
    }
}
