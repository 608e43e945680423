use super::record::RecordType;

use thiserror::Error;

/// Failures raised while validating, encoding or decoding a record.
///
/// Validation failures abort the record entirely: no partial frame is
/// ever produced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("record type {0} is not a supported record kind")]
    InvalidType(u8),

    #[error("protocol status {0} is not a defined completion code")]
    InvalidSubType(u8),

    #[error("role {0} is not the responder role")]
    InvalidRole(u16),

    #[error("request id 0 is reserved for management records")]
    InvalidRequestId,

    #[error("record content of {0} bytes exceeds the 65535 byte limit")]
    OversizeData(usize),

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("{kind:?} record must carry {expected} content bytes, got {actual}")]
    InvalidContentLength {
        kind: RecordType,
        expected: usize,
        actual: usize,
    },

    #[error("malformed name-value pairs: {0}")]
    MalformedParams(&'static str),
}
