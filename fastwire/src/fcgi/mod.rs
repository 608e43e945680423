//! FastCGI version 1 record codec and a client channel built on it.
//!
//! Every frame starts with an 8-byte header: version, type, request id,
//! content length, padding length and one reserved byte, with multi-byte
//! fields in network order. Content is padded to a multiple of 8.

mod channel;
mod decode;
mod encode;
mod error;
mod params;
mod record;

pub use channel::{ChannelError, FcgiChannel, FcgiClient, FcgiResponse, ResponseReader};
pub use decode::{RecordDecoder, RecordHeader, decode_record};
pub use encode::{encode_all, padding_for};
pub use error::RecordError;
pub use params::{
    EncodedParams, MAX_PARAM_LEN, decode_params, encode_params, length_width, put_length,
};
pub use record::{ProtocolStatus, Record, RecordType, Role};

/// The only protocol version spoken.
pub const VERSION_1: u8 = 1;

/// Size of the fixed record header.
pub const HEADER_LEN: usize = 8;

/// Size of the BEGIN_REQUEST and END_REQUEST bodies.
pub const BODY_LEN: usize = 8;

/// Largest content a single record can carry.
pub const MAX_CONTENT_LEN: usize = 0xffff;

/// Request id reserved for management records.
pub const NULL_REQUEST_ID: u16 = 0;

/// BEGIN_REQUEST flag asking the application to keep the connection open.
pub const FLAG_KEEP_CONN: u8 = 1;
