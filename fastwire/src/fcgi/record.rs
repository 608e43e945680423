use super::MAX_CONTENT_LEN;
use super::error::RecordError;
use super::params::decode_params;

/// Kind of a FastCGI record.
///
/// Only the five kinds this engine exchanges can be encoded. Anything
/// else read off the wire is kept as [`RecordType::Other`] so the stream
/// stays in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RecordType {
    /// No kind assigned yet.
    #[default]
    None,
    BeginRequest,
    EndRequest,
    Params,
    Stdin,
    Stdout,
    Other(u8),
}

impl RecordType {
    /// Wire value of the type byte.
    pub fn code(self) -> u8 {
        match self {
            RecordType::None => 0,
            RecordType::BeginRequest => 1,
            RecordType::EndRequest => 3,
            RecordType::Params => 4,
            RecordType::Stdin => 5,
            RecordType::Stdout => 6,
            RecordType::Other(code) => code,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0 => RecordType::None,
            1 => RecordType::BeginRequest,
            3 => RecordType::EndRequest,
            4 => RecordType::Params,
            5 => RecordType::Stdin,
            6 => RecordType::Stdout,
            other => RecordType::Other(other),
        }
    }

    /// Whether the encoder knows how to lay this kind out.
    pub fn is_supported(self) -> bool {
        !matches!(self, RecordType::None | RecordType::Other(_))
    }

    /// Whether the kind carries a variable-length, padded payload.
    pub fn is_stream(self) -> bool {
        matches!(
            self,
            RecordType::Params | RecordType::Stdin | RecordType::Stdout
        )
    }
}

/// Role requested by a BEGIN_REQUEST record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    #[default]
    Responder,
    Authorizer,
    Filter,
    Other(u16),
}

impl Role {
    pub fn code(self) -> u16 {
        match self {
            Role::Responder => 1,
            Role::Authorizer => 2,
            Role::Filter => 3,
            Role::Other(code) => code,
        }
    }

    pub fn from_code(code: u16) -> Self {
        match code {
            1 => Role::Responder,
            2 => Role::Authorizer,
            3 => Role::Filter,
            other => Role::Other(other),
        }
    }
}

/// Protocol-level completion code of an END_REQUEST record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolStatus {
    #[default]
    RequestComplete,
    CantMultiplexConnection,
    Overloaded,
    UnknownRole,
    Other(u8),
}

impl ProtocolStatus {
    pub fn code(self) -> u8 {
        match self {
            ProtocolStatus::RequestComplete => 0,
            ProtocolStatus::CantMultiplexConnection => 1,
            ProtocolStatus::Overloaded => 2,
            ProtocolStatus::UnknownRole => 3,
            ProtocolStatus::Other(code) => code,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0 => ProtocolStatus::RequestComplete,
            1 => ProtocolStatus::CantMultiplexConnection,
            2 => ProtocolStatus::Overloaded,
            3 => ProtocolStatus::UnknownRole,
            other => ProtocolStatus::Other(other),
        }
    }

    /// Whether this is one of the four defined completion codes.
    pub fn is_defined(self) -> bool {
        !matches!(self, ProtocolStatus::Other(_))
    }
}

/// A single FastCGI record.
///
/// Built per frame, validated and serialized by
/// [`encode`](Record::encode), then discarded. Which fields matter
/// depends on `kind`:
/// - BEGIN_REQUEST: `role`, `keep_alive`
/// - END_REQUEST: `protocol_status`, `app_status`
/// - PARAMS: `params`, or pre-encoded `content` when `params` is empty
/// - STDIN / STDOUT: `content`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    pub kind: RecordType,
    pub request_id: u16,
    pub role: Role,
    pub keep_alive: bool,
    pub protocol_status: ProtocolStatus,
    pub app_status: u32,
    pub content: Vec<u8>,
    pub params: Vec<(String, String)>,
}

impl Record {
    pub fn begin_request(request_id: u16, role: Role, keep_alive: bool) -> Self {
        Self {
            kind: RecordType::BeginRequest,
            request_id,
            role,
            keep_alive,
            ..Self::default()
        }
    }

    pub fn end_request(request_id: u16, protocol_status: ProtocolStatus, app_status: u32) -> Self {
        Self {
            kind: RecordType::EndRequest,
            request_id,
            protocol_status,
            app_status,
            ..Self::default()
        }
    }

    pub fn params<K, V>(request_id: u16, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            kind: RecordType::Params,
            request_id,
            params: params
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn stdin(request_id: u16, content: impl Into<Vec<u8>>) -> Self {
        Self::stream(RecordType::Stdin, request_id, content.into())
    }

    pub fn stdout(request_id: u16, content: impl Into<Vec<u8>>) -> Self {
        Self::stream(RecordType::Stdout, request_id, content.into())
    }

    fn stream(kind: RecordType, request_id: u16, content: Vec<u8>) -> Self {
        Self {
            kind,
            request_id,
            content,
            ..Self::default()
        }
    }

    /// The empty record that terminates a PARAMS, STDIN or STDOUT stream.
    pub fn end_of_stream(kind: RecordType, request_id: u16) -> Self {
        Self::stream(kind, request_id, Vec::new())
    }

    /// Splits `data` into stream records of at most 65535 content bytes.
    ///
    /// Empty `data` yields no records; the caller appends the terminator
    /// with [`end_of_stream`](Self::end_of_stream).
    pub fn stream_chunks(kind: RecordType, request_id: u16, data: &[u8]) -> Vec<Self> {
        data.chunks(MAX_CONTENT_LEN)
            .map(|chunk| Self::stream(kind, request_id, chunk.to_vec()))
            .collect()
    }

    /// Parses the name-value pairs carried in `content`.
    ///
    /// Decoded PARAMS records keep their raw content; this turns it into
    /// pairs once the content is known to hold whole pairs.
    pub fn decoded_params(&self) -> Result<Vec<(String, String)>, RecordError> {
        decode_params(&self.content)
    }
}
