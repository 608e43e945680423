use super::decode::RecordDecoder;
use super::error::RecordError;
use super::params::encode_params;
use super::record::{ProtocolStatus, Record, RecordType, Role};
use crate::adapter::BlockingReader;
use crate::executor::QueueHandle;
use crate::net::{
    HandlerContext, Processor, ProcessorState, SocketHandler, TcpTransport, Transport,
};

use bytes::BytesMut;
use log::debug;
use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("record error: {0}")]
    Record(#[from] RecordError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("connection closed before END_REQUEST")]
    ClosedBeforeEnd,
}

/// Processor for a connection to an upstream FastCGI application.
///
/// Inbound bytes go straight into a [`BlockingReader`]; decoding happens
/// on the consumer side in a [`ResponseReader`]. Closing the connection
/// closes the reader so a parked consumer wakes up.
pub struct FcgiChannel {
    reader: Arc<BlockingReader>,
    state: ProcessorState,
}

impl FcgiChannel {
    pub fn new(reader: Arc<BlockingReader>) -> Self {
        Self {
            reader,
            state: ProcessorState::default(),
        }
    }
}

impl Processor for FcgiChannel {
    fn process(&mut self, bytes: &[u8]) {
        self.reader.add_data_to_read(bytes);
    }

    fn state(&self) -> &ProcessorState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ProcessorState {
        &mut self.state
    }

    fn closed(&mut self) {
        self.reader.close();
    }
}

/// Outcome of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FcgiResponse {
    pub request_id: u16,

    /// Concatenated STDOUT content.
    pub stdout: Vec<u8>,

    pub protocol_status: ProtocolStatus,
    pub app_status: u32,
}

/// Client side of a FastCGI connection.
pub struct FcgiClient {
    handler: Arc<SocketHandler>,
    reader: Arc<BlockingReader>,
    keep_alive: bool,
}

impl FcgiClient {
    /// Connects to an application listening on `address`.
    ///
    /// Parks the calling thread for at most `timeout`.
    pub fn connect(address: &str, timeout: Duration, context: &HandlerContext) -> io::Result<Self> {
        Self::attach(TcpTransport::connect(address, timeout)?, context)
    }

    /// Runs the client over an already connected transport.
    pub fn attach<T>(transport: T, context: &HandlerContext) -> io::Result<Self>
    where
        T: Transport + 'static,
    {
        let reader = Arc::new(BlockingReader::new());
        let channel_reader = reader.clone();

        let handler = SocketHandler::new(transport, context, move |_| {
            Box::new(FcgiChannel::new(channel_reader))
        })?;

        Ok(Self {
            handler,
            reader,
            keep_alive: false,
        })
    }

    /// Asks the application to keep the connection open after each
    /// request.
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Frames a whole request and hands it to the write path.
    ///
    /// Sends BEGIN_REQUEST, the PARAMS stream and the STDIN stream, each
    /// stream closed by its empty record. Pairs too long to encode are
    /// left out.
    pub fn send_request<'a, I>(
        &self,
        request_id: u16,
        params: I,
        stdin: &[u8],
    ) -> Result<(), ChannelError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut frames = BytesMut::new();

        Record::begin_request(request_id, Role::Responder, self.keep_alive)
            .encode_into(&mut frames)?;

        let encoded = encode_params(params);
        if encoded.skipped > 0 {
            debug!(
                "request {request_id}: {} parameter pairs left out",
                encoded.skipped
            );
        }

        for record in Record::stream_chunks(RecordType::Params, request_id, &encoded.bytes) {
            record.encode_into(&mut frames)?;
        }
        Record::end_of_stream(RecordType::Params, request_id).encode_into(&mut frames)?;

        for record in Record::stream_chunks(RecordType::Stdin, request_id, stdin) {
            record.encode_into(&mut frames)?;
        }
        Record::end_of_stream(RecordType::Stdin, request_id).encode_into(&mut frames)?;

        debug!("request {request_id}: sending {} bytes", frames.len());
        self.handler.write(&frames)?;

        Ok(())
    }

    /// A consumer for the bytes this connection receives.
    ///
    /// The connection has a single consumer; take one reader and keep it.
    pub fn response_reader(&self) -> ResponseReader {
        ResponseReader::new(self.reader.clone())
    }

    pub fn handler(&self) -> &Arc<SocketHandler> {
        &self.handler
    }

    /// Closes the connection once pending request bytes are flushed.
    pub fn close(&self) {
        self.handler.prepare_to_close();
    }
}

/// Blocking consumer that turns received bytes back into responses.
pub struct ResponseReader {
    reader: Arc<BlockingReader>,
    decoder: RecordDecoder,
}

impl ResponseReader {
    pub fn new(reader: Arc<BlockingReader>) -> Self {
        Self {
            reader,
            decoder: RecordDecoder::new(),
        }
    }

    /// Blocks until the END_REQUEST of `request_id` arrives.
    ///
    /// Records of other requests and kinds other than STDOUT are skipped.
    pub fn read_response(&mut self, request_id: u16) -> Result<FcgiResponse, ChannelError> {
        let mut stdout = Vec::new();
        let mut chunk = Vec::new();

        loop {
            while let Some(record) = self.decoder.next_record()? {
                if record.request_id != request_id {
                    debug!(
                        "skipping {:?} record for request {}",
                        record.kind, record.request_id
                    );
                    continue;
                }

                match record.kind {
                    RecordType::Stdout => stdout.extend_from_slice(&record.content),
                    RecordType::EndRequest => {
                        return Ok(FcgiResponse {
                            request_id,
                            stdout,
                            protocol_status: record.protocol_status,
                            app_status: record.app_status,
                        });
                    }
                    kind => debug!("request {request_id}: ignoring {kind:?} record"),
                }
            }

            chunk.clear();
            if self.reader.read(&mut chunk) == 0 {
                return Err(ChannelError::ClosedBeforeEnd);
            }

            self.decoder.push(&chunk);
        }
    }

    /// Reads the response on a worker thread.
    ///
    /// The result arrives on the returned channel. Fails if the pool no
    /// longer accepts jobs.
    pub fn spawn(
        mut self,
        workers: &QueueHandle,
        request_id: u16,
    ) -> io::Result<Receiver<Result<FcgiResponse, ChannelError>>> {
        let (tx, rx) = mpsc::channel();

        let accepted = workers.execute(move || {
            let _ = tx.send(self.read_response(request_id));
        });

        if accepted {
            Ok(rx)
        } else {
            Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "worker pool has shut down",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fcgi::encode_all;

    fn response_bytes(request_id: u16, body: &[u8]) -> Vec<u8> {
        let records = [
            Record::stdout(request_id, body.to_vec()),
            Record::end_of_stream(RecordType::Stdout, request_id),
            Record::end_request(request_id, ProtocolStatus::RequestComplete, 0),
        ];

        encode_all(&records).unwrap().to_vec()
    }

    #[test]
    fn test_reader_collects_stdout_until_end_request() {
        let reader = Arc::new(BlockingReader::new());
        let mut channel = FcgiChannel::new(reader.clone());

        let bytes = response_bytes(1, b"Status: 200\r\n\r\nhello");

        // Split mid-header to make the decoder wait for the rest.
        channel.process(&bytes[..5]);
        channel.process(&bytes[5..]);

        let response = ResponseReader::new(reader).read_response(1).unwrap();

        assert_eq!(response.stdout, b"Status: 200\r\n\r\nhello");
        assert_eq!(response.protocol_status, ProtocolStatus::RequestComplete);
    }

    #[test]
    fn test_reader_skips_other_requests() {
        let reader = Arc::new(BlockingReader::new());
        let mut channel = FcgiChannel::new(reader.clone());

        channel.process(&response_bytes(2, b"other"));
        channel.process(&response_bytes(1, b"mine"));

        let response = ResponseReader::new(reader).read_response(1).unwrap();
        assert_eq!(response.stdout, b"mine");
    }

    #[test]
    fn test_close_before_end_request_is_an_error() {
        let reader = Arc::new(BlockingReader::new());
        let mut channel = FcgiChannel::new(reader.clone());

        let partial = encode_all(&[Record::stdout(1, b"half".to_vec())]).unwrap();
        channel.process(&partial);
        channel.closed();

        let result = ResponseReader::new(reader).read_response(1);
        assert!(matches!(result, Err(ChannelError::ClosedBeforeEnd)));
    }

    #[test]
    fn test_corrupt_stream_surfaces_record_error() {
        let reader = Arc::new(BlockingReader::new());
        reader.add_data_to_read(&[9, 6, 0, 1, 0, 0, 0, 0]);

        let result = ResponseReader::new(reader).read_response(1);
        assert!(matches!(
            result,
            Err(ChannelError::Record(RecordError::UnsupportedVersion(9)))
        ));
    }
}
