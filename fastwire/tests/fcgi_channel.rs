mod common;

#[cfg(test)]
mod tests {
    use crate::common::init_logger;
    use fastwire::EngineBuilder;
    use fastwire::fcgi::{
        ChannelError, ProtocolStatus, Record, RecordDecoder, RecordType, Role, decode_params,
        encode_all,
    };

    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    struct Request {
        request_id: u16,
        keep_alive: bool,
        params: Vec<(String, String)>,
        stdin: Vec<u8>,
    }

    /// Reads one request off `stream`, up to the empty STDIN record.
    fn read_request(stream: &mut TcpStream) -> Request {
        let mut decoder = RecordDecoder::new();
        let mut buffer = [0; 1024];

        let mut request = Request {
            request_id: 0,
            keep_alive: false,
            params: Vec::new(),
            stdin: Vec::new(),
        };
        let mut params = Vec::new();

        loop {
            let n = stream.read(&mut buffer).expect("Failed to read from stream");
            assert!(n > 0, "client went away mid-request");
            decoder.push(&buffer[..n]);

            while let Some(record) = decoder.next_record().expect("Failed to decode record") {
                match record.kind {
                    RecordType::BeginRequest => {
                        assert_eq!(record.role, Role::Responder);
                        request.request_id = record.request_id;
                        request.keep_alive = record.keep_alive;
                    }
                    RecordType::Params => params.extend_from_slice(&record.content),
                    RecordType::Stdin if record.content.is_empty() => {
                        request.params = decode_params(&params).expect("Failed to decode params");
                        return request;
                    }
                    RecordType::Stdin => request.stdin.extend_from_slice(&record.content),
                    other => panic!("unexpected {other:?} record"),
                }
            }
        }
    }

    fn fake_application(reply: &'static [u8]) -> (String, JoinHandle<Request>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
        let addr = listener
            .local_addr()
            .expect("Failed to get local address")
            .to_string();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("Failed to accept connection");
            let request = read_request(&mut stream);

            if !reply.is_empty() {
                let id = request.request_id;
                let response = encode_all(&[
                    Record::stdout(id, reply.to_vec()),
                    Record::end_of_stream(RecordType::Stdout, id),
                    Record::end_request(id, ProtocolStatus::RequestComplete, 0),
                ])
                .expect("Failed to encode response");

                stream
                    .write_all(&response)
                    .expect("Failed to write to stream");
            }

            request
        });

        (addr, handle)
    }

    #[test]
    fn test_request_response_over_tcp() {
        init_logger();

        let engine = EngineBuilder::new()
            .worker_threads(2)
            .build()
            .expect("Failed to start engine");

        let (addr, application) = fake_application(b"Content-Type: text/plain\r\n\r\nhello");

        let client = engine
            .fcgi_client(&addr, Duration::from_secs(2))
            .expect("Failed to connect to application")
            .keep_alive(true);

        let response = client
            .response_reader()
            .spawn(&engine.workers(), 1)
            .expect("Failed to spawn reader");

        let body = vec![b'x'; 70_000];
        client
            .send_request(
                1,
                [("SCRIPT_FILENAME", "/srv/index.php"), ("REQUEST_METHOD", "POST")],
                &body,
            )
            .expect("Failed to send request");

        let response = response
            .recv_timeout(Duration::from_secs(5))
            .expect("No response in time")
            .expect("Request failed");

        assert_eq!(response.stdout, b"Content-Type: text/plain\r\n\r\nhello");
        assert_eq!(response.protocol_status, ProtocolStatus::RequestComplete);
        assert_eq!(response.app_status, 0);

        let request = application.join().expect("Thread panicked");
        assert_eq!(request.request_id, 1);
        assert!(request.keep_alive);
        assert_eq!(request.stdin.len(), 70_000);
        assert_eq!(
            request.params,
            vec![
                ("SCRIPT_FILENAME".to_string(), "/srv/index.php".to_string()),
                ("REQUEST_METHOD".to_string(), "POST".to_string()),
            ]
        );
    }

    #[test]
    fn test_application_hangs_up_before_end_request() {
        init_logger();

        let engine = EngineBuilder::new()
            .worker_threads(1)
            .build()
            .expect("Failed to start engine");

        let (addr, application) = fake_application(b"");

        let client = engine
            .fcgi_client(&addr, Duration::from_secs(2))
            .expect("Failed to connect to application");

        let response = client
            .response_reader()
            .spawn(&engine.workers(), 3)
            .expect("Failed to spawn reader");

        client
            .send_request(3, [("QUERY_STRING", "")], b"")
            .expect("Failed to send request");

        application.join().expect("Thread panicked");

        let result = response
            .recv_timeout(Duration::from_secs(5))
            .expect("No response in time");

        assert!(matches!(result, Err(ChannelError::ClosedBeforeEnd)));
        assert!(client.handler().is_closing());
    }

    #[test]
    fn test_invalid_request_id_is_rejected_before_sending() {
        init_logger();

        let engine = EngineBuilder::new()
            .worker_threads(1)
            .build()
            .expect("Failed to start engine");

        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
        let addr = listener.local_addr().expect("Failed to get local address");

        let client = engine
            .fcgi_client(&addr.to_string(), Duration::from_secs(2))
            .expect("Failed to connect to application");

        let result = client.send_request(0, [("A", "B")], b"");

        assert!(matches!(
            result,
            Err(ChannelError::Record(fastwire::fcgi::RecordError::InvalidRequestId))
        ));
        assert_eq!(client.handler().pending_bytes(), 0);
    }
}
