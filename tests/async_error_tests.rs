use pperf::protocol::{decode_header, encode, Command, FrameHeader, HEADER_SIZE, MAGIC};
use pperf::{pperf, Config, Error, Logger, Server};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

type Lines = Arc<Mutex<Vec<String>>>;

async fn start_server(config: Config) -> (SocketAddr, Lines) {
    let lines: Lines = Arc::new(Mutex::new(Vec::new()));
    let sink = lines.clone();
    let logger: Arc<dyn Logger> = Arc::new(move |level: log::Level, message: &str| {
        sink.lock().unwrap().push(format!("{} {}", level, message));
    });

    let server = Server::new(config.with_bind_addr("127.0.0.1".parse().unwrap()))
        .with_logger(logger);
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    (addr, lines)
}

/// Reads the error report the server sends before closing.
async fn read_error_report(stream: &mut TcpStream) -> String {
    let mut buf = [0u8; HEADER_SIZE];
    timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("error report should arrive before any read timeout")
        .unwrap();
    let header = decode_header(&buf).unwrap();
    assert_eq!(header.command, Command::Error);
    assert_eq!(header.magic, MAGIC);

    let mut message = vec![0u8; header.payload_len()];
    stream.read_exact(&mut message).await.unwrap();
    String::from_utf8(message).unwrap()
}

/// Waits until a logged line matches `pred`.
async fn wait_for_log(lines: &Lines, pred: impl Fn(&str) -> bool) -> bool {
    for _ in 0..50 {
        if lines.lock().unwrap().iter().any(|l| pred(l)) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

/// A header with the wrong magic gets an error report and the connection closes.
#[tokio::test]
async fn test_wrong_magic_reported() {
    let (addr, lines) = start_server(Config::server(0)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut bytes = encode(&FrameHeader::data(0, 0, 0), &[]);
    bytes[0..4].copy_from_slice(&0xdead_beefu32.to_be_bytes());
    stream.write_all(&bytes).await.unwrap();

    let message = read_error_report(&mut stream).await;
    assert!(message.contains("wrong magic"), "got: {}", message);

    // server closes after reporting
    let mut rest = Vec::new();
    let n = timeout(Duration::from_secs(5), stream.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);

    assert!(wait_for_log(&lines, |l| l.starts_with("ERROR") && l.contains("wrong magic")).await);
    assert!(wait_for_log(&lines, |l| l.starts_with("DEBUG") && l.contains("Session with")).await);
    let errors = lines
        .lock()
        .unwrap()
        .iter()
        .filter(|l| l.starts_with("ERROR"))
        .count();
    assert_eq!(errors, 1, "a failed session is logged at error level once");
}

/// Bytes from another protocol are classified by their magic, whatever
/// happens to sit where the command field would be.
#[tokio::test]
async fn test_foreign_stream_reported_as_wrong_magic() {
    let (addr, _lines) = start_server(Config::server(0)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // exactly one header's worth, so nothing is left unread when the server closes
    let request = b"GET /index.html HTTP/1.1\r\nHost: example.org\r\n\r\n";
    stream.write_all(&request[..HEADER_SIZE]).await.unwrap();

    let message = read_error_report(&mut stream).await;
    assert!(message.contains("wrong magic 0x47455420"), "got: {}", message);
}

/// An oversized `size` is rejected from the header alone; the server does
/// not wait for the payload.
#[tokio::test]
async fn test_oversized_frame_rejected_before_payload() {
    let config = Config::server(0)
        .with_block_size(1024)
        .with_read_timeout(Duration::from_secs(30));
    let (addr, _lines) = start_server(config).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut header = FrameHeader::data(0, 0, 0).with_payload(0, 0);
    header.size = 1_000_000_000;
    stream.write_all(&header.to_bytes()).await.unwrap();

    let message = read_error_report(&mut stream).await;
    assert!(message.contains("invalid size"), "got: {}", message);
}

/// A frame smaller than its own header is rejected.
#[tokio::test]
async fn test_undersized_frame_rejected() {
    let (addr, _lines) = start_server(Config::server(0)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut header = FrameHeader::data(0, 0, 0);
    header.size = 10;
    stream.write_all(&header.to_bytes()).await.unwrap();

    let message = read_error_report(&mut stream).await;
    assert!(message.contains("invalid size"), "got: {}", message);
}

/// A corrupted payload byte fails the checksum.
#[tokio::test]
async fn test_checksum_mismatch_reported() {
    let (addr, _lines) = start_server(Config::server(0)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut bytes = encode(&FrameHeader::data(0, 0, 0), &[7; 256]);
    bytes[HEADER_SIZE + 100] ^= 0x01;
    stream.write_all(&bytes).await.unwrap();

    let message = read_error_report(&mut stream).await;
    assert!(message.contains("crc"), "got: {}", message);
}

/// Unknown command codes are a protocol error.
#[tokio::test]
async fn test_unknown_command_reported() {
    let (addr, _lines) = start_server(Config::server(0)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut bytes = encode(&FrameHeader::data(0, 0, 0), &[]);
    bytes[10..12].copy_from_slice(&99u16.to_be_bytes());
    stream.write_all(&bytes).await.unwrap();

    let message = read_error_report(&mut stream).await;
    assert!(message.contains("unknown command 99"), "got: {}", message);
}

/// A client that stalls mid-frame is dropped after the read timeout.
#[tokio::test]
async fn test_stalled_client_times_out() {
    let config = Config::server(0).with_read_timeout(Duration::from_millis(200));
    let (addr, lines) = start_server(config).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let bytes = encode(&FrameHeader::data(0, 0, 0), &[0; 64]);
    stream.write_all(&bytes[..HEADER_SIZE + 10]).await.unwrap();

    let message = read_error_report(&mut stream).await;
    assert!(message.contains("Read error"), "got: {}", message);
    assert!(wait_for_log(&lines, |l| l.contains("Session with") && l.contains("failed")).await);
}

/// Closing halfway through a header is an error, not a clean close.
#[tokio::test]
async fn test_premature_close_logged() {
    let (addr, lines) = start_server(Config::server(0)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let bytes = encode(&FrameHeader::data(0, 0, 0), &[]);
    stream.write_all(&bytes[..12]).await.unwrap();
    stream.shutdown().await.unwrap();

    assert!(wait_for_log(&lines, |l| l.starts_with("ERROR") && l.contains("Read error")).await);
}

/// Closing between frames ends the session without an error.
#[tokio::test]
async fn test_clean_close_not_an_error() {
    let (addr, lines) = start_server(Config::server(0)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    for count in 0..3u64 {
        let bytes = encode(&FrameHeader::data(count, 0, 0), &[0; 32]);
        stream.write_all(&bytes).await.unwrap();
    }
    stream.shutdown().await.unwrap();

    assert!(wait_for_log(&lines, |l| l.contains("Test completed")).await);
    assert!(!lines.lock().unwrap().iter().any(|l| l.starts_with("ERROR")));
}

/// A client whose frames exceed the server's limit fails instead of hanging.
#[tokio::test]
async fn test_client_frames_too_large_for_server() {
    let (addr, _lines) = start_server(Config::server(0).with_block_size(1024)).await;

    let config = Config::client("127.0.0.1".to_string(), addr.port())
        .with_duration(Duration::from_secs(2))
        .with_block_size(64 * 1024);
    let results = timeout(Duration::from_secs(15), pperf(config))
        .await
        .expect("client should give up once the server rejects it");

    assert!(!results.is_ok());
    assert_eq!(results.upload.total_bytes, 0);
    match results.err {
        Some(Error::Remote(message)) => assert!(message.contains("invalid size")),
        Some(Error::ConnectionWrite { .. }) | Some(Error::ConnectionRead { .. }) => {}
        other => panic!("Unexpected result: {:?}", other),
    }
}

/// Dial failures come back inside the results.
#[tokio::test]
async fn test_dial_error_in_results() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let results = pperf(Config::client("127.0.0.1".to_string(), port)).await;

    assert!(matches!(results.err, Some(Error::Dial { .. })));
    assert_eq!(results.address, "");
}

/// A second listener on a taken port fails setup.
#[tokio::test]
async fn test_server_port_in_use() {
    let (addr, _lines) = start_server(Config::server(0)).await;

    let results = pperf(
        Config::server(addr.port()).with_bind_addr("127.0.0.1".parse().unwrap()),
    )
    .await;

    assert!(matches!(results.err, Some(Error::ListenSetup { .. })));
}
