//! Shared wire-level test helpers: a bound server on an ephemeral
//! port and a minimal response reader.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use brisk_core::{Error, ExceptionHandler, ServerConfig};
use brisk_http::{Server, ShutdownHandle};
use brisk_router::Router;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: ShutdownHandle,
    pub task: JoinHandle<Result<(), Error>>,
}

impl TestServer {
    /// Trigger shutdown and wait for the drain to finish.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(2), self.task)
            .await
            .expect("drain did not terminate")
            .unwrap()
            .unwrap();
    }
}

pub async fn start(router: Router, debug: bool, request_timeout: Duration) -> TestServer {
    let config = ServerConfig::new()
        .with_port(0)
        .with_debug(debug)
        .with_request_timeout(request_timeout);
    let server = Server::bind(
        &config,
        Arc::new(router),
        Arc::new(ExceptionHandler::new(debug)),
    )
    .unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_handle();
    let task = tokio::spawn(server.serve());
    TestServer { addr, shutdown, task }
}

pub async fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.unwrap()
}

/// Read one response off the stream: status code, raw head and the
/// content-length-delimited body.
pub async fn read_response(stream: &mut TcpStream) -> (u16, String, Vec<u8>) {
    // Read one byte at a time so bytes belonging to a later pipelined
    // response are never pulled off the stream and lost.
    let mut buf = Vec::new();
    while !buf.ends_with(b"\r\n\r\n") {
        let mut byte = [0u8; 1];
        let n = stream.read(&mut byte).await.unwrap();
        assert!(n > 0, "connection closed before response head");
        buf.push(byte[0]);
    }
    let head_end = buf.len() - 4;

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let status: u16 = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|token| token.parse().ok())
        .expect("malformed status line");

    let content_length = head
        .lines()
        .skip(1)
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("content-length") {
                value.trim().parse::<usize>().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);

    let mut body = vec![0u8; content_length];
    stream
        .read_exact(&mut body)
        .await
        .expect("connection closed mid-body");
    (status, head, body)
}

/// True once the peer has closed the connection.
pub async fn reads_eof(stream: &mut TcpStream) -> bool {
    let mut chunk = [0u8; 64];
    matches!(
        tokio::time::timeout(Duration::from_secs(2), stream.read(&mut chunk)).await,
        Ok(Ok(0))
    )
}
