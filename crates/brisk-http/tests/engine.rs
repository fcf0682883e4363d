//! Wire-level tests of the connection state machine: keep-alive,
//! timeouts, error rendering and the shutdown drain.

mod common;

use std::sync::Arc;
use std::time::Duration;

use brisk_core::{Method, Response, StatusCode};
use brisk_router::{Handler, Route, Router};
use tokio::io::AsyncWriteExt;

use common::{connect, read_response, reads_eof, start};

const TIMEOUT: Duration = Duration::from_secs(5);

fn text_route(path: &'static str, body: &'static str) -> Route {
    let handler: Handler =
        Arc::new(move |_| Box::pin(async move { Ok(Response::text(body, StatusCode::OK)) }));
    Route::http(path, Method::Get, handler)
}

fn slow_route(path: &'static str, delay: Duration) -> Route {
    let handler: Handler = Arc::new(move |_| {
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            Ok(Response::text("done", StatusCode::OK))
        })
    });
    Route::http(path, Method::Get, handler)
}

fn echo_route(path: &'static str) -> Route {
    let handler: Handler = Arc::new(move |request| {
        Box::pin(async move {
            Response::new(
                request.body.extract(),
                StatusCode::OK,
                [("content-type", "application/octet-stream")],
            )
        })
    });
    Route::http(path, Method::Post, handler)
}

#[tokio::test]
async fn keep_alive_serves_sequential_requests() {
    let mut router = Router::new();
    router.register(text_route("/a", "first")).unwrap();
    router.register(text_route("/b", "second")).unwrap();
    let server = start(router, false, TIMEOUT).await;

    let mut stream = connect(server.addr).await;
    stream
        .write_all(b"GET /a HTTP/1.1\r\nhost: test\r\n\r\n")
        .await
        .unwrap();
    let (status, head, body) = read_response(&mut stream).await;
    assert_eq!(status, 200);
    assert_eq!(body, b"first");
    assert!(head.contains("connection: keep-alive"));
    assert!(head.contains("content-length: 5"));

    // Same connection, second request.
    stream
        .write_all(b"GET /b HTTP/1.1\r\nhost: test\r\n\r\n")
        .await
        .unwrap();
    let (status, _, body) = read_response(&mut stream).await;
    assert_eq!(status, 200);
    assert_eq!(body, b"second");

    server.stop().await;
}

#[tokio::test]
async fn pipelined_requests_answer_in_arrival_order() {
    let mut router = Router::new();
    router.register(text_route("/a", "first")).unwrap();
    router.register(text_route("/b", "second")).unwrap();
    let server = start(router, false, TIMEOUT).await;

    let mut stream = connect(server.addr).await;
    stream
        .write_all(b"GET /a HTTP/1.1\r\nhost: t\r\n\r\nGET /b HTTP/1.1\r\nhost: t\r\n\r\n")
        .await
        .unwrap();
    let (_, _, body) = read_response(&mut stream).await;
    assert_eq!(body, b"first");
    let (_, _, body) = read_response(&mut stream).await;
    assert_eq!(body, b"second");

    server.stop().await;
}

#[tokio::test]
async fn single_request_in_one_write_is_answered() {
    let mut router = Router::new();
    router.register(text_route("/one", "shot")).unwrap();
    let server = start(router, false, TIMEOUT).await;

    let mut stream = connect(server.addr).await;
    stream
        .write_all(b"GET /one HTTP/1.1\r\nhost: t\r\n\r\n")
        .await
        .unwrap();
    let (status, _, body) = read_response(&mut stream).await;
    assert_eq!(status, 200);
    assert_eq!(body, b"shot");

    server.stop().await;
}

#[tokio::test]
async fn request_split_across_writes_is_answered() {
    let mut router = Router::new();
    router.register(text_route("/split", "joined")).unwrap();
    let server = start(router, false, TIMEOUT).await;

    let mut stream = connect(server.addr).await;
    stream.write_all(b"GET /split HTT").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    stream.write_all(b"P/1.1\r\nhost: t\r\n\r\n").await.unwrap();
    let (status, _, body) = read_response(&mut stream).await;
    assert_eq!(status, 200);
    assert_eq!(body, b"joined");

    server.stop().await;
}

#[tokio::test]
async fn request_body_reaches_the_handler() {
    let mut router = Router::new();
    router.register(echo_route("/echo")).unwrap();
    let server = start(router, false, TIMEOUT).await;

    let mut stream = connect(server.addr).await;
    stream
        .write_all(b"POST /echo HTTP/1.1\r\nhost: t\r\ncontent-length: 7\r\n\r\npayload")
        .await
        .unwrap();
    let (status, _, body) = read_response(&mut stream).await;
    assert_eq!(status, 200);
    assert_eq!(body, b"payload");

    server.stop().await;
}

#[tokio::test]
async fn http10_connection_closes_after_the_response() {
    let mut router = Router::new();
    router.register(text_route("/legacy", "old")).unwrap();
    let server = start(router, false, TIMEOUT).await;

    let mut stream = connect(server.addr).await;
    stream
        .write_all(b"GET /legacy HTTP/1.0\r\n\r\n")
        .await
        .unwrap();
    let (status, _, body) = read_response(&mut stream).await;
    assert_eq!(status, 200);
    assert_eq!(body, b"old");
    assert!(reads_eof(&mut stream).await);

    server.stop().await;
}

#[tokio::test]
async fn idle_connection_times_out_with_408() {
    let server = start(Router::new(), false, Duration::from_millis(200)).await;

    let mut stream = connect(server.addr).await;
    // Send nothing; the timer fires first.
    let (status, _, body) = read_response(&mut stream).await;
    assert_eq!(status, 408);
    assert_eq!(body, b"Error: Request Timeout");
    assert!(reads_eof(&mut stream).await);

    server.stop().await;
}

#[tokio::test]
async fn overdue_handler_is_cancelled_with_408() {
    let mut router = Router::new();
    router
        .register(slow_route("/slow", Duration::from_secs(30)))
        .unwrap();
    let server = start(router, false, Duration::from_millis(200)).await;

    let mut stream = connect(server.addr).await;
    stream
        .write_all(b"GET /slow HTTP/1.1\r\nhost: t\r\n\r\n")
        .await
        .unwrap();
    let (status, _, body) = read_response(&mut stream).await;
    assert_eq!(status, 408);
    assert_eq!(body, b"Error: Request Timeout");
    assert!(reads_eof(&mut stream).await);

    server.stop().await;
}

#[tokio::test]
async fn malformed_stream_is_rejected_and_closed() {
    let server = start(Router::new(), false, TIMEOUT).await;

    let mut stream = connect(server.addr).await;
    stream.write_all(b"complete nonsense\r\n\r\n").await.unwrap();
    let (status, _, body) = read_response(&mut stream).await;
    assert_eq!(status, 400);
    assert_eq!(body, b"Error: Invalid Usage: Bad Request");
    assert!(reads_eof(&mut stream).await);

    server.stop().await;
}

#[tokio::test]
async fn unknown_route_is_an_opaque_500() {
    let server = start(Router::new(), false, TIMEOUT).await;

    let mut stream = connect(server.addr).await;
    stream
        .write_all(b"GET /hello HTTP/1.1\r\nhost: t\r\n\r\n")
        .await
        .unwrap();
    let (status, _, body) = read_response(&mut stream).await;
    assert_eq!(status, 500);
    assert_eq!(body, b"Service Error");

    server.stop().await;
}

#[tokio::test]
async fn unknown_route_names_the_path_in_debug() {
    let server = start(Router::new(), true, TIMEOUT).await;

    let mut stream = connect(server.addr).await;
    stream
        .write_all(b"GET /hello HTTP/1.1\r\nhost: t\r\n\r\n")
        .await
        .unwrap();
    let (status, _, body) = read_response(&mut stream).await;
    assert_eq!(status, 500);
    let body = String::from_utf8(body).unwrap();
    assert!(body.contains("/hello"));
    assert!(body.contains("Method[get]"));

    server.stop().await;
}

#[tokio::test]
async fn drain_closes_idle_now_and_busy_after_its_response() {
    let mut router = Router::new();
    router.register(text_route("/fast", "ok")).unwrap();
    router
        .register(slow_route("/slow", Duration::from_millis(400)))
        .unwrap();
    let server = start(router, false, TIMEOUT).await;

    // An idle keep-alive connection: one request served, then parked.
    let mut idle = connect(server.addr).await;
    idle.write_all(b"GET /fast HTTP/1.1\r\nhost: t\r\n\r\n")
        .await
        .unwrap();
    let (status, _, _) = read_response(&mut idle).await;
    assert_eq!(status, 200);

    // A connection mid-request.
    let mut busy = connect(server.addr).await;
    busy.write_all(b"GET /slow HTTP/1.1\r\nhost: t\r\n\r\n")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    server.shutdown.trigger();

    // The idle connection goes first.
    assert!(reads_eof(&mut idle).await);

    // The busy one still gets its full response, then closes even
    // though the request asked for keep-alive.
    let (status, _, body) = read_response(&mut busy).await;
    assert_eq!(status, 200);
    assert_eq!(body, b"done");
    assert!(reads_eof(&mut busy).await);

    // Both gone, so the drain loop terminates.
    tokio::time::timeout(Duration::from_secs(2), server.task)
        .await
        .expect("drain did not terminate")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn new_connections_are_refused_while_draining() {
    let mut router = Router::new();
    router
        .register(slow_route("/slow", Duration::from_millis(300)))
        .unwrap();
    let server = start(router, false, TIMEOUT).await;

    let mut busy = connect(server.addr).await;
    busy.write_all(b"GET /slow HTTP/1.1\r\nhost: t\r\n\r\n")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let addr = server.addr;
    server.shutdown.trigger();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The listener is gone; a fresh connect cannot complete a request.
    let refused = match tokio::net::TcpStream::connect(addr).await {
        Err(_) => true,
        Ok(mut stream) => {
            let _ = stream
                .write_all(b"GET /slow HTTP/1.1\r\nhost: t\r\n\r\n")
                .await;
            reads_eof(&mut stream).await
        }
    };
    assert!(refused);

    let (status, _, _) = read_response(&mut busy).await;
    assert_eq!(status, 200);
    tokio::time::timeout(Duration::from_secs(2), server.task)
        .await
        .expect("drain did not terminate")
        .unwrap()
        .unwrap();
}
