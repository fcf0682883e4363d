//! The per-connection state machine.
//!
//! One task per accepted socket. The loop reads, feeds the parser,
//! dispatches completed requests and writes responses until the
//! keep-alive policy, the request timeout, the drain flag or the peer
//! ends the connection. An upgrade hands the socket over to the
//! websocket session loop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use brisk_core::{ChannelFlow, ChannelWriter, Error, HttpVersion, Method, Request};
use brisk_router::RouteHandler;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::time::{timeout, timeout_at, Instant};

use crate::dispatch::Dispatcher;
use crate::keepalive::should_keep_alive;
use crate::parser::{ParseStatus, RequestParser};
use crate::websocket::{build_upgrade_response, validate_upgrade, WebSocketChannel};

const READ_BUF_SIZE: usize = 8 * 1024;

/// Shared view of a live connection, used by the drain sequence.
#[derive(Debug)]
pub struct ConnectionHandle {
    idle: AtomicBool,
    close: Notify,
}

impl ConnectionHandle {
    pub fn new() -> Self {
        Self {
            idle: AtomicBool::new(true),
            close: Notify::new(),
        }
    }

    /// True when no request is in flight on this connection.
    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::Acquire)
    }

    /// Ask the connection to close once it is idle. A permit is stored
    /// so the request is not lost if the connection is mid-read.
    pub fn close_if_idle(&self) {
        if self.is_idle() {
            self.close.notify_one();
        }
    }

    fn set_idle(&self, idle: bool) {
        self.idle.store(idle, Ordering::Release);
    }
}

impl Default for ConnectionHandle {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Dispatcher,
    request_timeout: Duration,
    max_request_size: usize,
    draining: Arc<AtomicBool>,
    handle: Arc<ConnectionHandle>,
}

impl Connection {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        dispatcher: Dispatcher,
        request_timeout: Duration,
        max_request_size: usize,
        draining: Arc<AtomicBool>,
        handle: Arc<ConnectionHandle>,
    ) -> Self {
        Self {
            stream,
            peer,
            dispatcher,
            request_timeout,
            max_request_size,
            draining,
            handle,
        }
    }

    pub async fn run(mut self) {
        let mut parser = RequestParser::new().with_max_request_size(self.max_request_size);
        let mut read_buf = vec![0u8; READ_BUF_SIZE];
        let mut filled = 0;
        let mut deadline = Instant::now() + self.request_timeout;

        loop {
            // Feed the last read. An empty feed drains pipelined
            // requests already buffered without touching the socket.
            let status = match parser.feed(&read_buf[..filled]) {
                Ok(status) => status,
                Err(err) => {
                    self.write_error(None, &err.into()).await;
                    return;
                }
            };
            filled = 0;

            match status {
                ParseStatus::Complete { mut request } => {
                    self.handle.set_idle(false);
                    request
                        .headers
                        .append(self.peer.ip().to_string(), self.peer.port().to_string());
                    let request = Arc::new(request);

                    let dispatched = self.dispatcher.dispatch(Arc::clone(&request));
                    let response = match timeout_at(deadline, dispatched).await {
                        Ok(response) => response,
                        Err(_) => {
                            self.write_error(Some(request.as_ref()), &Error::RequestTimeout)
                                .await;
                            return;
                        }
                    };

                    let keep_alive = should_keep_alive(request.version, &request.headers)
                        && !self.draining.load(Ordering::Acquire);

                    if let Err(err) = self.stream.write_all(&response.output(request.version)).await
                    {
                        tracing::debug!(peer = %self.peer, error = %err, "response write failed");
                        return;
                    }
                    if !keep_alive {
                        return;
                    }
                    deadline = Instant::now() + self.request_timeout;
                    continue;
                }
                ParseStatus::Upgrade { mut request } => {
                    self.handle.set_idle(false);
                    request
                        .headers
                        .append(self.peer.ip().to_string(), self.peer.port().to_string());
                    let leftover = parser.take_buffered();
                    self.run_channel(request, leftover).await;
                    return;
                }
                ParseStatus::Incomplete => {}
            }

            self.handle.set_idle(parser.is_idle());

            filled = tokio::select! {
                _ = self.handle.close.notified(), if parser.is_idle() => return,
                read = timeout_at(deadline, self.stream.read(&mut read_buf)) => match read {
                    Err(_) => {
                        self.write_error(None, &Error::RequestTimeout).await;
                        return;
                    }
                    Ok(Ok(0)) => return,
                    Ok(Ok(n)) => n,
                    Ok(Err(err)) => {
                        tracing::debug!(peer = %self.peer, error = %err, "read failed");
                        return;
                    }
                },
            };
        }
    }

    /// Websocket session: handshake, then invoke the channel handler
    /// once per inbound message until it returns the stop sentinel or
    /// the peer closes.
    async fn run_channel(mut self, mut request: Request, leftover: Vec<u8>) {
        request.method = Method::Channel;

        let key = match validate_upgrade(&request) {
            Ok(key) => key,
            Err(err) => {
                self.write_error(Some(&request), &err).await;
                return;
            }
        };

        let route = match self.dispatcher.resolve_channel(&request.path) {
            Ok(route) => route.clone(),
            Err(Error::RouteNotFound { method, path }) => {
                let response = self.dispatcher.route_not_found(method, &path);
                let _ = self.stream.write_all(&response.output(request.version)).await;
                return;
            }
            Err(err) => {
                self.write_error(Some(&request), &err).await;
                return;
            }
        };

        let handler = match route.handler {
            RouteHandler::Channel(handler) => handler,
            RouteHandler::Http(_) => {
                let err = Error::ServerError("http route registered under channel".into());
                self.write_error(Some(&request), &err).await;
                return;
            }
        };

        let response = build_upgrade_response(&key, None);
        if let Err(err) = self.stream.write_all(&response.channel(request.version)).await {
            tracing::debug!(peer = %self.peer, error = %err, "upgrade write failed");
            return;
        }

        tracing::debug!(peer = %self.peer, path = %request.path, "connection upgraded");

        let request = Arc::new(request);
        let writer = ChannelWriter::new();
        let mut channel = WebSocketChannel::new(self.stream, leftover);

        loop {
            let message = match timeout(self.request_timeout, channel.receive()).await {
                // Idle channels stay open; the timeout is only logged.
                Err(_) => {
                    tracing::info!(peer = %self.peer, "channel idle");
                    continue;
                }
                Ok(Ok(Some(message))) => message,
                Ok(Ok(None)) => break,
                Ok(Err(err)) => {
                    tracing::debug!(peer = %self.peer, error = %err, "channel receive failed");
                    break;
                }
            };

            let flow = handler(Arc::clone(&request), message, writer.clone()).await;

            for outbound in writer.drain() {
                if let Err(err) = channel.send(&outbound).await {
                    tracing::debug!(peer = %self.peer, error = %err, "channel send failed");
                    return;
                }
            }

            if flow == ChannelFlow::Stop {
                break;
            }
        }

        let _ = channel.close().await;
    }

    /// Render an error through the exception chain, write it, and let
    /// the caller close the connection.
    async fn write_error(&mut self, request: Option<&Request>, err: &Error) {
        let response = self.dispatcher.exceptions.handle(request, err);
        let version = request.map_or(HttpVersion::Http11, |r| r.version);
        if let Err(write_err) = self.stream.write_all(&response.output(version)).await {
            tracing::debug!(peer = %self.peer, error = %write_err, "error write failed");
        }
    }
}
