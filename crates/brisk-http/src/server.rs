//! The listening socket, the live-connection registry and the
//! graceful drain.
//!
//! One tokio task per accepted connection. Shutdown stops the accept
//! loop, flips the shared draining flag (read by every keep-alive
//! decision), asks idle connections to close and then polls until the
//! registry is empty. Connections mid-request finish their response
//! before they go.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use brisk_core::{Error, ExceptionHandler, ServerConfig};
use brisk_router::Router;
use tokio::net::TcpListener;
use tokio::sync::Notify;

use crate::connection::{Connection, ConnectionHandle};
use crate::dispatch::Dispatcher;

/// How often the drain loop re-checks the registry.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Triggers a server shutdown from outside the accept loop. Cloneable;
/// the first trigger wins and later ones are no-ops.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    notify: Arc<Notify>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.notify.notify_one();
    }
}

/// The process-wide set of live connections. Touched only on accept,
/// on connection exit and by the drain sequence.
#[derive(Debug, Clone, Default)]
struct Registry {
    connections: Arc<Mutex<HashMap<u64, Arc<ConnectionHandle>>>>,
    next_id: Arc<AtomicU64>,
}

impl Registry {
    fn insert(&self, handle: Arc<ConnectionHandle>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, handle);
        id
    }

    fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    fn handles(&self) -> Vec<Arc<ConnectionHandle>> {
        self.lock().values().map(Arc::clone).collect()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Arc<ConnectionHandle>>> {
        match self.connections.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub struct Server {
    listener: TcpListener,
    dispatcher: Dispatcher,
    request_timeout: Duration,
    max_request_size: usize,
    draining: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    registry: Registry,
}

impl Server {
    /// Bind the listening socket. Must run inside a tokio runtime.
    pub fn bind(
        config: &ServerConfig,
        router: Arc<Router>,
        exceptions: Arc<ExceptionHandler>,
    ) -> Result<Self, Error> {
        let listener = bind_listener(config)?;
        Ok(Self {
            listener,
            dispatcher: Dispatcher::new(router, exceptions, config.debug),
            request_timeout: config.request_timeout,
            max_request_size: config.max_request_size,
            draining: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            registry: Registry::default(),
        })
    }

    /// The bound address; useful when the config asked for port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { notify: Arc::clone(&self.shutdown) }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Accept connections until shutdown is triggered, then drain.
    pub async fn serve(self) -> Result<(), Error> {
        match self.listener.local_addr() {
            Ok(addr) => tracing::info!(%addr, "listening"),
            Err(_) => tracing::info!("listening"),
        }

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(err) => {
                        tracing::warn!(error = %err, "accept failed");
                    }
                },
            }
        }

        self.drain().await;
        Ok(())
    }

    fn spawn_connection(&self, stream: tokio::net::TcpStream, peer: SocketAddr) {
        tracing::debug!(%peer, "connection made");
        let handle = Arc::new(ConnectionHandle::new());
        let id = self.registry.insert(Arc::clone(&handle));
        let connection = Connection::new(
            stream,
            peer,
            self.dispatcher.clone(),
            self.request_timeout,
            self.max_request_size,
            Arc::clone(&self.draining),
            handle,
        );
        let registry = self.registry.clone();
        tokio::spawn(async move {
            connection.run().await;
            registry.remove(id);
            tracing::debug!(%peer, "connection lost");
        });
    }

    async fn drain(self) {
        tracing::info!("draining connections");
        // The listener closes with the server; nothing new is accepted
        // past this point.
        drop(self.listener);
        self.draining.store(true, Ordering::Release);

        loop {
            // Re-nudge every tick: a connection that decided keep-alive
            // just before the flag flipped goes idle only now.
            for handle in self.registry.handles() {
                handle.close_if_idle();
            }
            let remaining = self.registry.len();
            if remaining == 0 {
                break;
            }
            tracing::debug!(remaining, "waiting for connections");
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
        tracing::info!("drain complete");
    }
}

/// Bind via socket2 so `SO_REUSEPORT` can be set before listen.
fn bind_listener(config: &ServerConfig) -> Result<TcpListener, Error> {
    let addr: SocketAddr = config
        .bind_addr()
        .parse()
        .map_err(|_| Error::InvalidUsage(format!("invalid bind address: {}", config.bind_addr())))?;

    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )
    .map_err(io_err)?;
    socket.set_reuse_address(true).map_err(io_err)?;
    #[cfg(unix)]
    if config.reuse_port {
        socket.set_reuse_port(true).map_err(io_err)?;
    }
    socket.set_nonblocking(true).map_err(io_err)?;
    socket.bind(&addr.into()).map_err(io_err)?;
    socket.listen(1024).map_err(io_err)?;

    Ok(TcpListener::from_std(socket.into())?)
}

fn io_err(err: io::Error) -> Error {
    Error::Io(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_server(config: &ServerConfig) -> Server {
        Server::bind(
            config,
            Arc::new(Router::new()),
            Arc::new(ExceptionHandler::new(false)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn bind_on_port_zero_reports_the_real_port() {
        let config = ServerConfig::new().with_port(0);
        let server = test_server(&config);
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
    }

    #[tokio::test]
    async fn serve_returns_after_shutdown_with_no_connections() {
        let config = ServerConfig::new().with_port(0);
        let server = test_server(&config);
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(server.serve());
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn invalid_bind_address_is_rejected() {
        let config = ServerConfig::new().with_host("not an address");
        let result = Server::bind(
            &config,
            Arc::new(Router::new()),
            Arc::new(ExceptionHandler::new(false)),
        );
        assert!(matches!(result, Err(Error::InvalidUsage(_))));
    }

    #[test]
    fn registry_insert_and_remove() {
        let registry = Registry::default();
        let a = registry.insert(Arc::new(ConnectionHandle::new()));
        let b = registry.insert(Arc::new(ConnectionHandle::new()));
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        registry.remove(a);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.handles().len(), 1);
    }
}
