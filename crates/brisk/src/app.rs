//! The application builder: explicit route, channel and exception
//! registration plus the run path that wires config, logging and the
//! server together.

use std::future::Future;
use std::sync::Arc;

use brisk_core::{
    ChannelFlow, ChannelMessage, ChannelWriter, Error, ExceptionHandler, Method, Request, Response,
    ServerConfig,
};
use brisk_core::handlers::{ExceptionPredicate, ExceptionResponder};
use brisk_http::Server;
use brisk_router::{ChannelMeta, Route, Router};

pub struct App {
    config: ServerConfig,
    router: Router,
    exceptions: Vec<(ExceptionPredicate, ExceptionResponder)>,
}

impl App {
    /// An app with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// An app configured from the `WWW_*` environment knobs.
    pub fn from_env() -> Self {
        Self::with_config(ServerConfig::from_env())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            config,
            router: Router::new(),
            exceptions: Vec::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Replace the configuration wholesale.
    pub fn configure(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an HTTP route. Fails when the (method, path) pair is
    /// already taken.
    pub fn route<F, Fut>(mut self, method: Method, path: &str, handler: F) -> Result<Self, Error>
    where
        F: Fn(Arc<Request>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, Error>> + Send + 'static,
    {
        let handler: brisk_router::Handler =
            Arc::new(move |request| Box::pin(handler(request)));
        self.router.register(Route::http(path, method, handler))?;
        Ok(self)
    }

    /// Register a websocket channel route with the default metadata.
    pub fn channel<F, Fut>(self, path: &str, handler: F) -> Result<Self, Error>
    where
        F: Fn(Arc<Request>, ChannelMessage, ChannelWriter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ChannelFlow> + Send + 'static,
    {
        self.channel_with_meta(path, ChannelMeta::default(), handler)
    }

    pub fn channel_with_meta<F, Fut>(
        mut self,
        path: &str,
        meta: ChannelMeta,
        handler: F,
    ) -> Result<Self, Error>
    where
        F: Fn(Arc<Request>, ChannelMessage, ChannelWriter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ChannelFlow> + Send + 'static,
    {
        let handler: brisk_router::ChannelHandler =
            Arc::new(move |request, message, writer| Box::pin(handler(request, message, writer)));
        self.router.register(Route::channel(path, meta, handler))?;
        Ok(self)
    }

    /// Register a pre-built route, for callers that need streaming or
    /// custom metadata flags.
    pub fn register(mut self, route: Route) -> Result<Self, Error> {
        self.router.register(route)?;
        Ok(self)
    }

    /// Register an exception responder. Responders are consulted in
    /// registration order, first match wins.
    pub fn exception<P, R>(mut self, predicate: P, responder: R) -> Self
    where
        P: Fn(&Error) -> bool + Send + Sync + 'static,
        R: Fn(Option<&Request>, &Error) -> Result<Response, Error> + Send + Sync + 'static,
    {
        self.exceptions.push((Arc::new(predicate), Arc::new(responder)));
        self
    }

    /// Bind the server without running it. Exposed so callers can
    /// learn the bound address or drive shutdown themselves.
    pub fn into_server(self) -> Result<Server, Error> {
        let mut exceptions = ExceptionHandler::new(self.config.debug);
        for (predicate, responder) in self.exceptions {
            exceptions.register_pair(predicate, responder);
        }
        Server::bind(&self.config, Arc::new(self.router), Arc::new(exceptions))
    }

    /// Serve until SIGINT/SIGTERM, then drain.
    pub async fn serve(self) -> Result<(), Error> {
        init_logging(self.config.debug);
        let server = self.into_server()?;
        let shutdown = server.shutdown_handle();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::info!("shutdown signal received");
            shutdown.trigger();
        });
        server.serve().await
    }

    /// Build a runtime sized by the configured worker count and serve
    /// on it. This is the whole entry point for most applications.
    pub fn run(self) -> Result<(), Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.workers)
            .enable_all()
            .build()?;
        runtime.block_on(self.serve())
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("config", &self.config)
            .field("routes", &self.router.len())
            .field("exceptions", &self.exceptions.len())
            .finish()
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    // A second init (tests, embedded use) keeps the first subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brisk_core::StatusCode;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn hello_app() -> App {
        App::with_config(ServerConfig::new().with_port(0))
            .route(Method::Get, "/hello", |_req| async {
                Ok(Response::text("Hello!", StatusCode::OK))
            })
            .unwrap()
    }

    #[test]
    fn duplicate_route_registration_fails() {
        let app = hello_app();
        let err = app
            .route(Method::Get, "/hello", |_req| async {
                Ok(Response::text("again", StatusCode::OK))
            })
            .unwrap_err();
        assert!(matches!(err, Error::RouteConflict { .. }));
    }

    #[test]
    fn channel_and_http_share_a_path() {
        App::new()
            .route(Method::Get, "/feed", |_req| async {
                Ok(Response::text("snapshot", StatusCode::OK))
            })
            .unwrap()
            .channel("/feed", |_req, _message, _writer| async { ChannelFlow::Stop })
            .unwrap();
    }

    #[tokio::test]
    async fn bound_app_answers_a_request() {
        let server = hello_app().into_server().unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let task = tokio::spawn(server.serve());

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /hello HTTP/1.1\r\nhost: test\r\nconnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        let text = String::from_utf8(reply).unwrap();
        assert!(text.starts_with("HTTP/1.1 200\r\n"));
        assert!(text.ends_with("Hello!"));

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
