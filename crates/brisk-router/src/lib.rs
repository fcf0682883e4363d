//! Exact-match route table.
//!
//! Routes are keyed by an identity digest of `"{path}:{method}"`, so
//! lookup is a single hash probe. There is no parameterised matching;
//! a path resolves only when it was registered verbatim.

#![forbid(unsafe_code)]

mod digest;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use brisk_core::{ChannelFlow, ChannelMessage, ChannelWriter, Error, Method, Request, Response};

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Response, Error>> + Send + 'static>>;

/// An async HTTP handler.
pub type Handler = Arc<dyn Fn(Arc<Request>) -> HandlerFuture + Send + Sync>;

pub type ChannelFuture = Pin<Box<dyn Future<Output = ChannelFlow> + Send + 'static>>;

/// An async channel handler, invoked once per inbound message.
pub type ChannelHandler =
    Arc<dyn Fn(Arc<Request>, ChannelMessage, ChannelWriter) -> ChannelFuture + Send + Sync>;

/// Websocket session metadata carried by channel routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMeta {
    pub encoding: String,
    pub protocol: String,
}

impl Default for ChannelMeta {
    fn default() -> Self {
        Self {
            encoding: "application/octet-stream".to_string(),
            protocol: "topics".to_string(),
        }
    }
}

#[derive(Clone)]
pub enum RouteHandler {
    Http(Handler),
    Channel(ChannelHandler),
}

impl fmt::Debug for RouteHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteHandler::Http(_) => f.write_str("RouteHandler::Http"),
            RouteHandler::Channel(_) => f.write_str("RouteHandler::Channel"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Route {
    pub path: String,
    pub method: Method,
    pub handler: RouteHandler,
    pub streaming: bool,
    pub channel_meta: Option<ChannelMeta>,
}

impl Route {
    pub fn http(path: impl Into<String>, method: Method, handler: Handler) -> Self {
        Self {
            path: path.into(),
            method,
            handler: RouteHandler::Http(handler),
            streaming: false,
            channel_meta: None,
        }
    }

    /// A websocket route. Always registered under [`Method::Channel`].
    pub fn channel(path: impl Into<String>, meta: ChannelMeta, handler: ChannelHandler) -> Self {
        Self {
            path: path.into(),
            method: Method::Channel,
            handler: RouteHandler::Channel(handler),
            streaming: false,
            channel_meta: Some(meta),
        }
    }

    /// Mark the route as streaming. Streaming dispatch is not
    /// implemented; resolution still works.
    pub fn with_streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    pub fn identity(&self) -> String {
        identity_of(&self.path, self.method)
    }
}

/// The digest a route is stored under.
pub fn identity_of(path: &str, method: Method) -> String {
    digest::md5_hex(format!("{path}:{method}").as_bytes())
}

#[derive(Debug, Default)]
pub struct Router {
    routes: HashMap<String, Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route. Fails when a route with the same path and
    /// method already exists.
    pub fn register(&mut self, route: Route) -> Result<(), Error> {
        let identity = route.identity();
        if self.routes.contains_key(&identity) {
            return Err(Error::RouteConflict {
                method: route.method,
                path: route.path,
            });
        }
        self.routes.insert(identity, route);
        Ok(())
    }

    /// Resolve a method and path to a route. A miss where a channel
    /// route exists for the same path reports the method as invalid
    /// instead of the route as unknown.
    pub fn resolve(&self, method: Method, path: &str) -> Result<&Route, Error> {
        if let Some(route) = self.routes.get(&identity_of(path, method)) {
            return Ok(route);
        }
        if method != Method::Channel
            && self.routes.contains_key(&identity_of(path, Method::Channel))
        {
            return Err(Error::InvalidMethod {
                method,
                path: path.to_string(),
            });
        }
        Err(Error::RouteNotFound {
            method,
            path: path.to_string(),
        })
    }

    pub fn contains(&self, method: Method, path: &str) -> bool {
        self.routes.contains_key(&identity_of(path, method))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
