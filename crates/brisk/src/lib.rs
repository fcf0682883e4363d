//! brisk — an asynchronous HTTP/1.x server engine.
//!
//! Routes are registered explicitly on an [`App`] builder, each one an
//! async handler taking a [`Request`] and returning a [`Response`].
//! Websocket endpoints register as channel routes; their handler runs
//! once per inbound message and returns [`ChannelFlow::Stop`] to end
//! the session. The engine handles keep-alive, request timeouts and
//! graceful shutdown drain on its own.
//!
//! ```no_run
//! use brisk::{App, Method, Response, StatusCode};
//!
//! fn main() -> Result<(), brisk::Error> {
//!     App::new()
//!         .route(Method::Get, "/hello", |_req| async {
//!             Ok(Response::text("Hello!", StatusCode::OK))
//!         })?
//!         .run()
//! }
//! ```
//!
//! # Crate structure
//!
//! - [`brisk_core`] — headers, request/response model, errors, config
//! - [`brisk_router`] — exact-match route table
//! - [`brisk_http`] — parser, connection state machine, websocket
//!   codec, server loop

#![forbid(unsafe_code)]

pub use brisk_core as core;
pub use brisk_http as http;
pub use brisk_router as router;

mod app;

pub use app::App;
pub use brisk_core::{
    ChannelFlow, ChannelMessage, ChannelWriter, Error, Header, HeaderTable, HttpVersion, Method,
    Request, Response, ServerConfig, StatusCode,
};
pub use brisk_http::{Server, ShutdownHandle};
pub use brisk_router::{ChannelMeta, Route, Router};
