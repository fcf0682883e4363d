//! Core types for the brisk HTTP server engine.
//!
//! Everything protocol-agnostic lives here: headers, requests,
//! responses, the error taxonomy, exception handling and server
//! configuration. The wire machinery builds on these types from
//! `brisk-http`.

#![forbid(unsafe_code)]

pub mod channel;
pub mod config;
pub mod error;
pub mod handlers;
pub mod headers;
pub mod request;
pub mod response;

pub use channel::{ChannelFlow, ChannelMessage, ChannelWriter};
pub use config::ServerConfig;
pub use error::Error;
pub use handlers::ExceptionHandler;
pub use headers::{Header, HeaderTable};
pub use request::{Body, FilePart, FormBody, HttpVersion, Method, Request, RequestParameters};
pub use response::{Response, StatusCode};
