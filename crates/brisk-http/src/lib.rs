//! HTTP/1.x wire engine.
//!
//! The crate splits along the connection lifecycle: [`parser`] turns
//! bytes into requests, [`dispatch`] turns requests into responses,
//! [`connection`] runs the per-socket state machine between the two,
//! [`websocket`] takes over after a protocol upgrade, and [`server`]
//! owns the listener, the live-connection registry and the graceful
//! drain sequence.

#![forbid(unsafe_code)]

pub mod connection;
pub mod dispatch;
pub mod keepalive;
pub mod parser;
pub mod server;
pub mod websocket;

pub use connection::{Connection, ConnectionHandle};
pub use dispatch::Dispatcher;
pub use keepalive::{should_keep_alive, ConnectionInfo};
pub use parser::{ParseError, ParseLimits, ParseStatus, RequestParser};
pub use server::{Server, ShutdownHandle};
pub use websocket::{accept_key, build_upgrade_response, validate_upgrade, WebSocketChannel, WsError};
