//! Minimal brisk application: one HTTP route and an echo channel.
//!
//! Run with `cargo run --example hello`, then:
//!
//! ```text
//! curl http://127.0.0.1:8000/hello
//! ```

use brisk::{App, ChannelFlow, ChannelMessage, Method, Response, StatusCode};

fn main() -> Result<(), brisk::Error> {
    App::from_env()
        .route(Method::Get, "/hello", |_req| async {
            Ok(Response::text("Hello, world!", StatusCode::OK))
        })?
        .route(Method::Post, "/echo", |req| async move {
            Response::new(
                req.body.extract(),
                StatusCode::OK,
                [("content-type", "application/octet-stream")],
            )
        })?
        .channel("/ws", |_req, message, writer| async move {
            if let ChannelMessage::Text(text) = &message {
                if text == "quit" {
                    return ChannelFlow::Stop;
                }
            }
            writer.send(message);
            ChannelFlow::Continue
        })?
        .run()
}
