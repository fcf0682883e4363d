//! Exception handling: a registration chain checked in order, a
//! status-aware default, and a floor that can never fail.

use std::sync::Arc;

use crate::error::Error;
use crate::request::Request;
use crate::response::{Response, StatusCode};

/// Matches the errors a responder wants to handle.
pub type ExceptionPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Produces a response for a matched error. A failing responder falls
/// through to the floor response.
pub type ExceptionResponder =
    Arc<dyn Fn(Option<&Request>, &Error) -> Result<Response, Error> + Send + Sync>;

pub struct ExceptionHandler {
    handlers: Vec<(ExceptionPredicate, ExceptionResponder)>,
    debug: bool,
}

impl ExceptionHandler {
    pub fn new(debug: bool) -> Self {
        Self { handlers: Vec::new(), debug }
    }

    /// Register a responder. Registrations are consulted in insertion
    /// order; the first matching predicate wins.
    pub fn register<P, R>(&mut self, predicate: P, responder: R)
    where
        P: Fn(&Error) -> bool + Send + Sync + 'static,
        R: Fn(Option<&Request>, &Error) -> Result<Response, Error> + Send + Sync + 'static,
    {
        self.handlers.push((Arc::new(predicate), Arc::new(responder)));
    }

    /// Register an already-boxed pair. Used by application builders
    /// that collect registrations before the handler exists.
    pub fn register_pair(&mut self, predicate: ExceptionPredicate, responder: ExceptionResponder) {
        self.handlers.push((predicate, responder));
    }

    /// Render an error into a response. Never fails: a responder error
    /// degrades to the floor response.
    pub fn handle(&self, request: Option<&Request>, error: &Error) -> Response {
        if self.debug {
            tracing::error!(error = %error, "handling exception");
        }
        for (predicate, responder) in &self.handlers {
            if predicate(error) {
                return match responder(request, error) {
                    Ok(response) => response,
                    Err(inner) => self.floor(error, &inner),
                };
            }
        }
        self.default(error)
    }

    fn default(&self, error: &Error) -> Response {
        if let Some(status) = error.status() {
            return Response::text(format!("Error: {error}"), status);
        }
        if self.debug {
            return Response::text(
                format!("Error: {error}\nDetail: {error:?}"),
                StatusCode::INTERNAL_SERVER_ERROR,
            );
        }
        Response::text(
            "An error occurred that the server couldn't handle correctly.",
            StatusCode::INTERNAL_SERVER_ERROR,
        )
    }

    fn floor(&self, error: &Error, inner: &Error) -> Response {
        if self.debug {
            Response::text(
                format!("Error[{inner}] while handling error[{error}]"),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        } else {
            Response::text("Internal Error", StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

impl std::fmt::Debug for ExceptionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExceptionHandler")
            .field("handlers", &self.handlers.len())
            .field("debug", &self.debug)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_responder_wins() {
        let mut handler = ExceptionHandler::new(false);
        handler.register(
            |e| matches!(e, Error::NotFound(_)),
            |_, _| Ok(Response::text("first", StatusCode::NOT_FOUND)),
        );
        handler.register(
            |_| true,
            |_, _| Ok(Response::text("second", StatusCode::OK)),
        );
        let response = handler.handle(None, &Error::NotFound("/x".into()));
        assert_eq!(response.body, b"first");
        let response = handler.handle(None, &Error::RequestTimeout);
        assert_eq!(response.body, b"second");
    }

    #[test]
    fn default_uses_the_error_status() {
        let handler = ExceptionHandler::new(false);
        let response = handler.handle(None, &Error::RequestTimeout);
        assert_eq!(response.status, StatusCode::REQUEST_TIMEOUT);
        assert_eq!(response.body, b"Error: Request Timeout");
    }

    #[test]
    fn statusless_error_degrades_to_500() {
        let handler = ExceptionHandler::new(false);
        let response = handler.handle(None, &Error::Internal("boom".into()));
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.body,
            b"An error occurred that the server couldn't handle correctly."
        );
    }

    #[test]
    fn failing_responder_hits_the_floor() {
        let mut debug_handler = ExceptionHandler::new(true);
        debug_handler.register(
            |_| true,
            |_, _| Err(Error::Internal("responder broke".into())),
        );
        let response = debug_handler.handle(None, &Error::RequestTimeout);
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        let body = String::from_utf8(response.body).unwrap();
        assert!(body.contains("while handling error"));

        let mut quiet_handler = ExceptionHandler::new(false);
        quiet_handler.register(|_| true, |_, _| Err(Error::Internal("broke".into())));
        let response = quiet_handler.handle(None, &Error::RequestTimeout);
        assert_eq!(response.body, b"Internal Error");
    }
}
