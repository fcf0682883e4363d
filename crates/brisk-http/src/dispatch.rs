//! Request dispatch: route resolution, handler invocation and error
//! rendering. Every path through here produces a response; transport
//! failures are the connection's problem.

use std::sync::Arc;

use brisk_core::{Error, ExceptionHandler, Request, Response, StatusCode};
use brisk_router::{Route, RouteHandler, Router};

#[derive(Debug, Clone)]
pub struct Dispatcher {
    pub router: Arc<Router>,
    pub exceptions: Arc<ExceptionHandler>,
    pub debug: bool,
}

impl Dispatcher {
    pub fn new(router: Arc<Router>, exceptions: Arc<ExceptionHandler>, debug: bool) -> Self {
        Self { router, exceptions, debug }
    }

    /// Dispatch a plain HTTP request.
    pub async fn dispatch(&self, request: Arc<Request>) -> Response {
        let route = match self.router.resolve(request.method, &request.path) {
            Ok(route) => route,
            Err(Error::RouteNotFound { method, path }) => {
                return self.route_not_found(method, &path);
            }
            Err(err) => return self.exceptions.handle(Some(&request), &err),
        };

        if route.streaming {
            let err = Error::ServerError("streaming handlers are not implemented".into());
            return self.exceptions.handle(Some(&request), &err);
        }

        match &route.handler {
            RouteHandler::Http(handler) => match handler(Arc::clone(&request)).await {
                Ok(response) => response,
                Err(err) => self.exceptions.handle(Some(&request), &err),
            },
            // Channel routes only resolve under the channel method,
            // which never arrives on a plain request.
            RouteHandler::Channel(_) => {
                let err = Error::ServerError("channel route dispatched over http".into());
                self.exceptions.handle(Some(&request), &err)
            }
        }
    }

    /// Resolve the channel route for an upgraded connection.
    pub fn resolve_channel(&self, path: &str) -> Result<&Route, Error> {
        self.router.resolve(brisk_core::Method::Channel, path)
    }

    /// Unresolved routes bypass the exception chain and always render
    /// a 500: detailed in debug mode, opaque otherwise.
    pub fn route_not_found(&self, method: brisk_core::Method, path: &str) -> Response {
        if self.debug {
            Response::text(
                format!("Method[{method}] and Route[{path}] does not exist"),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        } else {
            Response::text("Service Error", StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
