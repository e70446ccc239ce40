//! Exact-path routing with a generic fallback.
//!
//! Routes are registered while configuring the server and never change
//! afterwards, so workers read the table concurrently through an `Arc`
//! without locking.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::http::request::Request;
use crate::http::writer::Reply;

/// Produces the reply for a completed request.
///
/// Runs synchronously on the connection's worker; it must not block.
/// Closures `Fn(&Request) -> Reply` implement it, with any per-route state
/// captured by the closure.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, req: &Request) -> Reply;
}

impl<F> Handler for F
where
    F: Fn(&Request) -> Reply + Send + Sync + 'static,
{
    fn handle(&self, req: &Request) -> Reply {
        self(req)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Exact,
    Generic,
}

/// Result of a lookup: the handler to run and how it was found.
#[derive(Clone)]
pub struct Target<'a> {
    pub handler: &'a Arc<dyn Handler>,
    pub kind: RouteKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("no route for `{0}` and no generic callback")]
    NoHandler(String),
}

#[derive(Default, Clone)]
pub struct Router {
    routes: HashMap<String, Arc<dyn Handler>>,
    generic: Option<Arc<dyn Handler>>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut paths: Vec<_> = self.routes.keys().collect();
        paths.sort();
        f.debug_struct("Router")
            .field("routes", &paths)
            .field("generic", &self.generic.is_some())
            .finish()
    }
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for exactly `path`, replacing any previous one.
    pub fn route(&mut self, path: impl Into<String>, handler: impl Handler) -> &mut Self {
        self.routes.insert(path.into(), Arc::new(handler));
        self
    }

    /// Registers the fallback used when no exact route matches.
    pub fn generic(&mut self, handler: impl Handler) -> &mut Self {
        self.generic = Some(Arc::new(handler));
        self
    }

    pub fn has_generic(&self) -> bool {
        self.generic.is_some()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Finds the handler for `path`: the exact route if one exists,
    /// otherwise the generic callback.
    pub fn dispatch(&self, path: &str) -> Result<Target<'_>, RouteError> {
        if let Some(handler) = self.routes.get(path) {
            return Ok(Target {
                handler,
                kind: RouteKind::Exact,
            });
        }
        self.generic
            .as_ref()
            .map(|handler| Target {
                handler,
                kind: RouteKind::Generic,
            })
            .ok_or_else(|| RouteError::NoHandler(path.to_string()))
    }
}
