//! hookline - embeddable HTTP/1.x server engine
//!
//! Requests are parsed incrementally and every parsing milestone runs the
//! connection's lifecycle hooks, which may alter close policy or abort the
//! request with a status. Completed requests are routed by exact path, with
//! a generic fallback, to handlers that reply either in one buffer or as a
//! chunked stream.

pub mod config;
pub mod http;
pub mod router;
pub mod server;

pub use crate::{
    config::Config,
    http::{
        connection::{ClosePolicy, ConnContext},
        hooks::{HookResult, HookSet, HookStage},
        request::{Header, Method, Request, Version},
        response::{Response, ResponseBuilder, StatusCode},
        writer::{Chunk, IterProducer, Producer, Reply},
    },
    router::{Handler, Router},
    server::{Server, ServerBuilder, ServerError},
};
