//! Per-connection lifecycle hooks.
//!
//! A [`HookSet`] holds, for every parsing milestone, the closures registered
//! for it in registration order. Hooks observe the partially parsed request
//! read-only and may change connection policy through [`ConnContext`].

use std::sync::Arc;

use crate::http::connection::ConnContext;
use crate::http::parser::Event;
use crate::http::request::{Header, Request};
use crate::http::response::StatusCode;

/// What a hook wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookResult {
    /// Run the next hook for this stage.
    Continue,
    /// Skip the remaining hooks for this stage, keep parsing.
    Done,
    /// Stop parsing and answer with this status.
    Status(StatusCode),
}

/// Milestones hooks can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    HeaderField,
    AllHeaders,
    Path,
    Uri,
    Body,
    Expect,
}

type HeaderHook = Box<dyn FnMut(&mut ConnContext, &Request, &Header) -> HookResult + Send>;
type HeadersHook = Box<dyn FnMut(&mut ConnContext, &Request) -> HookResult + Send>;
type TextHook = Box<dyn FnMut(&mut ConnContext, &Request, &str) -> HookResult + Send>;
type BodyHook = Box<dyn FnMut(&mut ConnContext, &Request, &[u8]) -> HookResult + Send>;
type ExpectHook = Box<dyn FnMut(&mut ConnContext, &Request, &str) -> StatusCode + Send>;

/// Runs once per accepted connection, before anything is read. Installs the
/// connection's hooks and close policy; returning [`HookResult::Status`]
/// drops the connection.
pub type PostAcceptHook = Arc<dyn Fn(&mut ConnContext, &mut HookSet) -> HookResult + Send + Sync>;

#[derive(Default)]
pub struct HookSet {
    header: Vec<HeaderHook>,
    headers: Vec<HeadersHook>,
    path: Vec<TextHook>,
    uri: Vec<TextHook>,
    body: Vec<BodyHook>,
    expect: Vec<ExpectHook>,
}

impl std::fmt::Debug for HookSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookSet")
            .field("header", &self.header.len())
            .field("headers", &self.headers.len())
            .field("path", &self.path.len())
            .field("uri", &self.uri.len())
            .field("body", &self.body.len())
            .field("expect", &self.expect.len())
            .finish()
    }
}

/// Runs a chain in order; `Done` ends the chain without aborting.
macro_rules! run_chain {
    ($hooks:expr, $($arg:expr),*) => {{
        let mut outcome = HookResult::Continue;
        for hook in $hooks.iter_mut() {
            match hook($($arg),*) {
                HookResult::Continue => continue,
                HookResult::Done => break,
                status @ HookResult::Status(_) => {
                    outcome = status;
                    break;
                }
            }
        }
        outcome
    }};
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once per header field, with only that field.
    pub fn on_header<F>(&mut self, hook: F) -> &mut Self
    where
        F: FnMut(&mut ConnContext, &Request, &Header) -> HookResult + Send + 'static,
    {
        self.header.push(Box::new(hook));
        self
    }

    /// Called once the whole header block is in.
    pub fn on_headers<F>(&mut self, hook: F) -> &mut Self
    where
        F: FnMut(&mut ConnContext, &Request) -> HookResult + Send + 'static,
    {
        self.headers.push(Box::new(hook));
        self
    }

    pub fn on_path<F>(&mut self, hook: F) -> &mut Self
    where
        F: FnMut(&mut ConnContext, &Request, &str) -> HookResult + Send + 'static,
    {
        self.path.push(Box::new(hook));
        self
    }

    pub fn on_uri<F>(&mut self, hook: F) -> &mut Self
    where
        F: FnMut(&mut ConnContext, &Request, &str) -> HookResult + Send + 'static,
    {
        self.uri.push(Box::new(hook));
        self
    }

    /// Called for every slice of body data as it arrives.
    pub fn on_body<F>(&mut self, hook: F) -> &mut Self
    where
        F: FnMut(&mut ConnContext, &Request, &[u8]) -> HookResult + Send + 'static,
    {
        self.body.push(Box::new(hook));
        self
    }

    /// Called with the `Expect` header value before any body is read.
    ///
    /// Return [`StatusCode::CONTINUE`] to accept. Any other status is sent
    /// to the client; non-1xx statuses abandon the request.
    pub fn on_expect<F>(&mut self, hook: F) -> &mut Self
    where
        F: FnMut(&mut ConnContext, &Request, &str) -> StatusCode + Send + 'static,
    {
        self.expect.push(Box::new(hook));
        self
    }

    pub fn len(&self, stage: HookStage) -> usize {
        match stage {
            HookStage::HeaderField => self.header.len(),
            HookStage::AllHeaders => self.headers.len(),
            HookStage::Path => self.path.len(),
            HookStage::Uri => self.uri.len(),
            HookStage::Body => self.body.len(),
            HookStage::Expect => self.expect.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_empty()
            && self.headers.is_empty()
            && self.path.is_empty()
            && self.uri.is_empty()
            && self.body.is_empty()
            && self.expect.is_empty()
    }

    /// Runs the chain for the stage `event` belongs to.
    ///
    /// `ExpectHeaderSeen` is not handled here; see [`HookSet::check_expect`].
    pub fn dispatch(&mut self, ctx: &mut ConnContext, req: &Request, event: &Event) -> HookResult {
        match event {
            Event::HeaderFieldParsed(header) => run_chain!(self.header, ctx, req, header),
            Event::AllHeadersParsed => run_chain!(self.headers, ctx, req),
            Event::PathParsed(path) => run_chain!(self.path, ctx, req, path),
            Event::UriParsed(uri) => run_chain!(self.uri, ctx, req, uri),
            Event::BodyDataParsed(data) => run_chain!(self.body, ctx, req, data),
            Event::MethodParsed(_) | Event::ExpectHeaderSeen(_) | Event::MessageComplete => {
                HookResult::Continue
            }
        }
    }

    /// Decides the answer to an `Expect` header.
    ///
    /// The first hook returning something other than 100 decides. Without
    /// hooks, `100-continue` is accepted and anything else gets 417.
    pub fn check_expect(&mut self, ctx: &mut ConnContext, req: &Request, value: &str) -> StatusCode {
        if self.expect.is_empty() {
            return if value.eq_ignore_ascii_case("100-continue") {
                StatusCode::CONTINUE
            } else {
                StatusCode::EXPECTATION_FAILED
            };
        }

        for hook in self.expect.iter_mut() {
            let status = hook(ctx, req, value);
            if status != StatusCode::CONTINUE {
                return status;
            }
        }
        StatusCode::CONTINUE
    }
}
