use std::net::SocketAddr;
use std::ops::BitOr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::http::hooks::{HookResult, HookSet, PostAcceptHook};
use crate::http::parser::{Event, Parser};
use crate::http::request::{Method, Request, Version};
use crate::http::response::{Response, StatusCode};
use crate::http::writer::{self, Reply, ReplyMeta, WriteError};
use crate::router::Router;

/// Conditions under which the connection is closed after a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClosePolicy(u8);

impl ClosePolicy {
    pub const NONE: ClosePolicy = ClosePolicy(0);
    /// Close after any 4xx response.
    pub const ON_400: ClosePolicy = ClosePolicy(1);
    /// Close after any 5xx response.
    pub const ON_500: ClosePolicy = ClosePolicy(1 << 1);
    /// Close after an `Expect` header was rejected.
    pub const ON_EXPECT_ERR: ClosePolicy = ClosePolicy(1 << 2);
    /// Close after an explicit 200.
    pub const ON_200: ClosePolicy = ClosePolicy(1 << 3);

    pub fn contains(&self, other: ClosePolicy) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn remove(&mut self, other: ClosePolicy) {
        self.0 &= !other.0;
    }

    /// Whether a response with `status` must end the connection.
    pub fn should_close(&self, status: StatusCode, expect_failed: bool) -> bool {
        (status.is_client_error() && self.contains(Self::ON_400))
            || (status.is_server_error() && self.contains(Self::ON_500))
            || (expect_failed && self.contains(Self::ON_EXPECT_ERR))
            || (status == StatusCode::OK && self.contains(Self::ON_200))
    }
}

impl BitOr for ClosePolicy {
    type Output = ClosePolicy;

    fn bitor(self, rhs: Self) -> Self {
        ClosePolicy(self.0 | rhs.0)
    }
}

/// Connection-level state visible to hooks.
#[derive(Debug, Clone)]
pub struct ConnContext {
    peer: Option<SocketAddr>,
    worker: Option<usize>,
    close_policy: ClosePolicy,
    requests_served: usize,
    expect_failed: bool,
}

impl ConnContext {
    pub fn new(peer: Option<SocketAddr>, worker: Option<usize>) -> Self {
        Self {
            peer,
            worker,
            close_policy: ClosePolicy::NONE,
            requests_served: 0,
            expect_failed: false,
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Index of the worker thread driving this connection, if pooled.
    pub fn worker(&self) -> Option<usize> {
        self.worker
    }

    pub fn close_policy(&self) -> ClosePolicy {
        self.close_policy
    }

    pub fn set_close_policy(&mut self, flags: ClosePolicy) {
        self.close_policy = flags;
    }

    pub fn requests_served(&self) -> usize {
        self.requests_served
    }

    pub fn expect_failed(&self) -> bool {
        self.expect_failed
    }
}

/// Server-wide state shared read-only by every connection.
pub struct Shared {
    pub router: Router,
    pub post_accept: Option<PostAcceptHook>,
    pub config: Config,
}

/// Facts about the request that the response depends on.
#[derive(Debug, Clone, Copy)]
pub struct Exchange {
    pub version: Version,
    pub keep_alive: bool,
    pub head_only: bool,
}

#[derive(Debug)]
pub enum ConnectionState {
    Accepted,
    ReadingRequest,
    Dispatched(Request),
    WritingResponse(Reply, Exchange),
    Idle,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Accepted => "accepted",
            ConnectionState::ReadingRequest => "reading_request",
            ConnectionState::Dispatched(_) => "dispatched",
            ConnectionState::WritingResponse(..) => "writing_response",
            ConnectionState::Idle => "idle",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        }
    }
}

enum ReadOutcome {
    Request(Request),
    /// Answer without dispatching: parse error, hook abort, rejected expect.
    Early(Response, Exchange),
    Eof,
}

pub struct Connection<S> {
    stream: S,
    buffer: BytesMut,
    state: ConnectionState,
    parser: Parser,
    ctx: ConnContext,
    hooks: HookSet,
    shared: Arc<Shared>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, shared: Arc<Shared>, ctx: ConnContext) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
            state: ConnectionState::Accepted,
            parser: Parser::new(&shared.config.limits),
            ctx,
            hooks: HookSet::new(),
            shared,
        }
    }

    /// Drives the connection until it is closed.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            trace!(state = self.state.name(), "connection state");

            match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::Accepted => {
                    self.state = match self.shared.post_accept.clone() {
                        Some(hook) => match hook(&mut self.ctx, &mut self.hooks) {
                            HookResult::Status(status) => {
                                debug!(status = status.as_u16(), "post-accept hook rejected connection");
                                ConnectionState::Closing
                            }
                            HookResult::Continue | HookResult::Done => ConnectionState::ReadingRequest,
                        },
                        None => ConnectionState::ReadingRequest,
                    };
                }

                ConnectionState::ReadingRequest => {
                    self.state = match self.read_request().await? {
                        ReadOutcome::Request(req) => ConnectionState::Dispatched(req),
                        ReadOutcome::Early(resp, exchange) => {
                            ConnectionState::WritingResponse(resp.into(), exchange)
                        }
                        ReadOutcome::Eof => ConnectionState::Closing,
                    };
                }

                ConnectionState::Dispatched(req) => {
                    let reply = self.dispatch(&req);
                    let exchange = Exchange {
                        version: req.version,
                        keep_alive: req.keep_alive(),
                        head_only: req.method == Method::HEAD,
                    };
                    self.state = ConnectionState::WritingResponse(reply, exchange);
                }

                ConnectionState::WritingResponse(mut reply, exchange) => {
                    self.state = self.write_response(&mut reply, exchange).await?;
                }

                ConnectionState::Idle => {
                    self.ctx.requests_served += 1;
                    self.ctx.expect_failed = false;
                    self.parser.reset();
                    self.state = ConnectionState::ReadingRequest;
                }

                ConnectionState::Closing => {
                    // The peer may already be gone.
                    let _ = self.stream.shutdown().await;
                    self.state = ConnectionState::Closed;
                }

                ConnectionState::Closed => {
                    self.state = ConnectionState::Closed;
                    break;
                }
            }
        }

        Ok(())
    }

    async fn read_request(&mut self) -> anyhow::Result<ReadOutcome> {
        let mut request = Request::default();

        loop {
            // Parse whatever is already buffered; keep-alive clients may
            // have pipelined the next request.
            loop {
                let event = match self.parser.next_event(&mut self.buffer) {
                    Ok(Some(event)) => event,
                    Ok(None) => break,
                    Err(e) => {
                        debug!(error = %e, "malformed request");
                        return Ok(self.early(&request, e.status()));
                    }
                };

                self.parser.apply(&mut request, &event);

                match &event {
                    Event::MessageComplete => return Ok(ReadOutcome::Request(request)),
                    Event::ExpectHeaderSeen(value) => {
                        let status = self.hooks.check_expect(&mut self.ctx, &request, value);
                        if status.is_informational() {
                            if self.parser.awaiting_body() {
                                let interim = writer::interim(status, request.version);
                                self.stream.write_all(&interim).await?;
                                self.stream.flush().await?;
                            }
                        } else {
                            debug!(status = status.as_u16(), expect = %value, "expectation rejected");
                            self.ctx.expect_failed = true;
                            return Ok(self.early(&request, status));
                        }
                    }
                    _ => {
                        if let HookResult::Status(status) =
                            self.hooks.dispatch(&mut self.ctx, &request, &event)
                        {
                            debug!(status = status.as_u16(), path = %request.path, "hook aborted request");
                            return Ok(self.early(&request, status));
                        }
                    }
                }
            }

            let read = tokio::time::timeout(
                self.shared.config.read_timeout(),
                self.stream.read_buf(&mut self.buffer),
            )
            .await;

            match read {
                Ok(Ok(0)) => {
                    if self.parser.in_progress() {
                        debug!("peer closed mid-request");
                    }
                    return Ok(ReadOutcome::Eof);
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    debug!("read timed out");
                    return Ok(ReadOutcome::Eof);
                }
            }
        }
    }

    /// Builds the error reply for a request abandoned before dispatch.
    ///
    /// If part of the message is still unread the stream position is lost,
    /// so keep-alive is off; unread body bytes are discarded.
    fn early(&self, request: &Request, status: StatusCode) -> ReadOutcome {
        let exchange = Exchange {
            version: self.parser.version(),
            keep_alive: self.parser.message_consumed() && request.keep_alive(),
            head_only: false,
        };
        ReadOutcome::Early(Response::status(status), exchange)
    }

    fn dispatch(&self, req: &Request) -> Reply {
        match self.shared.router.dispatch(&req.path) {
            Ok(target) => {
                debug!(
                    method = req.method.as_str(),
                    path = %req.path,
                    route = ?target.kind,
                    "dispatching request"
                );
                target.handler.handle(req)
            }
            Err(e) => {
                warn!(error = %e, "no handler");
                Response::internal_error().into()
            }
        }
    }

    async fn write_response(
        &mut self,
        reply: &mut Reply,
        exchange: Exchange,
    ) -> anyhow::Result<ConnectionState> {
        let meta = ReplyMeta {
            version: exchange.version,
            keep_alive: exchange.keep_alive,
            head_only: exchange.head_only,
            server_name: self.shared.config.server.server_name.as_deref(),
        };
        // Decide on closing before the head goes out so `Connection: close`
        // is announced.
        let policy_close = self
            .ctx
            .close_policy
            .should_close(reply.status(), self.ctx.expect_failed);
        let meta = ReplyMeta {
            keep_alive: meta.keep_alive && !policy_close,
            ..meta
        };

        let written = match writer::write_reply(&mut self.stream, reply, &meta).await {
            Ok(written) => written,
            Err(WriteError::Producer { chunks, error }) => {
                warn!(chunks, error = %error, "stream producer failed, closing");
                return Ok(ConnectionState::Closing);
            }
            Err(WriteError::Io(e)) => return Err(e.into()),
        };

        debug!(
            status = written.status.as_u16(),
            invocations = written.invocations,
            "response written"
        );

        if policy_close {
            debug!(reason = "close policy", "closing connection");
            Ok(ConnectionState::Closing)
        } else if !meta.keep_alive || written.must_close {
            Ok(ConnectionState::Closing)
        } else {
            Ok(ConnectionState::Idle)
        }
    }
}

/// Runs one connection to completion, logging rather than propagating
/// errors.
pub async fn serve_connection<S>(stream: S, shared: Arc<Shared>, ctx: ConnContext)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let peer = ctx.peer_addr();
    let mut conn = Connection::new(stream, shared, ctx);
    if let Err(e) = conn.run().await {
        debug!(?peer, error = %e, "connection error");
    }
}
