//! Incremental HTTP/1.x request parser.
//!
//! The parser is pull-based: the connection appends whatever the socket
//! delivered to a [`BytesMut`] and calls [`Parser::next_event`] until it
//! returns `Ok(None)`, meaning more input is needed. Because events are
//! handed out one at a time, the caller can stop pulling the moment a hook
//! aborts, and nothing after that point is parsed.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

use crate::config::LimitsConfig;
use crate::http::request::{Header, Method, Request, Version};
use crate::http::response::StatusCode;

const CRLF: &[u8] = b"\r\n";
const MAX_CHUNK_LINE: usize = 1024;

/// A parsing milestone.
///
/// Emitted in request-line, headers, expect, body, complete order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    MethodParsed(Method),
    PathParsed(String),
    UriParsed(String),
    HeaderFieldParsed(Header),
    AllHeadersParsed,
    ExpectHeaderSeen(String),
    BodyDataParsed(Bytes),
    MessageComplete,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed request line")]
    InvalidRequest,
    #[error("unknown method `{0}`")]
    InvalidMethod(String),
    #[error("unsupported protocol version `{0}`")]
    UnsupportedVersion(String),
    #[error("malformed header line")]
    InvalidHeader,
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("malformed chunk framing")]
    InvalidChunk,
    #[error("request head exceeds {0} bytes")]
    HeadTooLarge(usize),
    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(usize),
    #[error("incomplete request")]
    Incomplete,
}

impl ParseError {
    /// Status the server should answer with.
    pub fn status(&self) -> StatusCode {
        match self {
            ParseError::UnsupportedVersion(_) => StatusCode::VERSION_NOT_SUPPORTED,
            ParseError::HeadTooLarge(_) => StatusCode::HEADER_FIELDS_TOO_LARGE,
            ParseError::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    RequestLine,
    Headers,
    Body { remaining: usize },
    ChunkSize,
    ChunkData { remaining: usize },
    ChunkEnd,
    Trailers,
    Done,
}

/// Per-request incremental parser. Call [`Parser::reset`] between requests
/// on a keep-alive connection.
#[derive(Debug)]
pub struct Parser {
    state: State,
    pending: VecDeque<Event>,
    version: Version,
    content_length: Option<usize>,
    chunked: bool,
    expect: Option<String>,
    head_len: usize,
    body_len: usize,
    max_head: usize,
    max_body: usize,
}

impl Parser {
    pub fn new(limits: &LimitsConfig) -> Self {
        Self {
            state: State::RequestLine,
            pending: VecDeque::new(),
            version: Version::Http11,
            content_length: None,
            chunked: false,
            expect: None,
            head_len: 0,
            body_len: 0,
            max_head: limits.max_header_bytes,
            max_body: limits.max_body_bytes,
        }
    }

    pub fn reset(&mut self) {
        self.state = State::RequestLine;
        self.pending.clear();
        self.version = Version::Http11;
        self.content_length = None;
        self.chunked = false;
        self.expect = None;
        self.head_len = 0;
        self.body_len = 0;
    }

    /// Version from the request line; `Http11` until it has been parsed.
    pub fn version(&self) -> Version {
        self.version
    }

    /// True once `MessageComplete` has been handed out.
    pub fn is_complete(&self) -> bool {
        self.state == State::Done && self.pending.is_empty()
    }

    /// True once every byte of the current message has been consumed, even
    /// if trailing events are still queued.
    pub fn message_consumed(&self) -> bool {
        self.state == State::Done
    }

    /// True if any part of a request has been consumed.
    pub fn in_progress(&self) -> bool {
        self.state != State::RequestLine || self.head_len > 0
    }

    /// True once the head is parsed and the body has not started arriving.
    pub fn awaiting_body(&self) -> bool {
        match self.state {
            State::Body { remaining } => remaining > 0 && self.body_len == 0,
            State::ChunkSize => self.body_len == 0,
            _ => false,
        }
    }

    /// Pulls the next event out of `buf`, consuming the bytes it covers.
    ///
    /// `Ok(None)` means `buf` holds no complete event; append more input and
    /// call again.
    pub fn next_event(&mut self, buf: &mut BytesMut) -> Result<Option<Event>, ParseError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }

            match self.state {
                State::RequestLine => {
                    let Some(line) = self.take_head_line(buf)? else {
                        return Ok(None);
                    };
                    // Stray CRLFs before a request line are tolerated.
                    if line.is_empty() {
                        continue;
                    }
                    self.parse_request_line(&line)?;
                    self.state = State::Headers;
                }

                State::Headers => {
                    let Some(line) = self.take_head_line(buf)? else {
                        return Ok(None);
                    };
                    if line.is_empty() {
                        self.finish_head()?;
                    } else {
                        let header = self.parse_header_line(&line)?;
                        self.pending.push_back(Event::HeaderFieldParsed(header));
                    }
                }

                State::Body { remaining } => {
                    if buf.is_empty() {
                        return Ok(None);
                    }
                    let n = remaining.min(buf.len());
                    let data = buf.split_to(n).freeze();
                    self.body_len += n;
                    if remaining == n {
                        self.state = State::Done;
                        self.pending.push_back(Event::MessageComplete);
                    } else {
                        self.state = State::Body {
                            remaining: remaining - n,
                        };
                    }
                    return Ok(Some(Event::BodyDataParsed(data)));
                }

                State::ChunkSize => {
                    let Some(pos) = find_crlf(buf) else {
                        if buf.len() > MAX_CHUNK_LINE {
                            return Err(ParseError::InvalidChunk);
                        }
                        return Ok(None);
                    };
                    let line = buf.split_to(pos);
                    buf.advance(CRLF.len());
                    let size = parse_chunk_size(&line)?;
                    if size == 0 {
                        self.state = State::Trailers;
                    } else {
                        if size > self.max_body.saturating_sub(self.body_len) {
                            return Err(ParseError::BodyTooLarge(self.max_body));
                        }
                        self.state = State::ChunkData { remaining: size };
                    }
                }

                State::ChunkData { remaining } => {
                    if buf.is_empty() {
                        return Ok(None);
                    }
                    let n = remaining.min(buf.len());
                    let data = buf.split_to(n).freeze();
                    self.body_len += n;
                    self.state = if remaining == n {
                        State::ChunkEnd
                    } else {
                        State::ChunkData {
                            remaining: remaining - n,
                        }
                    };
                    return Ok(Some(Event::BodyDataParsed(data)));
                }

                State::ChunkEnd => {
                    if buf.len() < CRLF.len() {
                        return Ok(None);
                    }
                    if &buf[..CRLF.len()] != CRLF {
                        return Err(ParseError::InvalidChunk);
                    }
                    buf.advance(CRLF.len());
                    self.state = State::ChunkSize;
                }

                State::Trailers => {
                    let Some(pos) = find_crlf(buf) else {
                        if buf.len() > self.max_head {
                            return Err(ParseError::HeadTooLarge(self.max_head));
                        }
                        return Ok(None);
                    };
                    buf.advance(pos + CRLF.len());
                    if pos == 0 {
                        self.state = State::Done;
                        return Ok(Some(Event::MessageComplete));
                    }
                }

                State::Done => return Ok(None),
            }
        }
    }

    /// Folds an event into the request being assembled.
    pub fn apply(&self, req: &mut Request, event: &Event) {
        match event {
            Event::MethodParsed(method) => req.method = *method,
            Event::PathParsed(path) => req.path = path.clone(),
            Event::UriParsed(uri) => {
                req.set_uri(uri.clone());
                req.version = self.version;
            }
            Event::HeaderFieldParsed(header) => req.push_header(header.clone()),
            Event::BodyDataParsed(data) => req.body.extend_from_slice(data),
            Event::AllHeadersParsed
            | Event::ExpectHeaderSeen(_)
            | Event::MessageComplete => {}
        }
    }

    fn take_head_line(&mut self, buf: &mut BytesMut) -> Result<Option<String>, ParseError> {
        let Some(pos) = find_crlf(buf) else {
            if self.head_len + buf.len() > self.max_head {
                return Err(ParseError::HeadTooLarge(self.max_head));
            }
            return Ok(None);
        };

        self.head_len += pos + CRLF.len();
        if self.head_len > self.max_head {
            return Err(ParseError::HeadTooLarge(self.max_head));
        }

        let line = buf.split_to(pos);
        buf.advance(CRLF.len());

        let invalid = if self.state == State::RequestLine {
            ParseError::InvalidRequest
        } else {
            ParseError::InvalidHeader
        };
        String::from_utf8(line.to_vec())
            .map(Some)
            .map_err(|_| invalid)
    }

    fn parse_request_line(&mut self, line: &str) -> Result<(), ParseError> {
        let mut parts = line.split(' ');
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ParseError::InvalidRequest);
        };

        if target.is_empty() {
            return Err(ParseError::InvalidRequest);
        }

        let method =
            Method::from_str(method).ok_or_else(|| ParseError::InvalidMethod(method.to_string()))?;

        self.version = match version {
            "HTTP/1.1" => Version::Http11,
            "HTTP/1.0" => Version::Http10,
            v if v.starts_with("HTTP/") => {
                return Err(ParseError::UnsupportedVersion(v.to_string()));
            }
            _ => return Err(ParseError::InvalidRequest),
        };

        let path = target.split_once('?').map_or(target, |(p, _)| p);

        self.pending.push_back(Event::MethodParsed(method));
        self.pending.push_back(Event::PathParsed(path.to_string()));
        self.pending.push_back(Event::UriParsed(target.to_string()));
        Ok(())
    }

    fn parse_header_line(&mut self, line: &str) -> Result<Header, ParseError> {
        // Obsolete line folding is rejected.
        if line.starts_with([' ', '\t']) {
            return Err(ParseError::InvalidHeader);
        }

        let (name, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;
        if name.is_empty() || name.contains(|c: char| c.is_ascii_whitespace() || c.is_control()) {
            return Err(ParseError::InvalidHeader);
        }
        let header = Header::new(name, value.trim());

        if header.is("Content-Length") {
            let len = header
                .value
                .parse::<usize>()
                .map_err(|_| ParseError::InvalidContentLength)?;
            if self.content_length.is_some_and(|prev| prev != len) {
                return Err(ParseError::InvalidContentLength);
            }
            self.content_length = Some(len);
        } else if header.is("Transfer-Encoding") {
            self.chunked = header
                .value
                .rsplit(',')
                .next()
                .is_some_and(|last| last.trim().eq_ignore_ascii_case("chunked"));
        } else if header.is("Expect") {
            self.expect = Some(header.value.clone());
        }

        Ok(header)
    }

    fn finish_head(&mut self) -> Result<(), ParseError> {
        let length = if self.chunked {
            None
        } else {
            Some(self.content_length.unwrap_or(0))
        };

        if let Some(len) = length {
            if len > self.max_body {
                return Err(ParseError::BodyTooLarge(self.max_body));
            }
        }

        self.pending.push_back(Event::AllHeadersParsed);
        if let Some(expect) = self.expect.take() {
            self.pending.push_back(Event::ExpectHeaderSeen(expect));
        }

        match length {
            None => self.state = State::ChunkSize,
            Some(0) => {
                self.state = State::Done;
                self.pending.push_back(Event::MessageComplete);
            }
            Some(remaining) => self.state = State::Body { remaining },
        }
        Ok(())
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, ParseError> {
    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidChunk)?;
    // Chunk extensions are ignored.
    let size = line.split(';').next().unwrap_or("").trim();
    if size.is_empty() {
        return Err(ParseError::InvalidChunk);
    }
    usize::from_str_radix(size, 16).map_err(|_| ParseError::InvalidChunk)
}

/// Parses one complete request from the front of `buf`.
///
/// Returns the request and the number of bytes it occupied. Fails with
/// [`ParseError::Incomplete`] if `buf` ends before the message does.
pub fn parse_http_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    parse_http_request_with(buf, &LimitsConfig::default())
}

pub fn parse_http_request_with(
    buf: &[u8],
    limits: &LimitsConfig,
) -> Result<(Request, usize), ParseError> {
    let mut input = BytesMut::from(buf);
    let mut parser = Parser::new(limits);
    let mut request = Request::default();

    while let Some(event) = parser.next_event(&mut input)? {
        parser.apply(&mut request, &event);
        if event == Event::MessageComplete {
            return Ok((request, buf.len() - input.len()));
        }
    }

    Err(ParseError::Incomplete)
}
