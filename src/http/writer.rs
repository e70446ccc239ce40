use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::request::Version;
use crate::http::response::{Response, StatusCode};

const TERMINATOR: &[u8] = b"0\r\n\r\n";

/// One step of a streamed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Data(Bytes),
    Done,
}

/// Produces a streamed response body one chunk per call.
///
/// The writer only calls `produce` again after the previous chunk has been
/// handed to the socket in full, so implementations never see overlapping
/// calls. An `Err` ends the response without the terminating chunk.
pub trait Producer: Send {
    fn produce(&mut self) -> anyhow::Result<Chunk>;
}

impl<F> Producer for F
where
    F: FnMut() -> anyhow::Result<Chunk> + Send,
{
    fn produce(&mut self) -> anyhow::Result<Chunk> {
        self()
    }
}

/// Streams the items of an iterator, then `Done`.
///
/// ```
/// # use hookline::http::writer::{Chunk, IterProducer, Producer};
/// let mut p = IterProducer::new(["foo\n", "bar\n"]);
/// assert_eq!(p.produce().unwrap(), Chunk::Data("foo\n".into()));
/// assert_eq!(p.produce().unwrap(), Chunk::Data("bar\n".into()));
/// assert_eq!(p.produce().unwrap(), Chunk::Done);
/// ```
pub struct IterProducer<I> {
    iter: I,
}

impl<I: Iterator> IterProducer<I> {
    pub fn new(items: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            iter: items.into_iter(),
        }
    }
}

impl<I> Producer for IterProducer<I>
where
    I: Iterator + Send,
    I::Item: Into<Bytes>,
{
    fn produce(&mut self) -> anyhow::Result<Chunk> {
        Ok(match self.iter.next() {
            Some(item) => Chunk::Data(item.into()),
            None => Chunk::Done,
        })
    }
}

/// What a handler answers with.
pub enum Reply {
    /// Fully computed response, written with `Content-Length`.
    Buffered(Response),
    /// Chunked response driven by a producer.
    Stream {
        status: StatusCode,
        headers: Vec<(String, String)>,
        producer: Box<dyn Producer>,
    },
}

impl Reply {
    pub fn stream(status: StatusCode, producer: impl Producer + 'static) -> Self {
        Reply::Stream {
            status,
            headers: Vec::new(),
            producer: Box::new(producer),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Reply::Buffered(resp) => resp.status,
            Reply::Stream { status, .. } => *status,
        }
    }
}

impl From<Response> for Reply {
    fn from(resp: Response) -> Self {
        Reply::Buffered(resp)
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::Buffered(resp) => f.debug_tuple("Buffered").field(resp).finish(),
            Reply::Stream { status, .. } => f.debug_struct("Stream").field("status", status).finish(),
        }
    }
}

/// Connection-level facts that shape the response head.
#[derive(Debug, Clone, Copy)]
pub struct ReplyMeta<'a> {
    pub version: Version,
    pub keep_alive: bool,
    /// Request was HEAD: send headers only.
    pub head_only: bool,
    pub server_name: Option<&'a str>,
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("stream producer failed after {chunks} chunk(s): {error}")]
    Producer { chunks: usize, error: anyhow::Error },
}

/// Result of a completed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Written {
    pub status: StatusCode,
    /// Producer invocations, 0 for buffered replies.
    pub invocations: usize,
    /// The body was delimited by closing the connection.
    pub must_close: bool,
}

enum Framing {
    Length(usize),
    Chunked,
    UntilClose,
}

fn serialize_head(
    status: StatusCode,
    reason: &str,
    headers: &[(String, String)],
    framing: Framing,
    meta: &ReplyMeta<'_>,
) -> BytesMut {
    let mut buf = BytesMut::with_capacity(256);

    // Status line
    buf.put_slice(
        format!("{} {} {}\r\n", meta.version.as_str(), status.as_u16(), reason).as_bytes(),
    );

    let mut put = |k: &str, v: &str| {
        buf.put_slice(k.as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(v.as_bytes());
        buf.put_slice(b"\r\n");
    };

    if let Some(name) = meta.server_name {
        put("Server", name);
    }

    for (k, v) in headers {
        if k.eq_ignore_ascii_case("Content-Length")
            || k.eq_ignore_ascii_case("Transfer-Encoding")
            || k.eq_ignore_ascii_case("Connection")
        {
            continue;
        }
        put(k, v);
    }

    let user_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
        .map(|(_, v)| v.as_str());

    if status.allows_body() {
        match framing {
            Framing::Length(len) => put("Content-Length", user_length.unwrap_or(&len.to_string())),
            Framing::Chunked => put("Transfer-Encoding", "chunked"),
            Framing::UntilClose => {}
        }
    }

    let keep_alive = meta.keep_alive && !matches!(framing, Framing::UntilClose);
    match (meta.version, keep_alive) {
        (Version::Http11, false) => put("Connection", "close"),
        (Version::Http10, true) => put("Connection", "keep-alive"),
        _ => {}
    }

    // Header/body separator
    buf.put_slice(b"\r\n");
    buf
}

/// Serializes a buffered response: status line, headers with
/// `Content-Length`, then the body.
pub fn serialize_response(resp: &Response, meta: &ReplyMeta<'_>) -> Bytes {
    let mut buf = serialize_head(
        resp.status,
        resp.reason_phrase(),
        &resp.headers,
        Framing::Length(resp.body.len()),
        meta,
    );
    if resp.status.allows_body() && !meta.head_only {
        buf.put_slice(&resp.body);
    }
    buf.freeze()
}

/// Frames one chunk as `<hex-length>\r\n<data>\r\n`.
pub fn encode_chunk(data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(data.len() + 12);
    buf.put_slice(format!("{:x}\r\n", data.len()).as_bytes());
    buf.put_slice(data);
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// Interim response for an accepted `Expect`.
pub fn interim(status: StatusCode, version: Version) -> Bytes {
    Bytes::from(format!(
        "{} {} {}\r\n\r\n",
        version.as_str(),
        status.as_u16(),
        status.reason_phrase()
    ))
}

pub struct ResponseWriter {
    buffer: Bytes,
    written: usize,
}

impl ResponseWriter {
    pub fn new(response: &Response, meta: &ReplyMeta<'_>) -> Self {
        Self {
            buffer: serialize_response(response, meta),
            written: 0,
        }
    }

    pub async fn write_to_stream<W>(&mut self, stream: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        while self.written < self.buffer.len() {
            let n = stream.write(&self.buffer[self.written..]).await?;

            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "connection closed while writing",
                ));
            }

            self.written += n;
        }

        stream.flush().await?;
        Ok(())
    }
}

/// Writes `reply` to `stream`.
///
/// Streamed bodies use chunked encoding on HTTP/1.1. HTTP/1.0 clients get
/// the raw bytes and the connection must be closed afterwards.
pub async fn write_reply<W>(
    stream: &mut W,
    reply: &mut Reply,
    meta: &ReplyMeta<'_>,
) -> Result<Written, WriteError>
where
    W: AsyncWrite + Unpin,
{
    match reply {
        Reply::Buffered(resp) => {
            ResponseWriter::new(resp, meta).write_to_stream(stream).await?;
            Ok(Written {
                status: resp.status,
                invocations: 0,
                must_close: false,
            })
        }
        Reply::Stream {
            status,
            headers,
            producer,
        } => write_stream(stream, *status, headers, producer.as_mut(), meta).await,
    }
}

async fn write_stream<W>(
    stream: &mut W,
    status: StatusCode,
    headers: &[(String, String)],
    producer: &mut dyn Producer,
    meta: &ReplyMeta<'_>,
) -> Result<Written, WriteError>
where
    W: AsyncWrite + Unpin,
{
    let chunked = meta.version == Version::Http11;
    let framing = if chunked {
        Framing::Chunked
    } else {
        Framing::UntilClose
    };
    let head = serialize_head(status, status.reason_phrase(), headers, framing, meta);
    stream.write_all(&head).await?;

    let mut written = Written {
        status,
        invocations: 0,
        must_close: !chunked,
    };

    if meta.head_only || !status.allows_body() {
        stream.flush().await?;
        return Ok(written);
    }

    let mut chunks = 0;
    loop {
        written.invocations += 1;
        match producer.produce() {
            Ok(Chunk::Data(data)) => {
                if data.is_empty() {
                    continue;
                }
                chunks += 1;
                if chunked {
                    stream.write_all(&encode_chunk(&data)).await?;
                } else {
                    stream.write_all(&data).await?;
                }
                // Drain before the producer runs again.
                stream.flush().await?;
            }
            Ok(Chunk::Done) => {
                if chunked {
                    stream.write_all(TERMINATOR).await?;
                }
                stream.flush().await?;
                return Ok(written);
            }
            Err(error) => {
                stream.flush().await?;
                return Err(WriteError::Producer { chunks, error });
            }
        }
    }
}
