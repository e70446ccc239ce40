use std::sync::{Arc, Mutex};
use std::time::Duration;

use hookline::config::ConfigError;
use hookline::{
    Config, HookResult, IterProducer, Reply, Request, Response, Server, ServerError, StatusCode,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

fn builder(config: Config) -> hookline::ServerBuilder {
    Server::builder(config)
        .route("/foo", |_: &Request| {
            Reply::from(Response::reply(StatusCode::OK, "OK", Some("OK".into())))
        })
        .route("/stream", |_: &Request| {
            Reply::stream(StatusCode::OK, IterProducer::new(["foo\n", "bar\n", "baz\n"]))
        })
        .generic(|_: &Request| {
            Reply::from(Response::reply(
                StatusCode::OK,
                "Everything is fine",
                Some("derp".into()),
            ))
        })
}

struct Running {
    addr: std::net::SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl Running {
    async fn start(server: Server) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server.serve(listener, async {
            let _ = rx.await;
        }));
        Self { addr, stop, task }
    }

    async fn stop(self) {
        let _ = self.stop.send(());
        self.task.await.unwrap().unwrap();
    }
}

async fn request(addr: std::net::SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();

    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
        .await
        .expect("server kept the connection open")
        .unwrap();
    String::from_utf8(out).unwrap()
}

#[tokio::test]
async fn test_single_threaded_server() {
    let mut config = Config::default();
    config.server.server_name = Some("Hi there!".to_string());
    let running = Running::start(builder(config).build().unwrap()).await;

    let foo = request(running.addr, "GET /foo HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    let other = request(running.addr, "GET /xyz HTTP/1.1\r\nConnection: close\r\n\r\n").await;

    assert!(foo.starts_with("HTTP/1.1 200 OK\r\nServer: Hi there!\r\n"));
    assert!(foo.ends_with("\r\n\r\nOK"));
    assert!(other.starts_with("HTTP/1.1 200 Everything is fine\r\n"));
    assert!(other.ends_with("derp"));

    running.stop().await;
}

#[tokio::test]
async fn test_unpooled_connections_stay_on_calling_thread() {
    let caller = std::thread::current().id();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();
    let server = builder(Config::default())
        .post_accept(move |ctx, _| {
            record
                .lock()
                .unwrap()
                .push((std::thread::current().id(), ctx.worker()));
            HookResult::Continue
        })
        .build()
        .unwrap();
    let running = Running::start(server).await;

    for _ in 0..3 {
        request(running.addr, "GET /foo HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    }

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|(thread, worker)| *thread == caller && worker.is_none()));

    running.stop().await;
}

#[tokio::test]
async fn test_streamed_reply_over_tcp() {
    let running = Running::start(builder(Config::default()).build().unwrap()).await;

    let resp = request(running.addr, "GET /stream HTTP/1.1\r\nConnection: close\r\n\r\n").await;

    assert!(resp.contains("Transfer-Encoding: chunked\r\n"));
    assert!(resp.ends_with("4\r\nfoo\n\r\n4\r\nbar\n\r\n4\r\nbaz\n\r\n0\r\n\r\n"));

    running.stop().await;
}

#[tokio::test]
async fn test_http10_stream_is_close_delimited() {
    let running = Running::start(builder(Config::default()).build().unwrap()).await;

    let resp = request(running.addr, "GET /stream HTTP/1.0\r\n\r\n").await;

    assert!(resp.starts_with("HTTP/1.0 200 OK\r\n"));
    assert!(!resp.contains("Transfer-Encoding"));
    assert!(resp.ends_with("\r\n\r\nfoo\nbar\nbaz\n"));

    running.stop().await;
}

#[tokio::test]
async fn test_threaded_server_assigns_round_robin() {
    let mut config = Config::default();
    config.server.use_threads = true;
    config.server.num_threads = 2;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();
    let server = builder(config)
        .post_accept(move |ctx, _| {
            record.lock().unwrap().push(ctx.worker());
            HookResult::Continue
        })
        .build()
        .unwrap();
    let running = Running::start(server).await;

    for _ in 0..4 {
        let resp = request(running.addr, "GET /foo HTTP/1.1\r\nConnection: close\r\n\r\n").await;
        assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
    }

    assert_eq!(
        *seen.lock().unwrap(),
        vec![Some(0), Some(1), Some(0), Some(1)]
    );

    running.stop().await;
}

#[tokio::test]
async fn test_threaded_server_handles_concurrent_clients() {
    let mut config = Config::default();
    config.server.use_threads = true;
    config.server.num_threads = 3;
    let running = Running::start(builder(config).build().unwrap()).await;

    let clients: Vec<_> = (0..8)
        .map(|i| {
            let addr = running.addr;
            tokio::spawn(async move {
                let path = if i % 2 == 0 { "/foo" } else { "/other" };
                request(addr, &format!("GET {path} HTTP/1.1\r\nConnection: close\r\n\r\n")).await
            })
        })
        .collect();

    for (i, client) in clients.into_iter().enumerate() {
        let resp = client.await.unwrap();
        if i % 2 == 0 {
            assert!(resp.ends_with("OK"));
        } else {
            assert!(resp.ends_with("derp"));
        }
    }

    running.stop().await;
}

#[tokio::test]
async fn test_build_requires_generic_callback() {
    let result = Server::builder(Config::default())
        .route("/foo", |_: &Request| Reply::from(Response::ok("OK")))
        .build();

    assert!(matches!(result, Err(ServerError::NoHandler)));
}

#[tokio::test]
async fn test_build_rejects_bad_address() {
    let mut config = Config::default();
    config.server.bind_addr = "not-an-ip".to_string();

    let result = builder(config).build();

    assert!(matches!(result, Err(ServerError::Config(_))));
}

#[tokio::test]
async fn test_build_rejects_zero_read_timeout() {
    let mut config = Config::default();
    config.server.read_timeout_secs = 0;

    let result = builder(config).build();

    assert!(matches!(
        result,
        Err(ServerError::Config(ConfigError::ZeroTimeout))
    ));
}

#[tokio::test]
async fn test_run_reports_bind_failure() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut config = Config::default();
    config.server.bind_addr = "127.0.0.1".to_string();
    config.server.bind_port = u32::from(taken.local_addr().unwrap().port());

    let server = builder(config).build().unwrap();
    let err = server.bind().await.unwrap_err();

    assert!(matches!(err, ServerError::Bind { .. }));
}
