use hookline::{
    Chunk, ClosePolicy, Config, HookResult, IterProducer, Reply, Request, Response, Server,
    StatusCode,
};

const CHUNKS: [&str; 3] = ["foo\n", "bar\n", "baz\n"];

fn default_reply(_: &Request) -> Reply {
    Response::reply(StatusCode::OK, "Everything is fine", Some("derp".into())).into()
}

fn ok_reply(_: &Request) -> Reply {
    Response::reply(StatusCode::OK, "OK", Some("OK".into())).into()
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let mut cfg = Config::load()?;
    if cfg.server.server_name.is_none() {
        cfg.server.server_name = Some("Hi there!".to_string());
    }

    let server = Server::builder(cfg)
        .route("/ref", default_reply)
        .route("/foo", ok_reply)
        .route("/bar", ok_reply)
        .route("/500", |_: &Request| {
            Reply::from(Response::reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                "no",
                None,
            ))
        })
        .route("/stream", |_: &Request| {
            Reply::stream(StatusCode::OK, IterProducer::new(CHUNKS))
        })
        .route("/countdown", |req: &Request| {
            let mut left: u32 = req
                .query_pairs()
                .find(|(k, _)| k == "from")
                .and_then(|(_, v)| v.parse().ok())
                .unwrap_or(3);
            Reply::stream(StatusCode::OK, move || {
                if left == 0 {
                    return anyhow::Ok(Chunk::Done);
                }
                left -= 1;
                anyhow::Ok(Chunk::Data(format!("{}\n", left + 1).into()))
            })
        })
        .generic(default_reply)
        .post_accept(|ctx, hooks| {
            hooks
                .on_header(|_, _, header| {
                    tracing::trace!(name = %header.name, value = %header.value, "header");
                    HookResult::Continue
                })
                .on_headers(|_, req| {
                    tracing::trace!(count = req.headers.len(), "headers");
                    HookResult::Continue
                })
                .on_path(|_, _, path| {
                    tracing::trace!(%path, "path");
                    HookResult::Continue
                })
                .on_uri(|_, _, uri| {
                    tracing::trace!(%uri, "uri");
                    HookResult::Continue
                })
                .on_body(|_, _, data| {
                    tracing::trace!(len = data.len(), "body data");
                    HookResult::Continue
                })
                .on_expect(|_, _, expect| {
                    if expect != "100-continue" {
                        tracing::info!(%expect, "inspecting expect failed");
                        return StatusCode::EXPECTATION_FAILED;
                    }
                    StatusCode::CONTINUE
                });

            ctx.set_close_policy(
                ClosePolicy::ON_400 | ClosePolicy::ON_500 | ClosePolicy::ON_EXPECT_ERR,
            );
            HookResult::Continue
        })
        .build()?;

    server
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
}
