//! Server assembly: configuration, routes and hooks are collected by a
//! [`ServerBuilder`], validated once, and frozen into a [`Server`].

pub mod listener;
pub mod pool;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::{Config, ConfigError};
use crate::http::connection::{ConnContext, Shared};
use crate::http::hooks::{HookResult, HookSet, PostAcceptHook};
use crate::router::{Handler, Router};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("no generic callback registered")]
    NoHandler,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
}

pub struct ServerBuilder {
    config: Config,
    router: Router,
    post_accept: Option<PostAcceptHook>,
}

impl ServerBuilder {
    /// Registers `handler` for requests whose path is exactly `path`.
    pub fn route(mut self, path: impl Into<String>, handler: impl Handler) -> Self {
        self.router.route(path, handler);
        self
    }

    /// Registers the fallback for unmatched paths. Required.
    pub fn generic(mut self, handler: impl Handler) -> Self {
        self.router.generic(handler);
        self
    }

    /// Registers the hook run once for each accepted connection.
    pub fn post_accept<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut ConnContext, &mut HookSet) -> HookResult + Send + Sync + 'static,
    {
        self.post_accept = Some(Arc::new(hook));
        self
    }

    /// Validates the configuration and freezes routes and hooks.
    pub fn build(self) -> Result<Server, ServerError> {
        self.config.validate()?;
        let addr = self.config.socket_addr()?;
        if !self.router.has_generic() {
            return Err(ServerError::NoHandler);
        }
        Ok(Server {
            addr,
            shared: Arc::new(Shared {
                router: self.router,
                post_accept: self.post_accept,
                config: self.config,
            }),
        })
    }
}

/// A configured server. Routes and hooks can no longer change.
pub struct Server {
    addr: SocketAddr,
    shared: Arc<Shared>,
}

impl Server {
    pub fn builder(config: Config) -> ServerBuilder {
        ServerBuilder {
            config,
            router: Router::new(),
            post_accept: None,
        }
    }

    /// Address from the configuration.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        TcpListener::bind(self.addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.addr,
                source,
            })
    }

    /// Binds the configured address and serves until the future resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        let tcp = self.bind().await?;
        self.serve(tcp, shutdown).await
    }

    /// Serves on an already bound listener.
    ///
    /// Without a worker pool every connection is spawned on the calling
    /// runtime, which must be a current-thread runtime for all of them to
    /// share one reactor thread.
    pub async fn serve(
        self,
        tcp: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> anyhow::Result<()> {
        listener::run(tcp, self.shared, shutdown).await
    }
}
