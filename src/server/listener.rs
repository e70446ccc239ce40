use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::http::connection::{ConnContext, Shared, serve_connection};
use crate::server::pool::WorkerPool;

/// Pause after a failed `accept` so descriptor exhaustion does not spin.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts connections on `listener` until `shutdown` resolves.
///
/// With a pool, every socket is handed off to a worker thread; otherwise
/// connections are spawned on the calling runtime.
pub async fn run(
    listener: TcpListener,
    shared: Arc<Shared>,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let local: SocketAddr = listener.local_addr()?;
    let pool = match shared.config.worker_threads() {
        Some(n) => Some(WorkerPool::start(n, shared.clone())?),
        None => None,
    };
    info!(
        addr = %local,
        workers = pool.as_ref().map_or(0, WorkerPool::size),
        "listening"
    );

    tokio::pin!(shutdown);

    let result = loop {
        let (socket, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    // Per-connection accept failures (e.g. EMFILE) are not fatal.
                    error!(error = %e, "accept failed");
                    tokio::select! {
                        _ = tokio::time::sleep(ACCEPT_BACKOFF) => continue,
                        _ = &mut shutdown => break Ok(()),
                    }
                }
            },
            _ = &mut shutdown => break Ok(()),
        };
        debug!(%peer, "accepted connection");

        if let Err(e) = socket.set_nodelay(true) {
            debug!(%peer, error = %e, "failed to set TCP_NODELAY");
        }

        match &pool {
            Some(pool) => {
                if let Err(e) = pool.assign(socket, peer) {
                    break Err(e);
                }
            }
            None => {
                let ctx = ConnContext::new(Some(peer), None);
                tokio::spawn(serve_connection(socket, shared.clone(), ctx));
            }
        }
    };

    if let Some(pool) = pool {
        // Joining worker threads blocks.
        tokio::task::spawn_blocking(move || drop(pool)).await?;
    }
    info!(addr = %local, "listener stopped");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_backoff_is_not_zero() {
        assert!(ACCEPT_BACKOFF >= Duration::from_millis(10));
    }
}
