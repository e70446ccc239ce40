//! Fixed pool of worker threads, each running its own single-threaded
//! reactor.
//!
//! The acceptor hands every new socket to one worker through that worker's
//! channel; from then on only that worker touches the connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::http::connection::{ConnContext, Shared, serve_connection};

/// Round-robin index generator; the only state shared between the
/// acceptor and the pool that needs synchronisation.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next index in `0..len`. `len` must be non-zero.
    pub fn next(&self, len: usize) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed) % len
    }
}

/// A socket on its way to a worker.
struct Handoff {
    stream: std::net::TcpStream,
    peer: SocketAddr,
}

struct Worker {
    tx: Option<mpsc::UnboundedSender<Handoff>>,
    thread: Option<JoinHandle<()>>,
}

pub struct WorkerPool {
    workers: Vec<Worker>,
    next: RoundRobin,
}

impl WorkerPool {
    /// Spawns `size` worker threads.
    pub fn start(size: usize, shared: Arc<Shared>) -> std::io::Result<Self> {
        let mut workers = Vec::with_capacity(size);

        for id in 0..size {
            let (tx, rx) = mpsc::unbounded_channel();
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let shared = shared.clone();

            let thread = std::thread::Builder::new()
                .name(format!("hookline-worker-{id}"))
                .spawn(move || runtime.block_on(worker_loop(id, rx, shared)))?;

            workers.push(Worker {
                tx: Some(tx),
                thread: Some(thread),
            });
        }

        info!(workers = size, "worker pool started");
        Ok(Self {
            workers,
            next: RoundRobin::new(),
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Hands `stream` to the next worker and returns its index.
    pub fn assign(&self, stream: TcpStream, peer: SocketAddr) -> anyhow::Result<usize> {
        let id = self.next.next(self.workers.len());
        // Leaves the socket non-blocking, ready for the worker's reactor.
        let stream = stream.into_std()?;
        self.workers[id]
            .tx
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("worker {id} is shut down"))?
            .send(Handoff { stream, peer })
            .map_err(|_| anyhow::anyhow!("worker {id} has exited"))?;
        Ok(id)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channels ends each worker loop.
        for worker in &mut self.workers {
            worker.tx.take();
        }
        for (id, worker) in self.workers.iter_mut().enumerate() {
            if let Some(thread) = worker.thread.take() {
                if thread.join().is_err() {
                    warn!(worker = id, "worker thread panicked");
                }
            }
        }
    }
}

async fn worker_loop(id: usize, mut rx: mpsc::UnboundedReceiver<Handoff>, shared: Arc<Shared>) {
    while let Some(Handoff { stream, peer }) = rx.recv().await {
        let stream = match TcpStream::from_std(stream) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(worker = id, %peer, error = %e, "failed to register socket");
                continue;
            }
        };
        debug!(worker = id, %peer, "connection assigned");
        let ctx = ConnContext::new(Some(peer), Some(id));
        tokio::spawn(serve_connection(stream, shared.clone(), ctx));
    }
    debug!(worker = id, "worker stopped");
}
