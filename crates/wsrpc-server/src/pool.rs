//! Fixed-size pool of worker threads.
//!
//! Handlers are plain synchronous functions, so they run on dedicated OS
//! threads rather than on the async runtime. Every worker pulls from one
//! shared flume queue; the queue is unbounded unless a capacity is set, in
//! which case [`Dispatcher::submit`](crate::dispatcher::Dispatcher::submit)
//! applies backpressure to the connection that produced the call.

use crate::dispatcher::{execute, Dispatcher, Work};
use crate::registry::Registry;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Default)]
struct Counters {
    alive: AtomicUsize,
    completed: AtomicU64,
    faulted: AtomicU64,
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub size: usize,
    pub alive: usize,
    pub queued: usize,
    pub completed: u64,
    pub faulted: u64,
}

pub struct WorkerPool {
    size: usize,
    tx: flume::Sender<Work>,
    done_rx: flume::Receiver<()>,
    handles: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

/// Marks a worker as gone however its thread ends.
struct ExitGuard {
    counters: Arc<Counters>,
    done_tx: flume::Sender<()>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.counters.alive.fetch_sub(1, Ordering::SeqCst);
        let _ = self.done_tx.send(());
    }
}

impl WorkerPool {
    /// Spawn `size` workers serving `registry`. A `queue_capacity` of `None`
    /// means unbounded.
    pub fn start(
        size: usize,
        queue_capacity: Option<usize>,
        registry: Arc<Registry>,
    ) -> io::Result<(WorkerPool, Dispatcher)> {
        let (tx, rx) = match queue_capacity {
            Some(capacity) => flume::bounded(capacity),
            None => flume::unbounded(),
        };
        let (done_tx, done_rx) = flume::unbounded();
        let counters = Arc::new(Counters::default());

        let mut pool = WorkerPool {
            size: 0,
            tx: tx.clone(),
            done_rx,
            handles: Vec::with_capacity(size),
            counters: Arc::clone(&counters),
        };

        for index in 0..size {
            let rx = rx.clone();
            let registry = Arc::clone(&registry);
            counters.alive.fetch_add(1, Ordering::SeqCst);
            let guard = ExitGuard {
                counters: Arc::clone(&counters),
                done_tx: done_tx.clone(),
            };

            let spawned = thread::Builder::new()
                .name(format!("wsrpc-worker-{index}"))
                .spawn(move || run_worker(index, rx, registry, guard));

            match spawned {
                Ok(handle) => {
                    pool.handles.push(handle);
                    pool.size += 1;
                }
                Err(e) => {
                    // The guard was dropped with the closure; reclaim the
                    // workers that did start before reporting.
                    drop(pool);
                    return Err(e);
                }
            }
        }

        info!(
            "Started {} workers ({} queue)",
            size,
            queue_capacity.map_or_else(|| "unbounded".to_string(), |c| format!("capacity {c}"))
        );
        Ok((pool, Dispatcher::new(tx)))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Calls finished so far, including failures.
    pub fn completed(&self) -> u64 {
        self.counters.completed.load(Ordering::Relaxed)
    }

    /// Calls whose handler panicked.
    pub fn faulted(&self) -> u64 {
        self.counters.faulted.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.size,
            alive: self.counters.alive.load(Ordering::SeqCst),
            queued: self.tx.len(),
            completed: self.completed(),
            faulted: self.faulted(),
        }
    }

    /// Let queued calls finish, then stop every worker.
    ///
    /// Returns `false` if the workers did not all exit within `timeout`;
    /// stragglers are detached.
    pub async fn shutdown(mut self, timeout: Duration) -> bool {
        let size = self.size;
        let tx = self.tx.clone();
        let done_rx = self.done_rx.clone();

        let drained = tokio::time::timeout(timeout, async move {
            for _ in 0..size {
                if tx.send_async(Work::Stop).await.is_err() {
                    break;
                }
            }
            for _ in 0..size {
                if done_rx.recv_async().await.is_err() {
                    break;
                }
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!(
                "Worker pool did not drain within {:?}; {} worker(s) still busy",
                timeout,
                self.counters.alive.load(Ordering::SeqCst)
            );
            self.handles.clear();
            return false;
        }

        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("Worker thread exited abnormally");
            }
        }
        info!("Worker pool stopped");
        true
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Workers still attached get a stop message each; they exit once
        // the queue ahead of it drains.
        for _ in 0..self.handles.len() {
            if self.tx.try_send(Work::Stop).is_err() {
                break;
            }
        }
    }
}

fn run_worker(index: usize, rx: flume::Receiver<Work>, registry: Arc<Registry>, guard: ExitGuard) {
    trace!("Worker {} started", index);

    while let Ok(work) = rx.recv() {
        let job = match work {
            Work::Call(job) => job,
            Work::Stop => break,
        };

        let call_id = job.request.call_id;
        let done = execute(&registry, job.request);

        guard.counters.completed.fetch_add(1, Ordering::Relaxed);
        if done.faulted {
            guard.counters.faulted.fetch_add(1, Ordering::Relaxed);
        }

        if let Err(e) = job.reply.send(done.reply.into_reply(call_id)) {
            debug!(
                "Dropping reply to call {} on {}: {}",
                call_id,
                job.reply.connection_id(),
                e
            );
        }
    }

    trace!("Worker {} exiting", index);
    drop(guard);
}
