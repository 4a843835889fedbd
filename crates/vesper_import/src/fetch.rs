//! Payload fetching
//!
//! Heavy resource payloads (vertex buffers, pixel data) are produced by a
//! [`PayloadSource`] - the translator-side collaborator that can read the
//! original source. Fetching is the only parallel part of the pipeline:
//! a bounded pool of worker threads runs fetches while the orchestrator
//! consumes results strictly in declaration order, so object construction
//! stays sequential no matter the completion order.

use std::collections::HashMap;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use vesper_scene::{GeometryRecord, TextureRecord};

/// Mesh payload delivered by a source
#[derive(Debug, Clone, Default)]
pub struct GeometryPayload {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
}

/// Texture payload delivered by a source
#[derive(Debug, Clone, Default)]
pub struct TexturePayload {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// What a payload source is able to do
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceCapabilities {
    /// Fetches may run on worker threads. Sources that must stay
    /// single-threaded leave this off and are called inline instead.
    pub parallel_fetch: bool,
}

/// Translator-side collaborator that materializes payloads on demand.
///
/// Fetch errors are recoverable: the pipeline records an issue for the
/// failed resource and moves on.
pub trait PayloadSource: Send + Sync {
    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::default()
    }

    fn fetch_geometry(&self, record: &GeometryRecord) -> Result<GeometryPayload, String>;

    fn fetch_texture(&self, record: &TextureRecord) -> Result<TexturePayload, String>;
}

pub(crate) type FetchJob<T> = Box<dyn FnOnce() -> T + Send>;

/// Bounded worker pool with ordered consumption.
///
/// Jobs are indexed; [`take`](FetchPool::take) blocks until the requested
/// index has arrived, parking out-of-order completions on the side. The
/// pool never aborts a running job: cancellation is handled by the jobs
/// themselves (they observe the run's cancel flag and return early), and
/// dropping the pool drains whatever is still outstanding.
pub(crate) struct FetchPool<T> {
    results: Receiver<(usize, T)>,
    ready: HashMap<usize, T>,
    outstanding: usize,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> FetchPool<T> {
    pub fn spawn(jobs: Vec<(usize, FetchJob<T>)>, max_workers: usize) -> Self {
        let outstanding = jobs.len();
        let worker_count = outstanding.min(max_workers.max(1));

        let (job_tx, job_rx): (Sender<(usize, FetchJob<T>)>, _) = crossbeam_channel::unbounded();
        let (result_tx, result_rx) = crossbeam_channel::unbounded();

        for job in jobs {
            // Receiver outlives this loop, send cannot fail
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            workers.push(thread::spawn(move || {
                while let Ok((index, job)) = job_rx.recv() {
                    let value = job();
                    if result_tx.send((index, value)).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        Self {
            results: result_rx,
            ready: HashMap::new(),
            outstanding,
            workers,
        }
    }

    /// Block until the result for `index` is available.
    ///
    /// Returns `None` only if a worker died without delivering, which
    /// callers treat as a failed fetch.
    pub fn take(&mut self, index: usize) -> Option<T> {
        if let Some(value) = self.ready.remove(&index) {
            return Some(value);
        }
        while self.outstanding > 0 {
            match self.results.recv() {
                Ok((arrived, value)) => {
                    self.outstanding -= 1;
                    if arrived == index {
                        return Some(value);
                    }
                    self.ready.insert(arrived, value);
                }
                Err(_) => break,
            }
        }
        None
    }

    /// Receive and discard every outstanding result.
    pub fn drain(&mut self) {
        while self.outstanding > 0 {
            if self.results.recv().is_err() {
                break;
            }
            self.outstanding -= 1;
        }
        self.ready.clear();
    }
}

impl<T> Drop for FetchPool<T> {
    fn drop(&mut self) {
        // In-flight fetches are never aborted; wait for all of them
        while self.outstanding > 0 {
            if self.results.recv().is_err() {
                break;
            }
            self.outstanding -= 1;
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn take_returns_results_in_requested_order() {
        // Make early indices slow so completion order inverts
        let jobs: Vec<(usize, FetchJob<usize>)> = (0..4)
            .map(|i| {
                let job: FetchJob<usize> = Box::new(move || {
                    thread::sleep(Duration::from_millis((4 - i as u64) * 10));
                    i * 100
                });
                (i, job)
            })
            .collect();

        let mut pool = FetchPool::spawn(jobs, 4);
        for i in 0..4 {
            assert_eq!(pool.take(i), Some(i * 100));
        }
    }

    #[test]
    fn drop_drains_outstanding_jobs() {
        let jobs: Vec<(usize, FetchJob<()>)> = (0..8)
            .map(|i| {
                let job: FetchJob<()> = Box::new(move || {
                    thread::sleep(Duration::from_millis(5));
                });
                (i, job)
            })
            .collect();

        let mut pool = FetchPool::spawn(jobs, 2);
        assert_eq!(pool.take(0), Some(()));
        // Dropping with 7 results outstanding must not hang or leak threads
        drop(pool);
    }

    #[test]
    fn empty_pool_spawns_no_workers() {
        let mut pool: FetchPool<()> = FetchPool::spawn(Vec::new(), 4);
        assert_eq!(pool.take(0), None);
    }
}
