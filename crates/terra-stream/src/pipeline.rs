//! Background terrain data generation.
//!
//! One named worker thread pulls coordinates from a channel, calls the
//! terrain provider and pushes results to a second channel that the
//! scheduling thread drains once per tick. Results come back in request
//! order. Provider failures travel on the same channel so a waiting chunk
//! always hears back.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use terra_common::{ChunkCoord, GenerationError};
use tracing::{debug, info, warn};

use crate::collaborators::{ChunkData, TerrainProvider};

/// Message to the worker.
enum Job {
    Generate(ChunkCoord),
    /// Wakes the worker so it notices the stop flag
    Wake,
}

/// Outcome of one background generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    /// Requested chunk
    pub coord: ChunkCoord,
    /// Provider output or failure
    pub result: Result<ChunkData, GenerationError>,
}

/// Handle to the background worker.
pub struct BackgroundPipeline {
    jobs: Sender<Job>,
    results: Receiver<GenerationResult>,
    stop: Arc<AtomicBool>,
    in_flight: AtomicUsize,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for BackgroundPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundPipeline")
            .field("in_flight", &self.in_flight())
            .field("stopped", &self.stop.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl BackgroundPipeline {
    /// Spawns the worker thread.
    pub fn spawn(provider: Arc<dyn TerrainProvider>) -> std::io::Result<Self> {
        let (job_tx, job_rx) = crossbeam_channel::unbounded();
        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        let stop = Arc::new(AtomicBool::new(false));

        let worker_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("terra-generation".to_string())
            .spawn(move || run_worker(&*provider, &job_rx, &result_tx, &worker_stop))?;

        info!("Background generation worker started");
        Ok(Self {
            jobs: job_tx,
            results: result_rx,
            stop,
            in_flight: AtomicUsize::new(0),
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Queues a chunk for generation.
    pub fn request(&self, coord: ChunkCoord) -> Result<(), GenerationError> {
        if self.stop.load(Ordering::Acquire) {
            return Err(GenerationError::PipelineClosed);
        }
        // Counted before sending so a result is never drained uncounted.
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        if self.jobs.send(Job::Generate(coord)).is_err() {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return Err(GenerationError::PipelineClosed);
        }
        Ok(())
    }

    /// Takes every result that is ready, without blocking.
    pub fn drain(&self) -> Vec<GenerationResult> {
        let drained: Vec<_> = self.results.try_iter().collect();
        self.settle(drained.len());
        drained
    }

    /// Waits up to `timeout` for the next result.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<GenerationResult> {
        let result = self.results.recv_timeout(timeout).ok();
        if result.is_some() {
            self.settle(1);
        }
        result
    }

    fn settle(&self, count: usize) {
        if count > 0 {
            self.in_flight.fetch_sub(count, Ordering::AcqRel);
        }
    }

    /// Requests not yet drained.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Raises the stop flag and wakes the worker, without waiting for it.
    ///
    /// The worker exits on its next wake-up without touching queued input.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.jobs.send(Job::Wake);
    }

    /// Stops the worker and waits for it to exit.
    pub fn shutdown(&self) {
        self.request_stop();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("Background generation worker panicked");
            }
            info!("Background generation worker stopped");
        }
    }
}

impl Drop for BackgroundPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    provider: &dyn TerrainProvider,
    jobs: &Receiver<Job>,
    results: &Sender<GenerationResult>,
    stop: &AtomicBool,
) {
    while let Ok(job) = jobs.recv() {
        if stop.load(Ordering::Acquire) {
            break;
        }
        let Job::Generate(coord) = job else {
            continue;
        };
        let result = provider.generate(coord);
        if let Err(e) = &result {
            warn!(x = coord.x, y = coord.y, "Background generation failed: {e}");
        }
        debug!(x = coord.x, y = coord.y, "Background generation finished");
        if results.send(GenerationResult { coord, result }).is_err() {
            break;
        }
    }
}
