// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The butler: background worker that does every blocking piece of disk
//! work on behalf of the realtime thread. A control thread waits for
//! requests, realtime wakeups or its poll period, then refills every
//! registered reader in parallel on a dedicated Rayon pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{select, Receiver, Sender};
use parking_lot::Mutex;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelHandle;
use crate::context::StreamContext;
use crate::reader::{DiskReader, ReaderError, WorkingBuffers};
use crate::thread_priority::{butler_thread_priority, configure_butler_thread};

enum Request {
    Register(Arc<Mutex<DiskReader>>),
    Locate {
        position: i64,
        done: Sender<Result<(), ReaderError>>,
    },
    Shutdown,
}

/// Counters kept by the butler.
#[derive(Default)]
struct Stats {
    passes: AtomicU64,
    underrun_reports: AtomicU64,
    refill_errors: AtomicU64,
}

/// Handle to a running butler. Dropping it stops the worker.
pub struct Butler {
    requests: Sender<Request>,
    cancel: CancelHandle,
    stats: Arc<Stats>,
    handle: Option<JoinHandle<()>>,
}

impl Butler {
    /// Starts the control thread and worker pool for readers of `context`.
    pub fn start(context: &StreamContext) -> Result<Butler, String> {
        let config = context.config();
        let threads = config.butler_threads();
        let period = config.butler_period().map_err(|e| e.to_string())?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("diskstream-butler-{i}"))
            .start_handler(|_| configure_butler_thread(butler_thread_priority()))
            .build()
            .map_err(|e| e.to_string())?;

        let (requests, rx) = crossbeam_channel::unbounded();
        let cancel = CancelHandle::new();
        let stats = Arc::new(Stats::default());

        let worker = Worker {
            context: context.clone(),
            buffers: (0..threads)
                .map(|_| Mutex::new(WorkingBuffers::new(context.chunk_samples())))
                .collect(),
            pool,
            readers: Vec::new(),
            cancel: cancel.clone(),
            stats: stats.clone(),
            period,
            dropped_reports: 0,
        };
        let handle = thread::Builder::new()
            .name("diskstream-butler".to_string())
            .spawn(move || worker.run(rx))
            .map_err(|e| e.to_string())?;

        info!(threads, period = ?period, "Butler started.");
        Ok(Butler {
            requests,
            cancel,
            stats,
            handle: Some(handle),
        })
    }

    /// Hands a reader to the butler. It's refilled on the next pass.
    pub fn register(&self, reader: Arc<Mutex<DiskReader>>) {
        if self.requests.send(Request::Register(reader)).is_err() {
            error!("Butler has stopped, reader not registered.");
        }
    }

    /// Seeks every registered reader to `position` with a complete refill and
    /// waits until all of them are done.
    pub fn locate(&self, position: i64) -> Result<(), ReaderError> {
        let (done, wait) = crossbeam_channel::bounded(1);
        self.requests
            .send(Request::Locate { position, done })
            .map_err(|_| ReaderError::Configuration("butler has stopped".into()))?;
        wait.recv()
            .map_err(|_| ReaderError::Configuration("butler stopped during locate".into()))?
    }

    /// Passes completed so far.
    pub fn passes(&self) -> u64 {
        self.stats.passes.load(Ordering::Relaxed)
    }

    /// Underrun reports drained and logged so far.
    pub fn underrun_reports(&self) -> u64 {
        self.stats.underrun_reports.load(Ordering::Relaxed)
    }

    /// Refills that returned an error.
    pub fn refill_errors(&self) -> u64 {
        self.stats.refill_errors.load(Ordering::Relaxed)
    }
}

impl Drop for Butler {
    fn drop(&mut self) {
        self.cancel.cancel();
        let _ = self.requests.send(Request::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Error joining butler thread");
            }
        }
    }
}

struct Worker {
    context: StreamContext,
    pool: rayon::ThreadPool,
    /// One set of scratch buffers per pool thread.
    buffers: Vec<Mutex<WorkingBuffers>>,
    readers: Vec<Arc<Mutex<DiskReader>>>,
    cancel: CancelHandle,
    stats: Arc<Stats>,
    period: Duration,
    dropped_reports: u64,
}

impl Worker {
    fn run(mut self, requests: Receiver<Request>) {
        let wakeups = self.context.wakeups().clone();
        let period = self.period;
        loop {
            select! {
                recv(requests) -> request => match request {
                    Ok(Request::Register(reader)) => {
                        debug!(reader = %reader.lock().name(), "Registered reader.");
                        self.readers.push(reader);
                    }
                    Ok(Request::Locate { position, done }) => {
                        let result = self.locate(position);
                        let _ = done.send(result);
                    }
                    Ok(Request::Shutdown) | Err(_) => break,
                },
                recv(wakeups) -> _ => {},
                default(period) => {},
            }
            if self.cancel.is_cancelled() {
                break;
            }
            self.report_underruns();
            self.pass();
        }
        info!(readers = self.readers.len(), "Butler stopped.");
    }

    fn report_underruns(&mut self) {
        for report in self.context.drain_underrun_reports() {
            warn!(
                reader = report.reader,
                position = report.position,
                missing = report.missing,
                "Disk underrun."
            );
            self.stats.underrun_reports.fetch_add(1, Ordering::Relaxed);
        }
        let dropped = self.context.dropped_underrun_reports();
        if dropped > self.dropped_reports {
            warn!(count = dropped - self.dropped_reports, "Underrun reports dropped.");
            self.dropped_reports = dropped;
        }
    }

    fn pass(&self) {
        let Worker {
            pool,
            buffers,
            readers,
            cancel,
            stats,
            ..
        } = self;
        pool.install(|| {
            readers.par_iter().for_each(|reader| {
                if cancel.is_cancelled() {
                    return;
                }
                let mut reader = reader.lock();
                if !reader.refill_needed() {
                    return;
                }
                let slot = rayon::current_thread_index().unwrap_or(0) % buffers.len();
                let mut bufs = buffers[slot].lock();
                if let Err(e) = reader.do_refill(&mut bufs, Some(cancel)) {
                    stats.refill_errors.fetch_add(1, Ordering::Relaxed);
                    error!(reader = %reader.name(), err = %e, "Refill failed.");
                }
            })
        });
        stats.passes.fetch_add(1, Ordering::Relaxed);
    }

    fn locate(&self, position: i64) -> Result<(), ReaderError> {
        info!(position, readers = self.readers.len(), "Locating.");
        self.pool.install(|| {
            self.readers
                .par_iter()
                .try_for_each(|reader| reader.lock().seek(position, true).map(|_| ()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::midi::MidiBuffer;
    use crate::reader::Sources;
    use crate::testutil::{eventually, ramp_playlist, test_context};

    fn shared_reader(context: &StreamContext, channels: usize) -> (Arc<Mutex<DiskReader>>, crate::reader::RealtimeReader) {
        let (mut reader, rt) = DiskReader::new("butler", context, channels);
        reader.use_playlist(Sources::Audio(ramp_playlist(channels, 200_000)));
        (Arc::new(Mutex::new(reader)), rt)
    }

    #[test]
    fn test_registered_readers_get_filled() {
        let context = test_context(1024, 4);
        let butler = Butler::start(&context).unwrap();
        let (reader, _rt) = shared_reader(&context, 2);
        butler.register(reader.clone());
        context.request_refill();

        eventually(|| reader.lock().buffer_load() == 1.0, "Reader never filled");
        assert!(butler.passes() > 0);
    }

    #[test]
    fn test_butler_keeps_up_with_playback() {
        let context = test_context(1024, 4);
        let butler = Butler::start(&context).unwrap();
        let (reader, mut rt) = shared_reader(&context, 1);
        butler.register(reader.clone());
        eventually(|| reader.lock().buffer_load() == 1.0, "Reader never filled");

        let mut audio = vec![vec![0.0; 1024]];
        let mut midi = MidiBuffer::new(4);
        let mut start = 0;
        for _ in 0..8 {
            eventually(|| reader.lock().buffer_load() == 1.0, "Butler fell behind");
            let cycle = rt.run(&mut audio, &mut midi, start, start + 1024, 1.0, 1024, true);
            assert_eq!(cycle.missing, 0);
            assert_eq!(audio[0][0], start as f32);
            start += 1024;
        }
    }

    #[test]
    fn test_locate_blocks_until_refilled() {
        let context = test_context(1024, 4);
        let butler = Butler::start(&context).unwrap();
        let (a, _rt_a) = shared_reader(&context, 1);
        let (b, _rt_b) = shared_reader(&context, 2);
        butler.register(a.clone());
        butler.register(b.clone());

        butler.locate(50_000).unwrap();
        for reader in [&a, &b] {
            let reader = reader.lock();
            assert_eq!(reader.position(), 50_000);
            assert_eq!(reader.buffer_load(), 1.0);
        }
    }

    #[test]
    fn test_realtime_seek_request_is_served() {
        let context = test_context(1024, 4);
        let butler = Butler::start(&context).unwrap();
        let (reader, mut rt) = shared_reader(&context, 1);
        butler.register(reader.clone());
        eventually(|| reader.lock().buffer_load() == 1.0, "Reader never filled");

        let mut audio = vec![vec![0.0; 256]];
        let mut midi = MidiBuffer::new(4);
        let cycle = rt.run(&mut audio, &mut midi, 100_000, 100_256, 1.0, 256, true);
        assert!(cycle.need_butler);
        eventually(|| reader.lock().position() == 100_000, "Seek never served");
    }

    #[test]
    fn test_underruns_are_drained_and_counted() {
        let context = StreamContext::new(
            EngineConfig::default()
                .with_chunk_samples(1024)
                .with_butler_period("10ms"),
        )
        .unwrap();
        let butler = Butler::start(&context).unwrap();
        let (mut reader, mut rt) = DiskReader::new("starved", &context, 1);
        reader.use_playlist(Sources::Audio(ramp_playlist(1, 1000)));

        let mut audio = vec![vec![0.0; 64]];
        let mut midi = MidiBuffer::new(4);
        rt.run(&mut audio, &mut midi, 0, 64, 1.0, 64, true);
        eventually(|| butler.underrun_reports() == 1, "Underrun never reported");
        assert_eq!(context.underruns(), 1);
    }

    #[test]
    fn test_drop_stops_worker() {
        let context = test_context(1024, 4);
        let butler = Butler::start(&context).unwrap();
        let (reader, _rt) = shared_reader(&context, 1);
        butler.register(reader);
        drop(butler);
    }
}
