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

//! State shared by every reader of one engine.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::config::{ConfigError, EngineConfig};
use crate::util::duration_to_samples;

/// Pending underrun signals held before the oldest are dropped.
const UNDERRUN_QUEUE: usize = 64;

/// Sent from the realtime thread when a ring could not supply a cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnderrunReport {
    /// Id of the reader that starved.
    pub reader: u64,
    /// Timeline position of the cycle.
    pub position: i64,
    /// Samples (per channel) replaced with silence.
    pub missing: usize,
}

struct Inner {
    config: EngineConfig,
    chunk_samples: AtomicUsize,
    midi_readahead: AtomicI64,
    declick_samples: usize,
    underrun_interval_samples: usize,
    no_disk_output: AtomicU32,
    underruns: AtomicU64,
    dropped_underrun_reports: AtomicU64,
    underrun_tx: Sender<UnderrunReport>,
    underrun_rx: Receiver<UnderrunReport>,
    wakeup_tx: Sender<()>,
    wakeup_rx: Receiver<()>,
    next_reader_id: AtomicU64,
}

/// Shared configuration handle for an engine. Cloning is cheap; every clone
/// refers to the same counters and queues.
#[derive(Clone)]
pub struct StreamContext {
    inner: Arc<Inner>,
}

impl StreamContext {
    /// Creates a context from a configuration, validating it first.
    pub fn new(config: EngineConfig) -> Result<StreamContext, ConfigError> {
        config.validate()?;
        let sample_rate = config.sample_rate();
        let (underrun_tx, underrun_rx) = crossbeam_channel::bounded(UNDERRUN_QUEUE);
        let (wakeup_tx, wakeup_rx) = crossbeam_channel::bounded(1);
        Ok(StreamContext {
            inner: Arc::new(Inner {
                chunk_samples: AtomicUsize::new(config.chunk_samples()),
                midi_readahead: AtomicI64::new(config.midi_readahead()),
                declick_samples: duration_to_samples(config.declick()?, sample_rate),
                underrun_interval_samples: duration_to_samples(
                    config.underrun_report_interval()?,
                    sample_rate,
                ),
                config,
                no_disk_output: AtomicU32::new(0),
                underruns: AtomicU64::new(0),
                dropped_underrun_reports: AtomicU64::new(0),
                underrun_tx,
                underrun_rx,
                wakeup_tx,
                wakeup_rx,
                next_reader_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.config.sample_rate()
    }

    /// Samples per refill unit. Readers pick up changes on `adjust_buffering`.
    pub fn chunk_samples(&self) -> usize {
        self.inner.chunk_samples.load(Ordering::Relaxed)
    }

    pub fn set_chunk_samples(&self, samples: usize) {
        self.inner.chunk_samples.store(samples.max(1), Ordering::Relaxed);
    }

    /// How far ahead of the read position MIDI is buffered.
    pub fn midi_readahead(&self) -> i64 {
        self.inner.midi_readahead.load(Ordering::Relaxed)
    }

    pub fn set_midi_readahead(&self, samples: i64) {
        self.inner.midi_readahead.store(samples.max(0), Ordering::Relaxed);
    }

    /// Ring capacity per audio channel for the current chunk size.
    pub fn ring_capacity(&self) -> usize {
        self.chunk_samples() * self.inner.config.buffer_depth()
    }

    /// Declick ramp length in samples.
    pub fn declick_samples(&self) -> usize {
        self.inner.declick_samples
    }

    pub fn declick_duration(&self) -> Duration {
        Duration::from_secs_f64(self.inner.declick_samples as f64 / self.sample_rate() as f64)
    }

    /// Minimum spacing between underrun reports from one reader, in samples.
    pub fn underrun_interval_samples(&self) -> usize {
        self.inner.underrun_interval_samples
    }

    /// Starts suppressing disk output in every reader.
    pub fn inc_no_disk_output(&self) {
        self.inner.no_disk_output.fetch_add(1, Ordering::AcqRel);
    }

    /// Ends one suppression request. Extra calls are ignored.
    pub fn dec_no_disk_output(&self) {
        let _ = self
            .inner
            .no_disk_output
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn no_disk_output(&self) -> bool {
        self.inner.no_disk_output.load(Ordering::Acquire) > 0
    }

    /// Total underruns counted across all readers.
    pub fn underruns(&self) -> u64 {
        self.inner.underruns.load(Ordering::Relaxed)
    }

    /// Counts an underrun without signalling it.
    pub(crate) fn count_underrun(&self) {
        self.inner.underruns.fetch_add(1, Ordering::Relaxed);
    }

    /// Queues an underrun report. Never blocks; if the queue is full the
    /// report is dropped and counted.
    pub(crate) fn signal_underrun(&self, report: UnderrunReport) {
        match self.inner.underrun_tx.try_send(report) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.inner
                    .dropped_underrun_reports
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Takes every queued underrun report.
    pub fn drain_underrun_reports(&self) -> Vec<UnderrunReport> {
        self.inner.underrun_rx.try_iter().collect()
    }

    /// Reports dropped because the queue was full.
    pub fn dropped_underrun_reports(&self) -> u64 {
        self.inner.dropped_underrun_reports.load(Ordering::Relaxed)
    }

    /// Asks the butler to run a pass soon. Realtime safe.
    pub fn request_refill(&self) {
        // A wakeup already pending is as good as a new one.
        let _ = self.inner.wakeup_tx.try_send(());
    }

    pub(crate) fn wakeups(&self) -> &Receiver<()> {
        &self.inner.wakeup_rx
    }

    pub(crate) fn next_reader_id(&self) -> u64 {
        self.inner.next_reader_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> StreamContext {
        StreamContext::new(EngineConfig::default().with_chunk_samples(1024)).unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        assert!(StreamContext::new(EngineConfig::default().with_buffer_depth(0)).is_err());
    }

    #[test]
    fn test_no_disk_output_never_underflows() {
        let context = context();
        assert!(!context.no_disk_output());
        context.dec_no_disk_output();
        assert!(!context.no_disk_output());

        context.inc_no_disk_output();
        context.inc_no_disk_output();
        context.dec_no_disk_output();
        assert!(context.no_disk_output());
        context.dec_no_disk_output();
        assert!(!context.no_disk_output());
    }

    #[test]
    fn test_underrun_queue_drops_when_full() {
        let context = context();
        for i in 0..(UNDERRUN_QUEUE + 3) {
            context.signal_underrun(UnderrunReport {
                reader: 1,
                position: i as i64,
                missing: 1,
            });
        }
        assert_eq!(context.dropped_underrun_reports(), 3);
        let reports = context.drain_underrun_reports();
        assert_eq!(reports.len(), UNDERRUN_QUEUE);
        assert_eq!(reports[0].position, 0);
        assert!(context.drain_underrun_reports().is_empty());
    }

    #[test]
    fn test_tunables() {
        let context = context();
        assert_eq!(context.ring_capacity(), 4096);
        context.set_chunk_samples(2048);
        assert_eq!(context.ring_capacity(), 8192);
        context.set_midi_readahead(-5);
        assert_eq!(context.midi_readahead(), 0);
        assert_eq!(context.declick_samples(), 240);
        assert_eq!(context.underrun_interval_samples(), 12000);
    }

    #[test]
    fn test_wakeups_coalesce() {
        let context = context();
        context.request_refill();
        context.request_refill();
        assert_eq!(context.wakeups().try_iter().count(), 1);
    }
}
