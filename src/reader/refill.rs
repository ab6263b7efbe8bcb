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

//! Moving playlist data into the rings. Runs on the butler, never on the
//! realtime thread.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, error, warn};

use super::channel::Rings;
use super::error::ReaderError;
use super::DiskReader;
use crate::cancel::CancelHandle;
use crate::playlist::{AudioPlaylist, DataType, PlaylistEvent};

/// How far a refill got.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Refill {
    /// Every ring was topped up as far as it will go.
    Complete,
    /// Stopped early: cancelled, or a partial fill left space behind.
    Incomplete,
}

/// Scratch space for refills. The butler keeps one per worker thread so
/// steady-state refills don't allocate.
#[derive(Default)]
pub struct WorkingBuffers {
    /// One block per channel, filled before any ring is written.
    sum: Vec<Vec<f32>>,
    mixdown: Vec<f32>,
    gain: Vec<f32>,
}

impl WorkingBuffers {
    /// Creates buffers sized for one chunk of a single channel; they grow on
    /// demand.
    pub fn new(chunk_samples: usize) -> Self {
        let mut bufs = Self::default();
        bufs.ensure(1, chunk_samples);
        bufs
    }

    fn ensure(&mut self, n_channels: usize, samples: usize) {
        if self.sum.len() < n_channels {
            self.sum.resize_with(n_channels, Vec::new);
        }
        for block in self.sum.iter_mut().take(n_channels) {
            if block.len() < samples {
                block.resize(samples, 0.0);
            }
        }
        if self.mixdown.len() < samples {
            self.mixdown.resize(samples, 0.0);
            self.gain.resize(samples, 0.0);
        }
    }
}

impl DiskReader {
    /// Tops up the rings from the bound playlists using caller-supplied
    /// scratch. Does nothing until at least the low water mark of space is
    /// free; from there fills as far as possible.
    pub fn refill(&mut self, bufs: &mut WorkingBuffers) -> Result<Refill, ReaderError> {
        let shared = self.shared.clone();
        let rings = shared.rings.read();
        self.fill(&rings, bufs, false, None)
    }

    /// Like [`refill`](Self::refill) but allocates its own scratch. A partial
    /// fill reads at most one chunk.
    pub fn refill_with_alloc(&mut self, partial_fill: bool) -> Result<Refill, ReaderError> {
        let mut bufs = WorkingBuffers::new(self.chunk_samples);
        self.process_playlist_events();
        if self.shared.overwrite.pending_generation().is_some() {
            self.overwrite_existing_buffers(&mut bufs)?;
        }
        let shared = self.shared.clone();
        let rings = shared.rings.read();
        self.fill(&rings, &mut bufs, partial_fill, None)
    }

    /// One butler pass over this reader: handle playlist edits, serve a seek
    /// requested by the realtime side, replace stale buffers, then refill.
    pub fn do_refill(
        &mut self,
        bufs: &mut WorkingBuffers,
        cancel: Option<&CancelHandle>,
    ) -> Result<Refill, ReaderError> {
        self.process_playlist_events();
        self.report_unmatched_note_offs();

        if let Some(position) = self.shared.seek_requested() {
            let reverse = self.shared.seek_reverse.load(Ordering::Acquire);
            let result = self.seek_to(position, reverse, Some(&mut *bufs));
            // Cleared even on failure; the realtime side asks again if it
            // still needs to.
            let _ = self.shared.seek_request.compare_exchange(
                position,
                super::NO_SEEK,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            result?;
            return Ok(Refill::Complete);
        }

        if self.shared.overwrite.pending_generation().is_some() {
            self.overwrite_existing_buffers(bufs)?;
        }

        let shared = self.shared.clone();
        let rings = shared.rings.read();
        self.fill(&rings, bufs, false, cancel)
    }

    /// True if a butler pass would find work to do.
    pub fn refill_needed(&self) -> bool {
        let shared = &self.shared;
        if shared.seek_requested().is_some() || shared.overwrite.pending_generation().is_some() {
            return true;
        }
        let rings = shared.rings.read();
        let audio = self.binding.is_bound(DataType::Audio)
            && !rings.audio.is_empty()
            && rings.write_space() >= self.low_water;
        let midi = self.binding.is_bound(DataType::Midi)
            && !shared.reversed()
            && self.binding.file_sample(DataType::Midi)
                < shared.ring_position() + shared.context.midi_readahead();
        audio || midi
    }

    /// Fraction of the rings holding unread data, from 0 to 1.
    pub fn buffer_load(&self) -> f32 {
        self.shared.rings.read().load()
    }

    pub(crate) fn process_playlist_events(&mut self) {
        for (data_type, event) in self.binding.take_events() {
            debug!(reader = %self.name(), %data_type, ?event, "Playlist changed.");
            match event {
                PlaylistEvent::Modified => self.playlist_modified(),
                PlaylistEvent::RangesMoved { moves, from_undo } => {
                    self.playlist_ranges_moved(&moves, from_undo)
                }
            }
        }
    }

    fn report_unmatched_note_offs(&mut self) {
        let total = self.unmatched_note_offs();
        if total > self.unmatched_reported {
            warn!(
                reader = %self.name(),
                count = total - self.unmatched_reported,
                "Ignored note offs without a matching note on."
            );
            self.unmatched_reported = total;
        }
    }

    /// Fills audio then MIDI. Caller holds the rings shared or exclusive.
    pub(super) fn fill(
        &mut self,
        rings: &Rings,
        bufs: &mut WorkingBuffers,
        partial_fill: bool,
        cancel: Option<&CancelHandle>,
    ) -> Result<Refill, ReaderError> {
        let mut result = Refill::Complete;

        if let Some(playlist) = self.binding.audio().cloned() {
            if !rings.audio.is_empty() && rings.write_space() >= self.low_water {
                let reversed = self.shared.reversed();
                loop {
                    if cancel.is_some_and(|c| c.is_cancelled()) {
                        result = Refill::Incomplete;
                        break;
                    }
                    let free = rings.write_space();
                    if free == 0 {
                        break;
                    }
                    let read = self.audio_read(&playlist, rings, bufs, free.min(self.chunk_samples), reversed)?;
                    if read == 0 {
                        break;
                    }
                    if partial_fill {
                        if rings.write_space() >= self.low_water {
                            result = Refill::Incomplete;
                        }
                        break;
                    }
                }
            }
        }

        self.midi_read(rings)?;
        Ok(result)
    }

    /// Reads up to `count` samples per channel into the rings from the audio
    /// file cursor, moving it forward or, in reverse, backward. Returns the
    /// number of samples written per channel.
    fn audio_read(
        &mut self,
        playlist: &Arc<dyn AudioPlaylist>,
        rings: &Rings,
        bufs: &mut WorkingBuffers,
        count: usize,
        reversed: bool,
    ) -> Result<usize, ReaderError> {
        let cursor = self.binding.file_sample(DataType::Audio);
        let (from, count) = if reversed {
            let count = count.min(cursor.max(0) as usize);
            (cursor - count as i64, count)
        } else {
            (cursor, count)
        };
        if count == 0 {
            return Ok(0);
        }

        let n_channels = rings.audio.len();
        bufs.ensure(n_channels, count);
        let WorkingBuffers { sum, mixdown, gain } = bufs;

        // Every channel is read before any ring is written so a failure
        // leaves the channels aligned.
        for (channel, block) in sum.iter_mut().take(n_channels).enumerate() {
            let dst = &mut block[..count];
            match playlist.read(dst, &mut mixdown[..count], &mut gain[..count], from, channel) {
                Ok(read) => dst[read.min(count)..].fill(0.0),
                Err(e) => {
                    error!(
                        reader = %self.name(),
                        position = from,
                        channel,
                        err = %e,
                        "Error reading playlist."
                    );
                    return Err(e.into());
                }
            }
            if reversed {
                dst.reverse();
            }
        }
        for (ring, block) in rings.audio.iter().zip(sum.iter()) {
            ring.write(&block[..count]);
        }

        let cursor = if reversed { from } else { from + count as i64 };
        self.binding.set_file_sample(DataType::Audio, cursor);
        Ok(count)
    }

    /// Buffers MIDI up to the readahead horizon. Events must arrive in time
    /// order; any that go backwards are dropped and reported once the rest of
    /// the batch is buffered.
    fn midi_read(&mut self, rings: &Rings) -> Result<usize, ReaderError> {
        let Some(playlist) = self.binding.midi().cloned() else {
            return Ok(0);
        };
        // MIDI isn't played in reverse.
        if self.shared.reversed() {
            return Ok(0);
        }
        let from = self.binding.file_sample(DataType::Midi);
        let target = self.shared.ring_position() + self.shared.context.midi_readahead();
        let space = rings.midi.write_space();
        if from >= target || space == 0 {
            return Ok(0);
        }

        let mut scratch = std::mem::take(&mut self.midi_scratch);
        scratch.clear();
        if let Err(e) = playlist.read_events(from..target, &mut scratch) {
            error!(reader = %self.name(), position = from, err = %e, "Error reading MIDI playlist.");
            self.midi_scratch = scratch;
            return Err(e.into());
        }

        // Only cut the batch between distinct times so simultaneous events
        // are never split across refills.
        let (limit, next) = match scratch.get(space).map(|e| e.time()) {
            None => (scratch.len(), target),
            Some(cut) if scratch.first().is_some_and(|e| e.time() < cut) => {
                (scratch.partition_point(|e| e.time() < cut), cut)
            }
            Some(cut) => {
                warn!(
                    reader = %self.name(),
                    time = cut,
                    dropped = scratch.len() - space,
                    "More simultaneous MIDI events than the ring holds."
                );
                (space, cut + 1)
            }
        };

        let mut rejected = None;
        let mut batch_last: Option<i64> = None;
        let mut written = 0;
        for event in scratch.iter().take(limit) {
            let time = event.time();
            let earlier = match (batch_last, self.last_midi_time) {
                (Some(last), _) if time < last => Some(last),
                (None, Some(last)) if time <= last => Some(last),
                _ => None,
            };
            if let Some(last) = earlier {
                error!(reader = %self.name(), time, last, "Dropped out-of-order MIDI event.");
                rejected.get_or_insert(ReaderError::EventOrder { time, last });
                continue;
            }
            if !rings.midi.push(*event) {
                break;
            }
            batch_last = Some(time);
            written += 1;
        }

        self.last_midi_time = batch_last.or(self.last_midi_time);
        self.binding.set_file_sample(DataType::Midi, next);
        self.shared.midi_file_sample.store(next, Ordering::Release);
        self.midi_scratch = scratch;

        match rejected {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::ops::Range;

    use crossbeam_channel::Receiver;
    use parking_lot::Mutex;

    use super::*;
    use crate::midi::{MidiBuffer, MidiEvent};
    use crate::playlist::{MidiPlaylist, PlaylistError, PlaylistNotifier};
    use crate::reader::Sources;
    use crate::testutil::{ramp_playlist, test_context, FailingPlaylist};

    #[test]
    fn test_refill_waits_for_low_water() {
        let context = test_context(1024, 4);
        let (mut reader, mut rt) = DiskReader::new("low", &context, 1);
        reader.use_playlist(Sources::Audio(ramp_playlist(1, 100_000)));
        let mut bufs = WorkingBuffers::new(1024);
        assert_eq!(reader.refill(&mut bufs).unwrap(), Refill::Complete);
        assert_eq!(reader.buffer_load(), 1.0);
        assert_eq!(reader.file_sample(DataType::Audio), 4096);

        let mut audio = vec![vec![0.0; 512]];
        let mut midi = MidiBuffer::new(4);
        rt.run(&mut audio, &mut midi, 0, 512, 1.0, 512, true);
        assert!(!reader.refill_needed());
        reader.refill(&mut bufs).unwrap();
        assert_eq!(reader.file_sample(DataType::Audio), 4096);

        rt.run(&mut audio, &mut midi, 512, 1024, 1.0, 512, true);
        assert!(reader.refill_needed());
        reader.refill(&mut bufs).unwrap();
        assert_eq!(reader.file_sample(DataType::Audio), 5120);
        assert_eq!(reader.buffer_load(), 1.0);
    }

    #[test]
    fn test_partial_fill_reads_one_chunk() {
        let context = test_context(1024, 4);
        let (mut reader, _rt) = DiskReader::new("partial", &context, 2);
        reader.use_playlist(Sources::Audio(ramp_playlist(2, 100_000)));
        assert_eq!(reader.refill_with_alloc(true).unwrap(), Refill::Incomplete);
        assert_eq!(reader.buffer_load(), 0.25);
        assert_eq!(reader.refill_with_alloc(false).unwrap(), Refill::Complete);
        assert_eq!(reader.buffer_load(), 1.0);
    }

    #[test]
    fn test_read_failure_keeps_channels_aligned() {
        let context = test_context(1024, 4);
        let (mut reader, _rt) = DiskReader::new("fail", &context, 2);
        let playlist = Arc::new(FailingPlaylist::new(ramp_playlist(2, 100_000), 1));
        reader.use_playlist(Sources::Audio(playlist.clone()));

        playlist.set_failing(true);
        let err = reader.refill_with_alloc(false).unwrap_err();
        assert!(matches!(err, ReaderError::StorageRead(PlaylistError::Read { .. })));
        assert_eq!(reader.buffer_load(), 0.0);
        assert_eq!(reader.file_sample(DataType::Audio), 0);

        playlist.set_failing(false);
        reader.refill_with_alloc(false).unwrap();
        assert_eq!(reader.buffer_load(), 1.0);
    }

    #[test]
    fn test_cancelled_refill_is_incomplete() {
        let context = test_context(1024, 4);
        let (mut reader, _rt) = DiskReader::new("cancel", &context, 1);
        reader.use_playlist(Sources::Audio(ramp_playlist(1, 100_000)));
        let cancel = CancelHandle::new();
        cancel.cancel();
        let mut bufs = WorkingBuffers::new(1024);
        assert_eq!(reader.do_refill(&mut bufs, Some(&cancel)).unwrap(), Refill::Incomplete);
        assert_eq!(reader.buffer_load(), 0.0);
    }

    /// Hands out one scripted batch per read regardless of the range asked for.
    struct ScriptedMidi {
        batches: Mutex<VecDeque<Vec<MidiEvent>>>,
        notifier: PlaylistNotifier,
    }

    impl ScriptedMidi {
        fn new(batches: Vec<Vec<MidiEvent>>) -> Self {
            Self {
                batches: Mutex::new(batches.into()),
                notifier: PlaylistNotifier::new(),
            }
        }
    }

    impl MidiPlaylist for ScriptedMidi {
        fn name(&self) -> &str {
            "scripted"
        }

        fn length(&self) -> i64 {
            i64::MAX / 2
        }

        fn read_events(&self, _range: Range<i64>, dst: &mut Vec<MidiEvent>) -> Result<usize, PlaylistError> {
            let batch = self.batches.lock().pop_front().unwrap_or_default();
            dst.extend_from_slice(&batch);
            Ok(batch.len())
        }

        fn subscribe(&self) -> Receiver<PlaylistEvent> {
            self.notifier.subscribe()
        }
    }

    fn note(time: i64) -> MidiEvent {
        MidiEvent::note_on(time, 0, 60, 100)
    }

    #[test]
    fn test_midi_order_violations_are_dropped_and_reported() {
        let context = test_context(1024, 4);
        let (mut reader, _rt) = DiskReader::new("order", &context, 0);
        reader.use_playlist(Sources::Midi(Arc::new(ScriptedMidi::new(vec![
            vec![note(10), note(20), note(20), note(15), note(30)],
            vec![note(30), note(40)],
        ]))));

        let err = reader.refill_with_alloc(false).unwrap_err();
        assert!(matches!(err, ReaderError::EventOrder { time: 15, last: 20 }));
        assert_eq!(reader.shared.rings.read().midi.read_space(), 4);

        // Same time as the last event already enqueued.
        reader.shared.set_ring_position(4096);
        let err = reader.refill_with_alloc(false).unwrap_err();
        assert!(matches!(err, ReaderError::EventOrder { time: 30, last: 30 }));
        assert_eq!(reader.shared.rings.read().midi.read_space(), 5);
    }

    #[test]
    fn test_midi_batches_cut_between_distinct_times() {
        let context = crate::context::StreamContext::new(
            crate::config::EngineConfig::default()
                .with_chunk_samples(1024)
                .with_midi_ring_events(4),
        )
        .unwrap();
        let (mut reader, _rt) = DiskReader::new("cut", &context, 0);
        reader.use_playlist(Sources::Midi(Arc::new(ScriptedMidi::new(vec![vec![
            note(1),
            note(2),
            note(3),
            note(3),
            note(3),
            note(9),
        ]]))));
        reader.refill_with_alloc(false).unwrap();
        assert_eq!(reader.shared.rings.read().midi.read_space(), 2);
        assert_eq!(reader.file_sample(DataType::Midi), 3);
    }
}
