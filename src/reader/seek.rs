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

//! Repositioning: seeks, overwrites after edits and playlist rebinding.

use std::ops::Range;
use std::sync::atomic::Ordering;

use parking_lot::RwLockWriteGuard;
use tracing::{debug, info, warn};

use super::binding::Sources;
use super::channel::Rings;
use super::error::ReaderError;
use super::refill::WorkingBuffers;
use super::state::Overwrite;
use super::{DiskReader, RealtimeReader, NO_SEEK};
use crate::playlist::{DataType, RangeMove};

fn overlaps(a: &Range<i64>, b: &Range<i64>) -> bool {
    a.start < b.end && b.start < a.end
}

impl DiskReader {
    /// Discards buffered data and moves the reader to `position`, clamped to
    /// the bound playlist. With `complete_refill` the rings are refilled
    /// before returning; otherwise the butler fills them later.
    ///
    /// The realtime side can't fade out audio it can no longer reach, so a
    /// seek made while the transport is rolling cuts the old audio without a
    /// declick. Locate with the transport stopped to avoid that.
    ///
    /// Returns the position actually seeked to.
    pub fn seek(&mut self, position: i64, complete_refill: bool) -> Result<i64, ReaderError> {
        let mut bufs = complete_refill.then(|| WorkingBuffers::new(self.chunk_samples));
        let reverse = self.shared.reversed();
        self.seek_to(position, reverse, bufs.as_mut())
    }

    pub(super) fn seek_to(
        &mut self,
        position: i64,
        reverse: bool,
        bufs: Option<&mut WorkingBuffers>,
    ) -> Result<i64, ReaderError> {
        let position = self.clamp_position(position);
        // A refill from here on satisfies any edit made before it.
        let overwrite = self.shared.overwrite.pending_generation();

        let shared = self.shared.clone();
        let mut rings = shared.rings.write();
        shared.reversed.store(reverse, Ordering::Release);
        self.reposition(&mut rings, position);
        shared.seek_generation.fetch_add(1, Ordering::AcqRel);
        debug!(reader = %self.name(), position, reverse, "Seeking.");

        let Some(bufs) = bufs else {
            return Ok(position);
        };
        let rings = RwLockWriteGuard::downgrade(rings);
        self.fill(&rings, bufs, false, None)?;
        if let Some(generation) = overwrite {
            shared.overwrite.complete(generation);
        }
        Ok(position)
    }

    fn clamp_position(&self, position: i64) -> i64 {
        let clamped = match self.binding.length() {
            Some(length) => position.clamp(0, length.max(0)),
            None => position.max(0),
        };
        if clamped != position {
            warn!(reader = %self.name(), requested = position, clamped, "Seek outside playlist, clamping.");
        }
        clamped
    }

    /// Empties the rings and points every cursor at `position`. Caller holds
    /// the rings exclusively.
    fn reposition(&mut self, rings: &mut Rings, position: i64) {
        rings.reset();
        for data_type in DataType::ALL {
            self.binding.set_file_sample(data_type, position);
        }
        self.shared.midi_file_sample.store(position, Ordering::Release);
        self.shared.set_ring_position(position);
        self.shared.transport_position.store(NO_SEEK, Ordering::Release);
        self.last_midi_time = None;
    }

    /// Marks the buffered data stale. The realtime side outputs silence until
    /// the butler has replaced it.
    pub fn set_pending_overwrite(&self) {
        let generation = self.shared.overwrite.set_pending();
        self.overwrite_requested(generation);
    }

    /// Wakes the butler for an overwrite already flagged, typically while
    /// the rings were still held exclusively so no cycle saw them half done.
    pub(super) fn overwrite_requested(&self, generation: u64) {
        debug!(reader = %self.name(), generation, "Overwrite pending.");
        self.shared.context.request_refill();
    }

    /// True from an edit until the realtime side has picked up the
    /// replacement data.
    pub fn pending_overwrite(&self) -> bool {
        self.shared.overwrite.load() != Overwrite::Clear
    }

    pub fn overwrite_state(&self) -> Overwrite {
        self.shared.overwrite.load()
    }

    /// Replaces the buffered data with a fresh read from the current ring
    /// position. Returns false if no overwrite was pending.
    ///
    /// If another edit arrives while this runs, the flag stays pending and
    /// the next pass overwrites again.
    pub fn overwrite_existing_buffers(&mut self, bufs: &mut WorkingBuffers) -> Result<bool, ReaderError> {
        let Some(generation) = self.shared.overwrite.pending_generation() else {
            return Ok(false);
        };

        let shared = self.shared.clone();
        let mut rings = shared.rings.write();
        let position = shared.refill_position();
        self.reposition(&mut rings, position);
        let rings = RwLockWriteGuard::downgrade(rings);
        self.fill(&rings, bufs, false, None)?;

        if shared.overwrite.complete(generation) {
            info!(reader = %self.name(), position, "Overwrote buffers.");
        } else {
            debug!(reader = %self.name(), position, "Edited again during overwrite.");
        }
        Ok(true)
    }

    /// The bound playlist changed somewhere; everything buffered is suspect.
    pub fn playlist_modified(&self) {
        self.set_pending_overwrite();
    }

    /// Regions of the bound playlist moved. Buffers are only overwritten if a
    /// move touches what's currently buffered.
    pub fn playlist_ranges_moved(&mut self, moves: &[RangeMove], from_undo: bool) {
        let position = self.shared.ring_position();
        let mut windows = Vec::with_capacity(2);
        if self.binding.is_bound(DataType::Audio) {
            let file = self.binding.file_sample(DataType::Audio);
            windows.push(if self.shared.reversed() {
                file..position
            } else {
                position..file
            });
        }
        if self.binding.is_bound(DataType::Midi) {
            windows.push(position..self.binding.file_sample(DataType::Midi));
        }

        let touched = moves.iter().any(|m| {
            windows
                .iter()
                .any(|w| overlaps(w, &m.source()) || overlaps(w, &m.destination()))
        });
        if touched {
            self.set_pending_overwrite();
        }
        if !from_undo {
            if let Some(observer) = &self.observer {
                observer.automation_ranges_moved(moves);
            }
        }
    }

    /// Binds the reader to new playlists. Only the data types `sources`
    /// names change; anything already buffered is overwritten.
    pub fn use_playlist(&mut self, sources: Sources) {
        let data_types = sources.data_types();
        let overwrite = {
            let shared = self.shared.clone();
            let mut rings = shared.rings.write();
            let had_data = rings.read_space() > 0 || rings.midi.read_space() > 0;
            self.binding.bind(sources);
            let position = shared.refill_position();
            self.reposition(&mut rings, position);
            had_data.then(|| shared.overwrite.set_pending())
        };
        self.shared
            .has_audio
            .store(self.binding.is_bound(DataType::Audio), Ordering::Release);
        self.shared
            .has_midi
            .store(self.binding.is_bound(DataType::Midi), Ordering::Release);

        if let Some(observer) = &self.observer {
            for data_type in data_types {
                observer.playlist_rebound(*data_type);
            }
        }
        info!(reader = %self.name(), data = ?data_types, "Bound playlist.");
        match overwrite {
            Some(generation) => self.overwrite_requested(generation),
            None => self.shared.context.request_refill(),
        }
    }

    /// Unbinds the playlist for `data_type`.
    pub fn clear_playlist(&mut self, data_type: DataType) -> Result<(), ReaderError> {
        if !self.binding.is_bound(data_type) {
            return Err(ReaderError::NoPlaylist(data_type));
        }
        self.binding.unbind(data_type);
        match data_type {
            DataType::Audio => self.shared.has_audio.store(false, Ordering::Release),
            DataType::Midi => self.shared.has_midi.store(false, Ordering::Release),
        }
        info!(reader = %self.name(), %data_type, "Cleared playlist.");
        self.set_pending_overwrite();
        Ok(())
    }

    /// True if the realtime side could move `distance` samples without
    /// leaving buffered data.
    pub fn can_internal_playback_seek(&self, distance: i64) -> bool {
        let rings = self.shared.rings.read();
        can_seek_in(&self.shared, &rings, distance)
    }
}

/// `distance` is measured along the rings: positive is further into
/// buffered data whichever direction it was read in.
fn can_seek_in(shared: &super::Shared, rings: &Rings, distance: i64) -> bool {
    if !rings.audio.is_empty() && shared.has_audio.load(Ordering::Acquire) {
        return rings.can_seek(distance);
    }
    // MIDI only: events behind the head are gone, ahead is buffered up to
    // the file cursor.
    distance >= 0
        && shared.ring_position() + distance <= shared.midi_file_sample.load(Ordering::Acquire)
}

impl RealtimeReader {
    /// True if `distance` samples are resident, so a jump of that size needs
    /// no refill.
    pub fn can_internal_playback_seek(&self, distance: i64) -> bool {
        match self.shared.rings.try_read() {
            Some(rings) => can_seek_in(&self.shared, &rings, distance),
            None => false,
        }
    }

    /// Jumps within buffered data. Returns false, and does nothing, if the
    /// data isn't resident.
    pub fn internal_playback_seek(&mut self, distance: i64) -> bool {
        let shared = self.shared.clone();
        let Some(rings) = shared.rings.try_read() else {
            return false;
        };
        if !can_seek_in(&shared, &rings, distance) {
            return false;
        }
        self.seek_in(&rings, distance);
        true
    }

    pub(super) fn can_seek_in(&self, rings: &Rings, distance: i64) -> bool {
        can_seek_in(&self.shared, rings, distance)
    }

    /// Moves every read pointer by `distance` and skips MIDI left behind.
    pub(super) fn seek_in(&mut self, rings: &Rings, distance: i64) {
        for ring in &rings.audio {
            if distance >= 0 {
                ring.increment_read_ptr(distance as usize);
            } else {
                ring.decrement_read_ptr(distance.unsigned_abs() as usize);
            }
        }
        let position = if self.shared.reversed() {
            self.shared.ring_position() - distance
        } else {
            self.shared.ring_position() + distance
        };
        self.shared.set_ring_position(position);
        while rings.midi.front().is_some_and(|e| e.time() < position) {
            rings.midi.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use parking_lot::Mutex;

    use super::*;
    use crate::midi::MidiBuffer;
    use crate::playlist::{AudioRegion, AudioSource, MemoryAudioPlaylist};
    use crate::reader::{Refill, TrackObserver};
    use crate::testutil::{ramp_playlist, ramp_value, test_context, GatedPlaylist};

    #[test]
    fn test_seek_with_refill_starts_at_position() {
        let context = test_context(1024, 4);
        let (mut reader, mut rt) = DiskReader::new("seek", &context, 2);
        reader.use_playlist(Sources::Audio(ramp_playlist(2, 100_000)));
        assert_eq!(reader.seek(5000, true).unwrap(), 5000);
        assert_eq!(reader.position(), 5000);
        assert_eq!(reader.buffer_load(), 1.0);

        let ramp = context.declick_samples();
        let mut audio = vec![vec![0.0; 1024]; 2];
        let mut midi = MidiBuffer::new(4);
        rt.run(&mut audio, &mut midi, 5000, 6024, 1.0, 1024, true);
        for (c, channel) in audio.iter().enumerate() {
            for (i, sample) in channel.iter().enumerate() {
                let expected = ramp_value(5000 + i as i64, c);
                if i < ramp {
                    assert!(sample.abs() <= expected.abs());
                } else {
                    assert_eq!(*sample, expected);
                }
            }
        }
    }

    #[test]
    fn test_seek_clamps_to_playlist() {
        let context = test_context(1024, 4);
        let (mut reader, _rt) = DiskReader::new("clamp", &context, 1);
        assert_eq!(reader.seek(-10, false).unwrap(), 0);
        assert_eq!(reader.seek(1_000_000, false).unwrap(), 1_000_000);

        reader.use_playlist(Sources::Audio(ramp_playlist(1, 10_000)));
        assert_eq!(reader.seek(-10, false).unwrap(), 0);
        assert_eq!(reader.seek(20_000, false).unwrap(), 10_000);
        assert_eq!(reader.file_sample(DataType::Audio), 10_000);
    }

    #[test]
    fn test_seek_without_refill_leaves_rings_empty() {
        let context = test_context(1024, 4);
        let (mut reader, _rt) = DiskReader::new("lazy", &context, 1);
        reader.use_playlist(Sources::Audio(ramp_playlist(1, 100_000)));
        reader.refill_with_alloc(false).unwrap();
        reader.seek(300, false).unwrap();
        assert_eq!(reader.buffer_load(), 0.0);
        assert!(reader.refill_needed());
    }

    #[test]
    fn test_internal_seek_within_rings() {
        let context = crate::context::StreamContext::new(
            crate::config::EngineConfig::default()
                .with_chunk_samples(1024)
                .with_seek_reservation(512),
        )
        .unwrap();
        let (mut reader, mut rt) = DiskReader::new("internal", &context, 1);
        reader.use_playlist(Sources::Audio(ramp_playlist(1, 100_000)));
        reader.refill_with_alloc(false).unwrap();

        assert!(rt.can_internal_playback_seek(1000));
        assert!(rt.internal_playback_seek(1000));
        assert_eq!(rt.position(), 1000);
        assert!(rt.internal_playback_seek(-500));
        assert_eq!(rt.position(), 500);
        assert!(!rt.can_internal_playback_seek(-1000));
        assert!(!rt.internal_playback_seek(1_000_000));
        assert_eq!(rt.position(), 500);

        let mut audio = vec![vec![0.0; 4]];
        let mut midi = MidiBuffer::new(4);
        rt.run(&mut audio, &mut midi, 500, 504, 1.0, 4, true);
        assert_eq!(audio[0], vec![500.0, 501.0, 502.0, 503.0]);
    }

    #[test]
    fn test_overwrite_rereads_from_head() {
        let context = test_context(1024, 4);
        let (mut reader, mut rt) = DiskReader::new("overwrite", &context, 1);
        let playlist = ramp_playlist(1, 100_000);
        reader.use_playlist(Sources::Audio(playlist.clone()));
        reader.refill_with_alloc(false).unwrap();

        let mut audio = vec![vec![0.0; 256]];
        let mut midi = MidiBuffer::new(4);
        rt.run(&mut audio, &mut midi, 0, 256, 1.0, 256, true);

        playlist.set_region_gain(0, 2.0);
        let mut bufs = WorkingBuffers::new(1024);
        assert_eq!(reader.do_refill(&mut bufs, None).unwrap(), Refill::Complete);
        assert_eq!(reader.overwrite_state(), Overwrite::Refilled);
        assert_eq!(reader.file_sample(DataType::Audio), 256 + 4096);

        rt.run(&mut audio, &mut midi, 256, 512, 1.0, 256, true);
        assert!(!reader.pending_overwrite());
        assert_eq!(audio[0][255], 2.0 * 511.0);
    }

    #[test]
    fn test_overwrite_while_rolling_lands_on_transport() {
        let context = test_context(1024, 4);
        let (mut reader, mut rt) = DiskReader::new("rolling", &context, 1);
        let playlist = Arc::new(GatedPlaylist::new(ramp_playlist(1, 100_000)));
        reader.use_playlist(Sources::Audio(playlist.clone()));
        reader.refill_with_alloc(false).unwrap();

        let mut audio = vec![vec![0.0; 256]];
        let mut midi = MidiBuffer::new(4);
        rt.run(&mut audio, &mut midi, 0, 256, 1.0, 256, true);

        playlist.close();
        reader.playlist_modified();
        let worker = thread::spawn(move || {
            let mut bufs = WorkingBuffers::new(1024);
            reader.do_refill(&mut bufs, None).unwrap();
            reader
        });
        playlist.wait_for_reader();

        // The transport keeps rolling while the overwrite reads.
        for start in [256, 512] {
            let cycle = rt.run(&mut audio, &mut midi, start, start + 256, 1.0, 256, true);
            assert_eq!(cycle.missing, 0);
            assert!(audio[0].iter().all(|&s| s == 0.0));
        }
        playlist.open();
        let reader = worker.join().unwrap();
        assert_eq!(reader.overwrite_state(), Overwrite::Refilled);

        let cycle = rt.run(&mut audio, &mut midi, 768, 1024, 1.0, 256, true);
        assert_eq!(cycle.missing, 0);
        assert_eq!(rt.position(), 1024);
        assert_eq!(audio[0][255], ramp_value(1023, 0));
        assert!(!reader.pending_overwrite());
        assert_eq!(reader.underruns(), 0);
    }

    #[test]
    fn test_added_channel_is_silent_until_overwritten() {
        let context = test_context(1024, 4);
        let (mut reader, mut rt) = DiskReader::new("grow", &context, 1);
        reader.use_playlist(Sources::Audio(ramp_playlist(2, 100_000)));
        reader.refill_with_alloc(false).unwrap();

        let mut audio = vec![vec![0.0; 256]; 2];
        let mut midi = MidiBuffer::new(4);
        rt.run(&mut audio, &mut midi, 0, 256, 1.0, 256, true);

        reader.add_channels(1).unwrap();
        assert_eq!(reader.n_channels(), 2);
        assert_eq!(reader.overwrite_state(), Overwrite::Pending);
        let cycle = rt.run(&mut audio, &mut midi, 256, 512, 1.0, 256, true);
        assert_eq!(cycle.missing, 0);
        assert!(audio.iter().flatten().all(|&s| s == 0.0));

        let mut bufs = WorkingBuffers::new(1024);
        reader.do_refill(&mut bufs, None).unwrap();
        let cycle = rt.run(&mut audio, &mut midi, 512, 768, 1.0, 256, true);
        assert_eq!(cycle.missing, 0);
        assert_eq!(audio[0][255], ramp_value(767, 0));
        assert_eq!(audio[1][255], ramp_value(767, 1));
        assert_eq!(reader.underruns(), 0);
    }

    #[test]
    fn test_overwrite_without_request_is_noop() {
        let context = test_context(1024, 4);
        let (mut reader, _rt) = DiskReader::new("noop", &context, 1);
        let mut bufs = WorkingBuffers::new(1024);
        assert!(!reader.overwrite_existing_buffers(&mut bufs).unwrap());
    }

    #[derive(Default)]
    struct Recorder {
        moved: Mutex<Vec<RangeMove>>,
        rebound: Mutex<Vec<DataType>>,
    }

    impl TrackObserver for Recorder {
        fn automation_ranges_moved(&self, moves: &[RangeMove]) {
            self.moved.lock().extend_from_slice(moves);
        }

        fn playlist_rebound(&self, data_type: DataType) {
            self.rebound.lock().push(data_type);
        }
    }

    #[test]
    fn test_ranges_moved_only_overwrites_buffered_window() {
        let context = test_context(1024, 4);
        let (mut reader, _rt) = DiskReader::new("moves", &context, 1);
        let observer = Arc::new(Recorder::default());
        reader.set_observer(observer.clone());
        reader.use_playlist(Sources::Audio(ramp_playlist(1, 100_000)));
        assert_eq!(observer.rebound.lock().as_slice(), &[DataType::Audio]);
        reader.refill_with_alloc(false).unwrap();

        // Buffered window is [0, 4096).
        reader.playlist_ranges_moved(&[RangeMove::new(50_000, 1000, 60_000)], true);
        assert!(!reader.pending_overwrite());
        assert!(observer.moved.lock().is_empty());

        reader.playlist_ranges_moved(&[RangeMove::new(50_000, 1000, 4000)], false);
        assert!(reader.pending_overwrite());
        assert_eq!(observer.moved.lock().len(), 1);
    }

    #[test]
    fn test_region_move_is_picked_up_by_butler_pass() {
        let context = test_context(1024, 4);
        let (mut reader, _rt) = DiskReader::new("edit", &context, 1);
        let playlist = Arc::new(MemoryAudioPlaylist::new("edit", 1));
        let source = Arc::new(AudioSource::new("one", vec![vec![1.0; 2000]]));
        playlist.add_region(AudioRegion::new(source.clone(), 0));
        playlist.add_region(AudioRegion::new(source, 50_000));
        reader.use_playlist(Sources::Audio(playlist.clone()));
        reader.refill_with_alloc(false).unwrap();

        playlist.move_region(1, 70_000);
        let mut bufs = WorkingBuffers::new(1024);
        reader.do_refill(&mut bufs, None).unwrap();
        assert!(!reader.pending_overwrite());

        playlist.move_region(1, 1000);
        reader.do_refill(&mut bufs, None).unwrap();
        assert_eq!(reader.overwrite_state(), Overwrite::Refilled);
    }

    #[test]
    fn test_clear_playlist() {
        let context = test_context(1024, 4);
        let (mut reader, _rt) = DiskReader::new("clear", &context, 1);
        assert!(matches!(
            reader.clear_playlist(DataType::Midi),
            Err(ReaderError::NoPlaylist(DataType::Midi))
        ));
        reader.use_playlist(Sources::Audio(ramp_playlist(1, 100)));
        reader.clear_playlist(DataType::Audio).unwrap();
        assert!(!reader.binding().is_bound(DataType::Audio));
    }
}
