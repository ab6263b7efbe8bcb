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

//! The rings a reader streams through, plus the operations that change their
//! number or size.

use std::sync::atomic::Ordering;

use tracing::info;

use super::error::ReaderError;
use super::DiskReader;
use crate::midi::MidiEvent;
use crate::ringbuffer::PlaybackRingBuffer;

/// One ring per audio channel and a single ring for MIDI.
///
/// Every audio ring is written with the same number of samples per refill
/// and read with the same number per cycle, so all channels stay aligned on
/// the same timeline position.
pub(crate) struct Rings {
    pub(crate) audio: Vec<PlaybackRingBuffer<f32>>,
    pub(crate) midi: PlaybackRingBuffer<MidiEvent>,
}

impl Rings {
    pub(crate) fn new(
        n_channels: usize,
        capacity: usize,
        reservation: usize,
        midi_capacity: usize,
    ) -> Self {
        let audio = (0..n_channels)
            .map(|_| Self::audio_ring(capacity, reservation))
            .collect();
        Self {
            audio,
            midi: PlaybackRingBuffer::new(midi_capacity),
        }
    }

    fn audio_ring(capacity: usize, reservation: usize) -> PlaybackRingBuffer<f32> {
        let mut ring = PlaybackRingBuffer::new(capacity);
        ring.set_reservation(reservation);
        ring
    }

    /// Discards everything buffered.
    pub(crate) fn reset(&mut self) {
        self.audio.iter_mut().for_each(|r| r.reset());
        self.midi.reset();
    }

    /// Capacity of the audio rings, or 0 without audio channels.
    pub(crate) fn capacity(&self) -> usize {
        self.audio.first().map(|r| r.capacity()).unwrap_or(0)
    }

    /// Samples every audio channel can supply.
    pub(crate) fn read_space(&self) -> usize {
        self.audio.iter().map(|r| r.read_space()).min().unwrap_or(0)
    }

    /// Samples every audio channel can accept.
    pub(crate) fn write_space(&self) -> usize {
        self.audio.iter().map(|r| r.write_space()).min().unwrap_or(0)
    }

    /// True if every audio ring can move its read pointer by `distance`.
    pub(crate) fn can_seek(&self, distance: i64) -> bool {
        !self.audio.is_empty() && self.audio.iter().all(|r| r.can_seek(distance))
    }

    /// Fraction of the emptiest ring holding unread data.
    pub(crate) fn load(&self) -> f32 {
        if self.audio.is_empty() {
            return 1.0;
        }
        self.read_space() as f32 / self.capacity() as f32
    }
}

impl DiskReader {
    /// Number of audio channels streamed.
    pub fn n_channels(&self) -> usize {
        self.shared.rings.read().audio.len()
    }

    /// Adds `count` audio channels. Existing channels are realigned by
    /// refilling every ring.
    pub fn add_channels(&mut self, count: usize) -> Result<(), ReaderError> {
        if count == 0 {
            return Ok(());
        }
        let generation = {
            let mut rings = self.shared.rings.write();
            let capacity = self.shared.context.ring_capacity();
            let reservation = self.shared.context.config().seek_reservation();
            for _ in 0..count {
                rings.audio.push(Rings::audio_ring(capacity, reservation));
            }
            info!(reader = %self.name(), added = count, channels = rings.audio.len(), "Added channels.");
            self.shared.overwrite.set_pending()
        };
        self.overwrite_requested(generation);
        Ok(())
    }

    /// Removes the last `count` audio channels.
    pub fn remove_channels(&mut self, count: usize) -> Result<(), ReaderError> {
        let mut rings = self.shared.rings.write();
        let available = rings.audio.len();
        if count > available {
            return Err(ReaderError::ChannelCount {
                requested: count,
                available,
            });
        }
        rings.audio.truncate(available - count);
        info!(reader = %self.name(), removed = count, channels = rings.audio.len(), "Removed channels.");
        Ok(())
    }

    /// Reallocates the rings from the current chunk size and buffer depth.
    /// Buffered data is discarded and refilled from the current position.
    pub fn adjust_buffering(&mut self) -> Result<(), ReaderError> {
        let capacity = self.shared.context.ring_capacity();
        let low_water = self.shared.context.config().low_water_samples();
        if low_water > capacity {
            return Err(ReaderError::Configuration(format!(
                "low water mark {low_water} exceeds ring capacity {capacity}"
            )));
        }
        let overwrite = {
            let mut rings = self.shared.rings.write();
            let changed = rings.capacity() != capacity.next_power_of_two();
            if changed {
                rings.audio.iter_mut().for_each(|r| r.resize(capacity));
            }
            changed.then(|| self.shared.overwrite.set_pending())
        };
        self.low_water = low_water;
        self.shared.low_water.store(low_water, Ordering::Relaxed);
        self.chunk_samples = self.shared.context.chunk_samples();
        if let Some(generation) = overwrite {
            info!(reader = %self.name(), capacity, "Adjusted buffering.");
            self.overwrite_requested(generation);
        }
        Ok(())
    }
}
