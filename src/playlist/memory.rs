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

//! Region based playlists backed by decoded sample data held in memory.
//!
//! Regions are layered in insertion order: a later region is opaque over the
//! ones before it, except inside its fades where it crossfades with whatever
//! lies underneath.

use std::ops::Range;
use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::RwLock;

use super::error::PlaylistError;
use super::{AudioPlaylist, MidiPlaylist, PlaylistEvent, PlaylistNotifier, RangeMove};
use crate::midi::MidiEvent;

/// Decoded planar audio data shared between regions.
pub struct AudioSource {
    name: String,
    channels: Vec<Vec<f32>>,
}

impl AudioSource {
    /// Creates a source from planar channel data.
    pub fn new(name: &str, channels: Vec<Vec<f32>>) -> Self {
        Self {
            name: name.to_string(),
            channels,
        }
    }

    /// Creates a source from interleaved samples.
    pub fn from_interleaved(name: &str, samples: &[f32], n_channels: usize) -> Self {
        let n_channels = n_channels.max(1);
        let frames = samples.len() / n_channels;
        let mut channels = vec![Vec::with_capacity(frames); n_channels];
        for frame in samples.chunks_exact(n_channels) {
            for (channel, sample) in channels.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }
        Self::new(name, channels)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    /// Length in samples of the longest channel.
    pub fn length(&self) -> i64 {
        self.channels.iter().map(|c| c.len()).max().unwrap_or(0) as i64
    }

    /// Copies samples of `channel` starting at `offset` into `dst`. Anything
    /// past the end of the source is silence.
    fn copy(&self, channel: usize, offset: i64, dst: &mut [f32]) {
        let data = &self.channels[channel];
        let start = offset.clamp(0, data.len() as i64) as usize;
        let available = (data.len() - start).min(dst.len());
        dst[..available].copy_from_slice(&data[start..start + available]);
        dst[available..].fill(0.0);
    }
}

/// A window onto an [`AudioSource`] placed on the timeline.
#[derive(Clone)]
pub struct AudioRegion {
    source: Arc<AudioSource>,
    /// Timeline position of the first sample.
    position: i64,
    /// Offset into the source of the first sample.
    start: i64,
    length: i64,
    gain: f32,
    fade_in: i64,
    fade_out: i64,
}

impl AudioRegion {
    /// Creates a region covering the whole source at `position`.
    pub fn new(source: Arc<AudioSource>, position: i64) -> Self {
        let length = source.length();
        Self {
            source,
            position,
            start: 0,
            length,
            gain: 1.0,
            fade_in: 0,
            fade_out: 0,
        }
    }

    /// Trims the region to `length` samples starting `start` samples into the source.
    pub fn with_trim(mut self, start: i64, length: i64) -> Self {
        self.start = start.max(0);
        self.length = length.max(0);
        self
    }

    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    pub fn with_fades(mut self, fade_in: i64, fade_out: i64) -> Self {
        self.fade_in = fade_in.max(0);
        self.fade_out = fade_out.max(0);
        self
    }

    pub fn position(&self) -> i64 {
        self.position
    }

    pub fn length(&self) -> i64 {
        self.length
    }

    pub fn end(&self) -> i64 {
        self.position + self.length
    }

    pub fn source(&self) -> &Arc<AudioSource> {
        &self.source
    }

    /// Fade envelope at timeline position `pos`, in [0, 1].
    fn fade_at(&self, pos: i64) -> f32 {
        let into = pos - self.position;
        let remaining = self.end() - pos;
        let mut fade = 1.0;
        if self.fade_in > 0 && into < self.fade_in {
            fade *= into as f32 / self.fade_in as f32;
        }
        if self.fade_out > 0 && remaining <= self.fade_out {
            fade *= (remaining - 1).max(0) as f32 / self.fade_out as f32;
        }
        fade
    }
}

/// Intersection of a region with [position, position + count) as
/// (offset into the read, timeline start, length).
fn overlap(region_start: i64, region_end: i64, position: i64, count: usize) -> Option<(usize, i64, usize)> {
    let start = region_start.max(position);
    let end = region_end.min(position + count as i64);
    if end <= start {
        return None;
    }
    Some(((start - position) as usize, start, (end - start) as usize))
}

/// An audio playlist held entirely in memory.
pub struct MemoryAudioPlaylist {
    name: String,
    n_channels: usize,
    regions: RwLock<Vec<AudioRegion>>,
    notifier: PlaylistNotifier,
}

impl MemoryAudioPlaylist {
    pub fn new(name: &str, n_channels: usize) -> Self {
        Self {
            name: name.to_string(),
            n_channels,
            regions: RwLock::new(Vec::new()),
            notifier: PlaylistNotifier::new(),
        }
    }

    /// Adds a region on top of the existing ones.
    pub fn add_region(&self, region: AudioRegion) {
        self.regions.write().push(region);
        self.notifier.notify(PlaylistEvent::Modified);
    }

    /// Removes the region at `index` (in layer order).
    pub fn remove_region(&self, index: usize) -> Option<AudioRegion> {
        let removed = {
            let mut regions = self.regions.write();
            (index < regions.len()).then(|| regions.remove(index))
        };
        if removed.is_some() {
            self.notifier.notify(PlaylistEvent::Modified);
        }
        removed
    }

    /// Moves the region at `index` to a new timeline position.
    pub fn move_region(&self, index: usize, position: i64) -> Option<RangeMove> {
        let moved = {
            let mut regions = self.regions.write();
            let region = regions.get_mut(index)?;
            let moved = RangeMove::new(region.position, region.length, position);
            region.position = position;
            moved
        };
        self.notifier.notify(PlaylistEvent::RangesMoved {
            moves: vec![moved],
            from_undo: false,
        });
        Some(moved)
    }

    pub fn set_region_gain(&self, index: usize, gain: f32) -> bool {
        let changed = match self.regions.write().get_mut(index) {
            Some(region) => {
                region.gain = gain;
                true
            }
            None => false,
        };
        if changed {
            self.notifier.notify(PlaylistEvent::Modified);
        }
        changed
    }

    /// Tells subscribers the contents changed without a specific edit.
    pub fn notify_modified(&self) {
        self.notifier.notify(PlaylistEvent::Modified);
    }

    pub fn regions(&self) -> Vec<AudioRegion> {
        self.regions.read().clone()
    }
}

impl AudioPlaylist for MemoryAudioPlaylist {
    fn name(&self) -> &str {
        &self.name
    }

    fn n_channels(&self) -> usize {
        self.n_channels
    }

    fn length(&self) -> i64 {
        self.regions.read().iter().map(|r| r.end()).max().unwrap_or(0)
    }

    fn read(
        &self,
        dst: &mut [f32],
        mixdown: &mut [f32],
        gain: &mut [f32],
        position: i64,
        channel: usize,
    ) -> Result<usize, PlaylistError> {
        let count = dst.len();
        if mixdown.len() < count || gain.len() < count {
            return Err(PlaylistError::Read {
                position,
                channel,
                reason: format!(
                    "scratch buffers too small: need {count}, have {}/{}",
                    mixdown.len(),
                    gain.len()
                ),
            });
        }

        dst.fill(0.0);
        if channel >= self.n_channels {
            return Ok(count);
        }

        for region in self.regions.read().iter() {
            if channel >= region.source.n_channels() {
                continue;
            }
            let Some((offset, start, len)) = overlap(region.position, region.end(), position, count)
            else {
                continue;
            };

            let mix = &mut mixdown[offset..offset + len];
            region
                .source
                .copy(channel, region.start + (start - region.position), mix);

            let envelope = &mut gain[offset..offset + len];
            for (i, g) in envelope.iter_mut().enumerate() {
                *g = region.fade_at(start + i as i64);
            }

            for ((out, &sample), &fade) in dst[offset..offset + len]
                .iter_mut()
                .zip(mix.iter())
                .zip(envelope.iter())
            {
                *out = *out * (1.0 - fade) + sample * region.gain * fade;
            }
        }

        Ok(count)
    }

    fn subscribe(&self) -> Receiver<PlaylistEvent> {
        self.notifier.subscribe()
    }
}

/// MIDI events with times relative to the start of the source.
pub struct MidiSource {
    name: String,
    events: Vec<MidiEvent>,
}

impl MidiSource {
    /// Creates a source. Events are sorted by time, keeping the order of
    /// events that share a time.
    pub fn new(name: &str, mut events: Vec<MidiEvent>) -> Self {
        events.sort_by_key(|e| e.time());
        Self {
            name: name.to_string(),
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }

    /// Time one past the last event.
    pub fn length(&self) -> i64 {
        self.events.last().map(|e| e.time() + 1).unwrap_or(0)
    }
}

/// A window onto a [`MidiSource`] placed on the timeline.
#[derive(Clone)]
pub struct MidiRegion {
    source: Arc<MidiSource>,
    position: i64,
    start: i64,
    length: i64,
}

impl MidiRegion {
    pub fn new(source: Arc<MidiSource>, position: i64) -> Self {
        let length = source.length();
        Self {
            source,
            position,
            start: 0,
            length,
        }
    }

    pub fn with_trim(mut self, start: i64, length: i64) -> Self {
        self.start = start.max(0);
        self.length = length.max(0);
        self
    }

    pub fn position(&self) -> i64 {
        self.position
    }

    pub fn end(&self) -> i64 {
        self.position + self.length
    }
}

/// A MIDI playlist held entirely in memory.
pub struct MemoryMidiPlaylist {
    name: String,
    regions: RwLock<Vec<MidiRegion>>,
    notifier: PlaylistNotifier,
}

impl MemoryMidiPlaylist {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            regions: RwLock::new(Vec::new()),
            notifier: PlaylistNotifier::new(),
        }
    }

    pub fn add_region(&self, region: MidiRegion) {
        self.regions.write().push(region);
        self.notifier.notify(PlaylistEvent::Modified);
    }

    pub fn move_region(&self, index: usize, position: i64) -> Option<RangeMove> {
        let moved = {
            let mut regions = self.regions.write();
            let region = regions.get_mut(index)?;
            let moved = RangeMove::new(region.position, region.length, position);
            region.position = position;
            moved
        };
        self.notifier.notify(PlaylistEvent::RangesMoved {
            moves: vec![moved],
            from_undo: false,
        });
        Some(moved)
    }

    pub fn notify_modified(&self) {
        self.notifier.notify(PlaylistEvent::Modified);
    }
}

impl MidiPlaylist for MemoryMidiPlaylist {
    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> i64 {
        self.regions.read().iter().map(|r| r.end()).max().unwrap_or(0)
    }

    fn read_events(
        &self,
        range: Range<i64>,
        dst: &mut Vec<MidiEvent>,
    ) -> Result<usize, PlaylistError> {
        let first = dst.len();
        for region in self.regions.read().iter() {
            if region.end() <= range.start || region.position >= range.end {
                continue;
            }
            let window = region.start..region.start + region.length;
            for event in region.source.events() {
                if !window.contains(&event.time()) {
                    continue;
                }
                let time = region.position + (event.time() - region.start);
                if range.contains(&time) {
                    dst.push(event.at(time));
                }
            }
        }
        dst[first..].sort_by_key(|e| e.time());
        Ok(dst.len() - first)
    }

    fn subscribe(&self) -> Receiver<PlaylistEvent> {
        self.notifier.subscribe()
    }
}
