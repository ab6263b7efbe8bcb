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
use std::fmt;
use std::ops::Range;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::midi::MidiEvent;

pub mod error;
pub mod file;
pub mod memory;

pub use error::PlaylistError;
pub use memory::{
    AudioRegion, AudioSource, MemoryAudioPlaylist, MemoryMidiPlaylist, MidiRegion, MidiSource,
};

/// The kinds of data a reader streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Audio,
    Midi,
}

impl DataType {
    pub const ALL: [DataType; 2] = [DataType::Audio, DataType::Midi];

    /// Index into per-type arrays.
    pub fn index(self) -> usize {
        match self {
            DataType::Audio => 0,
            DataType::Midi => 1,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Audio => write!(f, "audio"),
            DataType::Midi => write!(f, "midi"),
        }
    }
}

/// A block of timeline moved from one position to another by an edit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeMove {
    pub from: i64,
    pub length: i64,
    pub to: i64,
}

impl RangeMove {
    pub fn new(from: i64, length: i64, to: i64) -> Self {
        Self { from, length, to }
    }

    /// The source range of the move.
    pub fn source(&self) -> Range<i64> {
        self.from..self.from + self.length
    }

    /// The destination range of the move.
    pub fn destination(&self) -> Range<i64> {
        self.to..self.to + self.length
    }
}

/// Change notifications delivered to subscribers of a playlist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlaylistEvent {
    /// Contents changed in a way that isn't described by range moves.
    Modified,
    /// Regions moved. `from_undo` is set when the move replays history.
    RangesMoved {
        moves: Vec<RangeMove>,
        from_undo: bool,
    },
}

/// A playlist of audio regions as seen by the disk reader.
///
/// Reads are always forward; readers that play in reverse reverse the block
/// themselves.
pub trait AudioPlaylist: Send + Sync {
    fn name(&self) -> &str;

    /// Number of channels the playlist provides. Reading a channel beyond
    /// this yields silence.
    fn n_channels(&self) -> usize;

    /// Position one past the end of the last region.
    fn length(&self) -> i64;

    /// Fills `dst` with samples of `channel` starting at `position`. Parts of
    /// the range not covered by any region read as silence. `mixdown` and
    /// `gain` are scratch space of at least `dst.len()` samples used for
    /// layering regions. Returns the number of samples produced.
    fn read(
        &self,
        dst: &mut [f32],
        mixdown: &mut [f32],
        gain: &mut [f32],
        position: i64,
        channel: usize,
    ) -> Result<usize, PlaylistError>;

    /// Returns a receiver for change notifications.
    fn subscribe(&self) -> Receiver<PlaylistEvent>;
}

/// A playlist of MIDI regions as seen by the disk reader.
pub trait MidiPlaylist: Send + Sync {
    fn name(&self) -> &str;

    fn length(&self) -> i64;

    /// Appends every event whose absolute time falls within `range` to `dst`
    /// in time order. Returns the number of events appended.
    fn read_events(&self, range: Range<i64>, dst: &mut Vec<MidiEvent>)
        -> Result<usize, PlaylistError>;

    fn subscribe(&self) -> Receiver<PlaylistEvent>;
}

/// Fan-out of playlist change notifications. Subscribers that have gone away
/// are pruned on the next notification.
#[derive(Default)]
pub struct PlaylistNotifier {
    subscribers: Mutex<Vec<Sender<PlaylistEvent>>>,
}

impl PlaylistNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<PlaylistEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn notify(&self, event: PlaylistEvent) {
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}
