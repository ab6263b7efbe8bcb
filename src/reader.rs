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

//! The disk reader: streams playlist data into per-channel rings from a
//! background thread and drains them on the realtime thread.
//!
//! A reader is created as a pair. [`DiskReader`] is the non-realtime half
//! owned by the butler: it binds playlists, seeks, refills and reacts to
//! edits, and may block or allocate. [`RealtimeReader`] is the realtime half
//! driven once per process cycle by [`RealtimeReader::run`]; it never blocks,
//! allocates or returns errors.
//!
//! The halves share the rings behind a reader/writer lock that the realtime
//! side only ever *tries* to take. Operations that replace ring contents
//! wholesale (seek, overwrite, resize, channel changes) take it exclusively;
//! a cycle that finds it taken outputs silence. Everything else crosses over
//! through the lock-free rings and a handful of atomics.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::context::StreamContext;
use crate::declick::DeclickAmp;
use crate::midi::NoteTracker;
use crate::playlist::{DataType, RangeMove};

mod binding;
mod channel;
pub mod error;
mod realtime;
mod refill;
mod seek;
mod state;

pub use binding::{PlaylistBinding, Sources};
pub use error::ReaderError;
pub use realtime::Cycle;
pub use refill::{Refill, WorkingBuffers};
pub use state::{Overwrite, ReaderState};

use channel::Rings;
use state::{AtomicState, OverwriteFlag};

/// Frames per cycle the realtime scratch is sized for until
/// [`RealtimeReader::prepare`] says otherwise.
const DEFAULT_MAX_FRAMES: usize = 8192;

/// No seek has been requested by the realtime side, or no transport position
/// published.
const NO_SEEK: i64 = i64::MIN;

/// Callbacks to whatever owns the reader, in place of privileged access to
/// the owner's state.
pub trait TrackObserver: Send + Sync {
    /// Ranges of the bound playlist moved outside of undo; automation tied to
    /// them should follow.
    fn automation_ranges_moved(&self, _moves: &[RangeMove]) {}

    /// The reader was bound to a new playlist for `data_type`.
    fn playlist_rebound(&self, _data_type: DataType) {}
}

/// State shared between the two halves of a reader.
pub(crate) struct Shared {
    id: u64,
    name: String,
    context: StreamContext,
    rings: RwLock<Rings>,
    overwrite: OverwriteFlag,
    /// Timeline position of the ring read head. Forward, the next sample in
    /// the rings plays at this position; in reverse, at this position - 1.
    ring_position: AtomicI64,
    /// Where the transport is while an overwrite is pending. The realtime
    /// side leaves `ring_position` alone then, since a refill may be reading
    /// from it.
    transport_position: AtomicI64,
    /// Position the realtime side wants the butler to seek to.
    seek_request: AtomicI64,
    /// Direction the requested seek should stream in.
    seek_reverse: AtomicBool,
    /// Bumped by every seek so the realtime side can declick.
    seek_generation: AtomicU64,
    /// Direction the rings currently hold data in.
    reversed: AtomicBool,
    state: AtomicState,
    low_water: AtomicUsize,
    has_audio: AtomicBool,
    has_midi: AtomicBool,
    /// Mirror of the MIDI file cursor so the realtime side can tell when
    /// readahead runs low.
    midi_file_sample: AtomicI64,
    tracker_reset: AtomicBool,
    underruns: AtomicU64,
    unmatched_note_offs: AtomicU64,
}

impl Shared {
    fn ring_position(&self) -> i64 {
        self.ring_position.load(Ordering::Acquire)
    }

    fn set_ring_position(&self, position: i64) {
        self.ring_position.store(position, Ordering::Release);
    }

    fn reversed(&self) -> bool {
        self.reversed.load(Ordering::Acquire)
    }

    fn transport_position(&self) -> Option<i64> {
        let position = self.transport_position.load(Ordering::Acquire);
        (position != NO_SEEK).then_some(position)
    }

    /// Where data replacing the rings should start: the transport if it
    /// moved on while an overwrite was pending, else the ring position.
    fn refill_position(&self) -> i64 {
        self.transport_position().unwrap_or_else(|| self.ring_position())
    }

    fn seek_requested(&self) -> Option<i64> {
        let request = self.seek_request.load(Ordering::Acquire);
        (request != NO_SEEK).then_some(request)
    }
}

/// Non-realtime half of a disk reader.
pub struct DiskReader {
    shared: Arc<Shared>,
    binding: PlaylistBinding,
    observer: Option<Arc<dyn TrackObserver>>,
    chunk_samples: usize,
    low_water: usize,
    /// Time of the last MIDI event enqueued by a previous refill.
    last_midi_time: Option<i64>,
    midi_scratch: Vec<crate::midi::MidiEvent>,
    unmatched_reported: u64,
}

/// Realtime half of a disk reader.
pub struct RealtimeReader {
    shared: Arc<Shared>,
    declick: DeclickAmp,
    tracker: NoteTracker,
    /// Fractional source samples carried between varispeed cycles.
    phase: f64,
    max_speed: f64,
    scratch: Vec<f32>,
    samples_since_report: usize,
    report_interval: usize,
    seen_seek_generation: u64,
}

impl DiskReader {
    /// Creates a reader streaming `n_channels` audio channels, returning its
    /// non-realtime and realtime halves.
    pub fn new(name: &str, context: &StreamContext, n_channels: usize) -> (DiskReader, RealtimeReader) {
        let config = context.config();
        let rings = Rings::new(
            n_channels,
            context.ring_capacity(),
            config.seek_reservation(),
            config.midi_ring_events(),
        );
        let low_water = config.low_water_samples().min(context.ring_capacity());

        let shared = Arc::new(Shared {
            id: context.next_reader_id(),
            name: name.to_string(),
            context: context.clone(),
            rings: RwLock::new(rings),
            overwrite: OverwriteFlag::new(),
            ring_position: AtomicI64::new(0),
            transport_position: AtomicI64::new(NO_SEEK),
            seek_request: AtomicI64::new(NO_SEEK),
            seek_reverse: AtomicBool::new(false),
            seek_generation: AtomicU64::new(0),
            reversed: AtomicBool::new(false),
            state: AtomicState::new(ReaderState::Idle),
            low_water: AtomicUsize::new(low_water),
            has_audio: AtomicBool::new(false),
            has_midi: AtomicBool::new(false),
            midi_file_sample: AtomicI64::new(0),
            tracker_reset: AtomicBool::new(false),
            underruns: AtomicU64::new(0),
            unmatched_note_offs: AtomicU64::new(0),
        });

        info!(reader = name, channels = n_channels, "Created disk reader.");

        let max_speed = config.max_speed();
        let mut realtime = RealtimeReader {
            shared: shared.clone(),
            declick: DeclickAmp::new(context.sample_rate(), context.declick_duration()),
            tracker: NoteTracker::new(),
            phase: 0.0,
            max_speed,
            scratch: Vec::new(),
            samples_since_report: usize::MAX,
            report_interval: context.underrun_interval_samples(),
            seen_seek_generation: 0,
        };
        realtime.prepare(DEFAULT_MAX_FRAMES);

        let reader = DiskReader {
            shared,
            binding: PlaylistBinding::new(),
            observer: None,
            chunk_samples: context.chunk_samples(),
            low_water,
            last_midi_time: None,
            midi_scratch: Vec::with_capacity(config.midi_buffer_events()),
            unmatched_reported: 0,
        };
        (reader, realtime)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Process-unique id, as found in underrun reports.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn context(&self) -> &StreamContext {
        &self.shared.context
    }

    pub fn set_observer(&mut self, observer: Arc<dyn TrackObserver>) {
        self.observer = Some(observer);
    }

    pub fn binding(&self) -> &PlaylistBinding {
        &self.binding
    }

    pub fn state(&self) -> ReaderState {
        self.shared.state.load()
    }

    /// Timeline position of the ring read head.
    pub fn position(&self) -> i64 {
        self.shared.ring_position()
    }

    /// Position the next refill of `data_type` reads from.
    pub fn file_sample(&self, data_type: DataType) -> i64 {
        self.binding.file_sample(data_type)
    }

    pub fn is_reversed(&self) -> bool {
        self.shared.reversed()
    }

    /// Underruns suffered by this reader.
    pub fn underruns(&self) -> u64 {
        self.shared.underruns.load(Ordering::Relaxed)
    }

    /// Note offs the realtime side saw without a matching note on.
    pub fn unmatched_note_offs(&self) -> u64 {
        self.shared.unmatched_note_offs.load(Ordering::Relaxed)
    }

    /// Asks the realtime side to forget its sounding notes on its next cycle.
    pub fn reset_tracker(&self) {
        self.shared.tracker_reset.store(true, Ordering::Release);
    }

    pub fn low_water(&self) -> usize {
        self.low_water
    }

    /// Sets the minimum free ring space worth a refill, clamped to the ring
    /// capacity.
    pub fn set_low_water(&mut self, samples: usize) {
        let capacity = self.shared.rings.read().capacity().max(1);
        self.low_water = samples.clamp(1, capacity);
        self.shared.low_water.store(self.low_water, Ordering::Relaxed);
    }
}

impl RealtimeReader {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn state(&self) -> ReaderState {
        self.shared.state.load()
    }

    /// Timeline position of the ring read head.
    pub fn position(&self) -> i64 {
        self.shared.ring_position()
    }

    /// Sizes the varispeed scratch for cycles of up to `max_frames`. Not
    /// realtime safe; call before streaming starts.
    pub fn prepare(&mut self, max_frames: usize) {
        let needed = (max_frames as f64 * self.max_speed).ceil() as usize + 2;
        if self.scratch.len() < needed {
            self.scratch.resize(needed, 0.0);
        }
    }

    /// True while a declick ramp is in flight.
    pub fn declick_in_progress(&self) -> bool {
        let gain = self.declick.gain();
        gain > 0.0 && gain < 1.0
    }

    pub fn tracker(&self) -> &NoteTracker {
        &self.tracker
    }
}
