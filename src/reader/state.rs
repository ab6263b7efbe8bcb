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
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Where a reader is in its playback lifecycle.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderState {
    /// Not producing audio: never started, or stopped and faded out.
    Idle = 0,
    /// Waiting for the butler to refill after a jump, swap or edit.
    Seeking = 1,
    /// Streaming with the fade-in ramp active.
    DeclickingIn = 2,
    /// Streaming at unity gain.
    Streaming = 3,
    /// Fading out at a stop or discontinuity.
    DeclickingOut = 4,
}

impl ReaderState {
    fn from_u8(value: u8) -> ReaderState {
        match value {
            1 => ReaderState::Seeking,
            2 => ReaderState::DeclickingIn,
            3 => ReaderState::Streaming,
            4 => ReaderState::DeclickingOut,
            _ => ReaderState::Idle,
        }
    }

    /// True in the states where ring data is being delivered.
    pub fn is_streaming(self) -> bool {
        matches!(
            self,
            ReaderState::DeclickingIn | ReaderState::Streaming | ReaderState::DeclickingOut
        )
    }
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReaderState::Idle => "idle",
            ReaderState::Seeking => "seeking",
            ReaderState::DeclickingIn => "declicking-in",
            ReaderState::Streaming => "streaming",
            ReaderState::DeclickingOut => "declicking-out",
        };
        f.write_str(name)
    }
}

/// A [`ReaderState`] written by the realtime thread and read anywhere.
pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
    pub(crate) fn new(state: ReaderState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> ReaderState {
        ReaderState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: ReaderState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Stage of a buffer overwrite.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Overwrite {
    /// Buffered data is current.
    Clear,
    /// Buffered data is stale and must not be played.
    Pending,
    /// Fresh data has been buffered and awaits the realtime side.
    Refilled,
}

const STAGE_MASK: u64 = 0b11;
const CLEAR: u64 = 0;
const PENDING: u64 = 1;
const REFILLED: u64 = 2;

/// The pending-overwrite flag. Stage and request generation share one word
/// so a refill can only complete the request it started from; a newer edit
/// arriving mid-refill leaves the flag pending.
pub(crate) struct OverwriteFlag(AtomicU64);

impl OverwriteFlag {
    pub(crate) fn new() -> Self {
        Self(AtomicU64::new(CLEAR))
    }

    fn stage(word: u64) -> Overwrite {
        match word & STAGE_MASK {
            PENDING => Overwrite::Pending,
            REFILLED => Overwrite::Refilled,
            _ => Overwrite::Clear,
        }
    }

    pub(crate) fn load(&self) -> Overwrite {
        Self::stage(self.0.load(Ordering::Acquire))
    }

    /// Marks the buffers stale. Returns the new request generation.
    pub(crate) fn set_pending(&self) -> u64 {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let generation = (current >> 2).wrapping_add(1);
            let next = (generation << 2) | PENDING;
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return generation,
                Err(actual) => current = actual,
            }
        }
    }

    /// The generation of the outstanding request, if one is pending.
    pub(crate) fn pending_generation(&self) -> Option<u64> {
        let word = self.0.load(Ordering::Acquire);
        (Self::stage(word) == Overwrite::Pending).then_some(word >> 2)
    }

    /// Moves request `generation` from pending to refilled. Fails if a newer
    /// request has been made since.
    pub(crate) fn complete(&self, generation: u64) -> bool {
        self.0
            .compare_exchange(
                (generation << 2) | PENDING,
                (generation << 2) | REFILLED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Realtime acknowledgement of refilled data. Returns true if this call
    /// cleared the flag.
    pub(crate) fn acknowledge(&self) -> bool {
        let word = self.0.load(Ordering::Acquire);
        if Self::stage(word) != Overwrite::Refilled {
            return false;
        }
        self.0
            .compare_exchange(
                word,
                (word & !STAGE_MASK) | CLEAR,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}
