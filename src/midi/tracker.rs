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

//! Tracks sounding notes so that discontinuities never leave a note hanging.

use super::{MidiBuffer, MidiEvent};

const CHANNELS: usize = 16;
const NOTES: usize = 128;

/// Counts note-ons per (channel, note). Counts rather than flags because the
/// same note may be started more than once before it's released.
pub struct NoteTracker {
    on: [[u8; NOTES]; CHANNELS],
    /// Number of notes currently sounding across all channels.
    sounding: usize,
    /// Note offs seen with no matching note on.
    unmatched_offs: u64,
    /// A resolve couldn't write every note off.
    unresolved: bool,
}

impl Default for NoteTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl NoteTracker {
    pub fn new() -> Self {
        Self {
            on: [[0; NOTES]; CHANNELS],
            sounding: 0,
            unmatched_offs: 0,
            unresolved: false,
        }
    }

    /// Updates the tracker for an event that reached the output. Events that
    /// were dropped must not be tracked.
    pub fn track(&mut self, event: &MidiEvent) {
        if let Some((channel, note)) = event.as_note_on() {
            let count = &mut self.on[channel as usize][note as usize];
            if *count < u8::MAX {
                *count += 1;
                self.sounding += 1;
            }
        } else if let Some((channel, note)) = event.as_note_off() {
            let count = &mut self.on[channel as usize][note as usize];
            if *count == 0 {
                // Logged by the non-realtime side; the off is still delivered.
                self.unmatched_offs += 1;
            } else {
                *count -= 1;
                self.sounding -= 1;
            }
        }
    }

    /// Number of notes currently sounding.
    pub fn sounding(&self) -> usize {
        self.sounding
    }

    pub fn is_sounding(&self, channel: u8, note: u8) -> bool {
        self.on[(channel & 0x0f) as usize][(note & 0x7f) as usize] > 0
    }

    /// Total note offs seen without a matching note on.
    pub fn unmatched_offs(&self) -> u64 {
        self.unmatched_offs
    }

    /// Writes a note off at `time` for every sounding note and forgets them.
    /// Returns the number of note offs written.
    ///
    /// If `dst` fills up, the notes whose offs didn't fit stay sounding and
    /// [`needs_resolve`](Self::needs_resolve) reports it until a later call
    /// gets them out.
    pub fn resolve_notes(&mut self, dst: &mut MidiBuffer, time: i64) -> usize {
        if self.sounding == 0 {
            self.unresolved = false;
            return 0;
        }
        let mut resolved = 0;
        for (channel, notes) in self.on.iter_mut().enumerate() {
            for (note, count) in notes.iter_mut().enumerate() {
                while *count > 0 {
                    if !dst.push(MidiEvent::note_off(time, channel as u8, note as u8, 0)) {
                        self.sounding -= resolved;
                        self.unresolved = true;
                        return resolved;
                    }
                    *count -= 1;
                    resolved += 1;
                }
            }
        }
        self.sounding = 0;
        self.unresolved = false;
        resolved
    }

    /// True if an earlier resolve ran out of output space.
    pub fn needs_resolve(&self) -> bool {
        self.unresolved
    }

    /// Forgets all sounding notes without emitting anything.
    pub fn reset(&mut self) {
        self.on = [[0; NOTES]; CHANNELS];
        self.sounding = 0;
        self.unresolved = false;
    }
}
