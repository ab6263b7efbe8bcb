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

use midly::live::LiveEvent;
use midly::MidiMessage;

pub mod tracker;

pub use tracker::NoteTracker;

/// Largest channel message we stream. System exclusive data is not carried.
pub const MAX_EVENT_SIZE: usize = 3;

/// A timestamped short MIDI message. `Copy` so it can live in a
/// [`PlaybackRingBuffer`](crate::ringbuffer::PlaybackRingBuffer).
///
/// In playlists and rings `time` is an absolute sample position. In a
/// [`MidiBuffer`] handed to the graph it is an offset into the cycle.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct MidiEvent {
    time: i64,
    len: u8,
    bytes: [u8; MAX_EVENT_SIZE],
}

impl MidiEvent {
    /// Creates an event from raw bytes. Returns None for empty or oversized
    /// messages.
    pub fn new(time: i64, bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() || bytes.len() > MAX_EVENT_SIZE {
            return None;
        }
        let mut data = [0u8; MAX_EVENT_SIZE];
        data[..bytes.len()].copy_from_slice(bytes);
        Some(Self {
            time,
            len: bytes.len() as u8,
            bytes: data,
        })
    }

    pub fn note_on(time: i64, channel: u8, note: u8, velocity: u8) -> Self {
        Self {
            time,
            len: 3,
            bytes: [0x90 | (channel & 0x0f), note & 0x7f, velocity & 0x7f],
        }
    }

    pub fn note_off(time: i64, channel: u8, note: u8, velocity: u8) -> Self {
        Self {
            time,
            len: 3,
            bytes: [0x80 | (channel & 0x0f), note & 0x7f, velocity & 0x7f],
        }
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    /// Returns a copy of this event at a different time.
    pub fn at(&self, time: i64) -> Self {
        Self { time, ..*self }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Parses the message without allocating.
    pub fn live_event(&self) -> Option<LiveEvent<'_>> {
        LiveEvent::parse(self.bytes()).ok()
    }

    /// Returns (channel, note) if this is a note on with non-zero velocity.
    pub fn as_note_on(&self) -> Option<(u8, u8)> {
        match self.live_event()? {
            LiveEvent::Midi {
                channel,
                message: MidiMessage::NoteOn { key, vel },
            } if vel.as_int() > 0 => Some((channel.as_int(), key.as_int())),
            _ => None,
        }
    }

    /// Returns (channel, note) if this is a note off, including note on with
    /// zero velocity.
    pub fn as_note_off(&self) -> Option<(u8, u8)> {
        match self.live_event()? {
            LiveEvent::Midi {
                channel,
                message: MidiMessage::NoteOff { key, .. },
            } => Some((channel.as_int(), key.as_int())),
            LiveEvent::Midi {
                channel,
                message: MidiMessage::NoteOn { key, vel },
            } if vel.as_int() == 0 => Some((channel.as_int(), key.as_int())),
            _ => None,
        }
    }
}

impl fmt::Debug for MidiEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MidiEvent({} {:02x?})", self.time, self.bytes())
    }
}

/// Fixed capacity buffer of cycle-relative MIDI events handed to the graph.
/// Pushing never allocates; events beyond the capacity are dropped and
/// counted.
pub struct MidiBuffer {
    events: Vec<MidiEvent>,
    capacity: usize,
    dropped: usize,
}

impl MidiBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Appends an event. Returns false (and counts the drop) if full.
    pub fn push(&mut self, event: MidiEvent) -> bool {
        if self.events.len() >= self.capacity {
            self.dropped += 1;
            return false;
        }
        self.events.push(event);
        true
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events dropped because the buffer was full.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_classification() {
        let on = MidiEvent::note_on(10, 2, 60, 100);
        assert_eq!(on.as_note_on(), Some((2, 60)));
        assert_eq!(on.as_note_off(), None);

        let off = MidiEvent::note_off(20, 2, 60, 0);
        assert_eq!(off.as_note_off(), Some((2, 60)));
        assert_eq!(off.as_note_on(), None);

        let zero_velocity = MidiEvent::note_on(30, 0, 61, 0);
        assert_eq!(zero_velocity.as_note_on(), None);
        assert_eq!(zero_velocity.as_note_off(), Some((0, 61)));
    }

    #[test]
    fn test_new_rejects_bad_sizes() {
        assert!(MidiEvent::new(0, &[]).is_none());
        assert!(MidiEvent::new(0, &[0xf0, 1, 2, 3]).is_none());
        let cc = MidiEvent::new(5, &[0xb0, 7, 100]).unwrap();
        assert_eq!(cc.bytes(), &[0xb0, 7, 100]);
        assert_eq!(cc.at(9).time(), 9);
    }

    #[test]
    fn test_buffer_drops_when_full() {
        let mut buffer = MidiBuffer::new(2);
        assert!(buffer.push(MidiEvent::note_on(0, 0, 60, 1)));
        assert!(buffer.push(MidiEvent::note_on(1, 0, 61, 1)));
        assert!(!buffer.push(MidiEvent::note_on(2, 0, 62, 1)));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.dropped(), 1);
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
