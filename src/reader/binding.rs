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
use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::playlist::{AudioPlaylist, DataType, MidiPlaylist, PlaylistEvent};

/// The playlists a reader can be bound to.
#[derive(Clone)]
pub enum Sources {
    Audio(Arc<dyn AudioPlaylist>),
    Midi(Arc<dyn MidiPlaylist>),
    Combined {
        audio: Arc<dyn AudioPlaylist>,
        midi: Arc<dyn MidiPlaylist>,
    },
}

impl Sources {
    /// The data types this variant provides.
    pub fn data_types(&self) -> &'static [DataType] {
        match self {
            Sources::Audio(_) => &[DataType::Audio],
            Sources::Midi(_) => &[DataType::Midi],
            Sources::Combined { .. } => &DataType::ALL,
        }
    }
}

/// The playlists currently providing data and the file cursor for each data
/// type: the next position refill will read from.
#[derive(Default)]
pub struct PlaylistBinding {
    audio: Option<Arc<dyn AudioPlaylist>>,
    midi: Option<Arc<dyn MidiPlaylist>>,
    events: [Option<Receiver<PlaylistEvent>>; 2],
    file_sample: [i64; 2],
}

impl PlaylistBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebinds to `sources`. Only the data types the variant names change.
    pub fn bind(&mut self, sources: Sources) {
        match sources {
            Sources::Audio(audio) => self.bind_audio(audio),
            Sources::Midi(midi) => self.bind_midi(midi),
            Sources::Combined { audio, midi } => {
                self.bind_audio(audio);
                self.bind_midi(midi);
            }
        }
    }

    fn bind_audio(&mut self, playlist: Arc<dyn AudioPlaylist>) {
        self.events[DataType::Audio.index()] = Some(playlist.subscribe());
        self.audio = Some(playlist);
    }

    fn bind_midi(&mut self, playlist: Arc<dyn MidiPlaylist>) {
        self.events[DataType::Midi.index()] = Some(playlist.subscribe());
        self.midi = Some(playlist);
    }

    /// Drops the binding for `data_type`.
    pub fn unbind(&mut self, data_type: DataType) {
        match data_type {
            DataType::Audio => self.audio = None,
            DataType::Midi => self.midi = None,
        }
        self.events[data_type.index()] = None;
    }

    pub fn audio(&self) -> Option<&Arc<dyn AudioPlaylist>> {
        self.audio.as_ref()
    }

    pub fn midi(&self) -> Option<&Arc<dyn MidiPlaylist>> {
        self.midi.as_ref()
    }

    pub fn is_bound(&self, data_type: DataType) -> bool {
        match data_type {
            DataType::Audio => self.audio.is_some(),
            DataType::Midi => self.midi.is_some(),
        }
    }

    /// The bound playlists as a [`Sources`] variant.
    pub fn sources(&self) -> Option<Sources> {
        match (&self.audio, &self.midi) {
            (Some(audio), Some(midi)) => Some(Sources::Combined {
                audio: audio.clone(),
                midi: midi.clone(),
            }),
            (Some(audio), None) => Some(Sources::Audio(audio.clone())),
            (None, Some(midi)) => Some(Sources::Midi(midi.clone())),
            (None, None) => None,
        }
    }

    /// End of the longest bound playlist, or None if nothing is bound.
    pub fn length(&self) -> Option<i64> {
        let audio = self.audio.as_ref().map(|p| p.length());
        let midi = self.midi.as_ref().map(|p| p.length());
        audio.into_iter().chain(midi).max()
    }

    pub fn file_sample(&self, data_type: DataType) -> i64 {
        self.file_sample[data_type.index()]
    }

    pub fn set_file_sample(&mut self, data_type: DataType, position: i64) {
        self.file_sample[data_type.index()] = position;
    }

    /// Takes the change notifications queued by the bound playlists.
    pub fn take_events(&self) -> Vec<(DataType, PlaylistEvent)> {
        let mut events = Vec::new();
        for data_type in DataType::ALL {
            if let Some(rx) = &self.events[data_type.index()] {
                events.extend(rx.try_iter().map(|e| (data_type, e)));
            }
        }
        events
    }
}
