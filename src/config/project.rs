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
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::warn;

use super::error::ConfigError;
use crate::playlist::file::{load_audio, load_midi};
use crate::playlist::{
    AudioPlaylist, AudioRegion, AudioSource, MemoryAudioPlaylist, MemoryMidiPlaylist, MidiPlaylist,
    MidiRegion, MidiSource,
};

/// A YAML description of tracks and the file regions they play.
#[derive(Deserialize, Clone, Debug)]
pub struct Project {
    /// The name of the project.
    name: String,
    /// The tracks in the project.
    tracks: Vec<Track>,
    /// The directory the project was loaded from. Region files are relative to it.
    #[serde(skip)]
    base_dir: PathBuf,
}

/// The kind of data a track plays.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Midi,
}

/// A single track of the project.
#[derive(Deserialize, Clone, Debug)]
pub struct Track {
    name: String,
    kind: TrackKind,
    /// Output channels for audio tracks (default: the widest region source).
    channels: Option<usize>,
    regions: Vec<Region>,
}

/// A region of a file placed on the timeline. Positions are in samples.
#[derive(Deserialize, Clone, Debug)]
pub struct Region {
    file: String,
    position: Option<i64>,
    start: Option<i64>,
    length: Option<i64>,
    gain: Option<f32>,
    fade_in: Option<i64>,
    fade_out: Option<i64>,
}

/// A playlist built from a project track.
pub enum TrackPlaylist {
    Audio(Arc<MemoryAudioPlaylist>),
    Midi(Arc<MemoryMidiPlaylist>),
}

impl TrackPlaylist {
    pub fn length(&self) -> i64 {
        match self {
            TrackPlaylist::Audio(playlist) => playlist.length(),
            TrackPlaylist::Midi(playlist) => playlist.length(),
        }
    }
}

impl Project {
    /// Parses a project from a YAML file.
    pub fn load(path: &Path) -> Result<Project, ConfigError> {
        let mut project: Project = serde_yml::from_str(&fs::read_to_string(path)?)?;
        project.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(project)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    fn resolve(&self, file: &str) -> PathBuf {
        self.base_dir.join(file)
    }

    /// Loads every referenced file and builds one playlist per track.
    pub fn build(&self, sample_rate: u32) -> Result<Vec<(String, TrackPlaylist)>, ConfigError> {
        let mut audio_sources: HashMap<PathBuf, Arc<AudioSource>> = HashMap::new();
        let mut midi_sources: HashMap<PathBuf, Arc<MidiSource>> = HashMap::new();
        let mut playlists = Vec::with_capacity(self.tracks.len());

        for track in &self.tracks {
            let playlist = match track.kind {
                TrackKind::Audio => {
                    let mut regions = Vec::with_capacity(track.regions.len());
                    for region in &track.regions {
                        let path = self.resolve(&region.file);
                        let source = match audio_sources.get(&path) {
                            Some(source) => source.clone(),
                            None => {
                                let loaded = load_audio(&path)?;
                                if loaded.sample_rate != sample_rate {
                                    warn!(
                                        file = %path.display(),
                                        file_rate = loaded.sample_rate,
                                        engine_rate = sample_rate,
                                        "Sample rate mismatch, file will play at the wrong speed."
                                    );
                                }
                                let source = Arc::new(loaded.source);
                                audio_sources.insert(path, source.clone());
                                source
                            }
                        };
                        regions.push(region.audio_region(source));
                    }

                    let channels = track.channels.unwrap_or_else(|| {
                        regions
                            .iter()
                            .map(|r| r.source().n_channels())
                            .max()
                            .unwrap_or(1)
                    });
                    let playlist = MemoryAudioPlaylist::new(&track.name, channels);
                    regions.into_iter().for_each(|r| playlist.add_region(r));
                    TrackPlaylist::Audio(Arc::new(playlist))
                }
                TrackKind::Midi => {
                    let playlist = MemoryMidiPlaylist::new(&track.name);
                    for region in &track.regions {
                        let path = self.resolve(&region.file);
                        let source = match midi_sources.get(&path) {
                            Some(source) => source.clone(),
                            None => {
                                let source = Arc::new(load_midi(&path, sample_rate)?);
                                midi_sources.insert(path, source.clone());
                                source
                            }
                        };
                        playlist.add_region(region.midi_region(source));
                    }
                    TrackPlaylist::Midi(Arc::new(playlist))
                }
            };
            playlists.push((track.name.clone(), playlist));
        }
        Ok(playlists)
    }
}

impl Track {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }
}

impl Region {
    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn position(&self) -> i64 {
        self.position.unwrap_or(0)
    }

    fn audio_region(&self, source: Arc<AudioSource>) -> AudioRegion {
        let start = self.start.unwrap_or(0);
        let length = self.length.unwrap_or(source.length() - start);
        AudioRegion::new(source, self.position())
            .with_trim(start, length)
            .with_gain(self.gain.unwrap_or(1.0))
            .with_fades(self.fade_in.unwrap_or(0), self.fade_out.unwrap_or(0))
    }

    fn midi_region(&self, source: Arc<MidiSource>) -> MidiRegion {
        let start = self.start.unwrap_or(0);
        let length = self.length.unwrap_or(source.length() - start);
        MidiRegion::new(source, self.position()).with_trim(start, length)
    }
}
