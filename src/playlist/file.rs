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

//! Loads audio and Standard MIDI Files into playlist sources.

use std::fs::{self, File};
use std::path::Path;

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::{debug, info};

use super::error::PlaylistError;
use super::memory::{AudioSource, MidiSource};
use crate::midi::MidiEvent;
use crate::util::filename_display;

/// Default tempo of a Standard MIDI File in microseconds per beat.
const DEFAULT_TEMPO: u32 = 500_000;

/// A decoded audio file.
pub struct LoadedAudio {
    pub source: AudioSource,
    pub sample_rate: u32,
}

/// Decodes the first audio track of `path` into memory.
pub fn load_audio(path: &Path) -> Result<LoadedAudio, PlaylistError> {
    let file = File::open(path).map_err(|e| {
        PlaylistError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", path.display(), e),
        ))
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| PlaylistError::Empty(path.display().to_string()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| PlaylistError::Empty(format!("{}: no sample rate", path.display())))?;
    let mut decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut interleaved: Vec<f32> = Vec::new();
    let mut n_channels = 0;
    loop {
        let packet = match format_reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // Corrupt packets are skipped rather than ending the load.
            Err(SymphoniaError::DecodeError(e)) => {
                debug!(file = filename_display(path), err = e, "Skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let spec = *decoded.spec();
        n_channels = spec.channels.count();
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        interleaved.extend_from_slice(buffer.samples());
    }

    if n_channels == 0 {
        return Err(PlaylistError::Empty(path.display().to_string()));
    }

    let source = AudioSource::from_interleaved(filename_display(path), &interleaved, n_channels);
    info!(
        file = filename_display(path),
        channels = n_channels,
        samples = source.length(),
        sample_rate,
        "Loaded audio file."
    );
    Ok(LoadedAudio {
        source,
        sample_rate,
    })
}

/// Encodes a channel message as raw bytes.
fn encode(channel: u8, message: &MidiMessage) -> Option<MidiEvent> {
    let bytes: [u8; 3];
    let len = match *message {
        MidiMessage::NoteOff { key, vel } => {
            bytes = [0x80 | channel, key.as_int(), vel.as_int()];
            3
        }
        MidiMessage::NoteOn { key, vel } => {
            bytes = [0x90 | channel, key.as_int(), vel.as_int()];
            3
        }
        MidiMessage::Aftertouch { key, vel } => {
            bytes = [0xa0 | channel, key.as_int(), vel.as_int()];
            3
        }
        MidiMessage::Controller { controller, value } => {
            bytes = [0xb0 | channel, controller.as_int(), value.as_int()];
            3
        }
        MidiMessage::ProgramChange { program } => {
            bytes = [0xc0 | channel, program.as_int(), 0];
            2
        }
        MidiMessage::ChannelAftertouch { vel } => {
            bytes = [0xd0 | channel, vel.as_int(), 0];
            2
        }
        MidiMessage::PitchBend { bend } => {
            let value = bend.0.as_int();
            bytes = [0xe0 | channel, (value & 0x7f) as u8, (value >> 7) as u8];
            3
        }
    };
    MidiEvent::new(0, &bytes[..len])
}

/// Converts tick positions to seconds following the file's tempo changes.
struct TempoMap {
    /// (tick, seconds at tick, seconds per tick from here on)
    segments: Vec<(u64, f64, f64)>,
}

impl TempoMap {
    fn new(timing: Timing, mut tempos: Vec<(u64, u32)>) -> Self {
        match timing {
            Timing::Timecode(fps, subframes) => {
                let per_tick = 1.0 / (fps.as_f32() as f64 * subframes.max(1) as f64);
                Self {
                    segments: vec![(0, 0.0, per_tick)],
                }
            }
            Timing::Metrical(ticks_per_beat) => {
                let ticks_per_beat = ticks_per_beat.as_int().max(1) as f64;
                let per_tick = |tempo: u32| tempo as f64 / 1_000_000.0 / ticks_per_beat;
                tempos.sort_by_key(|(tick, _)| *tick);

                let mut segments = vec![(0, 0.0, per_tick(DEFAULT_TEMPO))];
                for (tick, tempo) in tempos {
                    let (last_tick, last_secs, last_rate) = segments[segments.len() - 1];
                    let secs = last_secs + (tick - last_tick) as f64 * last_rate;
                    if tick == last_tick {
                        segments.pop();
                    }
                    segments.push((tick, secs, per_tick(tempo)));
                }
                Self { segments }
            }
        }
    }

    fn seconds(&self, tick: u64) -> f64 {
        let index = self.segments.partition_point(|(t, _, _)| *t <= tick);
        let (start, secs, rate) = self.segments[index.saturating_sub(1)];
        secs + (tick - start) as f64 * rate
    }
}

/// Loads every channel message of a Standard MIDI File, timed in samples at
/// `sample_rate`. System exclusive and meta events are not carried.
pub fn load_midi(path: &Path, sample_rate: u32) -> Result<MidiSource, PlaylistError> {
    let data = fs::read(path)?;
    let smf = Smf::parse(&data).map_err(|e| PlaylistError::Midi(format!("{}: {}", path.display(), e)))?;

    let mut tempos = Vec::new();
    let mut messages = Vec::new();
    for track in &smf.tracks {
        let mut tick: u64 = 0;
        for event in track {
            tick += event.delta.as_int() as u64;
            match event.kind {
                TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => tempos.push((tick, tempo.as_int())),
                TrackEventKind::Midi { channel, message } => {
                    if let Some(encoded) = encode(channel.as_int(), &message) {
                        messages.push((tick, encoded));
                    }
                }
                _ => {}
            }
        }
    }

    let tempo_map = TempoMap::new(smf.header.timing, tempos);
    let events: Vec<MidiEvent> = messages
        .into_iter()
        .map(|(tick, event)| {
            let time = (tempo_map.seconds(tick) * sample_rate as f64).round() as i64;
            event.at(time)
        })
        .collect();

    info!(
        file = filename_display(path),
        events = events.len(),
        "Loaded MIDI file."
    );
    Ok(MidiSource::new(filename_display(path), events))
}

#[cfg(test)]
mod tests {
    use midly::num::{u15, u24, u28, u4, u7};
    use midly::{Format, Header, TrackEvent};

    use super::*;
    use crate::testutil::write_wav;

    #[test]
    fn test_load_audio_deinterleaves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, &[vec![0.25, 0.5, 0.75], vec![-0.25, -0.5, -0.75]], 48000).unwrap();

        let loaded = load_audio(&path).unwrap();
        assert_eq!(loaded.sample_rate, 48000);
        assert_eq!(loaded.source.n_channels(), 2);
        assert_eq!(loaded.source.length(), 3);
        assert_eq!(loaded.source.name(), "stereo.wav");
    }

    #[test]
    fn test_load_audio_missing_file() {
        assert!(matches!(
            load_audio(Path::new("/does/not/exist.wav")),
            Err(PlaylistError::Io(_))
        ));
    }

    fn midi_event(delta: u32, kind: TrackEventKind<'static>) -> TrackEvent<'static> {
        TrackEvent {
            delta: u28::new(delta),
            kind,
        }
    }

    fn note(on: bool, key: u8) -> TrackEventKind<'static> {
        let (key, vel) = (u7::new(key), u7::new(100));
        TrackEventKind::Midi {
            channel: u4::new(1),
            message: if on {
                MidiMessage::NoteOn { key, vel }
            } else {
                MidiMessage::NoteOff { key, vel }
            },
        }
    }

    #[test]
    fn test_load_midi_follows_tempo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.mid");

        let mut smf = Smf::new(Header::new(
            Format::SingleTrack,
            Timing::Metrical(u15::new(480)),
        ));
        smf.tracks.push(vec![
            midi_event(0, note(true, 60)),
            midi_event(480, note(false, 60)),
            // Double the tempo after the first beat.
            midi_event(0, TrackEventKind::Meta(MetaMessage::Tempo(u24::new(250_000)))),
            midi_event(480, note(true, 62)),
            midi_event(0, TrackEventKind::Meta(MetaMessage::EndOfTrack)),
        ]);
        smf.save(&path).unwrap();

        let source = load_midi(&path, 48000).unwrap();
        let times: Vec<i64> = source.events().iter().map(|e| e.time()).collect();
        assert_eq!(times, vec![0, 24000, 36000]);
        assert_eq!(source.events()[0].as_note_on(), Some((1, 60)));
        assert_eq!(source.events()[1].as_note_off(), Some((1, 60)));
    }

    #[test]
    fn test_load_midi_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.mid");
        fs::write(&path, b"not a midi file").unwrap();
        assert!(matches!(load_midi(&path, 48000), Err(PlaylistError::Midi(_))));
    }

    #[test]
    fn test_encode_pitch_bend() {
        let event = encode(
            2,
            &MidiMessage::PitchBend {
                bend: midly::PitchBend(midly::num::u14::new(0x2001)),
            },
        )
        .unwrap();
        assert_eq!(event.bytes(), &[0xe2, 0x01, 0x40]);
    }
}
