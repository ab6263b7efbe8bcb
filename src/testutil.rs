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

//! Shared fixtures for tests.

use std::error::Error;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use hound::{SampleFormat, WavSpec, WavWriter};

use crate::config::EngineConfig;
use crate::context::StreamContext;
use crate::playlist::{
    AudioPlaylist, AudioRegion, AudioSource, MemoryAudioPlaylist, PlaylistError, PlaylistEvent,
};

mod polling;

pub use polling::eventually;

/// Sample value of the ramp fixture: the timeline position, negated on odd
/// channels so channel mixups show.
pub fn ramp_value(position: i64, channel: usize) -> f32 {
    let value = position as f32;
    if channel % 2 == 1 {
        -value
    } else {
        value
    }
}

/// A playlist holding a single region whose samples are [`ramp_value`].
pub fn ramp_playlist(n_channels: usize, length: usize) -> Arc<MemoryAudioPlaylist> {
    let channels = (0..n_channels)
        .map(|c| (0..length).map(|p| ramp_value(p as i64, c)).collect())
        .collect();
    single_region("ramp", n_channels, channels)
}

/// A playlist holding `value` on every channel for `length` samples.
pub fn constant_playlist(n_channels: usize, length: usize, value: f32) -> Arc<MemoryAudioPlaylist> {
    single_region("constant", n_channels, vec![vec![value; length]; n_channels])
}

fn single_region(name: &str, n_channels: usize, channels: Vec<Vec<f32>>) -> Arc<MemoryAudioPlaylist> {
    let playlist = MemoryAudioPlaylist::new(name, n_channels);
    playlist.add_region(AudioRegion::new(Arc::new(AudioSource::new(name, channels)), 0));
    Arc::new(playlist)
}

/// A context with small rings: `chunk_samples` per refill, `buffer_depth`
/// chunks per ring.
pub fn test_context(chunk_samples: usize, buffer_depth: usize) -> StreamContext {
    StreamContext::new(
        EngineConfig::default()
            .with_chunk_samples(chunk_samples)
            .with_buffer_depth(buffer_depth),
    )
    .expect("valid test configuration")
}

/// Wraps a playlist so reads of one channel can be made to fail.
pub struct FailingPlaylist {
    inner: Arc<MemoryAudioPlaylist>,
    channel: usize,
    failing: AtomicBool,
}

impl FailingPlaylist {
    pub fn new(inner: Arc<MemoryAudioPlaylist>, channel: usize) -> Self {
        Self {
            inner,
            channel,
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }
}

impl AudioPlaylist for FailingPlaylist {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn n_channels(&self) -> usize {
        self.inner.n_channels()
    }

    fn length(&self) -> i64 {
        self.inner.length()
    }

    fn read(
        &self,
        dst: &mut [f32],
        mixdown: &mut [f32],
        gain: &mut [f32],
        position: i64,
        channel: usize,
    ) -> Result<usize, PlaylistError> {
        if channel == self.channel && self.failing.load(Ordering::Relaxed) {
            return Err(PlaylistError::Read {
                position,
                channel,
                reason: "injected failure".into(),
            });
        }
        self.inner.read(dst, mixdown, gain, position, channel)
    }

    fn subscribe(&self) -> Receiver<PlaylistEvent> {
        self.inner.subscribe()
    }
}

/// Wraps a playlist so reads can be held inside the playlist until the test
/// lets them through.
pub struct GatedPlaylist {
    inner: Arc<MemoryAudioPlaylist>,
    closed: AtomicBool,
    entered: (Sender<()>, Receiver<()>),
    release: (Sender<()>, Receiver<()>),
}

impl GatedPlaylist {
    pub fn new(inner: Arc<MemoryAudioPlaylist>) -> Self {
        Self {
            inner,
            closed: AtomicBool::new(false),
            entered: crossbeam_channel::unbounded(),
            release: crossbeam_channel::unbounded(),
        }
    }

    /// The next read blocks until [`open`](Self::open).
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Lets the blocked read, and every later one, through.
    pub fn open(&self) {
        self.closed.store(false, Ordering::Release);
        let _ = self.release.0.send(());
    }

    /// Waits until a read is held at the gate.
    pub fn wait_for_reader(&self) {
        self.entered
            .1
            .recv_timeout(Duration::from_secs(10))
            .expect("no read reached the gate");
    }
}

impl AudioPlaylist for GatedPlaylist {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn n_channels(&self) -> usize {
        self.inner.n_channels()
    }

    fn length(&self) -> i64 {
        self.inner.length()
    }

    fn read(
        &self,
        dst: &mut [f32],
        mixdown: &mut [f32],
        gain: &mut [f32],
        position: i64,
        channel: usize,
    ) -> Result<usize, PlaylistError> {
        if self.closed.load(Ordering::Acquire) {
            let _ = self.entered.0.send(());
            let _ = self.release.1.recv();
        }
        self.inner.read(dst, mixdown, gain, position, channel)
    }

    fn subscribe(&self) -> Receiver<PlaylistEvent> {
        self.inner.subscribe()
    }
}

/// Writes planar float samples to a 32-bit float WAV file.
pub fn write_wav(path: &Path, channels: &[Vec<f32>], sample_rate: u32) -> Result<(), Box<dyn Error>> {
    let num_channels = channels.len();
    assert!(num_channels <= u16::MAX.into(), "Too many channels!");
    let mut writer = WavWriter::new(
        File::create(path)?,
        WavSpec {
            channels: num_channels as u16,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        },
    )?;

    let frames = channels.iter().map(|c| c.len()).max().unwrap_or(0);
    for frame in 0..frames {
        for channel in channels {
            writer.write_sample(channel.get(frame).copied().unwrap_or(0.0))?;
        }
    }
    writer.finalize()?;
    Ok(())
}
