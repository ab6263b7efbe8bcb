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
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use duration_string::DurationString;
use serde::{Deserialize, Serialize};

pub mod error;
pub mod project;

pub use error::ConfigError;
pub use project::Project;

const DEFAULT_SAMPLE_RATE: u32 = 48000;
const DEFAULT_CHUNK_SAMPLES: usize = 65536;
const DEFAULT_BUFFER_DEPTH: usize = 4;
const DEFAULT_MIDI_READAHEAD: i64 = 4096;
const DEFAULT_MIDI_RING_EVENTS: usize = 8192;
const DEFAULT_MIDI_BUFFER_EVENTS: usize = 1024;
const DEFAULT_DECLICK: &str = "5ms";
const DEFAULT_UNDERRUN_REPORT_INTERVAL: &str = "250ms";
const DEFAULT_SEEK_RESERVATION: usize = 0;
const DEFAULT_MAX_SPEED: f64 = 8.0;
const DEFAULT_BUTLER_THREADS: usize = 2;
const DEFAULT_BUTLER_PERIOD: &str = "100ms";

/// Environment variable prefix for overriding configuration keys,
/// e.g. `DISKSTREAM_CHUNK_SAMPLES=4096`.
pub const ENV_PREFIX: &str = "DISKSTREAM";

/// Tunables shared by every reader of an engine.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct EngineConfig {
    /// Engine sample rate in Hz (default: 48000).
    sample_rate: Option<u32>,

    /// Samples per refill unit (default: 65536).
    chunk_samples: Option<usize>,

    /// Ring capacity in chunks (default: 4).
    buffer_depth: Option<usize>,

    /// Minimum free ring space worth refilling (default: one chunk).
    low_water_samples: Option<usize>,

    /// How far ahead of the read position MIDI is buffered, in samples.
    midi_readahead: Option<i64>,

    /// MIDI ring capacity in events.
    midi_ring_events: Option<usize>,

    /// Capacity of the per-cycle MIDI output buffer.
    midi_buffer_events: Option<usize>,

    /// Declick ramp length, e.g. "5ms".
    declick: Option<String>,

    /// Minimum spacing between underrun signals.
    underrun_report_interval: Option<String>,

    /// Samples kept behind the read pointer for backward internal seeks.
    seek_reservation: Option<usize>,

    /// Largest absolute playback speed served without clamping.
    max_speed: Option<f64>,

    /// Worker threads used by the butler.
    butler_threads: Option<usize>,

    /// Butler poll period when not woken.
    butler_period: Option<String>,
}

fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    DurationString::from_string(value.to_string())
        .map(Into::into)
        .map_err(|e| ConfigError::Duration(format!("{value}: {e}")))
}

impl EngineConfig {
    /// Loads configuration from an optional YAML file, overlaid with
    /// `DISKSTREAM_*` environment variables, and validates it.
    pub fn load(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config: EngineConfig = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<EngineConfig, ConfigError> {
        let config: EngineConfig = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the configuration describes a usable engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate() == 0 {
            return Err(ConfigError::Invalid("sample_rate must be positive".into()));
        }
        if self.chunk_samples() == 0 {
            return Err(ConfigError::Invalid("chunk_samples must be positive".into()));
        }
        if self.buffer_depth() == 0 {
            return Err(ConfigError::Invalid("buffer_depth must be positive".into()));
        }
        if self.low_water_samples() > self.ring_capacity() {
            return Err(ConfigError::Invalid(format!(
                "low_water_samples ({}) exceeds ring capacity ({})",
                self.low_water_samples(),
                self.ring_capacity()
            )));
        }
        if self.max_speed().is_nan() || self.max_speed() <= 0.0 {
            return Err(ConfigError::Invalid("max_speed must be positive".into()));
        }
        if self.midi_ring_events() == 0 || self.midi_buffer_events() == 0 {
            return Err(ConfigError::Invalid("MIDI buffer sizes must be positive".into()));
        }
        if self.midi_readahead() < 0 {
            return Err(ConfigError::Invalid("midi_readahead must not be negative".into()));
        }
        self.declick()?;
        self.underrun_report_interval()?;
        self.butler_period()?;
        Ok(())
    }

    /// Returns a copy with every default filled in, for display.
    pub fn effective(&self) -> Result<EngineConfig, ConfigError> {
        Ok(EngineConfig {
            sample_rate: Some(self.sample_rate()),
            chunk_samples: Some(self.chunk_samples()),
            buffer_depth: Some(self.buffer_depth()),
            low_water_samples: Some(self.low_water_samples()),
            midi_readahead: Some(self.midi_readahead()),
            midi_ring_events: Some(self.midi_ring_events()),
            midi_buffer_events: Some(self.midi_buffer_events()),
            declick: Some(DurationString::from(self.declick()?).to_string()),
            underrun_report_interval: Some(
                DurationString::from(self.underrun_report_interval()?).to_string(),
            ),
            seek_reservation: Some(self.seek_reservation()),
            max_speed: Some(self.max_speed()),
            butler_threads: Some(self.butler_threads()),
            butler_period: Some(DurationString::from(self.butler_period()?).to_string()),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    pub fn chunk_samples(&self) -> usize {
        self.chunk_samples.unwrap_or(DEFAULT_CHUNK_SAMPLES)
    }

    pub fn buffer_depth(&self) -> usize {
        self.buffer_depth.unwrap_or(DEFAULT_BUFFER_DEPTH)
    }

    /// Ring capacity per audio channel in samples.
    pub fn ring_capacity(&self) -> usize {
        self.chunk_samples() * self.buffer_depth()
    }

    pub fn low_water_samples(&self) -> usize {
        self.low_water_samples.unwrap_or(self.chunk_samples())
    }

    pub fn midi_readahead(&self) -> i64 {
        self.midi_readahead.unwrap_or(DEFAULT_MIDI_READAHEAD)
    }

    pub fn midi_ring_events(&self) -> usize {
        self.midi_ring_events.unwrap_or(DEFAULT_MIDI_RING_EVENTS)
    }

    pub fn midi_buffer_events(&self) -> usize {
        self.midi_buffer_events.unwrap_or(DEFAULT_MIDI_BUFFER_EVENTS)
    }

    pub fn declick(&self) -> Result<Duration, ConfigError> {
        parse_duration(self.declick.as_deref().unwrap_or(DEFAULT_DECLICK))
    }

    pub fn underrun_report_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(
            self.underrun_report_interval
                .as_deref()
                .unwrap_or(DEFAULT_UNDERRUN_REPORT_INTERVAL),
        )
    }

    pub fn seek_reservation(&self) -> usize {
        self.seek_reservation.unwrap_or(DEFAULT_SEEK_RESERVATION)
    }

    pub fn max_speed(&self) -> f64 {
        self.max_speed.unwrap_or(DEFAULT_MAX_SPEED)
    }

    /// Number of butler worker threads, at least 1.
    pub fn butler_threads(&self) -> usize {
        self.butler_threads.unwrap_or(DEFAULT_BUTLER_THREADS).max(1)
    }

    pub fn butler_period(&self) -> Result<Duration, ConfigError> {
        parse_duration(self.butler_period.as_deref().unwrap_or(DEFAULT_BUTLER_PERIOD))
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    pub fn with_chunk_samples(mut self, chunk_samples: usize) -> Self {
        self.chunk_samples = Some(chunk_samples);
        self
    }

    pub fn with_buffer_depth(mut self, buffer_depth: usize) -> Self {
        self.buffer_depth = Some(buffer_depth);
        self
    }

    pub fn with_low_water_samples(mut self, low_water_samples: usize) -> Self {
        self.low_water_samples = Some(low_water_samples);
        self
    }

    pub fn with_midi_readahead(mut self, midi_readahead: i64) -> Self {
        self.midi_readahead = Some(midi_readahead);
        self
    }

    pub fn with_midi_ring_events(mut self, events: usize) -> Self {
        self.midi_ring_events = Some(events);
        self
    }

    pub fn with_declick(mut self, declick: &str) -> Self {
        self.declick = Some(declick.to_string());
        self
    }

    pub fn with_underrun_report_interval(mut self, interval: &str) -> Self {
        self.underrun_report_interval = Some(interval.to_string());
        self
    }

    pub fn with_seek_reservation(mut self, samples: usize) -> Self {
        self.seek_reservation = Some(samples);
        self
    }

    pub fn with_max_speed(mut self, max_speed: f64) -> Self {
        self.max_speed = Some(max_speed);
        self
    }

    pub fn with_butler_threads(mut self, threads: usize) -> Self {
        self.butler_threads = Some(threads);
        self
    }

    pub fn with_butler_period(mut self, period: &str) -> Self {
        self.butler_period = Some(period.to_string());
        self
    }
}
