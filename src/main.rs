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
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};
use diskstream::config::project::TrackPlaylist;
use diskstream::config::Project;
use diskstream::midi::MidiBuffer;
use diskstream::thread_priority::{configure_process_thread, process_thread_priority};
use diskstream::util::{duration_minutes_seconds, duration_to_samples, samples_to_duration};
use diskstream::{Butler, DiskReader, EngineConfig, RealtimeReader, Sources, StreamContext};
use duration_string::DurationString;
use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A realtime-safe disk streaming engine."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Streams a project through disk readers and writes the mix to a WAV file.
    Render {
        /// The project file describing tracks and regions.
        project: PathBuf,
        /// The WAV file to write.
        output: PathBuf,
        /// Engine configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Where to start rendering, e.g. "1m30s".
        #[arg(long, default_value = "0s")]
        start: String,
        /// How much to render. Defaults to the end of the project.
        #[arg(long)]
        duration: Option<String>,
        /// Playback speed. Negative plays in reverse.
        #[arg(long, default_value_t = 1.0, allow_hyphen_values = true)]
        speed: f64,
        /// Frames per process cycle.
        #[arg(long, default_value_t = 512)]
        period: usize,
        /// Pace cycles in real time on a SCHED_FIFO process thread.
        #[arg(long)]
        realtime: bool,
    },
    /// Lists the tracks and regions of a project.
    Inspect {
        /// The project file.
        project: PathBuf,
        /// Engine configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Prints the effective engine configuration.
    Config {
        /// Engine configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn parse_duration(value: &str) -> Result<Duration, Box<dyn Error>> {
    Ok(DurationString::from_string(value.to_string())?.into())
}

struct Track {
    reader: Arc<Mutex<DiskReader>>,
    realtime: RealtimeReader,
    buffers: Vec<Vec<f32>>,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            project,
            output,
            config,
            start,
            duration,
            speed,
            period,
            realtime,
        } => {
            let context = StreamContext::new(EngineConfig::load(config.as_deref())?)?;
            let start = duration_to_samples(parse_duration(&start)?, context.sample_rate()) as i64;
            let duration = duration.map(|d| parse_duration(&d)).transpose()?;
            render(
                &context,
                &project,
                &output,
                start,
                duration,
                speed,
                period.max(1),
                realtime,
            )?;
        }
        Commands::Inspect { project, config } => {
            let config = EngineConfig::load(config.as_deref())?;
            let sample_rate = config.sample_rate();
            let project = Project::load(&project)?;
            let playlists = project.build(sample_rate)?;

            println!("Project: {}", project.name());
            println!("Tracks (count: {}):", project.tracks().len());
            for (track, (_, playlist)) in project.tracks().iter().zip(playlists.iter()) {
                let length = samples_to_duration(playlist.length(), sample_rate);
                println!(
                    "- {} ({:?}, {})",
                    track.name(),
                    track.kind(),
                    duration_minutes_seconds(length)
                );
                for region in track.regions() {
                    println!("  - {} @ {}", region.file(), region.position());
                }
            }
        }
        Commands::Config { config } => {
            let config = EngineConfig::load(config.as_deref())?;
            print!("{}", serde_yml::to_string(&config.effective()?)?);
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn render(
    context: &StreamContext,
    project: &Path,
    output: &Path,
    start: i64,
    duration: Option<Duration>,
    speed: f64,
    period: usize,
    realtime: bool,
) -> Result<(), Box<dyn Error>> {
    let project = Project::load(project)?;
    let playlists = project.build(context.sample_rate())?;
    let length = playlists.iter().map(|(_, p)| p.length()).max().unwrap_or(0);
    let frames = match duration {
        Some(duration) => duration_to_samples(duration, context.sample_rate()),
        None if speed < 0.0 => start.max(0) as usize,
        None => (length - start).max(0) as usize,
    };
    let frames = (frames as f64 / speed.abs().max(f64::EPSILON)).ceil() as usize;

    let butler = Butler::start(context)?;
    let mut tracks = Vec::with_capacity(playlists.len());
    let mut out_channels = 1;
    for (name, playlist) in playlists {
        let (sources, channels) = match playlist {
            TrackPlaylist::Audio(playlist) => {
                let channels = diskstream::playlist::AudioPlaylist::n_channels(playlist.as_ref());
                (Sources::Audio(playlist), channels)
            }
            TrackPlaylist::Midi(playlist) => (Sources::Midi(playlist), 0),
        };
        let (mut reader, mut realtime) = DiskReader::new(&name, context, channels);
        reader.use_playlist(sources);
        realtime.prepare(period);
        let reader = Arc::new(Mutex::new(reader));
        butler.register(reader.clone());
        out_channels = out_channels.max(channels);
        tracks.push(Track {
            reader,
            realtime,
            buffers: vec![vec![0.0; period]; channels],
        });
    }
    butler.locate(start)?;

    let midi_capacity = context.config().midi_buffer_events();
    let sample_rate = context.sample_rate();
    info!(tracks = tracks.len(), start, frames, speed, realtime, "Rendering.");

    let process = thread::Builder::new()
        .name("diskstream-process".to_string())
        .spawn(move || {
            configure_process_thread(process_thread_priority(), realtime);
            let cycle_time = Duration::from_secs_f64(period as f64 / sample_rate as f64);
            let mut mix = vec![Vec::with_capacity(frames); out_channels];
            let mut midi = MidiBuffer::new(midi_capacity);
            let mut midi_events = 0;
            let mut position = start;
            let mut rendered = 0;

            while rendered < frames {
                if !realtime {
                    // Offline: let the butler catch up instead of underrunning.
                    while tracks.iter().any(|t| t.reader.lock().refill_needed()) {
                        spin_sleep::sleep(Duration::from_micros(200));
                    }
                }
                let nframes = period.min(frames - rendered);
                let mut distance = 0;
                let base = mix[0].len();
                mix.iter_mut().for_each(|c| c.resize(base + nframes, 0.0));
                for track in tracks.iter_mut() {
                    distance = track.realtime.calculate_playback_distance(speed, nframes);
                    midi.clear();
                    track.realtime.run(
                        &mut track.buffers,
                        &mut midi,
                        position,
                        position + distance,
                        speed,
                        nframes,
                        true,
                    );
                    midi_events += midi.len();
                    for (out, buffer) in mix.iter_mut().zip(track.buffers.iter()) {
                        for (o, s) in out[base..].iter_mut().zip(&buffer[..nframes]) {
                            *o += s;
                        }
                    }
                }
                if tracks.is_empty() {
                    distance = (speed * nframes as f64) as i64;
                }
                position += distance;
                rendered += nframes;
                if realtime {
                    spin_sleep::sleep(cycle_time);
                }
            }
            (mix, midi_events)
        })?;
    let (mix, midi_events) = process
        .join()
        .map_err(|_| "process thread panicked")?;

    let mut writer = WavWriter::create(
        output,
        WavSpec {
            channels: out_channels as u16,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        },
    )?;
    for frame in 0..mix[0].len() {
        for channel in &mix {
            writer.write_sample(channel[frame])?;
        }
    }
    writer.finalize()?;

    println!(
        "Rendered {} to {} ({} MIDI events, {} underruns, {} butler passes).",
        duration_minutes_seconds(samples_to_duration(frames as i64, sample_rate)),
        output.display(),
        midi_events,
        context.underruns(),
        butler.passes()
    );
    Ok(())
}
