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

//! The per-cycle realtime path. Nothing in here may block, allocate or log.

use std::sync::atomic::Ordering;

use super::channel::Rings;
use super::state::{Overwrite, ReaderState};
use super::{RealtimeReader, NO_SEEK};
use crate::context::UnderrunReport;
use crate::midi::MidiBuffer;

/// What a single cycle did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cycle {
    /// Timeline samples covered by the cycle; negative in reverse.
    pub distance: i64,
    /// Samples per channel replaced with silence because the rings ran dry.
    pub missing: usize,
    /// The butler has work to do for this reader.
    pub need_butler: bool,
}

fn silence(audio: &mut [Vec<f32>], nframes: usize) {
    for out in audio.iter_mut() {
        let n = nframes.min(out.len());
        out[..n].fill(0.0);
    }
}

/// Stretches or squeezes `src`, which holds the first `src.len()` of
/// `distance` source samples, over `out` by linear interpolation. Source
/// samples that weren't supplied read as silence.
fn interpolate(src: &[f32], distance: usize, out: &mut [f32]) {
    if out.is_empty() {
        return;
    }
    let step = distance as f64 / out.len() as f64;
    for (i, o) in out.iter_mut().enumerate() {
        let x = i as f64 * step;
        let i0 = x as usize;
        if i0 >= src.len() {
            *o = 0.0;
            continue;
        }
        let i1 = (i0 + 1).min(src.len() - 1);
        let frac = (x - i0 as f64) as f32;
        *o = src[i0] + (src[i1] - src[i0]) * frac;
    }
}

impl RealtimeReader {
    /// Source samples a cycle of `nframes` at `speed` consumes, carrying the
    /// fractional remainder into the next call. Negative in reverse. Speeds
    /// beyond the configured maximum are clamped.
    pub fn calculate_playback_distance(&mut self, speed: f64, nframes: usize) -> i64 {
        if speed == 0.0 || !speed.is_finite() || nframes == 0 {
            return 0;
        }
        let magnitude = speed.abs().min(self.max_speed);
        let exact = magnitude * nframes as f64 + self.phase;
        let whole = exact.floor();
        self.phase = exact - whole;
        if speed < 0.0 {
            -(whole as i64)
        } else {
            whole as i64
        }
    }

    /// Produces one cycle of output for the timeline range from `start` to
    /// `end` (`end < start` in reverse) into `audio`, one buffer per channel,
    /// and appends the cycle's MIDI to `midi` with cycle-relative times.
    ///
    /// With `result_required` unset the rings are advanced without producing
    /// output. Never blocks; a cycle that can't be served from the rings is
    /// silence.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &mut self,
        audio: &mut [Vec<f32>],
        midi: &mut MidiBuffer,
        start: i64,
        end: i64,
        speed: f64,
        nframes: usize,
        result_required: bool,
    ) -> Cycle {
        let nframes = audio.iter().map(|b| b.len()).fold(nframes, usize::min);
        let shared = self.shared.clone();
        let mut cycle = Cycle {
            distance: end - start,
            missing: 0,
            need_butler: false,
        };

        if shared.tracker_reset.swap(false, Ordering::AcqRel) {
            self.tracker.reset();
        }
        if self.tracker.needs_resolve() {
            self.tracker.resolve_notes(midi, 0);
        }

        // Something holds the rings exclusively: a seek, overwrite or resize
        // is replacing them.
        let Some(rings) = shared.rings.try_read() else {
            silence(audio, nframes);
            self.declick.set_gain(0.0);
            self.tracker.resolve_notes(midi, 0);
            shared.state.store(ReaderState::Seeking);
            cycle.need_butler = true;
            return cycle;
        };

        let reverse = speed < 0.0;
        let distance = cycle.distance.unsigned_abs() as usize;
        let moving = speed != 0.0 && distance > 0;

        match shared.overwrite.load() {
            Overwrite::Pending => {
                // Stale data is never played, not even faded.
                silence(audio, nframes);
                self.declick.set_gain(0.0);
                self.tracker.resolve_notes(midi, 0);
                if moving {
                    // The overwrite may already be filling from the ring
                    // position, so only publish where the transport is.
                    shared.transport_position.store(end, Ordering::Release);
                }
                shared.state.store(ReaderState::Seeking);
                cycle.need_butler = true;
                shared.context.request_refill();
                return cycle;
            }
            Overwrite::Refilled => {
                if shared.overwrite.acknowledge() {
                    shared.transport_position.store(NO_SEEK, Ordering::Release);
                    self.begin_fade_in(midi);
                }
            }
            Overwrite::Clear => {}
        }

        let generation = shared.seek_generation.load(Ordering::Acquire);
        if generation != self.seen_seek_generation {
            self.seen_seek_generation = generation;
            self.begin_fade_in(midi);
        }

        if shared.seek_requested().is_some() {
            silence(audio, nframes);
            shared.state.store(ReaderState::Seeking);
            cycle.need_butler = true;
            return cycle;
        }

        if !shared.has_audio.load(Ordering::Acquire) && !shared.has_midi.load(Ordering::Acquire) {
            silence(audio, nframes);
            return cycle;
        }

        if shared.context.no_disk_output() {
            silence(audio, nframes);
            self.declick.set_gain(0.0);
            self.tracker.resolve_notes(midi, 0);
            cycle.need_butler = self.need_butler(&rings);
            return cycle;
        }

        if !moving {
            self.fade_out(&rings, audio, nframes);
            self.tracker.resolve_notes(midi, 0);
            self.phase = 0.0;
            cycle.need_butler = self.need_butler(&rings);
            return cycle;
        }

        let ring_position = shared.ring_position();
        let delta = if reverse {
            ring_position - start
        } else {
            start - ring_position
        };
        if reverse != shared.reversed() || (delta != 0 && !self.can_seek_in(&rings, delta)) {
            // Fade out what the rings held and let the butler relocate.
            self.fade_out(&rings, audio, nframes);
            self.tracker.resolve_notes(midi, 0);
            shared.seek_reverse.store(reverse, Ordering::Release);
            shared.seek_request.store(start, Ordering::Release);
            shared.state.store(ReaderState::Seeking);
            shared.context.request_refill();
            cycle.need_butler = true;
            return cycle;
        }
        if delta != 0 {
            self.tracker.resolve_notes(midi, 0);
            self.seek_in(&rings, delta);
        }

        let missing = if result_required {
            self.drain(&rings, audio, nframes, distance)
        } else {
            self.skip(&rings, distance)
        };
        if !reverse && shared.has_midi.load(Ordering::Acquire) {
            self.play_midi(&rings, midi, start, distance, nframes, result_required);
        }

        let consumed = (distance - missing) as i64;
        shared.set_ring_position(if reverse { start - consumed } else { start + consumed });

        self.samples_since_report = self.samples_since_report.saturating_add(nframes);
        if missing > 0 {
            shared.underruns.fetch_add(1, Ordering::Relaxed);
            shared.context.count_underrun();
            if self.samples_since_report >= self.report_interval {
                shared.context.signal_underrun(UnderrunReport {
                    reader: shared.id,
                    position: start,
                    missing,
                });
                self.samples_since_report = 0;
            }
        }
        cycle.missing = missing;

        shared.state.store(if self.declick.gain() >= 1.0 {
            ReaderState::Streaming
        } else {
            ReaderState::DeclickingIn
        });

        cycle.need_butler = self.need_butler(&rings);
        if cycle.need_butler {
            shared.context.request_refill();
        }
        cycle
    }

    /// Resolves sounding notes; the next cycle fades out from wherever the
    /// transport stopped.
    pub fn realtime_handle_transport_stopped(&mut self, midi: &mut MidiBuffer) {
        self.tracker.resolve_notes(midi, 0);
        if self.declick.gain() > 0.0 {
            self.shared.state.store(ReaderState::DeclickingOut);
        }
    }

    /// The transport jumped: end every sounding note and start tracking afresh.
    /// Notes whose offs don't fit in `midi` are resolved on the next cycle.
    pub fn realtime_locate(&mut self, midi: &mut MidiBuffer) {
        self.tracker.resolve_notes(midi, 0);
        self.phase = 0.0;
    }

    /// Forgets sounding notes without emitting note offs.
    pub fn reset_tracker(&mut self) {
        self.tracker.reset();
    }

    /// Writes note offs for every sounding note at `time`.
    pub fn resolve_tracker(&mut self, midi: &mut MidiBuffer, time: i64) -> usize {
        self.tracker.resolve_notes(midi, time)
    }

    /// Starts from silence after a discontinuity.
    fn begin_fade_in(&mut self, midi: &mut MidiBuffer) {
        self.tracker.resolve_notes(midi, 0);
        self.declick.set_gain(0.0);
        self.phase = 0.0;
    }

    /// Fades out the audio the rings would have played next, without
    /// consuming it.
    fn fade_out(&mut self, rings: &Rings, audio: &mut [Vec<f32>], nframes: usize) {
        let gain = self.declick.gain();
        if gain == 0.0 || rings.audio.is_empty() || audio.is_empty() {
            silence(audio, nframes);
            self.declick.set_gain(0.0);
            self.shared.state.store(ReaderState::Idle);
            return;
        }
        for (c, out) in audio.iter_mut().enumerate() {
            let out = &mut out[..nframes];
            match rings.audio.get(c) {
                Some(ring) => {
                    ring.peek(0, out);
                }
                None => out.fill(0.0),
            }
            self.declick.set_gain(gain);
            self.declick.apply_gain(out, nframes, 0.0);
        }
        self.shared.state.store(if self.declick.gain() == 0.0 {
            ReaderState::Idle
        } else {
            ReaderState::DeclickingOut
        });
    }

    /// Drains `distance` samples per channel into `nframes` of output.
    /// Returns the number of samples the rings couldn't supply.
    fn drain(&mut self, rings: &Rings, audio: &mut [Vec<f32>], nframes: usize, distance: usize) -> usize {
        if rings.audio.is_empty() {
            silence(audio, nframes);
            self.declick.set_gain(1.0);
            return 0;
        }

        // Read the same count from every channel so they stay aligned even
        // when a refill is midway through writing them.
        let n = rings.read_space().min(distance);
        let gain = self.declick.gain();
        for (c, ring) in rings.audio.iter().enumerate() {
            let Some(out) = audio.get_mut(c) else {
                ring.increment_read_ptr(n);
                continue;
            };
            let out = &mut out[..nframes];
            if distance == nframes {
                ring.read(&mut out[..n]);
                out[n..].fill(0.0);
            } else {
                let fits = n.min(self.scratch.len());
                ring.read(&mut self.scratch[..fits]);
                ring.increment_read_ptr(n - fits);
                interpolate(&self.scratch[..fits], distance, out);
            }
            self.declick.set_gain(gain);
            self.declick.apply_gain(out, nframes, 1.0);
        }
        for out in audio.iter_mut().skip(rings.audio.len()) {
            out[..nframes].fill(0.0);
        }
        distance - n
    }

    /// Advances the rings by `distance` without producing output.
    fn skip(&mut self, rings: &Rings, distance: usize) -> usize {
        if rings.audio.is_empty() {
            return 0;
        }
        let n = rings.read_space().min(distance);
        rings.audio.iter().for_each(|r| {
            r.increment_read_ptr(n);
        });
        distance - n
    }

    /// Delivers the events in [start, start + distance) scaled onto the
    /// cycle's frames.
    fn play_midi(
        &mut self,
        rings: &Rings,
        midi: &mut MidiBuffer,
        start: i64,
        distance: usize,
        nframes: usize,
        result_required: bool,
    ) {
        let window_end = start + distance as i64;
        while let Some(event) = rings.midi.front() {
            let time = event.time();
            if time >= window_end {
                break;
            }
            rings.midi.pop();
            // Left behind by a jump, or not wanted this cycle.
            if time < start || !result_required {
                continue;
            }
            let offset = ((time - start) as u128 * nframes as u128 / distance as u128) as i64;
            // A dropped note off leaves its note tracked, so it's still
            // resolved at the next discontinuity.
            if midi.push(event.at(offset.min(nframes.saturating_sub(1) as i64))) {
                self.tracker.track(&event);
            }
        }
        self.shared
            .unmatched_note_offs
            .store(self.tracker.unmatched_offs(), Ordering::Relaxed);
    }

    fn need_butler(&self, rings: &Rings) -> bool {
        let shared = &self.shared;
        let audio = !rings.audio.is_empty()
            && shared.has_audio.load(Ordering::Acquire)
            && rings.write_space() >= shared.low_water.load(Ordering::Relaxed);
        let midi = shared.has_midi.load(Ordering::Acquire)
            && !shared.reversed()
            && shared.midi_file_sample.load(Ordering::Acquire) - shared.ring_position()
                < shared.context.midi_readahead() / 2;
        audio || midi
    }
}
