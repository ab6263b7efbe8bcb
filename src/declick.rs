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
use std::time::Duration;

/// Short gain ramp that hides discontinuities (seeks, stops, edits) as
/// inaudible fades. This has no musical meaning and is separate from any
/// user gain automation.
#[derive(Debug, Clone)]
pub struct DeclickAmp {
    /// Per-sample gain step for a full 0 -> 1 ramp.
    increment: f32,
    /// Length of a full ramp in samples.
    ramp_length: usize,
    /// Current gain.
    gain: f32,
}

impl DeclickAmp {
    /// Creates a declicker whose full ramp lasts `ramp` at `sample_rate`.
    /// Starts idle at unity gain.
    pub fn new(sample_rate: u32, ramp: Duration) -> Self {
        let ramp_length = ((sample_rate as f64 * ramp.as_secs_f64()).round() as usize).max(1);
        Self {
            increment: 1.0 / ramp_length as f32,
            ramp_length,
            gain: 1.0,
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain.clamp(0.0, 1.0);
    }

    pub fn ramp_length(&self) -> usize {
        self.ramp_length
    }

    /// True while the gain hasn't settled on `target`.
    pub fn is_ramping_to(&self, target: f32) -> bool {
        self.gain != target
    }

    /// Ramps the gain linearly toward `target`, multiplying each of the first
    /// `n_samples` samples of `buf` by the gain reached at that sample.
    ///
    /// Once the target is reached the remaining samples are multiplied by the
    /// target, which makes a settled fade-in a no-op and a settled fade-out
    /// silence.
    pub fn apply_gain(&mut self, buf: &mut [f32], n_samples: usize, target: f32) {
        let n_samples = n_samples.min(buf.len());
        let target = target.clamp(0.0, 1.0);

        let mut g = self.gain;
        let mut i = 0;
        if g != target {
            let step = if target > g {
                self.increment
            } else {
                -self.increment
            };
            while i < n_samples && g != target {
                g += step;
                if (step > 0.0 && g >= target) || (step < 0.0 && g <= target) {
                    g = target;
                }
                buf[i] *= g;
                i += 1;
            }
        }

        if i < n_samples {
            if target == 0.0 {
                buf[i..n_samples].fill(0.0);
            } else if target != 1.0 {
                buf[i..n_samples].iter_mut().for_each(|s| *s *= target);
            }
        }

        self.gain = g;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amp(ramp_length: usize) -> DeclickAmp {
        // 1 sample per millisecond makes the ramp length easy to reason about.
        DeclickAmp::new(1000, Duration::from_millis(ramp_length as u64))
    }

    #[test]
    fn test_ramp_length_scales_with_sample_rate() {
        assert_eq!(DeclickAmp::new(48000, Duration::from_millis(5)).ramp_length(), 240);
        assert_eq!(DeclickAmp::new(96000, Duration::from_millis(5)).ramp_length(), 480);
    }

    #[test]
    fn test_settled_unity_is_noop() {
        let mut amp = amp(8);
        let mut buf = vec![0.5; 16];
        amp.apply_gain(&mut buf, 16, 1.0);
        assert!(buf.iter().all(|&s| s == 0.5));
        assert!(!amp.is_ramping_to(1.0));
    }

    #[test]
    fn test_fade_out_is_monotonic_and_ends_silent() {
        let mut amp = amp(8);
        let mut buf = vec![1.0; 16];
        amp.apply_gain(&mut buf, 16, 0.0);

        for pair in buf[..8].windows(2) {
            assert!(pair[1] < pair[0]);
        }
        assert_eq!(buf[7], 0.0);
        assert!(buf[8..].iter().all(|&s| s == 0.0));
        assert_eq!(amp.gain(), 0.0);
    }

    #[test]
    fn test_fade_in_spans_cycles() {
        let mut amp = amp(8);
        amp.set_gain(0.0);

        let mut first = vec![1.0; 4];
        amp.apply_gain(&mut first, 4, 1.0);
        let mut second = vec![1.0; 8];
        amp.apply_gain(&mut second, 8, 1.0);

        let all: Vec<f32> = first.iter().chain(second.iter()).copied().collect();
        for pair in all[..8].windows(2) {
            assert!(pair[1] > pair[0]);
        }
        assert_eq!(all[7], 1.0);
        assert!(all[8..].iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_gain_is_clamped() {
        let mut amp = amp(4);
        amp.set_gain(3.0);
        assert_eq!(amp.gain(), 1.0);
        amp.set_gain(-1.0);
        assert_eq!(amp.gain(), 0.0);
    }
}
