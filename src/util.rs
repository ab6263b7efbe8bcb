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

/// Extracts a displayable file name from a path, returning a fallback if the name is unreadable.
pub fn filename_display(path: &Path) -> &str {
    path.file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("unreadable file name")
}

/// Converts a duration to a whole number of samples, rounding to nearest.
pub fn duration_to_samples(duration: Duration, sample_rate: u32) -> usize {
    (duration.as_secs_f64() * sample_rate as f64).round() as usize
}

/// Converts a sample position to a duration. Negative positions are zero.
pub fn samples_to_duration(samples: i64, sample_rate: u32) -> Duration {
    Duration::from_secs_f64(samples.max(0) as f64 / sample_rate.max(1) as f64)
}

/// Outputs the given duration in a minutes:seconds format.
pub fn duration_minutes_seconds(duration: Duration) -> String {
    let minutes = duration.as_secs() / 60;
    let secs = duration.as_secs() - minutes * 60;
    format!("{}:{:02}", minutes, secs)
}

#[cfg(test)]
mod test {
    use std::path::Path;
    use std::time::Duration;

    use crate::util::{
        duration_minutes_seconds, duration_to_samples, filename_display, samples_to_duration,
    };

    #[test]
    fn test_sample_conversions() {
        assert_eq!(duration_to_samples(Duration::from_millis(5), 48000), 240);
        assert_eq!(duration_to_samples(Duration::from_millis(250), 44100), 11025);
        assert_eq!(samples_to_duration(96000, 48000), Duration::from_secs(2));
        assert_eq!(samples_to_duration(-10, 48000), Duration::ZERO);
    }

    #[test]
    fn test_filename_display() {
        assert_eq!(filename_display(Path::new("/a/b/song.wav")), "song.wav");
        assert_eq!(filename_display(Path::new("/")), "unreadable file name");
    }

    #[test]
    fn test_duration_minutes_strings() {
        assert_eq!("0:00", duration_minutes_seconds(Duration::new(0, 0)));
        assert_eq!("0:05", duration_minutes_seconds(Duration::new(5, 0)));
        assert_eq!("0:55", duration_minutes_seconds(Duration::new(55, 0)));
        assert_eq!("1:00", duration_minutes_seconds(Duration::new(60, 0)));
        assert_eq!("2:05", duration_minutes_seconds(Duration::new(125, 0)));
        assert_eq!("60:06", duration_minutes_seconds(Duration::new(3606, 0)));
    }
}
