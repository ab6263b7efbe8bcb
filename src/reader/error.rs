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
use crate::playlist::{DataType, PlaylistError};

/// Errors surfaced to non-realtime callers of a disk reader. The realtime
/// half never returns errors.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("Storage read failed: {0}")]
    StorageRead(#[from] PlaylistError),

    #[error("Cannot remove {requested} channels, only {available} exist")]
    ChannelCount { requested: usize, available: usize },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No {0} playlist bound")]
    NoPlaylist(DataType),

    #[error("MIDI event at {time} is not after the last buffered event at {last}")]
    EventOrder { time: i64, last: i64 },
}
