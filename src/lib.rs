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

//! Realtime-safe disk streaming of multichannel audio and MIDI.
//!
//! A [`reader::DiskReader`] streams a bound playlist into lock-free rings from
//! the [`butler::Butler`]; its [`reader::RealtimeReader`] half drains them once
//! per process cycle without blocking, allocating or failing.

pub mod butler;
pub mod cancel;
pub mod config;
pub mod context;
pub mod declick;
pub mod midi;
pub mod playlist;
pub mod reader;
pub mod ringbuffer;
pub mod thread_priority;
pub mod util;

#[cfg(test)]
mod testutil;

pub use butler::Butler;
pub use config::EngineConfig;
pub use context::StreamContext;
pub use reader::{DiskReader, RealtimeReader, Sources};
