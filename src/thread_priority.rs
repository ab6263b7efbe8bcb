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

use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{debug, info, warn};

/// Default priority for butler workers when DISKSTREAM_BUTLER_PRIORITY is unset.
const DEFAULT_BUTLER_PRIORITY: u8 = 40;

/// Default priority for the process thread when DISKSTREAM_PROCESS_PRIORITY is unset.
const DEFAULT_PROCESS_PRIORITY: u8 = 70;

fn priority_from_env(name: &str, default: u8) -> Option<ThreadPriorityValue> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u8>().ok())
        .filter(|n| *n < 100)
        .and_then(|n| ThreadPriorityValue::try_from(n).ok())
        .or_else(|| ThreadPriorityValue::try_from(default).ok())
}

/// Reads DISKSTREAM_BUTLER_PRIORITY (0-99).
pub fn butler_thread_priority() -> Option<ThreadPriorityValue> {
    priority_from_env("DISKSTREAM_BUTLER_PRIORITY", DEFAULT_BUTLER_PRIORITY)
}

/// Reads DISKSTREAM_PROCESS_PRIORITY (0-99).
pub fn process_thread_priority() -> Option<ThreadPriorityValue> {
    priority_from_env("DISKSTREAM_PROCESS_PRIORITY", DEFAULT_PROCESS_PRIORITY)
}

/// Raises the priority of a butler worker. Failure is not fatal; the worker
/// simply runs at normal priority.
pub fn configure_butler_thread(priority: Option<ThreadPriorityValue>) {
    let Some(priority) = priority else {
        return;
    };
    if let Err(e) = set_current_thread_priority(ThreadPriority::Crossplatform(priority)) {
        debug!(err = ?e, "Unable to raise butler thread priority");
    }
}

/// Gives the calling thread realtime scheduling when `rt` is set, otherwise a
/// raised normal priority.
pub fn configure_process_thread(priority: Option<ThreadPriorityValue>, rt: bool) {
    let Some(priority) = priority else {
        return;
    };
    let tp = ThreadPriority::Crossplatform(priority);
    let _ = set_current_thread_priority(tp);

    #[cfg(unix)]
    if rt {
        use thread_priority::unix::{
            set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
            ThreadSchedulePolicy,
        };
        let tid = thread_native_id();
        match set_thread_priority_and_policy(
            tid,
            tp,
            ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
        ) {
            Ok(()) => info!("Enabled RT SCHED_FIFO for process thread"),
            Err(e) => warn!(error = %e, "Failed to set RT SCHED_FIFO for process thread"),
        }
    }
    #[cfg(not(unix))]
    let _ = rt;
}
