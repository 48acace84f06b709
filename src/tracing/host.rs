//! Host-side run tracing.
//!
//! Feature-gated with `--features host-tracing`.
//!
//! Usage:
//!   gridsim::tracing::host::record(HostEvent::MegakernelStart);
//!   // run the megakernel...
//!   gridsim::tracing::host::finalize("trace/");
//!
//! Events accumulate in thread-local vectors and are persisted as one
//! binary blob of concatenated little-endian `i64` values: first the `N`
//! event tags, then the `N` timestamps. The file name carries the
//! process id so concurrent runs do not clobber each other.

use std::io;
use std::path::{Path, PathBuf};

/// Host-visible run boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum HostEvent {
    /// Graph/state initialization began.
    InitStart = 0,

    /// Graph/state initialization finished.
    InitEnd = 1,

    /// A megakernel launch began.
    MegakernelStart = 2,

    /// A megakernel launch completed.
    MegakernelEnd = 3,
}

/// Recorded host events and their timestamps, in arrival order.
///
/// The recording side lives behind the `host-tracing` feature; the
/// container and writer are always available so drained traces can be
/// persisted and inspected regardless of how they were captured.
#[derive(Debug, Default)]
pub struct HostTracing {
    /// Event tags in arrival order.
    pub events: Vec<i64>,

    /// Nanosecond timestamps, parallel to `events`.
    pub time_stamps: Vec<i64>,
}

impl HostTracing {
    /// Serializes the trace into `dir` and returns the file path.
    ///
    /// Layout: `2N` little-endian `i64`s — `N` event tags followed by
    /// `N` timestamps.
    pub fn write_to(&self, dir: impl AsRef<Path>) -> io::Result<PathBuf> {
        assert_eq!(self.events.len(), self.time_stamps.len());

        let file = dir.as_ref().join(format!(
            "{}_gridsim_host_tracing.bin",
            std::process::id()
        ));

        let mut bytes = Vec::with_capacity((self.events.len() * 2) * 8);
        for value in self.events.iter().chain(self.time_stamps.iter()) {
            bytes.extend_from_slice(&value.to_le_bytes());
        }

        std::fs::write(&file, bytes)?;
        Ok(file)
    }
}

#[cfg(feature = "host-tracing")]
mod enabled {
    use std::cell::RefCell;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{HostEvent, HostTracing};

    thread_local! {
        static HOST_TRACING: RefCell<HostTracing> = RefCell::new(HostTracing::default());
    }

    fn now_ns() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0)
    }

    /// Records one event on the calling thread.
    pub fn record(event: HostEvent) {
        let ts = now_ns();
        HOST_TRACING.with(|t| {
            let mut t = t.borrow_mut();
            t.events.push(event as i64);
            t.time_stamps.push(ts);
        });
    }

    /// Writes the calling thread's trace into `dir` and clears it.
    pub fn finalize(dir: impl AsRef<Path>) -> io::Result<PathBuf> {
        HOST_TRACING.with(|t| {
            let mut t = t.borrow_mut();
            let path = t.write_to(dir.as_ref())?;
            t.events.clear();
            t.time_stamps.clear();
            Ok(path)
        })
    }
}

#[cfg(not(feature = "host-tracing"))]
mod disabled {
    use std::io;
    use std::path::{Path, PathBuf};

    use super::HostEvent;

    /// Records one event (no-op without the `host-tracing` feature).
    #[inline]
    pub fn record(_event: HostEvent) {}

    /// Writes the calling thread's trace (no-op without the
    /// `host-tracing` feature; reports the path that would be written).
    #[inline]
    pub fn finalize(dir: impl AsRef<Path>) -> io::Result<PathBuf> {
        Ok(dir.as_ref().join(format!(
            "{}_gridsim_host_tracing.bin",
            std::process::id()
        )))
    }
}

#[cfg(feature = "host-tracing")]
pub use enabled::{finalize, record};

#[cfg(not(feature = "host-tracing"))]
pub use disabled::{finalize, record};
