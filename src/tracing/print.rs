//! Kernel-to-host print channel.
//!
//! Kernels have no stdout of their own; messages go through a bounded
//! channel that forwards to the `log` facade immediately and retains a
//! copy for the host to drain after the run.

use std::sync::Mutex;

/// Retained-message cap; further messages still reach the log facade.
const MAX_RETAINED: usize = 1024;

/// Bounded passthrough channel for user-kernel messages.
pub struct HostPrint {
    lines: Mutex<Vec<String>>,
}

impl Default for HostPrint {
    fn default() -> Self {
        Self::new()
    }
}

impl HostPrint {
    /// Creates an empty channel.
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(Vec::new()),
        }
    }

    /// Forwards `message` to the log facade and retains a copy.
    pub fn print(&self, message: impl Into<String>) {
        let message = message.into();
        log::info!(target: "gridsim::kernel", "{message}");

        let mut lines = self.lines.lock().unwrap();
        if lines.len() < MAX_RETAINED {
            lines.push(message);
        }
    }

    /// Drains every retained message in arrival order.
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock().unwrap())
    }
}
