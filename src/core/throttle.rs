//! Count-based rate limiting for mutating remote calls.
//!
//! Every create, update, rename and delete goes through one shared
//! [`Throttle`]. After each `batch_size` calls the next call waits
//! `pause_seconds` before it is issued. Calls are counted whether they
//! succeed or fail.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

/// Throttle settings (the `throttle` section of the config file)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleSettings {
    /// Mutating calls allowed between pauses (default: 30)
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// Pause length in seconds (default: 55)
    #[serde(default = "default_pause_seconds")]
    pub pause_seconds: u64,
}

fn default_batch_size() -> u64 {
    30
}
fn default_pause_seconds() -> u64 {
    55
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            pause_seconds: default_pause_seconds(),
        }
    }
}

/// Shared call counter
#[derive(Debug)]
pub struct Throttle {
    settings: ThrottleSettings,
    calls: AtomicU64,
}

impl Throttle {
    pub fn new(settings: ThrottleSettings) -> Self {
        Self {
            settings,
            calls: AtomicU64::new(0),
        }
    }

    /// Never pauses; used by offline commands and tests that do not care
    pub fn unlimited() -> Self {
        Self::new(ThrottleSettings {
            batch_size: 0,
            pause_seconds: 0,
        })
    }

    /// Number of mutating calls admitted so far
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Whether the call after `completed` calls has to wait first
    fn pause_due(&self, completed: u64) -> bool {
        self.settings.batch_size > 0
            && self.settings.pause_seconds > 0
            && completed > 0
            && completed % self.settings.batch_size == 0
    }

    /// Admit one mutating call, pausing first if a batch just filled up
    pub async fn admit(&self, operation: &str) {
        let completed = self.calls.fetch_add(1, Ordering::SeqCst);

        if self.pause_due(completed) {
            info!(
                calls = completed,
                pause_seconds = self.settings.pause_seconds,
                operation,
                "Call limit reached, pausing"
            );
            tokio::time::sleep(Duration::from_secs(self.settings.pause_seconds)).await;
        }
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(ThrottleSettings::default())
    }
}
