// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Session configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of request attempts while the target answers WAIT
pub const DEFAULT_WAIT_ATTEMPTS: u32 = 3;

/// Default pause between WAIT attempts
pub const DEFAULT_WAIT_DELAY: Duration = Duration::from_micros(100);

/// Default bound on the debug/system power-up handshake
pub const DEFAULT_POWER_UP_TIMEOUT: Duration = Duration::from_millis(100);

/// Default interval between CTRL/STAT polls during power-up
pub const DEFAULT_POWER_UP_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Tunables for a [`crate::DebugSession`].
///
/// Missing fields take their defaults when deserialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Request frames sent for one operation while the target answers
    /// WAIT, including the first.  At least 1.
    pub wait_attempts: u32,

    /// Pause between WAIT attempts
    pub wait_delay: Duration,

    /// How long to wait for CDBGPWRUPACK and CSYSPWRUPACK
    pub power_up_timeout: Duration,

    /// Interval between CTRL/STAT reads while powering up
    pub power_up_poll_interval: Duration,

    /// Index of the MEM-AP used for memory access
    pub mem_ap: u8,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            wait_attempts: DEFAULT_WAIT_ATTEMPTS,
            wait_delay: DEFAULT_WAIT_DELAY,
            power_up_timeout: DEFAULT_POWER_UP_TIMEOUT,
            power_up_poll_interval: DEFAULT_POWER_UP_POLL_INTERVAL,
            mem_ap: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_fields_take_defaults() {
        let config: SessionConfig = serde_json::from_str(r#"{"wait_attempts": 5}"#).unwrap();
        assert_eq!(
            config,
            SessionConfig {
                wait_attempts: 5,
                ..SessionConfig::default()
            }
        );
    }

    #[test]
    fn round_trips_through_json() {
        let config = SessionConfig {
            mem_ap: 1,
            power_up_timeout: Duration::from_millis(250),
            ..SessionConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
