//! Process-wide configuration (spec §2 ambient stack, §6 "listening port").
//!
//! Kept deliberately small: a `Settings` struct with `serde`-derived
//! defaults, overridable by a handful of environment variables. This
//! mirrors the teacher crate's low-ceremony style (it has no config
//! layer at all) rather than pulling in a full configuration framework
//! for four knobs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_listen_addr() -> String {
    "0.0.0.0:5000".to_owned()
}

fn default_stun_servers() -> Vec<String> {
    vec!["stun:stun.stunprotocol.org".to_owned()]
}

fn default_proximity_tick_hz() -> u64 {
    8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// `HOST:PORT` the HTTP/WebSocket server binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// ICE servers handed to every new `RTCPeerConnection` (spec §6:
    /// "implementations must make the ICE-server list configurable").
    #[serde(default = "default_stun_servers")]
    pub stun_servers: Vec<String>,

    /// How often the proximity loop re-evaluates distances (spec §9:
    /// the original busy-waits; this crate samples at a bounded rate
    /// instead).
    #[serde(default = "default_proximity_tick_hz")]
    pub proximity_tick_hz: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            stun_servers: default_stun_servers(),
            proximity_tick_hz: default_proximity_tick_hz(),
        }
    }
}

impl Settings {
    /// Loads defaults, then applies environment overrides:
    /// `PROXIMITY_VOICE_LISTEN_ADDR`, `PROXIMITY_VOICE_STUN_SERVERS`
    /// (comma-separated), `PROXIMITY_VOICE_TICK_HZ`.
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Ok(addr) = std::env::var("PROXIMITY_VOICE_LISTEN_ADDR") {
            settings.listen_addr = addr;
        }
        if let Ok(servers) = std::env::var("PROXIMITY_VOICE_STUN_SERVERS") {
            settings.stun_servers = servers.split(',').map(|s| s.trim().to_owned()).collect();
        }
        if let Ok(hz) = std::env::var("PROXIMITY_VOICE_TICK_HZ") {
            match hz.parse() {
                Ok(hz) => settings.proximity_tick_hz = hz,
                Err(e) => log::warn!("ignoring invalid PROXIMITY_VOICE_TICK_HZ={hz}: {e}"),
            }
        }

        settings
    }

    pub fn proximity_tick_interval(&self) -> Duration {
        Duration::from_millis(1000 / self.proximity_tick_hz.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.listen_addr, "0.0.0.0:5000");
        assert_eq!(settings.stun_servers.len(), 1);
        assert!(settings.proximity_tick_hz > 0);
    }

    #[test]
    fn tick_interval_is_derived_from_hz() {
        let settings = Settings {
            proximity_tick_hz: 10,
            ..Settings::default()
        };
        assert_eq!(settings.proximity_tick_interval(), Duration::from_millis(100));
    }
}
