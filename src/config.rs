//! Monitor Configuration
//!
//! TOML-loadable settings for the probe engine and the capture window.
//! Defaults match the values used by manual runs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for the measurement engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Sleep between cycles in continuous mode. Listed before the nested
    /// sections so the serialized TOML stays valid.
    #[serde(with = "duration_serde")]
    pub cycle_interval: Duration,

    /// Echo/DNS/path-trace probe settings
    pub probe: ProbeSettings,

    /// Retransmission capture settings
    pub capture: CaptureSettings,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(60),
            probe: ProbeSettings::default(),
            capture: CaptureSettings::default(),
        }
    }
}

/// Probe settings for one target measurement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// Echo probes per cycle
    pub count: u32,
    /// Per-probe timeout
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    /// Path-trace hop limit
    pub max_hops: u32,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            count: 5,
            timeout: Duration::from_secs(2),
            max_hops: 30,
        }
    }
}

/// Capture settings for the retransmission detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Run the detector as part of each target measurement
    pub enabled: bool,
    /// Observation window
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Capture interface (default device when unset)
    pub interface: Option<String>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            duration: Duration::from_secs(5),
            interface: None,
        }
    }
}

// Serde helper for Duration (using milliseconds for simplicity)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
