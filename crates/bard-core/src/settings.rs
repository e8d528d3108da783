use bard_ports::types::{DeviceId, Volume01};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum SettingsError {
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Minimum spacing between accepted manual toggles.
    pub debounce_ms: u64,
    /// How long `note_playing` stays true after the last note.
    pub note_hold_ms: u64,
}

impl TimingConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn note_hold(&self) -> Duration {
        Duration::from_millis(self.note_hold_ms)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1_000,
            note_hold_ms: 2_000,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub sample_rate_hz: u32,
    pub channels: u16,
    /// Length of each rendered note buffer.
    pub buffer_seconds: f32,
    /// Fade-in / fade-out length in frames.
    pub fade_samples: usize,
    /// How long a rendered buffer stays checked out before it returns to the pool.
    pub hold_ms: u64,
    pub priority: u8,
}

impl RenderConfig {
    pub fn frames_per_buffer(&self) -> usize {
        let frames = (self.sample_rate_hz as f64 * self.buffer_seconds.max(0.0) as f64).round();
        (frames as usize).max(1)
    }

    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 44_100,
            channels: 2,
            buffer_seconds: 1.0,
            fade_samples: 1_000,
            hold_ms: 3_000,
            priority: 128,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub volume: Volume01,
    pub preset: u16,
    pub sound_bank_path: Option<String>,
    pub song_path: Option<String>,
    pub input_device: Option<DeviceId>,
    pub auto_connect: bool,
    pub timing: TimingConfig,
    pub render: RenderConfig,
    pub pool_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            volume: Volume01(0.8),
            preset: 0,
            sound_bank_path: None,
            song_path: None,
            input_device: None,
            auto_connect: true,
            timing: TimingConfig::default(),
            render: RenderConfig::default(),
            pool_capacity: 40,
        }
    }
}

impl EngineSettings {
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let mut settings: Self = serde_json::from_str(json)?;
        settings.volume = Volume01::new(settings.volume.get());
        Ok(settings)
    }

    pub fn from_path(path: &Path) -> Result<Self, SettingsError> {
        let json = std::fs::read_to_string(path).map_err(|e| SettingsError::Io(e.to_string()))?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, SettingsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
