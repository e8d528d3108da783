use serde::{Deserialize, Serialize};
use std::fmt;

pub type SampleTime = u64; // audio frame index, monotonic while stream running

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteInputDevice {
    pub id: DeviceId,
    pub name: String,
    pub is_available: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AudioOutputDevice {
    pub id: DeviceId,
    pub name: String,
    pub default_config: AudioConfig,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub buffer_size_frames: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct Volume01(pub f32);

impl Volume01 {
    pub fn new(value: f32) -> Self {
        if value.is_nan() {
            return Self(0.0);
        }
        Self(value.clamp(0.0, 1.0))
    }

    pub fn get(self) -> f32 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a pooled buffer: the owning pool plus the slot inside it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId {
    pub pool: u64,
    pub slot: usize,
}

/// Fixed-length block of interleaved `f32` samples.
///
/// Length, channel count and sample rate are fixed at construction; the
/// sample storage is never reallocated afterwards.
#[derive(Debug)]
pub struct PcmBuffer {
    id: BufferId,
    channels: u16,
    sample_rate_hz: u32,
    samples: Box<[f32]>,
}

impl PcmBuffer {
    pub fn new(id: BufferId, frames: usize, channels: u16, sample_rate_hz: u32) -> Self {
        let channels = channels.max(1);
        Self {
            id,
            channels,
            sample_rate_hz,
            samples: vec![0.0; frames * channels as usize].into_boxed_slice(),
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    /// Number of interleaved samples (frames * channels).
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    pub fn clear(&mut self) {
        self.samples.fill(0.0);
    }
}
