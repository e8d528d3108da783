use crate::types::*;

#[derive(thiserror::Error, Debug)]
pub enum AudioError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Host-owned destination for rendered note buffers.
///
/// `play` is called from the audio thread. The sink must copy what it needs:
/// the buffer goes back to its pool after the hold window.
pub trait AudioSink: Send + Sync {
    fn play(&self, buffer: &PcmBuffer, priority: u8, gain: f32);

    fn stop_all(&self) {}
}

/// Audio callback: must be realtime-safe.
pub trait AudioRenderCallback: Send + 'static {
    fn render(&mut self, sample_time_start: SampleTime, out_l: &mut [f32], out_r: &mut [f32]);
}

pub trait AudioStreamHandle: Send {
    fn close(self: Box<Self>);
}

pub trait AudioOutputPort: Send + Sync {
    fn list_outputs(&self) -> Result<Vec<AudioOutputDevice>, AudioError>;

    fn default_output(&self) -> Result<Option<AudioOutputDevice>, AudioError>;

    fn open_output(
        &self,
        device_id: &DeviceId,
        config: AudioConfig,
        cb: Box<dyn AudioRenderCallback>,
    ) -> Result<Box<dyn AudioStreamHandle>, AudioError>;
}
