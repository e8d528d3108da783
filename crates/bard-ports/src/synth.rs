use crate::types::PcmBuffer;
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum SynthError {
    #[error("sound bank load failed: {0}")]
    LoadFailure(String),
    #[error("no sound bank loaded")]
    NotLoaded,
    #[error("synthesizer used after dispose")]
    UseAfterDispose,
    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Clone, Debug)]
pub struct SoundBankInfo {
    pub name: String,
    pub preset_count: usize,
}

/// Thread model:
/// - load / dispose are called from the control thread (can lock internally)
/// - note_on / note_off / all_notes_off are called from event delivery threads
///   and must only hand the trigger off, never wait on render
/// - render is called from the audio thread (must be realtime-safe)
pub trait NoteSynthesizer: Send + Sync {
    fn load(
        &self,
        path: &Path,
        sample_rate_hz: u32,
        channels: u16,
    ) -> Result<SoundBankInfo, SynthError>;

    fn is_loaded(&self) -> bool;

    fn note_on(&self, note: u8, velocity: f32, preset: u16) -> Result<(), SynthError>;
    fn note_off(&self, note: u8, preset: u16) -> Result<(), SynthError>;
    fn all_notes_off(&self) -> Result<(), SynthError>;

    /// Fill the whole buffer with the next contiguous block of audio.
    fn render(&self, buffer: &mut PcmBuffer) -> Result<(), SynthError>;

    fn dispose(&self) -> Result<(), SynthError>;
}
