use bard_ports::synth::{NoteSynthesizer, SoundBankInfo, SynthError};
use bard_ports::types::PcmBuffer;
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};
use rustysynth::{SoundFont, Synthesizer, SynthesizerSettings};
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const EMPTY: u8 = 0;
const LOADED: u8 = 1;
const DISPOSED: u8 = 2;

const COMMAND_QUEUE_CAPACITY: usize = 2048;
const SCRATCH_FRAMES: usize = 4096;
const PERCUSSION_CHANNEL: i32 = 9;

/// SoundFont synthesizer backed by `rustysynth`.
///
/// Triggers never touch the render lock: they are queued on a single-reader
/// ring and applied by `render` at the start of the next block.
pub struct RustySynth {
    lifecycle: AtomicU8,
    commands: Mutex<Producer<VoiceCommand>>,
    render_state: Mutex<RenderState>,
}

#[derive(Clone, Copy, Debug)]
enum VoiceCommand {
    NoteOn { note: u8, velocity: i32, preset: u16 },
    NoteOff { note: u8, preset: u16 },
    AllOff,
}

struct RenderState {
    consumer: Consumer<VoiceCommand>,
    bank: Option<LoadedBank>,
    scratch_l: Vec<f32>,
    scratch_r: Vec<f32>,
}

struct LoadedBank {
    synth: Synthesizer,
    presets: Vec<PresetSlot>,
    current: Option<u16>,
}

#[derive(Clone, Copy, Debug)]
struct PresetSlot {
    bank: i32,
    patch: i32,
}

impl PresetSlot {
    fn channel(self) -> i32 {
        if self.bank >= 128 {
            PERCUSSION_CHANNEL
        } else {
            0
        }
    }
}

impl Default for RustySynth {
    fn default() -> Self {
        Self::new()
    }
}

impl RustySynth {
    pub fn new() -> Self {
        let (producer, consumer) = RingBuffer::new(COMMAND_QUEUE_CAPACITY);
        Self {
            lifecycle: AtomicU8::new(EMPTY),
            commands: Mutex::new(producer),
            render_state: Mutex::new(RenderState {
                consumer,
                bank: None,
                scratch_l: vec![0.0; SCRATCH_FRAMES],
                scratch_r: vec![0.0; SCRATCH_FRAMES],
            }),
        }
    }

    fn ensure_ready(&self) -> Result<(), SynthError> {
        match self.lifecycle.load(Ordering::Acquire) {
            LOADED => Ok(()),
            DISPOSED => Err(SynthError::UseAfterDispose),
            _ => Err(SynthError::NotLoaded),
        }
    }

    fn push(&self, command: VoiceCommand) -> Result<(), SynthError> {
        self.ensure_ready()?;
        self.commands
            .lock()
            .push(command)
            .map_err(|_| SynthError::Backend("voice command queue full".to_string()))
    }

    fn build_synthesizer(
        sound_font: &Arc<SoundFont>,
        sample_rate_hz: u32,
    ) -> Result<Synthesizer, SynthError> {
        let mut settings = SynthesizerSettings::new(sample_rate_hz as i32);
        settings.enable_reverb_and_chorus = false;
        let mut synth = Synthesizer::new(sound_font, &settings)
            .map_err(|e| SynthError::LoadFailure(e.to_string()))?;
        synth.set_master_volume(0.5);
        Ok(synth)
    }
}

impl LoadedBank {
    fn slot(&self, preset: u16) -> PresetSlot {
        self.presets
            .get(preset as usize)
            .or_else(|| self.presets.first())
            .copied()
            .unwrap_or(PresetSlot { bank: 0, patch: 0 })
    }

    fn select(&mut self, preset: u16) -> PresetSlot {
        let slot = self.slot(preset);
        if self.current != Some(preset) {
            let channel = slot.channel();
            if channel != PERCUSSION_CHANNEL {
                self.synth
                    .process_midi_message(channel, 0xB0, 0x00, slot.bank);
            }
            self.synth
                .process_midi_message(channel, 0xC0, slot.patch, 0);
            self.current = Some(preset);
        }
        slot
    }

    fn apply(&mut self, command: VoiceCommand) {
        match command {
            VoiceCommand::NoteOn {
                note,
                velocity,
                preset,
            } => {
                let slot = self.select(preset);
                self.synth.note_on(slot.channel(), note as i32, velocity);
            }
            VoiceCommand::NoteOff { note, preset } => {
                let slot = self.slot(preset);
                self.synth.note_off(slot.channel(), note as i32);
            }
            VoiceCommand::AllOff => self.synth.note_off_all(false),
        }
    }
}

impl NoteSynthesizer for RustySynth {
    fn load(
        &self,
        path: &Path,
        sample_rate_hz: u32,
        _channels: u16,
    ) -> Result<SoundBankInfo, SynthError> {
        if self.lifecycle.load(Ordering::Acquire) == DISPOSED {
            return Err(SynthError::UseAfterDispose);
        }

        let mut file = File::open(path).map_err(|e| SynthError::LoadFailure(e.to_string()))?;
        let sound_font = Arc::new(
            SoundFont::new(&mut file).map_err(|e| SynthError::LoadFailure(e.to_string()))?,
        );
        let synth = Self::build_synthesizer(&sound_font, sample_rate_hz)?;

        let name = sound_font.get_info().get_bank_name().trim().to_string();
        let name = if name.is_empty() {
            path.file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("SoundFont")
                .to_string()
        } else {
            name
        };

        let mut presets: Vec<PresetSlot> = sound_font
            .get_presets()
            .iter()
            .map(|preset| PresetSlot {
                bank: preset.get_bank_number(),
                patch: preset.get_patch_number(),
            })
            .collect();
        presets.sort_by_key(|slot| (slot.bank, slot.patch));
        let preset_count = presets.len();

        {
            let mut state = self.render_state.lock();
            while state.consumer.pop().is_ok() {}
            state.bank = Some(LoadedBank {
                synth,
                presets,
                current: None,
            });
        }
        self.lifecycle.store(LOADED, Ordering::Release);
        tracing::debug!(bank = %name, preset_count, sample_rate_hz, "sound bank loaded");

        Ok(SoundBankInfo { name, preset_count })
    }

    fn is_loaded(&self) -> bool {
        self.lifecycle.load(Ordering::Acquire) == LOADED
    }

    fn note_on(&self, note: u8, velocity: f32, preset: u16) -> Result<(), SynthError> {
        let velocity = (velocity.clamp(0.0, 1.0) * 127.0).round() as i32;
        self.push(VoiceCommand::NoteOn {
            note: note.min(127),
            velocity: velocity.max(1),
            preset,
        })
    }

    fn note_off(&self, note: u8, preset: u16) -> Result<(), SynthError> {
        self.push(VoiceCommand::NoteOff {
            note: note.min(127),
            preset,
        })
    }

    fn all_notes_off(&self) -> Result<(), SynthError> {
        self.push(VoiceCommand::AllOff)
    }

    fn render(&self, buffer: &mut PcmBuffer) -> Result<(), SynthError> {
        self.ensure_ready()?;

        let mut guard = self.render_state.lock();
        let RenderState {
            consumer,
            bank,
            scratch_l,
            scratch_r,
        } = &mut *guard;
        let Some(bank) = bank.as_mut() else {
            return Err(SynthError::NotLoaded);
        };

        while let Ok(command) = consumer.pop() {
            bank.apply(command);
        }

        let channels = buffer.channels().max(1) as usize;
        let out = buffer.samples_mut();
        let frames = out.len() / channels;
        let mut frame = 0;
        while frame < frames {
            let chunk = (frames - frame).min(scratch_l.len());
            let left = &mut scratch_l[..chunk];
            let right = &mut scratch_r[..chunk];
            bank.synth.render(left, right);
            write_interleaved(
                &mut out[frame * channels..(frame + chunk) * channels],
                channels,
                left,
                right,
            );
            frame += chunk;
        }

        Ok(())
    }

    fn dispose(&self) -> Result<(), SynthError> {
        if self.lifecycle.swap(DISPOSED, Ordering::AcqRel) == DISPOSED {
            return Err(SynthError::UseAfterDispose);
        }
        let mut state = self.render_state.lock();
        state.bank = None;
        while state.consumer.pop().is_ok() {}
        Ok(())
    }
}

fn write_interleaved(data: &mut [f32], channels: usize, left: &[f32], right: &[f32]) {
    let frames = data.len() / channels;
    for frame in 0..frames {
        let base = frame * channels;
        let l = left.get(frame).copied().unwrap_or(0.0);
        let r = right.get(frame).copied().unwrap_or(0.0);
        match channels {
            0 => {}
            1 => data[base] = (l + r) * 0.5,
            _ => {
                data[base] = l;
                data[base + 1] = r;
                for ch in 2..channels {
                    data[base + ch] = 0.0;
                }
            }
        }
    }
}
