use bard_ports::synth::{NoteSynthesizer, SoundBankInfo, SynthError};
use bard_ports::types::PcmBuffer;
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};
use std::f32::consts::TAU;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};

const EMPTY: u8 = 0;
const LOADED: u8 = 1;
const DISPOSED: u8 = 2;

const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// Sine-voice synthesizer with no sound bank of its own.
///
/// `load` only checks that the bank path names a readable file, so it can
/// stand in for a real SoundFont synth in tests and as a fallback.
pub struct SimpleSynth {
    lifecycle: AtomicU8,
    commands: Mutex<Producer<VoiceCommand>>,
    inner: Mutex<Inner>,
}

#[derive(Clone, Copy, Debug)]
enum VoiceCommand {
    NoteOn { note: u8, velocity: f32 },
    NoteOff { note: u8 },
    AllOff,
}

struct Inner {
    sample_rate_hz: f32,
    max_voices: usize,
    consumer: Consumer<VoiceCommand>,
    voices: Vec<Voice>,
    note_counter: u64,
}

#[derive(Clone, Debug)]
struct Voice {
    note: u8,
    freq: f32,
    phase: f32,
    velocity: f32,
    key_down: bool,
    release_samples_left: u32,
    release_total_samples: u32,
    age: u64,
}

impl SimpleSynth {
    pub fn new(max_voices: usize) -> Self {
        let (producer, consumer) = RingBuffer::new(COMMAND_QUEUE_CAPACITY);
        let max_voices = max_voices.max(8);
        Self {
            lifecycle: AtomicU8::new(EMPTY),
            commands: Mutex::new(producer),
            inner: Mutex::new(Inner {
                sample_rate_hz: 44_100.0,
                max_voices,
                consumer,
                voices: Vec::with_capacity(max_voices),
                note_counter: 0,
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
}

impl Default for SimpleSynth {
    fn default() -> Self {
        Self::new(32)
    }
}

impl Inner {
    fn apply_pending(&mut self) {
        while let Ok(command) = self.consumer.pop() {
            match command {
                VoiceCommand::NoteOn { note, velocity } => self.note_on(note, velocity),
                VoiceCommand::NoteOff { note } => self.note_off(note),
                VoiceCommand::AllOff => {
                    for voice in &mut self.voices {
                        if voice.key_down {
                            voice.key_down = false;
                            voice.release_samples_left = voice.release_total_samples;
                        }
                    }
                }
            }
        }
    }

    fn note_on(&mut self, note: u8, velocity: f32) {
        self.note_counter = self.note_counter.wrapping_add(1);

        if self.voices.len() >= self.max_voices {
            if let Some((idx, _)) = self
                .voices
                .iter()
                .enumerate()
                .min_by_key(|(_, voice)| voice.age)
            {
                self.voices.swap_remove(idx);
            }
        }

        let freq = 440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0);
        let release_total_samples = (self.sample_rate_hz * 0.2) as u32;
        self.voices.push(Voice {
            note,
            freq,
            phase: 0.0,
            velocity: velocity.clamp(0.05, 1.0),
            key_down: true,
            release_samples_left: 0,
            release_total_samples: release_total_samples.max(1),
            age: self.note_counter,
        });
    }

    fn note_off(&mut self, note: u8) {
        for voice in &mut self.voices {
            if voice.note == note && voice.key_down {
                voice.key_down = false;
                voice.release_samples_left = voice.release_total_samples;
            }
        }
    }

    fn render(&mut self, channels: u16, out: &mut [f32]) {
        out.fill(0.0);

        let channels = channels.max(1) as usize;
        let frames = out.len() / channels;
        let amplitude = 0.2;

        for voice in &mut self.voices {
            let phase_step = TAU * voice.freq / self.sample_rate_hz;
            for frame in 0..frames {
                if !voice.key_down && voice.release_samples_left == 0 {
                    break;
                }
                let mut gain = voice.velocity;
                if !voice.key_down {
                    gain *= voice.release_samples_left as f32 / voice.release_total_samples as f32;
                    voice.release_samples_left = voice.release_samples_left.saturating_sub(1);
                }

                let sample = voice.phase.sin() * gain * amplitude;
                let base = frame * channels;
                for value in &mut out[base..base + channels] {
                    *value += sample;
                }
                voice.phase += phase_step;
                if voice.phase >= TAU {
                    voice.phase -= TAU;
                }
            }
        }

        self.voices
            .retain(|voice| voice.key_down || voice.release_samples_left > 0);
    }
}

impl NoteSynthesizer for SimpleSynth {
    fn load(
        &self,
        path: &Path,
        sample_rate_hz: u32,
        _channels: u16,
    ) -> Result<SoundBankInfo, SynthError> {
        if self.lifecycle.load(Ordering::Acquire) == DISPOSED {
            return Err(SynthError::UseAfterDispose);
        }
        let metadata =
            std::fs::metadata(path).map_err(|e| SynthError::LoadFailure(e.to_string()))?;
        if !metadata.is_file() {
            return Err(SynthError::LoadFailure(format!(
                "{} is not a file",
                path.display()
            )));
        }

        let mut inner = self.inner.lock();
        inner.sample_rate_hz = sample_rate_hz.max(1) as f32;
        inner.voices.clear();
        while inner.consumer.pop().is_ok() {}
        self.lifecycle.store(LOADED, Ordering::Release);

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Sine")
            .to_string();
        Ok(SoundBankInfo {
            name,
            preset_count: 1,
        })
    }

    fn is_loaded(&self) -> bool {
        self.lifecycle.load(Ordering::Acquire) == LOADED
    }

    fn note_on(&self, note: u8, velocity: f32, _preset: u16) -> Result<(), SynthError> {
        self.push(VoiceCommand::NoteOn {
            note: note.min(127),
            velocity,
        })
    }

    fn note_off(&self, note: u8, _preset: u16) -> Result<(), SynthError> {
        self.push(VoiceCommand::NoteOff { note: note.min(127) })
    }

    fn all_notes_off(&self) -> Result<(), SynthError> {
        self.push(VoiceCommand::AllOff)
    }

    fn render(&self, buffer: &mut PcmBuffer) -> Result<(), SynthError> {
        self.ensure_ready()?;
        let mut inner = self.inner.lock();
        inner.apply_pending();
        let channels = buffer.channels();
        inner.render(channels, buffer.samples_mut());
        Ok(())
    }

    fn dispose(&self) -> Result<(), SynthError> {
        if self.lifecycle.swap(DISPOSED, Ordering::AcqRel) == DISPOSED {
            return Err(SynthError::UseAfterDispose);
        }
        let mut inner = self.inner.lock();
        inner.voices.clear();
        while inner.consumer.pop().is_ok() {}
        Ok(())
    }
}
