use crate::render::RenderPipeline;
use bard_ports::audio::{AudioRenderCallback, AudioSink};
use bard_ports::types::{PcmBuffer, SampleTime};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

struct PlaybackSlot {
    samples: Vec<f32>,
    channels: usize,
    position: usize,
    priority: u8,
    gain: f32,
    age: u64,
    active: bool,
}

impl PlaybackSlot {
    fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1)
    }
}

struct MixerState {
    slots: Vec<PlaybackSlot>,
    next_age: u64,
    limiter_gain: f32,
}

/// Host-side sink that plays rendered buffers back into a split stereo stream.
///
/// Slot storage is allocated once; `play` copies into a free slot or steals
/// the lowest-priority, oldest one.
pub struct Mixer {
    state: Mutex<MixerState>,
}

impl Mixer {
    pub fn new(slot_count: usize, max_samples: usize) -> Self {
        let slots = (0..slot_count.max(1))
            .map(|_| PlaybackSlot {
                samples: Vec::with_capacity(max_samples),
                channels: 2,
                position: 0,
                priority: 0,
                gain: 0.0,
                age: 0,
                active: false,
            })
            .collect();
        Self {
            state: Mutex::new(MixerState {
                slots,
                next_age: 0,
                limiter_gain: 1.0,
            }),
        }
    }

    pub fn active_voices(&self) -> usize {
        self.state.lock().slots.iter().filter(|slot| slot.active).count()
    }

    /// Sums all active slots into `out_l` / `out_r`, then applies the limiter
    /// and clamps to [-1, 1].
    pub fn mix(&self, out_l: &mut [f32], out_r: &mut [f32]) {
        let frames = out_l.len().min(out_r.len());
        out_l.fill(0.0);
        out_r.fill(0.0);

        let mut state = self.state.lock();
        for slot in state.slots.iter_mut().filter(|slot| slot.active) {
            let channels = slot.channels.max(1);
            let slot_frames = slot.frames();
            for frame in 0..frames {
                if slot.position >= slot_frames {
                    slot.active = false;
                    break;
                }
                let base = slot.position * channels;
                let l = slot.samples[base];
                let r = if channels > 1 { slot.samples[base + 1] } else { l };
                out_l[frame] += (l * slot.gain).clamp(-1.0, 1.0);
                out_r[frame] += (r * slot.gain).clamp(-1.0, 1.0);
                slot.position += 1;
            }
            if slot.position >= slot_frames {
                slot.active = false;
            }
        }

        let limit = 0.98_f32;
        let mut peak = 0.0_f32;
        for i in 0..frames {
            peak = peak.max(out_l[i].abs()).max(out_r[i].abs());
        }

        let target_gain = if peak > limit { limit / peak } else { 1.0 };
        let current_gain = state.limiter_gain;
        let coeff = if target_gain < current_gain { 0.25 } else { 0.01 };
        let new_gain = (current_gain + coeff * (target_gain - current_gain)).clamp(0.0, 1.0);
        state.limiter_gain = new_gain;

        for i in 0..frames {
            out_l[i] = (out_l[i] * new_gain).clamp(-1.0, 1.0);
            out_r[i] = (out_r[i] * new_gain).clamp(-1.0, 1.0);
        }
    }
}

impl AudioSink for Mixer {
    fn play(&self, buffer: &PcmBuffer, priority: u8, gain: f32) {
        let mut state = self.state.lock();
        let age = state.next_age;
        state.next_age = state.next_age.wrapping_add(1);

        let free = state.slots.iter().position(|slot| !slot.active);
        let idx = match free {
            Some(idx) => idx,
            None => {
                let Some((idx, victim)) = state
                    .slots
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, slot)| (slot.priority, slot.age))
                else {
                    return;
                };
                if victim.priority > priority {
                    return;
                }
                idx
            }
        };

        let slot = &mut state.slots[idx];
        let capacity = slot.samples.capacity();
        let source = buffer.samples();
        let take = source.len().min(capacity);
        slot.samples.clear();
        slot.samples.extend_from_slice(&source[..take]);
        slot.channels = buffer.channels() as usize;
        slot.position = 0;
        slot.priority = priority;
        slot.gain = gain;
        slot.age = age;
        slot.active = true;
    }

    fn stop_all(&self) {
        let mut state = self.state.lock();
        for slot in &mut state.slots {
            slot.active = false;
        }
    }
}

/// Audio-thread callback for the host stream: runs the render pipeline, then
/// mixes what it produced.
pub struct AudioGraph {
    pipeline: RenderPipeline,
    mixer: Arc<Mixer>,
}

impl AudioGraph {
    pub fn new(pipeline: RenderPipeline, mixer: Arc<Mixer>) -> Self {
        Self { pipeline, mixer }
    }

    pub fn pipeline(&self) -> &RenderPipeline {
        &self.pipeline
    }
}

impl AudioRenderCallback for AudioGraph {
    fn render(&mut self, _sample_time_start: SampleTime, out_l: &mut [f32], out_r: &mut [f32]) {
        self.pipeline.process(Instant::now());
        self.mixer.mix(out_l, out_r);
    }
}
