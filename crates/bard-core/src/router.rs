use crate::audio_params::AudioParams;
use crate::contract::contract_violation;
use crate::flags::PerformanceFlags;
use crate::render::RenderRequest;
use bard_ports::midi::{NoteEvent, NoteKind, NoteOrigin};
use bard_ports::synth::{NoteSynthesizer, SynthError};
use parking_lot::Mutex;
use rtrb::Producer;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Note-on reached the synth and a render was queued.
    Triggered,
    /// Note-on accepted but no audio will come of it (no bank, full queue).
    Silent,
    Released,
    NotEquipped,
    /// Live input while a song is playing.
    Suppressed,
    Rejected,
}

/// Trigger path shared by live input and song playback.
///
/// `deliver` runs on whichever thread produced the event. It only touches
/// atomics, the synth's trigger queue and the render-request ring.
pub struct NoteRouter {
    synth: Arc<dyn NoteSynthesizer>,
    flags: Arc<PerformanceFlags>,
    params: Arc<AudioParams>,
    requests: Mutex<Producer<RenderRequest>>,
    note_hold: Duration,
}

impl NoteRouter {
    pub fn new(
        synth: Arc<dyn NoteSynthesizer>,
        flags: Arc<PerformanceFlags>,
        params: Arc<AudioParams>,
        requests: Producer<RenderRequest>,
        note_hold: Duration,
    ) -> Self {
        Self {
            synth,
            flags,
            params,
            requests: Mutex::new(requests),
            note_hold,
        }
    }

    pub fn deliver(&self, event: NoteEvent) -> Delivery {
        if !self.flags.has_instrument_equipped() {
            return Delivery::NotEquipped;
        }
        if event.origin == NoteOrigin::Live && self.flags.session_active() {
            return Delivery::Suppressed;
        }

        let preset = self.params.preset();
        match event.kind {
            NoteKind::On => {
                let triggered = self
                    .synth
                    .note_on(event.note, event.normalized_velocity(), preset);
                if let Err(err) = triggered {
                    if !self.tolerate(&err) {
                        return Delivery::Rejected;
                    }
                    self.flags.arm_note_deadline(event.at + self.note_hold);
                    return Delivery::Silent;
                }
                self.flags.arm_note_deadline(event.at + self.note_hold);

                let request = RenderRequest {
                    note: event.note,
                    velocity: event.velocity,
                    at: event.at,
                };
                if self.requests.lock().push(request).is_err() {
                    tracing::debug!(note = event.note, "render queue full, note not rendered");
                    return Delivery::Silent;
                }
                Delivery::Triggered
            }
            NoteKind::Off => {
                if let Err(err) = self.synth.note_off(event.note, preset) {
                    if !self.tolerate(&err) {
                        return Delivery::Rejected;
                    }
                }
                if self.flags.note_playing(event.at) {
                    self.flags.arm_note_deadline(event.at + self.note_hold);
                }
                Delivery::Released
            }
        }
    }

    /// A missing bank still counts as playing; a disposed synth does not.
    fn tolerate(&self, err: &SynthError) -> bool {
        match err {
            SynthError::UseAfterDispose => {
                contract_violation("note delivered after the synthesizer was disposed", err);
                false
            }
            SynthError::NotLoaded => true,
            SynthError::LoadFailure(_) | SynthError::Backend(_) => {
                tracing::debug!(error = %err, "synth trigger failed");
                true
            }
        }
    }
}
