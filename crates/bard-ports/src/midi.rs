use crate::types::*;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteKind {
    On,
    Off,
}

/// Which producer an event came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteOrigin {
    Live,
    Playback,
}

/// One note-on or note-off, stamped with the instant the producer saw it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NoteEvent {
    pub note: u8,
    pub velocity: u8,
    pub kind: NoteKind,
    pub origin: NoteOrigin,
    pub at: Instant,
}

impl NoteEvent {
    pub fn note_on(note: u8, velocity: u8, origin: NoteOrigin, at: Instant) -> Self {
        Self {
            note: note.min(127),
            velocity: velocity.min(127),
            kind: NoteKind::On,
            origin,
            at,
        }
    }

    pub fn note_off(note: u8, origin: NoteOrigin, at: Instant) -> Self {
        Self {
            note: note.min(127),
            velocity: 0,
            kind: NoteKind::Off,
            origin,
            at,
        }
    }

    /// Velocity mapped onto 0.0..=1.0.
    pub fn normalized_velocity(&self) -> f32 {
        self.velocity as f32 / 127.0
    }
}

#[derive(thiserror::Error, Debug)]
pub enum InputError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Note input stream handle: close releases the device.
pub trait NoteInputStream: Send {
    fn close(self: Box<Self>);
}

pub type NoteEventCallback = Arc<dyn Fn(NoteEvent) + Send + Sync + 'static>;

pub trait NoteInputPort: Send + Sync {
    fn list_inputs(&self) -> Result<Vec<NoteInputDevice>, InputError>;

    /// Open input stream: implementation invokes cb from its own delivery thread.
    fn open_input(
        &self,
        device_id: &DeviceId,
        cb: NoteEventCallback,
    ) -> Result<Box<dyn NoteInputStream>, InputError>;
}
