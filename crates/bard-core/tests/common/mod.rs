#![allow(dead_code)]

use bard_ports::audio::AudioSink;
use bard_ports::midi::{InputError, NoteEvent, NoteEventCallback, NoteInputPort, NoteInputStream};
use bard_ports::types::{DeviceId, NoteInputDevice, PcmBuffer};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Debug)]
pub struct PlayedBuffer {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub priority: u8,
    pub gain: f32,
}

#[derive(Default)]
pub struct RecordingSink {
    pub played: Mutex<Vec<PlayedBuffer>>,
    pub stops: AtomicUsize,
}

impl RecordingSink {
    pub fn played(&self) -> Vec<PlayedBuffer> {
        self.played.lock().clone()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl AudioSink for RecordingSink {
    fn play(&self, buffer: &PcmBuffer, priority: u8, gain: f32) {
        self.played.lock().push(PlayedBuffer {
            samples: buffer.samples().to_vec(),
            channels: buffer.channels(),
            priority,
            gain,
        });
    }

    fn stop_all(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeInputState {
    /// Open streams in opening order; the newest one receives `emit`.
    active: Vec<(usize, DeviceId, NoteEventCallback)>,
    opened: usize,
    closed: usize,
}

/// In-memory note producer. Clones share state, so a test keeps one clone to
/// push events after handing the other to the code under test.
#[derive(Clone, Default)]
pub struct FakeInputPort {
    devices: Vec<String>,
    state: Arc<Mutex<FakeInputState>>,
}

impl FakeInputPort {
    pub fn with_devices(names: &[&str]) -> Self {
        Self {
            devices: names.iter().map(|name| name.to_string()).collect(),
            state: Arc::default(),
        }
    }

    /// Delivers `event` through the open connection, as the device thread would.
    pub fn emit(&self, event: NoteEvent) -> bool {
        let cb = self.state.lock().active.last().map(|(_, _, cb)| cb.clone());
        match cb {
            Some(cb) => {
                (cb)(event);
                true
            }
            None => false,
        }
    }

    pub fn connected(&self) -> Option<DeviceId> {
        self.state.lock().active.last().map(|(_, id, _)| id.clone())
    }

    pub fn opened(&self) -> usize {
        self.state.lock().opened
    }

    pub fn closed(&self) -> usize {
        self.state.lock().closed
    }
}

struct FakeStream {
    key: usize,
    state: Arc<Mutex<FakeInputState>>,
}

impl NoteInputStream for FakeStream {
    fn close(self: Box<Self>) {
        let mut state = self.state.lock();
        state.active.retain(|(key, _, _)| *key != self.key);
        state.closed += 1;
    }
}

impl NoteInputPort for FakeInputPort {
    fn list_inputs(&self) -> Result<Vec<NoteInputDevice>, InputError> {
        Ok(self
            .devices
            .iter()
            .map(|name| NoteInputDevice {
                id: DeviceId(name.clone()),
                name: name.clone(),
                is_available: true,
            })
            .collect())
    }

    fn open_input(
        &self,
        device_id: &DeviceId,
        cb: NoteEventCallback,
    ) -> Result<Box<dyn NoteInputStream>, InputError> {
        if !self.devices.iter().any(|name| name == &device_id.0) {
            return Err(InputError::DeviceNotFound(device_id.to_string()));
        }
        let mut state = self.state.lock();
        let key = state.opened;
        state.active.push((key, device_id.clone(), cb));
        state.opened += 1;
        Ok(Box::new(FakeStream {
            key,
            state: self.state.clone(),
        }))
    }
}

/// Writes a placeholder bank file that `SimpleSynth` accepts.
pub fn temp_bank(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let path = std::env::temp_dir().join(format!(
        "bard-{tag}-{}-{nanos}.sf2",
        std::process::id()
    ));
    std::fs::write(&path, b"sine").expect("write temp bank");
    path
}
