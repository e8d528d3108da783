use bard_ports::types::Volume01;
use std::sync::atomic::{AtomicU32, Ordering};

/// Values read on the trigger and render paths, written from the control thread.
#[derive(Debug)]
pub struct AudioParams {
    volume: AtomicU32,
    preset: AtomicU32,
}

impl AudioParams {
    pub fn new(volume: Volume01, preset: u16) -> Self {
        Self {
            volume: AtomicU32::new(volume.get().to_bits()),
            preset: AtomicU32::new(preset as u32),
        }
    }

    pub fn set_volume(&self, volume: Volume01) {
        self.volume.store(volume.get().to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub fn set_preset(&self, preset: u16) {
        self.preset.store(preset as u32, Ordering::Relaxed);
    }

    pub fn preset(&self) -> u16 {
        self.preset.load(Ordering::Relaxed) as u16
    }
}
