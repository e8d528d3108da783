use bard_ports::types::{DeviceId, NoteInputDevice, Volume01};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Command {
    Equip { equipped: bool },
    ToggleManual,
    /// `None` plays the active song file.
    PlaySong { path: Option<String> },
    StopSong,
    SetVolume { volume: Volume01 },
    SetPreset { preset: u16 },
    SetSoundBank { path: String },
    SetSongFile { path: String },
    ListInputDevices,
    ConnectDevice { device_id: DeviceId },
    ReconnectDevice { device_id: DeviceId },
    DisconnectDevice,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    EquippedChanged { equipped: bool },
    PerformingChanged { performing: bool },
    NotePlayingChanged { note_playing: bool },
    ToggleRejected,
    SoundBankLoaded { name: String, preset_count: usize },
    SoundBankFailed { reason: String },
    SongStarted { title: Option<String> },
    SongStopped,
    SongFinished { title: Option<String> },
    InputDevicesUpdated { devices: Vec<NoteInputDevice> },
    DeviceConnected { device_id: DeviceId },
    DeviceDisconnected,
    DeviceUnavailable { device_id: DeviceId, reason: String },
}
