use bard_ports::midi::{
    InputError, NoteEvent, NoteEventCallback, NoteInputPort, NoteInputStream, NoteOrigin,
};
use bard_ports::types::{DeviceId, NoteInputDevice};
use midir::{Ignore, MidiInput};
use std::time::Instant;

pub struct MidirNoteInputPort {
    client_name: String,
}

impl MidirNoteInputPort {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }

    fn create_midi_in(&self) -> Result<MidiInput, InputError> {
        let midi_in = MidiInput::new(&self.client_name)
            .map_err(|e| InputError::Backend(e.to_string()))?;
        Ok(midi_in)
    }

    fn device_id(index: usize, name: &str) -> DeviceId {
        DeviceId(format!("midir:{}:{}", index, name))
    }

    /// Matches either the full `midir:<index>:<name>` id or a bare port name.
    fn matches(id: &DeviceId, wanted: &DeviceId, name: &str) -> bool {
        id == wanted || wanted.0 == name
    }
}

/// Decode one raw MIDI message into a note event. Anything that is not a
/// note-on or note-off (on any channel) yields `None`.
pub fn parse_message(message: &[u8], at: Instant) -> Option<NoteEvent> {
    if message.len() < 3 {
        return None;
    }
    let status = message[0] & 0xF0;
    let note = message[1] & 0x7F;
    let velocity = message[2] & 0x7F;
    match status {
        0x80 => Some(NoteEvent::note_off(note, NoteOrigin::Live, at)),
        0x90 if velocity == 0 => Some(NoteEvent::note_off(note, NoteOrigin::Live, at)),
        0x90 => Some(NoteEvent::note_on(note, velocity, NoteOrigin::Live, at)),
        _ => None,
    }
}

impl Default for MidirNoteInputPort {
    fn default() -> Self {
        Self::new("Bard")
    }
}

pub struct MidirNoteInputStream {
    connection: Option<midir::MidiInputConnection<NoteEventCallback>>,
}

impl NoteInputStream for MidirNoteInputStream {
    fn close(mut self: Box<Self>) {
        if let Some(connection) = self.connection.take() {
            let _ = connection.close();
        }
    }
}

impl NoteInputPort for MidirNoteInputPort {
    fn list_inputs(&self) -> Result<Vec<NoteInputDevice>, InputError> {
        let midi_in = self.create_midi_in()?;
        let ports = midi_in.ports();
        let mut devices = Vec::new();

        for (index, port) in ports.iter().enumerate() {
            let name = midi_in
                .port_name(port)
                .unwrap_or_else(|_| "Unknown Input".to_string());
            devices.push(NoteInputDevice {
                id: Self::device_id(index, &name),
                name,
                is_available: true,
            });
        }

        Ok(devices)
    }

    fn open_input(
        &self,
        device_id: &DeviceId,
        cb: NoteEventCallback,
    ) -> Result<Box<dyn NoteInputStream>, InputError> {
        let mut midi_in = self.create_midi_in()?;
        midi_in.ignore(Ignore::All);

        let ports = midi_in.ports();
        let mut selected = None;
        for (index, port) in ports.iter().enumerate() {
            let name = midi_in
                .port_name(port)
                .unwrap_or_else(|_| "Unknown Input".to_string());
            let id = Self::device_id(index, &name);
            if Self::matches(&id, device_id, &name) {
                selected = Some(port.clone());
                break;
            }
        }

        let port = selected.ok_or_else(|| InputError::DeviceNotFound(device_id.to_string()))?;

        let connection = midi_in
            .connect(
                &port,
                "bard-note-input",
                move |_stamp, message, callback| {
                    if let Some(event) = parse_message(message, Instant::now()) {
                        (callback)(event);
                    }
                },
                cb,
            )
            .map_err(|e| InputError::DeviceUnavailable(e.to_string()))?;

        tracing::debug!(device = %device_id, "midir connection opened");
        Ok(Box::new(MidirNoteInputStream {
            connection: Some(connection),
        }))
    }
}
