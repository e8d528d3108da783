use crate::router::NoteRouter;
use bard_ports::midi::{InputError, NoteEvent, NoteEventCallback, NoteInputPort, NoteInputStream};
use bard_ports::types::{DeviceId, NoteInputDevice};
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("input device unavailable: {device}: {reason}")]
    DeviceUnavailable { device: DeviceId, reason: String },
    #[error("input backend error: {0}")]
    Backend(#[from] InputError),
}

struct Connection {
    device: DeviceId,
    stream: Box<dyn NoteInputStream>,
}

/// Owns at most one live note producer and wires it to the trigger path.
pub struct EventSource {
    port: Box<dyn NoteInputPort>,
    router: Arc<NoteRouter>,
    connection: Option<Connection>,
}

impl EventSource {
    pub fn new(port: Box<dyn NoteInputPort>, router: Arc<NoteRouter>) -> Self {
        Self {
            port,
            router,
            connection: None,
        }
    }

    pub fn list_devices(&self) -> Result<Vec<NoteInputDevice>, SourceError> {
        Ok(self.port.list_inputs()?)
    }

    pub fn connected_device(&self) -> Option<&DeviceId> {
        self.connection.as_ref().map(|connection| &connection.device)
    }

    /// Connecting to the device that is already connected is a no-op. The
    /// previous connection is closed only once the new device has opened.
    pub fn connect(&mut self, device: &DeviceId) -> Result<(), SourceError> {
        if self.connected_device() == Some(device) {
            return Ok(());
        }
        let stream = self.open(device)?;
        self.disconnect();
        self.attach(device, stream);
        Ok(())
    }

    /// Always reopens. On failure no producer is left connected.
    pub fn reconnect(&mut self, device: &DeviceId) -> Result<(), SourceError> {
        self.disconnect();
        match self.open(device) {
            Ok(stream) => {
                self.attach(device, stream);
                tracing::info!(device = %device, "reconnected note input");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(device = %device, "reconnect failed, continuing without note input");
                Err(err)
            }
        }
    }

    /// Returns true if a producer was connected.
    pub fn disconnect(&mut self) -> bool {
        let Some(connection) = self.connection.take() else {
            return false;
        };
        connection.stream.close();
        tracing::info!(device = %connection.device, "note input disconnected");
        true
    }

    fn attach(&mut self, device: &DeviceId, stream: Box<dyn NoteInputStream>) {
        tracing::info!(device = %device, "note input connected");
        self.connection = Some(Connection {
            device: device.clone(),
            stream,
        });
    }

    fn open(&self, device: &DeviceId) -> Result<Box<dyn NoteInputStream>, SourceError> {
        let router = self.router.clone();
        let cb: NoteEventCallback = Arc::new(move |event: NoteEvent| {
            router.deliver(event);
        });

        self.port.open_input(device, cb).map_err(|err| {
            tracing::warn!(device = %device, error = %err, "note input unavailable");
            SourceError::DeviceUnavailable {
                device: device.clone(),
                reason: err.to_string(),
            }
        })
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        self.disconnect();
    }
}
