use crate::audio_params::AudioParams;
use crate::contract::contract_violation;
use crate::event_source::{EventSource, SourceError};
use crate::flags::PerformanceFlags;
use crate::ipc::{Command, Event};
use crate::performance::{PerformanceState, PerformanceStateMachine, ToggleOutcome, Transition};
use crate::playback::{PlaybackError, PlaybackNotice, SongPlayer};
use crate::render::{PipelineControl, RenderPipeline, RenderRequest};
use crate::router::NoteRouter;
use crate::settings::EngineSettings;
use bard_domain_song::{import_song_path, Song, SongImportError};
use bard_ports::audio::AudioSink;
use bard_ports::midi::NoteInputPort;
use bard_ports::synth::{NoteSynthesizer, SoundBankInfo, SynthError};
use bard_ports::types::{DeviceId, NoteInputDevice, Volume01};
use rtrb::RingBuffer;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Synth(#[from] SynthError),
    #[error(transparent)]
    Playback(#[from] PlaybackError),
    #[error("song import failed: {0}")]
    SongImport(#[from] SongImportError),
    #[error("no song file selected")]
    NoSongSelected,
    #[error("no instrument equipped")]
    NotEquipped,
    #[error("engine has been shut down")]
    Disposed,
}

/// Wires the event source, trigger path, render pipeline, state machine and
/// song player together behind the host-facing surface.
///
/// Control calls and `tick` belong to the host's polling thread. The render
/// pipeline is handed to the audio thread with `take_render_pipeline`.
pub struct Engine {
    settings: EngineSettings,
    flags: Arc<PerformanceFlags>,
    params: Arc<AudioParams>,
    synth: Arc<dyn NoteSynthesizer>,
    router: Arc<NoteRouter>,
    source: EventSource,
    machine: PerformanceStateMachine,
    player: SongPlayer,
    pipeline: Option<RenderPipeline>,
    pipeline_control: Arc<PipelineControl>,
    song_path: Option<PathBuf>,
    events: VecDeque<Event>,
    note_playing: bool,
    disposed: bool,
}

impl Engine {
    /// Builds the engine, then loads the configured sound bank and opens the
    /// configured input device. Either may fail; the engine still comes up.
    pub fn new(
        settings: EngineSettings,
        input_port: Box<dyn NoteInputPort>,
        synth: Arc<dyn NoteSynthesizer>,
        sink: Arc<dyn AudioSink>,
    ) -> Self {
        let flags = Arc::new(PerformanceFlags::new(Instant::now()));
        let params = Arc::new(AudioParams::new(settings.volume, settings.preset));

        let (requests_tx, requests_rx) =
            RingBuffer::<RenderRequest>::new(settings.pool_capacity.max(1) * 4);
        let router = Arc::new(NoteRouter::new(
            synth.clone(),
            flags.clone(),
            params.clone(),
            requests_tx,
            settings.timing.note_hold(),
        ));
        let pipeline = RenderPipeline::new(
            &settings.render,
            settings.pool_capacity,
            synth.clone(),
            sink,
            params.clone(),
            requests_rx,
        );
        let pipeline_control = pipeline.control();

        let mut engine = Self {
            source: EventSource::new(input_port, router.clone()),
            machine: PerformanceStateMachine::new(settings.timing.debounce()),
            player: SongPlayer::new(flags.clone()),
            song_path: settings.song_path.as_ref().map(PathBuf::from),
            settings,
            flags,
            params,
            synth,
            router,
            pipeline: Some(pipeline),
            pipeline_control,
            events: VecDeque::new(),
            note_playing: false,
            disposed: false,
        };

        if let Some(path) = engine.settings.sound_bank_path.clone() {
            let _ = engine.load_sound_bank(Path::new(&path));
        }
        if engine.settings.auto_connect {
            if let Some(device) = engine.settings.input_device.clone() {
                let _ = engine.connect_device(&device);
            }
        }
        engine
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn flags(&self) -> Arc<PerformanceFlags> {
        self.flags.clone()
    }

    /// Trigger path for hosts that produce note events themselves.
    pub fn router(&self) -> Arc<NoteRouter> {
        self.router.clone()
    }

    pub fn pipeline_control(&self) -> Arc<PipelineControl> {
        self.pipeline_control.clone()
    }

    /// Hands the render pipeline to the audio thread. Only the first call
    /// returns it.
    pub fn take_render_pipeline(&mut self) -> Option<RenderPipeline> {
        self.pipeline.take()
    }

    pub fn performing(&self) -> bool {
        self.flags.performing()
    }

    pub fn performance_state(&self) -> PerformanceState {
        self.machine.state()
    }

    pub fn note_playing(&self, now: Instant) -> bool {
        self.flags.note_playing(now)
    }

    pub fn has_instrument_equipped(&self) -> bool {
        self.flags.has_instrument_equipped()
    }

    pub fn is_song_playing(&self) -> bool {
        self.player.is_active()
    }

    pub fn connected_device(&self) -> Option<&DeviceId> {
        self.source.connected_device()
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    pub fn handle_command(&mut self, cmd: Command, now: Instant) -> Result<(), EngineError> {
        match cmd {
            Command::Equip { equipped } => self.equip(equipped)?,
            Command::ToggleManual => {
                self.request_manual_toggle(now)?;
            }
            Command::PlaySong { path } => {
                self.request_play_song(path.as_deref().map(Path::new), now)?;
            }
            Command::StopSong => {
                self.request_stop_song()?;
            }
            Command::SetVolume { volume } => self.set_volume(volume)?,
            Command::SetPreset { preset } => self.set_active_preset(preset)?,
            Command::SetSoundBank { path } => {
                self.set_active_sound_bank(Path::new(&path))?;
            }
            Command::SetSongFile { path } => self.set_active_song_file(Path::new(&path))?,
            Command::ListInputDevices => {
                self.list_input_devices()?;
            }
            Command::ConnectDevice { device_id } => self.connect_device(&device_id)?,
            Command::ReconnectDevice { device_id } => self.reconnect_device(&device_id)?,
            Command::DisconnectDevice => {
                self.disconnect_device()?;
            }
        }
        Ok(())
    }

    pub fn equip(&mut self, equipped: bool) -> Result<(), EngineError> {
        self.ensure_live()?;
        if !self.flags.set_equipped(equipped) {
            return Ok(());
        }
        tracing::info!(equipped, "instrument equip state changed");
        self.events.push_back(Event::EquippedChanged { equipped });

        if !equipped {
            if self.player.stop() {
                tracing::info!("song playback stopped on unequip");
                self.events.push_back(Event::SongStopped);
            }
            let transition = self.machine.reset(&self.flags);
            self.emit_transition(transition);
            self.silence();
        }
        Ok(())
    }

    pub fn request_manual_toggle(&mut self, now: Instant) -> Result<ToggleOutcome, EngineError> {
        self.ensure_live()?;
        let outcome = self.machine.request_manual_toggle(now, &self.flags);
        match outcome {
            ToggleOutcome::Started => self.emit_transition(Some(Transition::Started)),
            ToggleOutcome::Stopped => self.emit_transition(Some(Transition::Stopped)),
            ToggleOutcome::Debounced => self.events.push_back(Event::ToggleRejected),
            ToggleOutcome::NotEquipped => {
                tracing::debug!("manual toggle ignored, no instrument equipped");
            }
        }
        Ok(outcome)
    }

    /// Plays `path`, or the active song file when `path` is `None`.
    pub fn request_play_song(&mut self, path: Option<&Path>, now: Instant) -> Result<(), EngineError> {
        self.ensure_playable()?;

        let path = match path {
            Some(path) => path.to_path_buf(),
            None => self.song_path.clone().ok_or(EngineError::NoSongSelected)?,
        };
        let song = import_song_path(&path).map_err(|err| {
            tracing::warn!(path = %path.display(), error = %err, "song file could not be read");
            err
        })?;
        self.play_song(song, now)
    }

    pub fn play_song(&mut self, song: Song, now: Instant) -> Result<(), EngineError> {
        self.ensure_playable()?;

        if self.machine.state() == PerformanceState::Performing {
            let transition = self.machine.reset(&self.flags);
            self.emit_transition(transition);
            self.silence();
        }

        let title = song.meta.title.clone();
        let notes = song.note_on_count();
        self.player.start(song, self.router.clone(), now)?;
        tracing::info!(title = title.as_deref().unwrap_or("untitled"), notes, "song playback started");
        self.events.push_back(Event::SongStarted { title });
        Ok(())
    }

    /// Returns false when no song was playing.
    pub fn request_stop_song(&mut self) -> Result<bool, EngineError> {
        self.ensure_live()?;
        if !self.player.stop() {
            tracing::warn!("no song is currently playing");
            return Ok(false);
        }
        tracing::info!("song playback stopped");
        let transition = self.machine.stop(&self.flags);
        self.emit_transition(transition);
        self.silence();
        self.events.push_back(Event::SongStopped);
        Ok(true)
    }

    pub fn set_volume(&mut self, volume: Volume01) -> Result<(), EngineError> {
        self.ensure_live()?;
        let volume = Volume01::new(volume.get());
        self.params.set_volume(volume);
        self.settings.volume = volume;
        Ok(())
    }

    pub fn set_active_preset(&mut self, preset: u16) -> Result<(), EngineError> {
        self.ensure_live()?;
        self.params.set_preset(preset);
        self.settings.preset = preset;
        Ok(())
    }

    /// Reloads the synthesizer from `path`. Held buffers are flushed first so
    /// nothing from the old bank keeps playing.
    pub fn set_active_sound_bank(&mut self, path: &Path) -> Result<SoundBankInfo, EngineError> {
        self.ensure_live()?;
        self.pipeline_control.request_flush();
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.flush();
        }
        self.load_sound_bank(path)
    }

    pub fn set_active_song_file(&mut self, path: &Path) -> Result<(), EngineError> {
        self.ensure_live()?;
        self.song_path = Some(path.to_path_buf());
        self.settings.song_path = Some(path.display().to_string());
        Ok(())
    }

    pub fn list_input_devices(&mut self) -> Result<Vec<NoteInputDevice>, EngineError> {
        self.ensure_live()?;
        let devices = self.source.list_devices()?;
        self.events.push_back(Event::InputDevicesUpdated {
            devices: devices.clone(),
        });
        Ok(devices)
    }

    pub fn connect_device(&mut self, device: &DeviceId) -> Result<(), EngineError> {
        self.ensure_live()?;
        let result = self.source.connect(device);
        self.report_connection(device, result)
    }

    pub fn reconnect_device(&mut self, device: &DeviceId) -> Result<(), EngineError> {
        self.ensure_live()?;
        let result = self.source.reconnect(device);
        self.report_connection(device, result)
    }

    /// Returns false when nothing was connected.
    pub fn disconnect_device(&mut self) -> Result<bool, EngineError> {
        self.ensure_live()?;
        let disconnected = self.source.disconnect();
        if disconnected {
            self.events.push_back(Event::DeviceDisconnected);
        }
        Ok(disconnected)
    }

    /// Polling-domain step: collects playback notices, notices the note
    /// window closing and advances the state machine.
    pub fn tick(&mut self, now: Instant) {
        if self.disposed {
            return;
        }

        while let Some(notice) = self.player.poll_notice() {
            match notice {
                PlaybackNotice::Finished { title } => {
                    let transition = self.machine.stop(&self.flags);
                    self.emit_transition(transition);
                    self.events.push_back(Event::SongFinished { title });
                }
            }
        }

        let note_playing = self.flags.note_playing(now);
        if note_playing != self.note_playing {
            self.note_playing = note_playing;
            if !note_playing {
                tracing::debug!("no note played recently, releasing voices");
                self.silence();
            }
            self.events.push_back(Event::NotePlayingChanged { note_playing });
        }

        let transition = self.machine.tick(now, &self.flags);
        self.emit_transition(transition);
    }

    /// Stops playback, closes the input device, returns every buffer and
    /// disposes the synthesizer. Calling it again does nothing.
    pub fn shutdown(&mut self) {
        if self.disposed {
            return;
        }
        self.player.stop();
        self.source.disconnect();
        let transition = self.machine.reset(&self.flags);
        self.emit_transition(transition);
        self.flags.set_equipped(false);

        self.pipeline_control.request_flush();
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.flush();
        }
        if let Err(err) = self.synth.dispose() {
            contract_violation("synthesizer disposed twice", &err);
        }
        self.disposed = true;
        tracing::info!("engine shut down");
    }

    fn load_sound_bank(&mut self, path: &Path) -> Result<SoundBankInfo, EngineError> {
        let render = self.settings.render;
        match self.synth.load(path, render.sample_rate_hz, render.channels) {
            Ok(info) => {
                tracing::info!(bank = %info.name, presets = info.preset_count, "sound bank loaded");
                self.settings.sound_bank_path = Some(path.display().to_string());
                self.events.push_back(Event::SoundBankLoaded {
                    name: info.name.clone(),
                    preset_count: info.preset_count,
                });
                Ok(info)
            }
            Err(err) => {
                tracing::error!(path = %path.display(), error = %err, "failed to load sound bank");
                self.events.push_back(Event::SoundBankFailed {
                    reason: err.to_string(),
                });
                Err(err.into())
            }
        }
    }

    fn report_connection(
        &mut self,
        device: &DeviceId,
        result: Result<(), SourceError>,
    ) -> Result<(), EngineError> {
        match result {
            Ok(()) => {
                self.settings.input_device = Some(device.clone());
                self.events.push_back(Event::DeviceConnected {
                    device_id: device.clone(),
                });
                Ok(())
            }
            Err(err) => {
                let reason = match &err {
                    SourceError::DeviceUnavailable { reason, .. } => reason.clone(),
                    other => other.to_string(),
                };
                self.events.push_back(Event::DeviceUnavailable {
                    device_id: device.clone(),
                    reason,
                });
                Err(err.into())
            }
        }
    }

    fn ensure_playable(&self) -> Result<(), EngineError> {
        self.ensure_live()?;
        if !self.flags.has_instrument_equipped() {
            tracing::warn!("song requested with no instrument equipped");
            return Err(EngineError::NotEquipped);
        }
        if self.player.is_active() {
            tracing::warn!("a song is already playing");
            return Err(PlaybackError::AlreadyPlaying.into());
        }
        Ok(())
    }

    fn ensure_live(&self) -> Result<(), EngineError> {
        if self.disposed {
            let err = EngineError::Disposed;
            contract_violation("engine used after shutdown", &err);
            return Err(err);
        }
        Ok(())
    }

    fn silence(&self) {
        match self.synth.all_notes_off() {
            Ok(()) | Err(SynthError::NotLoaded) => {}
            Err(err) => tracing::debug!(error = %err, "all-notes-off failed"),
        }
    }

    fn emit_transition(&mut self, transition: Option<Transition>) {
        let Some(transition) = transition else {
            return;
        };
        let performing = transition == Transition::Started;
        tracing::debug!(performing, "performance state changed");
        self.events.push_back(Event::PerformingChanged { performing });
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
