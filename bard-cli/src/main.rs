//! bard: play a MIDI keyboard or a song file through a SoundFont and report
//! when the player is performing.
//!
//! Engine events are written to stdout as JSON lines. Commands are read from
//! stdin, either as JSON (`{"type":"ToggleManual"}`) or as one-letter
//! shortcuts:
//!
//! - `p`: play the selected song, or stop it if one is running
//! - `t`: manual performance toggle
//! - `e`: equip or unequip the instrument
//! - `q`: quit

use anyhow::{bail, Context, Result};
use bard_core::{AudioGraph, Command, Engine, EngineSettings, Mixer};
use bard_infra_audio_cpal::CpalAudioOutputPort;
use bard_infra_midi_midir::MidirNoteInputPort;
use bard_infra_synth_rustysynth::RustySynth;
use bard_ports::audio::AudioOutputPort;
use bard_ports::midi::NoteInputPort;
use bard_ports::types::{AudioConfig, AudioOutputDevice, DeviceId};
use clap::Parser;
use parking_lot::Mutex;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(16);

/// Live MIDI and song playback with a debounced performance signal
#[derive(Parser)]
#[command(name = "bard")]
#[command(version)]
struct Cli {
    /// Settings file (JSON)
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// SoundFont to load instead of the one in the settings file
    #[arg(long)]
    sound_bank: Option<PathBuf>,

    /// Song file played by the `p` command
    #[arg(long)]
    song: Option<PathBuf>,

    /// MIDI input to connect on startup
    #[arg(short, long)]
    device: Option<String>,

    /// Audio output device (default: the host's default output)
    #[arg(long)]
    audio_device: Option<String>,

    /// Print MIDI inputs and audio outputs, then exit
    #[arg(long)]
    list_devices: bool,
}

enum Input {
    Engine(Command),
    PlayOrStop,
    ToggleEquip,
    Quit,
}

fn parse_input(line: &str) -> Result<Option<Input>> {
    let line = line.trim();
    if line.starts_with('{') {
        let command: Command = serde_json::from_str(line).context("invalid command")?;
        return Ok(Some(Input::Engine(command)));
    }
    let input = match line {
        "" => return Ok(None),
        "p" => Input::PlayOrStop,
        "t" => Input::Engine(Command::ToggleManual),
        "e" => Input::ToggleEquip,
        "q" => Input::Quit,
        other => bail!("unknown command: {other}"),
    };
    Ok(Some(input))
}

fn load_settings(cli: &Cli) -> Result<EngineSettings> {
    let mut settings = match &cli.settings {
        Some(path) => EngineSettings::from_path(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?,
        None => EngineSettings::default(),
    };
    if let Some(path) = &cli.sound_bank {
        settings.sound_bank_path = Some(path.display().to_string());
    }
    if let Some(path) = &cli.song {
        settings.song_path = Some(path.display().to_string());
    }
    if let Some(device) = &cli.device {
        settings.input_device = Some(DeviceId(device.clone()));
        settings.auto_connect = true;
    }
    Ok(settings)
}

fn list_devices(midi: &dyn NoteInputPort, audio: &dyn AudioOutputPort) -> Result<()> {
    println!("MIDI inputs:");
    for device in midi.list_inputs()? {
        println!("  {}", device.name);
    }
    println!("Audio outputs:");
    for device in audio.list_outputs()? {
        println!(
            "  {} ({} Hz, {} ch)",
            device.name, device.default_config.sample_rate_hz, device.default_config.channels
        );
    }
    Ok(())
}

fn select_output(audio: &dyn AudioOutputPort, name: Option<&str>) -> Result<AudioOutputDevice> {
    match name {
        Some(name) => audio
            .list_outputs()?
            .into_iter()
            .find(|device| device.name == name || device.id.0 == name)
            .with_context(|| format!("audio output not found: {name}")),
        None => audio.default_output()?.context("no default audio output"),
    }
}

fn spawn_stdin_reader(inputs: Arc<Mutex<Vec<Input>>>, quit: Arc<AtomicBool>) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match parse_input(&line) {
                Ok(Some(Input::Quit)) => break,
                Ok(Some(input)) => inputs.lock().push(input),
                Ok(None) => {}
                Err(err) => tracing::warn!("{err:#}"),
            }
        }
        quit.store(true, Ordering::Release);
    });
}

fn apply_input(engine: &mut Engine, input: Input, now: Instant) {
    let result = match input {
        Input::Engine(command) => engine.handle_command(command, now),
        Input::PlayOrStop if engine.is_song_playing() => engine.request_stop_song().map(|_| ()),
        Input::PlayOrStop => engine.request_play_song(None, now),
        Input::ToggleEquip => {
            let equipped = engine.has_instrument_equipped();
            engine.equip(!equipped)
        }
        Input::Quit => Ok(()),
    };
    if let Err(err) = result {
        tracing::warn!(error = %err, "command failed");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let midi_port = MidirNoteInputPort::new("Bard");
    let audio_port = CpalAudioOutputPort::new();
    if cli.list_devices {
        return list_devices(&midi_port, &audio_port);
    }

    let settings = load_settings(&cli)?;
    let render = settings.render;
    let output = select_output(&audio_port, cli.audio_device.as_deref())?;
    tracing::info!(device = %output.name, "using audio output");

    let mixer = Arc::new(Mixer::new(
        settings.pool_capacity,
        render.frames_per_buffer() * usize::from(render.channels),
    ));
    let mut engine = Engine::new(
        settings,
        Box::new(midi_port),
        Arc::new(RustySynth::default()),
        mixer.clone(),
    );
    let pipeline = engine
        .take_render_pipeline()
        .context("render pipeline already taken")?;

    let config = AudioConfig {
        sample_rate_hz: render.sample_rate_hz,
        channels: output.default_config.channels,
        buffer_size_frames: None,
    };
    let stream = audio_port
        .open_output(&output.id, config, Box::new(AudioGraph::new(pipeline, mixer)))
        .context("failed to open audio output")?;

    engine.equip(true)?;

    let inputs = Arc::new(Mutex::new(Vec::new()));
    let quit = Arc::new(AtomicBool::new(false));
    spawn_stdin_reader(inputs.clone(), quit.clone());

    let stdout = io::stdout();
    while !quit.load(Ordering::Acquire) {
        let now = Instant::now();
        let pending = std::mem::take(&mut *inputs.lock());
        for input in pending {
            apply_input(&mut engine, input, now);
        }
        engine.tick(now);

        let mut out = stdout.lock();
        for event in engine.drain_events() {
            serde_json::to_writer(&mut out, &event)?;
            writeln!(out)?;
        }
        out.flush()?;
        drop(out);

        thread::sleep(POLL_INTERVAL);
    }

    engine.shutdown();
    stream.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortcuts_and_json_lines_parse() {
        assert!(matches!(parse_input("p"), Ok(Some(Input::PlayOrStop))));
        assert!(matches!(
            parse_input(" t "),
            Ok(Some(Input::Engine(Command::ToggleManual)))
        ));
        assert!(matches!(parse_input(""), Ok(None)));
        assert!(matches!(
            parse_input(r#"{"type":"SetPreset","payload":{"preset":3}}"#),
            Ok(Some(Input::Engine(Command::SetPreset { preset: 3 })))
        ));
        assert!(parse_input("x").is_err());
        assert!(parse_input("{not json").is_err());
    }

    #[test]
    fn command_line_overrides_settings() {
        let cli = Cli::parse_from(["bard", "--song", "tune.mid", "--device", "Keys"]);
        let settings = load_settings(&cli).expect("settings");
        assert_eq!(settings.song_path.as_deref(), Some("tune.mid"));
        assert_eq!(settings.input_device, Some(DeviceId("Keys".to_string())));
        assert!(settings.auto_connect);
    }
}
