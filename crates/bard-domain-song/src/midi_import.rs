use crate::model::{kind_rank, Song, SongEvent, SongMeta, TempoPoint, Tick, TickEvent};
use crate::tempo::TempoMap;
use bard_ports::midi::NoteKind;
use midly::{Fps, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum SongImportError {
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
}

pub fn import_song_path(path: &Path) -> Result<Song, SongImportError> {
    let data = std::fs::read(path).map_err(|e| SongImportError::Io(e.to_string()))?;
    let mut song = import_song_bytes(&data)?;
    song.meta.source_path = Some(path.display().to_string());
    if song.meta.title.is_none() {
        song.meta.title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string);
    }
    Ok(song)
}

/// Parse a Standard MIDI File into a time-stamped note sequence.
///
/// All tracks and channels are merged. A note-on with velocity 0 counts as a
/// note-off, and the result is sanitized so every note-on has exactly one
/// matching note-off.
pub fn import_song_bytes(data: &[u8]) -> Result<Song, SongImportError> {
    let smf = Smf::parse(data).map_err(|e| SongImportError::Parse(e.to_string()))?;
    let (ppq, tempo_override) = match smf.header.timing {
        Timing::Metrical(ticks) => (ticks.as_int(), None),
        Timing::Timecode(fps, ticks_per_frame) => {
            let (ppq, us_per_quarter) = timecode_ppq_and_tempo(fps, ticks_per_frame);
            (ppq, Some(us_per_quarter))
        }
    };

    let mut tempo_points: BTreeMap<Tick, u32> = BTreeMap::new();
    let mut tick_events: Vec<TickEvent> = Vec::new();
    let mut title: Option<String> = None;

    for (track_index, track) in smf.tracks.iter().enumerate() {
        let mut tick: Tick = 0;
        for event in track {
            tick += event.delta.as_int() as Tick;
            match &event.kind {
                TrackEventKind::Midi { message, .. } => match message {
                    MidiMessage::NoteOn { key, vel } => {
                        let velocity = vel.as_int();
                        let kind = if velocity == 0 {
                            NoteKind::Off
                        } else {
                            NoteKind::On
                        };
                        tick_events.push(TickEvent {
                            tick,
                            note: key.as_int(),
                            velocity,
                            kind,
                        });
                    }
                    MidiMessage::NoteOff { key, .. } => {
                        tick_events.push(TickEvent {
                            tick,
                            note: key.as_int(),
                            velocity: 0,
                            kind: NoteKind::Off,
                        });
                    }
                    _ => {}
                },
                TrackEventKind::Meta(MetaMessage::Tempo(us_per_quarter)) => {
                    tempo_points.insert(tick, us_per_quarter.as_int());
                }
                TrackEventKind::Meta(MetaMessage::TrackName(name)) if track_index == 0 => {
                    if title.is_none() {
                        let name = String::from_utf8_lossy(name).trim().to_string();
                        if !name.is_empty() {
                            title = Some(name);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    let tempo_map = build_tempo_map(tempo_points, tempo_override);
    sort_tick_events(&mut tick_events);
    let tick_events = sanitize_note_pairs(ppq, tick_events);

    let map = TempoMap::new(ppq, tempo_map.clone());
    let events = tick_events
        .iter()
        .map(|event| SongEvent {
            offset: map.tick_to_offset(event.tick),
            note: event.note,
            velocity: event.velocity,
            kind: event.kind,
        })
        .collect();

    Ok(Song {
        meta: SongMeta {
            title,
            source_path: None,
        },
        ppq,
        tempo_map,
        events,
    })
}

fn sort_tick_events(events: &mut [TickEvent]) {
    events.sort_by(|a, b| {
        a.tick
            .cmp(&b.tick)
            .then_with(|| kind_rank(a.kind).cmp(&kind_rank(b.kind)))
            .then_with(|| a.note.cmp(&b.note))
    });
}

fn build_tempo_map(
    tempo_points: BTreeMap<Tick, u32>,
    override_us_per_quarter: Option<u32>,
) -> Vec<TempoPoint> {
    if let Some(us_per_quarter) = override_us_per_quarter {
        return vec![TempoPoint {
            tick: 0,
            us_per_quarter,
        }];
    }

    let mut map: Vec<TempoPoint> = tempo_points
        .into_iter()
        .map(|(tick, us_per_quarter)| TempoPoint {
            tick,
            us_per_quarter,
        })
        .collect();

    if map.is_empty() || map[0].tick != 0 {
        map.insert(
            0,
            TempoPoint {
                tick: 0,
                us_per_quarter: 500_000,
            },
        );
    }

    map
}

fn timecode_ppq_and_tempo(fps: Fps, ticks_per_frame: u8) -> (u16, u32) {
    let ticks_per_frame = ticks_per_frame.max(1) as u16;
    match fps {
        Fps::Fps24 => (24 * ticks_per_frame, 1_000_000),
        Fps::Fps25 => (25 * ticks_per_frame, 1_000_000),
        Fps::Fps30 => (30 * ticks_per_frame, 1_000_000),
        Fps::Fps29 => (30 * ticks_per_frame, 1_001_000),
    }
}

fn sanitize_note_pairs(ppq: u16, events: Vec<TickEvent>) -> Vec<TickEvent> {
    if events.is_empty() {
        return events;
    }

    let default_len: Tick = ppq.max(1) as Tick;
    let mut out: Vec<TickEvent> = Vec::with_capacity(events.len() + 64);
    let mut active: [u8; 128] = [0; 128];
    let mut last_tick: Tick = 0;

    for event in events {
        last_tick = last_tick.max(event.tick);
        let idx = event.note as usize;
        if idx >= active.len() {
            continue;
        }
        match event.kind {
            NoteKind::On => {
                // Retrigger without release: close the sounding note first.
                for _ in 0..active[idx] {
                    out.push(TickEvent {
                        tick: event.tick,
                        note: event.note,
                        velocity: 0,
                        kind: NoteKind::Off,
                    });
                }
                active[idx] = 1;
                out.push(event);
            }
            NoteKind::Off => {
                if active[idx] == 0 {
                    continue;
                }
                active[idx] -= 1;
                out.push(event);
            }
        }
    }

    let end_tick = last_tick.saturating_add(default_len);
    for (note, count) in active.iter().copied().enumerate() {
        for _ in 0..count {
            out.push(TickEvent {
                tick: end_tick,
                note: note as u8,
                velocity: 0,
                kind: NoteKind::Off,
            });
        }
    }

    sort_tick_events(&mut out);
    out
}
