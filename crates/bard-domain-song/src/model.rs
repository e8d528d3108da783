use bard_ports::midi::NoteKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub type Tick = i64; // musical time, monotonic in a song

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoPoint {
    pub tick: Tick,
    pub us_per_quarter: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SongMeta {
    pub title: Option<String>,
    pub source_path: Option<String>,
}

/// Note event in musical time, before the tempo map is applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickEvent {
    pub tick: Tick,
    pub note: u8,
    pub velocity: u8,
    pub kind: NoteKind,
}

/// Note event placed at an offset from the start of the song.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongEvent {
    pub offset: Duration,
    pub note: u8,
    pub velocity: u8,
    pub kind: NoteKind,
}

impl SongEvent {
    pub fn on(offset: Duration, note: u8, velocity: u8) -> Self {
        Self {
            offset,
            note,
            velocity,
            kind: NoteKind::On,
        }
    }

    pub fn off(offset: Duration, note: u8) -> Self {
        Self {
            offset,
            note,
            velocity: 0,
            kind: NoteKind::Off,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Song {
    pub meta: SongMeta,
    pub ppq: u16,
    pub tempo_map: Vec<TempoPoint>,
    /// Sorted by offset; note-offs precede note-ons at the same offset.
    pub events: Vec<SongEvent>,
}

impl Song {
    pub fn from_events(meta: SongMeta, mut events: Vec<SongEvent>) -> Self {
        events.sort_by(|a, b| {
            a.offset
                .cmp(&b.offset)
                .then_with(|| kind_rank(a.kind).cmp(&kind_rank(b.kind)))
                .then_with(|| a.note.cmp(&b.note))
        });
        Self {
            meta,
            ppq: 480,
            tempo_map: vec![TempoPoint {
                tick: 0,
                us_per_quarter: 500_000,
            }],
            events,
        }
    }

    pub fn duration(&self) -> Duration {
        self.events
            .last()
            .map(|event| event.offset)
            .unwrap_or_default()
    }

    pub fn note_on_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| event.kind == NoteKind::On)
            .count()
    }
}

pub(crate) fn kind_rank(kind: NoteKind) -> u8 {
    match kind {
        NoteKind::Off => 0,
        NoteKind::On => 1,
    }
}
