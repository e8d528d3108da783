use bard_domain_song::{import_song_bytes, import_song_path, TempoMap, TempoPoint};
use bard_ports::midi::NoteKind;
use midly::num::{u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn build_midi(track: Vec<TrackEvent<'static>>) -> Vec<u8> {
    let smf = Smf {
        header: Header {
            format: Format::SingleTrack,
            timing: Timing::Metrical(480.into()),
        },
        tracks: vec![track],
    };
    let mut data = Vec::new();
    smf.write(&mut data).expect("midi write should succeed");
    data
}

fn note_on(delta: u32, note: u8, vel: u8) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(delta),
        kind: TrackEventKind::Midi {
            channel: u4::new(0),
            message: MidiMessage::NoteOn {
                key: u7::new(note),
                vel: u7::new(vel),
            },
        },
    }
}

fn note_off(delta: u32, note: u8) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(delta),
        kind: TrackEventKind::Midi {
            channel: u4::new(0),
            message: MidiMessage::NoteOff {
                key: u7::new(note),
                vel: u7::new(64),
            },
        },
    }
}

fn end_of_track() -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    }
}

fn temp_midi_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    std::env::temp_dir().join(format!("bard-{name}-{nanos}.mid"))
}

#[test]
fn import_converts_ticks_to_offsets_with_default_tempo() {
    let midi = build_midi(vec![
        note_on(0, 60, 100),
        note_off(480, 60),
        note_on(0, 64, 90),
        note_off(960, 64),
        end_of_track(),
    ]);

    let song = import_song_bytes(&midi).expect("import should succeed");
    let summary: Vec<_> = song
        .events
        .iter()
        .map(|e| (e.offset, e.note, e.kind))
        .collect();

    assert_eq!(
        summary,
        vec![
            (Duration::ZERO, 60, NoteKind::On),
            (Duration::from_millis(500), 60, NoteKind::Off),
            (Duration::from_millis(500), 64, NoteKind::On),
            (Duration::from_millis(1500), 64, NoteKind::Off),
        ]
    );
    assert_eq!(song.note_on_count(), 2);
    assert_eq!(song.duration(), Duration::from_millis(1500));
}

#[test]
fn import_honours_tempo_changes() {
    let midi = build_midi(vec![
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(1_000_000))),
        },
        note_on(0, 60, 100),
        note_off(480, 60),
        end_of_track(),
    ]);

    let song = import_song_bytes(&midi).expect("import should succeed");
    assert_eq!(song.events[1].offset, Duration::from_secs(1));
}

#[test]
fn import_treats_zero_velocity_note_on_as_note_off() {
    let midi = build_midi(vec![note_on(0, 62, 80), note_on(240, 62, 0), end_of_track()]);

    let song = import_song_bytes(&midi).expect("import should succeed");
    assert_eq!(song.events.len(), 2);
    assert_eq!(song.events[1].kind, NoteKind::Off);
    assert_eq!(song.events[1].offset, Duration::from_millis(250));
}

#[test]
fn import_inserts_note_off_before_overlapping_note_on() {
    let midi = build_midi(vec![
        note_on(0, 60, 100),
        // Second note-on without a note-off for the first.
        note_on(480, 60, 100),
        note_off(480, 60),
        end_of_track(),
    ]);

    let song = import_song_bytes(&midi).expect("import should succeed");
    let at_half: Vec<_> = song
        .events
        .iter()
        .filter(|e| e.offset == Duration::from_millis(500))
        .collect();
    assert_eq!(at_half.len(), 2);
    assert_eq!(at_half[0].kind, NoteKind::Off);
    assert_eq!(at_half[1].kind, NoteKind::On);
    assert!(song
        .events
        .iter()
        .any(|e| e.offset == Duration::from_secs(1) && e.kind == NoteKind::Off));
}

#[test]
fn import_closes_dangling_notes_at_end() {
    let midi = build_midi(vec![note_on(0, 60, 100), end_of_track()]);

    let song = import_song_bytes(&midi).expect("import should succeed");
    assert_eq!(song.events.len(), 2);
    assert_eq!(song.events[1].kind, NoteKind::Off);
    assert_eq!(song.events[1].offset, Duration::from_millis(500));
}

#[test]
fn import_drops_unmatched_note_off() {
    let midi = build_midi(vec![note_off(0, 70), note_on(10, 60, 100), note_off(10, 60), end_of_track()]);

    let song = import_song_bytes(&midi).expect("import should succeed");
    assert!(song.events.iter().all(|e| e.note == 60));
}

#[test]
fn import_rejects_garbage() {
    assert!(import_song_bytes(b"not a midi file").is_err());
}

#[test]
fn import_path_uses_file_stem_as_title() {
    let path = temp_midi_path("title");
    let midi = build_midi(vec![note_on(0, 60, 100), note_off(480, 60), end_of_track()]);
    std::fs::write(&path, midi).expect("write temp midi");

    let song = import_song_path(&path).expect("import should succeed");
    let stem = path.file_stem().and_then(|s| s.to_str()).map(str::to_string);
    assert_eq!(song.meta.title, stem);
    assert_eq!(song.meta.source_path, Some(path.display().to_string()));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn tempo_map_inserts_default_tempo_at_zero() {
    let map = TempoMap::new(
        480,
        vec![TempoPoint {
            tick: 960,
            us_per_quarter: 250_000,
        }],
    );
    assert_eq!(map.tick_to_micros(480), 500_000);
    assert_eq!(map.tick_to_micros(960), 1_000_000);
    assert_eq!(map.tick_to_micros(1440), 1_250_000);
}
