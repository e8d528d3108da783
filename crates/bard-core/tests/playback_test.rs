mod common;

use bard_core::{
    AudioParams, NoteRouter, PerformanceFlags, PlaybackError, PlaybackNotice, SongPlaybackSession,
    SongPlayer,
};
use bard_domain_song::{Song, SongEvent, SongMeta};
use bard_infra_synth_simple::SimpleSynth;
use bard_ports::midi::{NoteEvent, NoteKind, NoteOrigin};
use bard_ports::synth::NoteSynthesizer;
use bard_ports::types::Volume01;
use common::temp_bank;
use pretty_assertions::assert_eq;
use rtrb::RingBuffer;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn scale() -> Vec<SongEvent> {
    vec![
        SongEvent::on(ms(0), 60, 100),
        SongEvent::off(ms(100), 60),
        SongEvent::on(ms(100), 62, 90),
        SongEvent::off(ms(200), 62),
    ]
}

fn song(title: &str, events: Vec<SongEvent>) -> Song {
    Song::from_events(
        SongMeta {
            title: Some(title.to_string()),
            source_path: None,
        },
        events,
    )
}

#[test]
fn session_emits_events_when_they_fall_due() {
    let t0 = Instant::now();
    let mut session = SongPlaybackSession::new();
    session.start(scale(), t0).expect("start");
    assert!(session.is_active());
    assert_eq!(session.next_due(), Some(t0));

    let mut seen: Vec<NoteEvent> = Vec::new();
    assert_eq!(session.advance(t0 + ms(50), |event| seen.push(event)), 1);
    assert_eq!(seen[0].kind, NoteKind::On);
    assert_eq!(seen[0].origin, NoteOrigin::Playback);
    assert_eq!(seen[0].at, t0);
    assert_eq!(session.next_due(), Some(t0 + ms(100)));

    assert_eq!(session.advance(t0 + ms(150), |event| seen.push(event)), 2);
    assert_eq!(seen[1].kind, NoteKind::Off);
    assert_eq!(seen[1].at, t0 + ms(100));
    assert_eq!((seen[2].note, seen[2].velocity), (62, 90));
    assert_eq!(session.remaining(), 1);

    session.advance(t0 + ms(200), |event| seen.push(event));
    assert_eq!(seen.len(), 4);
    assert!(!session.is_active());
    assert!(session.is_finished());
    assert_eq!(session.next_due(), None);
}

#[test]
fn second_start_is_rejected_and_leaves_the_first_alone() {
    let t0 = Instant::now();
    let mut session = SongPlaybackSession::new();
    session.start(scale(), t0).expect("start song A");

    let song_b = vec![SongEvent::on(ms(0), 40, 100)];
    assert_eq!(
        session.start(song_b, t0 + ms(10)),
        Err(PlaybackError::AlreadyPlaying)
    );
    assert!(session.is_active());
    assert_eq!(session.remaining(), 4);
    assert_eq!(session.next_due(), Some(t0));
}

#[test]
fn stop_drops_remaining_events() {
    let t0 = Instant::now();
    let mut session = SongPlaybackSession::new();
    session.start(scale(), t0).expect("start");
    assert!(session.stop());
    assert!(!session.stop());
    assert!(!session.is_finished());

    let mut count = 0;
    session.advance(t0 + ms(1_000), |_| count += 1);
    assert_eq!(count, 0);

    session.start(scale(), t0).expect("restart after stop");
}

#[test]
fn empty_song_finishes_on_first_advance() {
    let t0 = Instant::now();
    let mut session = SongPlaybackSession::new();
    session.start(Vec::new(), t0).expect("start");
    assert_eq!(session.advance(t0, |_| {}), 0);
    assert!(session.is_finished());
}

fn player_rig() -> (SongPlayer, Arc<NoteRouter>, Arc<PerformanceFlags>) {
    let synth = Arc::new(SimpleSynth::default());
    synth
        .load(&temp_bank("player"), 44_100, 2)
        .expect("load placeholder bank");
    let flags = Arc::new(PerformanceFlags::new(Instant::now()));
    flags.set_equipped(true);
    let (producer, consumer) = RingBuffer::new(64);
    // The render side is not under test here.
    drop(consumer);
    let router = Arc::new(NoteRouter::new(
        synth,
        flags.clone(),
        Arc::new(AudioParams::new(Volume01(1.0), 0)),
        producer,
        ms(2_000),
    ));
    (SongPlayer::new(flags.clone()), router, flags)
}

#[test]
fn player_runs_a_short_song_to_completion() {
    let (mut player, router, flags) = player_rig();
    let events = vec![
        SongEvent::on(ms(0), 60, 100),
        SongEvent::off(ms(20), 60),
        SongEvent::on(ms(40), 64, 100),
        SongEvent::off(ms(60), 64),
    ];
    player
        .start(song("short", events), router, Instant::now())
        .expect("start");
    assert!(flags.session_active());

    let deadline = Instant::now() + Duration::from_secs(5);
    let notice = loop {
        if let Some(notice) = player.poll_notice() {
            break notice;
        }
        assert!(Instant::now() < deadline, "song never finished");
        thread::sleep(ms(5));
    };

    assert_eq!(
        notice,
        PlaybackNotice::Finished {
            title: Some("short".to_string())
        }
    );
    assert!(!player.is_active());
    assert!(!flags.session_active());
    assert!(flags.note_playing(Instant::now()));
}

#[test]
fn player_refuses_a_second_song_and_stops_on_request() {
    let (mut player, router, flags) = player_rig();
    let long = vec![
        SongEvent::on(ms(0), 60, 100),
        SongEvent::off(Duration::from_secs(30), 60),
    ];
    player
        .start(song("long", long), router.clone(), Instant::now())
        .expect("start");

    let other = song("other", vec![SongEvent::on(ms(0), 50, 100)]);
    assert_eq!(
        player.start(other, router, Instant::now()),
        Err(PlaybackError::AlreadyPlaying)
    );
    assert!(player.is_active());

    assert!(player.stop());
    assert!(!player.is_active());
    assert!(!flags.session_active());
    assert_eq!(player.poll_notice(), None);
    assert!(!player.stop());
}

#[test]
fn notice_from_a_finished_song_is_not_reported_for_the_next() {
    let (mut player, router, flags) = player_rig();
    let quick = vec![SongEvent::on(ms(0), 60, 100), SongEvent::off(ms(1), 60)];
    player
        .start(song("quick", quick), router.clone(), Instant::now())
        .expect("start quick");

    let deadline = Instant::now() + Duration::from_secs(5);
    while player.is_active() {
        assert!(Instant::now() < deadline, "quick song never finished");
        thread::sleep(ms(2));
    }

    let long = vec![
        SongEvent::on(ms(0), 62, 100),
        SongEvent::off(Duration::from_secs(30), 62),
    ];
    player
        .start(song("long", long), router, Instant::now())
        .expect("start long");
    assert_eq!(player.poll_notice(), None);
    assert!(player.is_active());
    assert!(flags.session_active());
}
