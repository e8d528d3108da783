mod common;

use bard_core::{AudioParams, EventSource, NoteRouter, PerformanceFlags, SourceError};
use bard_infra_synth_simple::SimpleSynth;
use bard_ports::midi::{NoteEvent, NoteOrigin};
use bard_ports::synth::NoteSynthesizer;
use bard_ports::types::{DeviceId, Volume01};
use common::{temp_bank, FakeInputPort};
use pretty_assertions::assert_eq;
use rtrb::{Consumer, RingBuffer};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Rig {
    port: FakeInputPort,
    source: EventSource,
    flags: Arc<PerformanceFlags>,
    requests: Consumer<bard_core::RenderRequest>,
}

fn rig() -> Rig {
    let synth = Arc::new(SimpleSynth::default());
    synth
        .load(&temp_bank("source"), 44_100, 2)
        .expect("load placeholder bank");
    let flags = Arc::new(PerformanceFlags::new(Instant::now()));
    flags.set_equipped(true);
    let (producer, requests) = RingBuffer::new(16);
    let router = Arc::new(NoteRouter::new(
        synth,
        flags.clone(),
        Arc::new(AudioParams::new(Volume01(1.0), 0)),
        producer,
        Duration::from_millis(2_000),
    ));
    let port = FakeInputPort::with_devices(&["Keys", "Pads"]);
    Rig {
        source: EventSource::new(Box::new(port.clone()), router),
        port,
        flags,
        requests,
    }
}

fn keys() -> DeviceId {
    DeviceId("Keys".to_string())
}

#[test]
fn lists_devices_from_the_port() {
    let rig = rig();
    let names: Vec<String> = rig
        .source
        .list_devices()
        .expect("list")
        .into_iter()
        .map(|device| device.name)
        .collect();
    assert_eq!(names, vec!["Keys".to_string(), "Pads".to_string()]);
}

#[test]
fn connected_device_feeds_the_trigger_path() {
    let mut rig = rig();
    rig.source.connect(&keys()).expect("connect");
    assert_eq!(rig.source.connected_device(), Some(&keys()));

    let now = Instant::now();
    assert!(rig
        .port
        .emit(NoteEvent::note_on(60, 100, NoteOrigin::Live, now)));
    assert!(rig.flags.note_playing(now));
    assert_eq!(rig.requests.pop().ok().map(|request| request.note), Some(60));
}

#[test]
fn unknown_device_is_unavailable() {
    let mut rig = rig();
    let err = rig
        .source
        .connect(&DeviceId("Drums".to_string()))
        .expect_err("no such device");
    assert!(matches!(err, SourceError::DeviceUnavailable { .. }));
    assert_eq!(rig.source.connected_device(), None);
}

#[test]
fn failed_connect_keeps_the_working_device() {
    let mut rig = rig();
    rig.source.connect(&keys()).expect("connect");

    let err = rig
        .source
        .connect(&DeviceId("Nope".to_string()))
        .expect_err("no such device");
    assert!(matches!(err, SourceError::DeviceUnavailable { .. }));
    assert_eq!(rig.source.connected_device(), Some(&keys()));
    assert_eq!(rig.port.connected(), Some(keys()));
    assert_eq!(rig.port.closed(), 0);

    let now = Instant::now();
    assert!(rig
        .port
        .emit(NoteEvent::note_on(62, 100, NoteOrigin::Live, now)));
    assert!(rig.flags.note_playing(now));
}

#[test]
fn connecting_twice_to_the_same_device_is_a_no_op() {
    let mut rig = rig();
    rig.source.connect(&keys()).expect("connect");
    rig.source.connect(&keys()).expect("connect again");
    assert_eq!(rig.port.opened(), 1);
    assert_eq!(rig.port.closed(), 0);
}

#[test]
fn switching_devices_closes_the_previous_one() {
    let mut rig = rig();
    rig.source.connect(&keys()).expect("connect keys");
    rig.source
        .connect(&DeviceId("Pads".to_string()))
        .expect("connect pads");
    assert_eq!(rig.port.opened(), 2);
    assert_eq!(rig.port.closed(), 1);
    assert_eq!(rig.port.connected(), Some(DeviceId("Pads".to_string())));
}

#[test]
fn failed_reconnect_leaves_nothing_connected() {
    let mut rig = rig();
    rig.source.connect(&keys()).expect("connect");
    assert!(rig.source.reconnect(&DeviceId("Gone".to_string())).is_err());
    assert_eq!(rig.source.connected_device(), None);
    assert_eq!(rig.port.connected(), None);
    assert!(!rig.port.emit(NoteEvent::note_on(60, 100, NoteOrigin::Live, Instant::now())));
}

#[test]
fn reconnect_reopens_the_same_device() {
    let mut rig = rig();
    rig.source.connect(&keys()).expect("connect");
    rig.source.reconnect(&keys()).expect("reconnect");
    assert_eq!(rig.port.opened(), 2);
    assert_eq!(rig.port.closed(), 1);
}

#[test]
fn disconnect_releases_exactly_once() {
    let mut rig = rig();
    assert!(!rig.source.disconnect());
    rig.source.connect(&keys()).expect("connect");
    assert!(rig.source.disconnect());
    assert!(!rig.source.disconnect());
    assert_eq!(rig.port.closed(), 1);

    drop(rig.source);
    assert_eq!(rig.port.closed(), 1);
}

#[test]
fn dropping_the_source_closes_the_device() {
    let rig = rig();
    let Rig {
        port, mut source, ..
    } = rig;
    source.connect(&keys()).expect("connect");
    drop(source);
    assert_eq!(port.closed(), 1);
}
