use crate::flags::PerformanceFlags;
use crate::router::NoteRouter;
use bard_domain_song::{Song, SongEvent};
use bard_ports::midi::{NoteEvent, NoteKind, NoteOrigin};
use parking_lot::{Condvar, Mutex};
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("a song is already playing")]
    AlreadyPlaying,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlaybackNotice {
    Finished { title: Option<String> },
}

/// Cursor over a song's events, anchored to the instant it started.
#[derive(Debug, Default)]
pub struct SongPlaybackSession {
    events: Vec<SongEvent>,
    cursor: usize,
    started_at: Option<Instant>,
    active: bool,
    finished: bool,
}

impl SongPlaybackSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, mut events: Vec<SongEvent>, now: Instant) -> Result<(), PlaybackError> {
        if self.active {
            return Err(PlaybackError::AlreadyPlaying);
        }
        events.sort_by_key(|event| event.offset);
        self.events = events;
        self.cursor = 0;
        self.started_at = Some(now);
        self.active = true;
        self.finished = false;
        Ok(())
    }

    /// Emits every event due at `now`, each stamped with its scheduled
    /// instant. The session finishes once the last event has gone out.
    pub fn advance(&mut self, now: Instant, mut emit: impl FnMut(NoteEvent)) -> usize {
        let Some(started_at) = self.started_at.filter(|_| self.active) else {
            return 0;
        };

        let mut emitted = 0;
        while let Some(event) = self.events.get(self.cursor) {
            let due = started_at + event.offset;
            if due > now {
                break;
            }
            emit(to_note_event(event, due));
            self.cursor += 1;
            emitted += 1;
        }

        if self.cursor >= self.events.len() {
            self.active = false;
            self.finished = true;
        }
        emitted
    }

    pub fn next_due(&self) -> Option<Instant> {
        let started_at = self.started_at.filter(|_| self.active)?;
        self.events
            .get(self.cursor)
            .map(|event| started_at + event.offset)
    }

    /// Halts the remaining events. Returns true if the session was active.
    pub fn stop(&mut self) -> bool {
        let was_active = self.active;
        self.active = false;
        self.events.clear();
        self.cursor = 0;
        self.started_at = None;
        was_active
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn remaining(&self) -> usize {
        self.events.len().saturating_sub(self.cursor)
    }
}

fn to_note_event(event: &SongEvent, at: Instant) -> NoteEvent {
    match event.kind {
        NoteKind::On => NoteEvent::note_on(event.note, event.velocity, NoteOrigin::Playback, at),
        NoteKind::Off => NoteEvent::note_off(event.note, NoteOrigin::Playback, at),
    }
}

struct PlayerState {
    session: SongPlaybackSession,
    stop_requested: bool,
}

struct PlayerShared {
    state: Mutex<PlayerState>,
    wake: Condvar,
}

/// Runs one `SongPlaybackSession` on its own scheduler thread, feeding due
/// events through the same `NoteRouter` as live input.
pub struct SongPlayer {
    shared: Arc<PlayerShared>,
    flags: Arc<PerformanceFlags>,
    notices_tx: Arc<Mutex<Producer<(u64, PlaybackNotice)>>>,
    notices_rx: Consumer<(u64, PlaybackNotice)>,
    /// Bumped on every `start`; notices from earlier sessions are dropped.
    generation: u64,
    worker: Option<thread::JoinHandle<()>>,
}

impl SongPlayer {
    pub fn new(flags: Arc<PerformanceFlags>) -> Self {
        let (producer, consumer) = RingBuffer::new(16);
        Self {
            shared: Arc::new(PlayerShared {
                state: Mutex::new(PlayerState {
                    session: SongPlaybackSession::new(),
                    stop_requested: false,
                }),
                wake: Condvar::new(),
            }),
            flags,
            notices_tx: Arc::new(Mutex::new(producer)),
            notices_rx: consumer,
            generation: 0,
            worker: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.shared.state.lock().session.is_active()
    }

    pub fn start(
        &mut self,
        song: Song,
        router: Arc<NoteRouter>,
        now: Instant,
    ) -> Result<(), PlaybackError> {
        {
            let mut state = self.shared.state.lock();
            state.session.start(song.events, now)?;
            state.stop_requested = false;
        }
        // A finished worker may still be winding down.
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.generation += 1;
        self.flags.set_session_active(true);

        let generation = self.generation;
        let shared = self.shared.clone();
        let flags = self.flags.clone();
        let notices = self.notices_tx.clone();
        let title = song.meta.title;
        self.worker = Some(thread::spawn(move || {
            run_session(&shared, &router, &flags, &notices, generation, title);
        }));
        Ok(())
    }

    /// Returns true if a session was active.
    pub fn stop(&mut self) -> bool {
        let was_active = {
            let mut state = self.shared.state.lock();
            state.stop_requested = true;
            state.session.stop()
        };
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.flags.set_session_active(false);
        was_active
    }

    /// Next notice from the current session. Notices left over from an
    /// earlier session are discarded.
    pub fn poll_notice(&mut self) -> Option<PlaybackNotice> {
        while let Ok((generation, notice)) = self.notices_rx.pop() {
            if generation == self.generation {
                return Some(notice);
            }
            tracing::debug!(generation, "dropping notice from an earlier song");
        }
        None
    }
}

impl Drop for SongPlayer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_session(
    shared: &PlayerShared,
    router: &NoteRouter,
    flags: &PerformanceFlags,
    notices: &Mutex<Producer<(u64, PlaybackNotice)>>,
    generation: u64,
    title: Option<String>,
) {
    let mut state = shared.state.lock();
    loop {
        if state.stop_requested {
            return;
        }
        state.session.advance(Instant::now(), |event| {
            router.deliver(event);
        });
        if state.session.is_finished() {
            break;
        }
        match state.session.next_due() {
            Some(due) => {
                shared.wake.wait_until(&mut state, due);
            }
            None => return,
        }
    }
    drop(state);

    flags.set_session_active(false);
    tracing::info!(title = title.as_deref().unwrap_or("untitled"), "song playback finished");
    if notices
        .lock()
        .push((generation, PlaybackNotice::Finished { title }))
        .is_err()
    {
        tracing::debug!("playback notice queue full");
    }
}
