use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

const NO_DEADLINE: u64 = 0;

/// Performance state shared between the timing domains.
///
/// Writers per field:
/// - `equipped`: control (host calls `Engine::equip`)
/// - `note_deadline`: event delivery (note triggers arm it)
/// - `performing`: polling (the state machine on `Engine::tick`)
/// - `session_active`: the song player. `SongPlayer::start` and `stop` set it
///   on the control thread after joining the previous worker; the worker
///   clears it when a song runs out. Writes never overlap.
///
/// Any domain may read. `note_playing` is derived from the deadline, so no
/// timer thread is needed to clear it.
#[derive(Debug)]
pub struct PerformanceFlags {
    epoch: Instant,
    equipped: AtomicBool,
    note_deadline: AtomicU64,
    performing: AtomicBool,
    session_active: AtomicBool,
}

impl PerformanceFlags {
    pub fn new(epoch: Instant) -> Self {
        Self {
            epoch,
            equipped: AtomicBool::new(false),
            note_deadline: AtomicU64::new(NO_DEADLINE),
            performing: AtomicBool::new(false),
            session_active: AtomicBool::new(false),
        }
    }

    fn nanos_since_epoch(&self, at: Instant) -> u64 {
        let nanos = at.saturating_duration_since(self.epoch).as_nanos();
        u64::try_from(nanos).unwrap_or(u64::MAX)
    }

    pub fn has_instrument_equipped(&self) -> bool {
        self.equipped.load(Ordering::Acquire)
    }

    /// Returns true when the value actually changed.
    pub fn set_equipped(&self, equipped: bool) -> bool {
        self.equipped.swap(equipped, Ordering::AcqRel) != equipped
    }

    pub fn note_playing(&self, now: Instant) -> bool {
        let deadline = self.note_deadline.load(Ordering::Acquire);
        deadline != NO_DEADLINE && self.nanos_since_epoch(now) < deadline
    }

    pub fn note_deadline(&self) -> Option<Instant> {
        match self.note_deadline.load(Ordering::Acquire) {
            NO_DEADLINE => None,
            nanos => Some(self.epoch + Duration::from_nanos(nanos)),
        }
    }

    /// Pushes the note deadline out to `deadline`. A deadline never moves
    /// backwards, so late-stamped events from another producer cannot cut the
    /// window short.
    pub fn arm_note_deadline(&self, deadline: Instant) {
        let nanos = self.nanos_since_epoch(deadline).max(1);
        self.note_deadline.fetch_max(nanos, Ordering::AcqRel);
    }

    pub fn performing(&self) -> bool {
        self.performing.load(Ordering::Acquire)
    }

    /// Returns true when the value actually changed.
    pub fn set_performing(&self, performing: bool) -> bool {
        self.performing.swap(performing, Ordering::AcqRel) != performing
    }

    pub fn session_active(&self) -> bool {
        self.session_active.load(Ordering::Acquire)
    }

    pub fn set_session_active(&self, active: bool) {
        self.session_active.store(active, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_only_moves_forward() {
        let epoch = Instant::now();
        let flags = PerformanceFlags::new(epoch);
        assert!(!flags.note_playing(epoch));
        assert_eq!(flags.note_deadline(), None);

        flags.arm_note_deadline(epoch + Duration::from_secs(3));
        flags.arm_note_deadline(epoch + Duration::from_secs(1));
        assert_eq!(flags.note_deadline(), Some(epoch + Duration::from_secs(3)));
        assert!(flags.note_playing(epoch + Duration::from_millis(2_999)));
        assert!(!flags.note_playing(epoch + Duration::from_secs(3)));
    }

    #[test]
    fn setters_report_changes_once() {
        let flags = PerformanceFlags::new(Instant::now());
        assert!(flags.set_equipped(true));
        assert!(!flags.set_equipped(true));
        assert!(flags.set_performing(true));
        assert!(!flags.set_performing(true));
        assert!(flags.set_performing(false));
    }
}
