use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Instant;

use crate::sensors::frame::ConcentrationReading;
use crate::sensors::pms7003::PmsError;

/// Decoder health as seen by the poller.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DecoderHealth {
    pub frames_ok: u32,
    pub checksum_failures: u32,
    pub transport_failures: u32,
    /// Transport failures since the last validated reading.
    pub consecutive_failures: u32,
    pub last_error: Option<PmsError>,
    /// Set once `consecutive_failures` reaches the alert threshold.
    pub alerting: bool,
}

/// A consistent view of the store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreStatus {
    pub reading: ConcentrationReading,
    /// `None` until the first validated reading.
    pub updated_at: Option<Instant>,
    pub health: DecoderHealth,
}

/// The latest validated reading.
///
/// Written only by the poller after a frame's checksum matched; read by any
/// number of request handlers. Every access takes the same lock, so readers
/// never see a half-written reading.
pub struct ReadingStore {
    inner: Mutex<CriticalSectionRawMutex, RefCell<StoreStatus>>,
}

impl Default for ReadingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadingStore {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(StoreStatus {
                reading: ConcentrationReading::new(0, 0, 0),
                updated_at: None,
                health: DecoderHealth {
                    frames_ok: 0,
                    checksum_failures: 0,
                    transport_failures: 0,
                    consecutive_failures: 0,
                    last_error: None,
                    alerting: false,
                },
            })),
        }
    }

    /// Replaces the stored reading and clears the failure streak.
    pub fn update(&self, reading: ConcentrationReading, at: Instant) {
        self.inner.lock(|cell| {
            let mut status = cell.borrow_mut();
            status.reading = reading;
            status.updated_at = Some(at);
            status.health.frames_ok = status.health.frames_ok.wrapping_add(1);
            status.health.consecutive_failures = 0;
            status.health.alerting = false;
        });
    }

    pub fn snapshot(&self) -> ConcentrationReading {
        self.inner.lock(|cell| cell.borrow().reading)
    }

    pub fn status(&self) -> StoreStatus {
        self.inner.lock(|cell| *cell.borrow())
    }

    /// Counts a failed decode cycle. Leaves the reading alone.
    ///
    /// Returns the current streak of consecutive transport failures. Checksum
    /// failures leave the streak as it was.
    pub fn record_failure(&self, error: PmsError) -> u32 {
        self.inner.lock(|cell| {
            let mut status = cell.borrow_mut();
            let health = &mut status.health;
            health.last_error = Some(error);
            match error {
                PmsError::Checksum { .. } => {
                    health.checksum_failures = health.checksum_failures.wrapping_add(1);
                }
                PmsError::Transport(_) => {
                    health.transport_failures = health.transport_failures.wrapping_add(1);
                    health.consecutive_failures = health.consecutive_failures.saturating_add(1);
                }
            }
            health.consecutive_failures
        })
    }

    pub fn set_alerting(&self, alerting: bool) {
        self.inner
            .lock(|cell| cell.borrow_mut().health.alerting = alerting);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::transport::TransportError;

    #[test]
    fn starts_at_zero() {
        let store = ReadingStore::new();
        assert_eq!(store.snapshot(), ConcentrationReading::default());
        assert_eq!(store.status().updated_at, None);
    }

    #[test]
    fn snapshot_is_idempotent() {
        let store = ReadingStore::new();
        store.update(ConcentrationReading::new(1, 2, 3), Instant::from_secs(5));
        let first = store.snapshot();
        for _ in 0..10 {
            assert_eq!(store.snapshot(), first);
        }
    }

    #[test]
    fn failures_do_not_touch_reading() {
        let store = ReadingStore::new();
        store.update(ConcentrationReading::new(10, 20, 30), Instant::from_secs(1));
        store.record_failure(PmsError::Checksum {
            declared: 1,
            computed: 2,
        });
        assert_eq!(
            store.record_failure(PmsError::Transport(TransportError::Timeout)),
            1
        );
        assert_eq!(
            store.record_failure(PmsError::Transport(TransportError::Timeout)),
            2
        );

        let status = store.status();
        assert_eq!(status.reading, ConcentrationReading::new(10, 20, 30));
        assert_eq!(status.updated_at, Some(Instant::from_secs(1)));
        assert_eq!(status.health.checksum_failures, 1);
        assert_eq!(status.health.transport_failures, 2);
        assert_eq!(
            status.health.last_error,
            Some(PmsError::Transport(TransportError::Timeout))
        );
    }

    #[test]
    fn update_clears_failure_streak() {
        let store = ReadingStore::new();
        store.record_failure(PmsError::Transport(TransportError::NoFrame));
        store.set_alerting(true);
        store.update(ConcentrationReading::new(4, 5, 6), Instant::from_secs(9));
        let health = store.status().health;
        assert_eq!(health.consecutive_failures, 0);
        assert!(!health.alerting);
        assert_eq!(health.frames_ok, 1);
        assert_eq!(health.transport_failures, 1);
    }

    #[test]
    fn concurrent_readers_never_see_torn_values() {
        use std::sync::Arc;
        use std::thread;

        let store = Arc::new(ReadingStore::new());
        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for i in 1..=2000u16 {
                    store.update(ConcentrationReading::new(i, i, i), Instant::from_ticks(i as u64));
                }
            })
        };
        let readers: std::vec::Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..2000 {
                        let r = store.snapshot();
                        assert!(r.pm1_0 == r.pm2_5 && r.pm2_5 == r.pm10);
                        assert!(r.pm1_0 >= last, "store went backwards");
                        last = r.pm1_0;
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(store.snapshot(), ConcentrationReading::new(2000, 2000, 2000));
    }
}
