//! Drift-corrected presentation clocks.
//!
//! A [`Clock`] stores the last presentation timestamp it was set to together with the
//! wall time of that update, and extrapolates from there at `speed`. It is tagged with
//! the serial of the queue whose data set it, so a seek or flush invalidates it without
//! anyone touching the clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;

/// Monotonic wall time in seconds since the first call in this process.
pub fn wall_time() -> f64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_secs_f64()
}

#[derive(Clone, Copy, Debug)]
struct ClockState {
    pts: Option<f64>,
    pts_drift: f64,
    last_updated: f64,
    speed: f64,
    serial: u64,
    paused: bool,
}

/// A serial-tagged virtual clock.
///
/// Fields follow a single-writer discipline: the audio clock is written by the audio
/// path, the video clock by the video path, and readers tolerate bounded staleness.
#[derive(Debug)]
pub struct Clock {
    name: &'static str,
    state: Mutex<ClockState>,
    /// Serial of the owning queue; `None` means the clock validates against itself.
    queue_serial: Option<Arc<AtomicU64>>,
}

impl Clock {
    pub fn new(name: &'static str, queue_serial: Option<Arc<AtomicU64>>) -> Self {
        let clock = Self {
            name,
            state: Mutex::new(ClockState {
                pts: None,
                pts_drift: 0.0,
                last_updated: 0.0,
                speed: 1.0,
                serial: 0,
                paused: false,
            }),
            queue_serial,
        };
        clock.set(None, 0);
        clock
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn owner_serial(&self, st: &ClockState) -> u64 {
        match &self.queue_serial {
            Some(serial) => serial.load(Ordering::Acquire),
            None => st.serial,
        }
    }

    /// Current clock value in seconds, `None` when stale or unset.
    pub fn get(&self) -> Option<f64> {
        self.get_at(wall_time())
    }

    pub fn get_at(&self, now: f64) -> Option<f64> {
        let st = self.state();
        if self.owner_serial(&st) != st.serial {
            return None;
        }
        if st.paused {
            return st.pts;
        }
        st.pts?;
        Some(st.pts_drift + now - (now - st.last_updated) * (1.0 - st.speed))
    }

    pub fn set(&self, pts: Option<f64>, serial: u64) {
        self.set_at(pts, serial, wall_time());
    }

    pub fn set_at(&self, pts: Option<f64>, serial: u64, now: f64) {
        let mut st = self.state();
        st.pts = pts;
        st.last_updated = now;
        st.pts_drift = pts.unwrap_or(0.0) - now;
        st.serial = serial;
    }

    /// Changes speed, re-anchoring first so the value stays continuous.
    pub fn set_speed(&self, speed: f64) {
        let now = wall_time();
        let (value, serial) = (self.get_at(now), self.serial());
        self.set_at(value, serial, now);
        self.state().speed = speed;
    }

    pub fn speed(&self) -> f64 {
        self.state().speed
    }

    pub fn serial(&self) -> u64 {
        self.state().serial
    }

    /// Stored timestamp of the last update, without extrapolation.
    pub fn pts(&self) -> Option<f64> {
        self.state().pts
    }

    pub fn last_updated(&self) -> f64 {
        self.state().last_updated
    }

    pub fn is_paused(&self) -> bool {
        self.state().paused
    }

    pub fn set_paused(&self, paused: bool) {
        self.state().paused = paused;
    }

    /// Forces this clock onto `slave` when this one is unset or too far away.
    pub fn sync_to_slave(&self, slave: &Clock, nosync_threshold: f64) {
        let now = wall_time();
        let clock = self.get_at(now);
        let Some(slave_clock) = slave.get_at(now) else {
            return;
        };
        let far = clock.is_none_or(|c| (c - slave_clock).abs() > nosync_threshold);
        if far {
            self.set_at(Some(slave_clock), slave.serial(), now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_clock_is_invalid() {
        let clock = Clock::new("ext", None);
        assert_eq!(clock.get(), None);
    }

    #[test]
    fn extrapolates_at_speed() {
        let clock = Clock::new("ext", None);
        clock.set_at(Some(10.0), 0, 100.0);
        let v = clock.get_at(102.0).unwrap();
        assert!((v - 12.0).abs() < 1e-9);

        clock.state().speed = 0.5;
        let v = clock.get_at(102.0).unwrap();
        assert!((v - 11.0).abs() < 1e-9);
    }

    #[test]
    fn paused_clock_returns_stored_pts() {
        let clock = Clock::new("ext", None);
        clock.set_at(Some(3.0), 0, 50.0);
        clock.set_paused(true);
        assert_eq!(clock.get_at(80.0), Some(3.0));
    }

    #[test]
    fn serial_mismatch_invalidates() {
        let serial = Arc::new(AtomicU64::new(1));
        let clock = Clock::new("aud", Some(serial.clone()));
        clock.set(Some(1.0), 1);
        assert!(clock.get().is_some());
        serial.store(2, Ordering::Release);
        assert_eq!(clock.get(), None);
    }

    #[test]
    fn monotonic_at_unit_speed() {
        let clock = Clock::new("ext", None);
        clock.set(Some(0.0), 0);
        let mut last = clock.get().unwrap();
        for _ in 0..1000 {
            let v = clock.get().unwrap();
            assert!(v + 1e-9 >= last);
            last = v;
        }
    }

    #[test]
    fn sync_to_slave_only_when_far() {
        let master = Clock::new("ext", None);
        let slave = Clock::new("aud", None);
        slave.set_at(Some(5.0), 0, wall_time());

        master.sync_to_slave(&slave, 100.0);
        assert!((master.get().unwrap() - 5.0).abs() < 0.05);

        master.set(Some(50.0), 0);
        master.sync_to_slave(&slave, 100.0);
        assert!((master.get().unwrap() - 50.0).abs() < 0.05);

        master.set(Some(500.0), 0);
        master.sync_to_slave(&slave, 100.0);
        assert!((master.get().unwrap() - 5.0).abs() < 0.05);
    }

    #[test]
    fn set_speed_keeps_value_continuous() {
        let clock = Clock::new("ext", None);
        clock.set(Some(7.0), 0);
        let before = clock.get().unwrap();
        clock.set_speed(0.9);
        let after = clock.get().unwrap();
        assert!((after - before).abs() < 0.01);
        assert_eq!(clock.speed(), 0.9);
    }
}
