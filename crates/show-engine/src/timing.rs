//! Clocks for the cooperative scheduler.
//!
//! - `TimeSource`: Where "now" comes from (system clock, or a manually
//!   advanced source for deterministic tests and scripted playback)
//! - `ElapsedTime`: Elapsed-seconds view with hold/release, used to freeze
//!   observed time while the scheduler drains its queues
//! - `FrameSynchronization`: Paces `update()` ticks to a target frame rate
//!   while activities are running

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Source of monotonic time in seconds.
pub trait TimeSource {
    fn now_seconds(&self) -> f64;
}

/// System clock time source.
#[derive(Debug)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn now_seconds(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Manually advanced time source.
///
/// Drives the scheduler deterministically: tests (and scripted playback)
/// advance it explicitly between `update()` calls.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    now: Cell<f64>,
}

impl ManualTimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward by `seconds`.
    pub fn advance(&self, seconds: f64) {
        self.now.set(self.now.get() + seconds);
    }

    pub fn set(&self, seconds: f64) {
        self.now.set(seconds);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_seconds(&self) -> f64 {
        self.now.get()
    }
}

/// Elapsed seconds since construction (or the last `reset`), with
/// hold/release semantics.
///
/// While held, `elapsed()` keeps returning the value observed at `hold()`
/// time, so every event and activity processed within one scheduler tick
/// sees the same instant. Releasing does not rewind: wall time that passed
/// during the hold becomes visible again.
pub struct ElapsedTime {
    source: Rc<dyn TimeSource>,
    start: Cell<f64>,
    frozen: Cell<Option<f64>>,
}

impl ElapsedTime {
    pub fn new(source: Rc<dyn TimeSource>) -> Self {
        let start = source.now_seconds();
        Self {
            source,
            start: Cell::new(start),
            frozen: Cell::new(None),
        }
    }

    /// Seconds elapsed, or the frozen value while held.
    pub fn elapsed(&self) -> f64 {
        match self.frozen.get() {
            Some(frozen) => frozen,
            None => self.source.now_seconds() - self.start.get(),
        }
    }

    /// Restart from zero. Clears any hold.
    pub fn reset(&self) {
        self.start.set(self.source.now_seconds());
        self.frozen.set(None);
    }

    /// Freeze the observed time. Holds do not nest; a second `hold` before
    /// `release` is logged and ignored.
    pub fn hold(&self) {
        if self.frozen.get().is_some() {
            log::warn!("ElapsedTime::hold: already held");
            return;
        }
        self.frozen.set(Some(self.elapsed()));
    }

    /// Resume following the time source.
    pub fn release(&self) {
        if self.frozen.take().is_none() {
            log::warn!("ElapsedTime::release: not held");
        }
    }

    pub fn is_held(&self) -> bool {
        self.frozen.get().is_some()
    }
}

/// Paces the scheduler loop to a fixed frame duration.
///
/// Active only while activities are running; an idle scheduler waits on the
/// event queue's own next-due time instead.
pub struct FrameSynchronization {
    source: Rc<dyn TimeSource>,
    frame_duration: f64,
    next_frame_target: Cell<f64>,
    is_active: Cell<bool>,
}

impl FrameSynchronization {
    pub fn new(source: Rc<dyn TimeSource>, frame_duration: f64) -> Self {
        let now = source.now_seconds();
        Self {
            source,
            frame_duration,
            next_frame_target: Cell::new(now + frame_duration),
            is_active: Cell::new(false),
        }
    }

    /// Sleep out the remainder of the current frame, then mark the next one.
    /// No-op while inactive apart from keeping the frame mark current.
    pub fn synchronize(&self) {
        if self.is_active.get() {
            let remaining = self.next_frame_target.get() - self.source.now_seconds();
            if remaining > 0.0 {
                std::thread::sleep(std::time::Duration::from_secs_f64(remaining));
            }
        }
        self.mark_current_frame();
    }

    pub fn activate(&self) {
        self.is_active.set(true);
    }

    pub fn deactivate(&self) {
        self.is_active.set(false);
    }

    fn mark_current_frame(&self) {
        self.next_frame_target
            .set(self.source.now_seconds() + self.frame_duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_follows_manual_source() {
        let source = Rc::new(ManualTimeSource::new());
        let timer = ElapsedTime::new(source.clone());
        assert_eq!(timer.elapsed(), 0.0);
        source.advance(1.5);
        assert_eq!(timer.elapsed(), 1.5);
    }

    #[test]
    fn test_hold_freezes_observed_time() {
        let source = Rc::new(ManualTimeSource::new());
        let timer = ElapsedTime::new(source.clone());
        source.advance(2.0);
        timer.hold();
        source.advance(5.0);
        assert_eq!(timer.elapsed(), 2.0);
        timer.release();
        assert_eq!(timer.elapsed(), 7.0);
    }

    #[test]
    fn test_hold_does_not_nest() {
        let source = Rc::new(ManualTimeSource::new());
        let timer = ElapsedTime::new(source.clone());
        timer.hold();
        source.advance(1.0);
        timer.hold();
        assert_eq!(timer.elapsed(), 0.0);
        timer.release();
        assert!(!timer.is_held());
    }

    #[test]
    fn test_reset_restarts_from_zero() {
        let source = Rc::new(ManualTimeSource::new());
        let timer = ElapsedTime::new(source.clone());
        source.advance(3.0);
        timer.reset();
        assert_eq!(timer.elapsed(), 0.0);
        source.advance(0.5);
        assert_eq!(timer.elapsed(), 0.5);
    }

    #[test]
    fn test_frame_synchronization_inactive_does_not_block() {
        let source = Rc::new(ManualTimeSource::new());
        let sync = FrameSynchronization::new(source.clone(), 10.0);
        // Inactive synchronize must return immediately even though the
        // frame target lies far in the future.
        sync.synchronize();
        assert_eq!(source.now_seconds(), 0.0);
    }
}
