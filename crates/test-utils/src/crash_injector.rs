//! Failure injection for the page append path.
//!
//! A [`CrashInjector`] is consulted by a test backend wrapper before each
//! append and each sync. When the configured [`CrashPoint`] is reached it
//! answers `true` once, and the wrapper returns an I/O error instead of
//! forwarding the call:
//!
//! ```text
//! update body → append_pages → sync → objects published
//!             ↑               ↑
//!       BeforeAppend      BeforeSync
//! ```
//!
//! `BeforeAppend` leaves the store exactly as it was. `BeforeSync` leaves the
//! pages written but not yet reported as durable.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

/// Points in the commit path where a failure can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrashPoint {
    /// Fail an append before any byte reaches the backend.
    BeforeAppend,
    /// Let the append through, then fail the sync that follows it.
    BeforeSync,
}

/// Tracks injection state for deterministic failure simulation.
///
/// Starts disarmed so setup commits run normally; all state is atomic.
#[derive(Debug)]
pub struct CrashInjector {
    crash_point: CrashPoint,
    /// Matching operations let through after arming before the failure.
    skip: u32,
    append_count: AtomicU32,
    sync_count: AtomicU32,
    crashed: AtomicBool,
    armed: AtomicBool,
}

impl CrashInjector {
    /// Creates an injector that fails the first matching operation after arming.
    pub fn new(crash_point: CrashPoint) -> Arc<Self> {
        Self::after(crash_point, 0)
    }

    /// Creates an injector that lets `skip` matching operations through first.
    pub fn after(crash_point: CrashPoint, skip: u32) -> Arc<Self> {
        Arc::new(Self {
            crash_point,
            skip,
            append_count: AtomicU32::new(0),
            sync_count: AtomicU32::new(0),
            crashed: AtomicBool::new(false),
            armed: AtomicBool::new(false),
        })
    }

    /// Arms the injector and resets its counters.
    pub fn arm(&self) {
        self.append_count.store(0, Ordering::SeqCst);
        self.sync_count.store(0, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Disarms the injector.
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    /// Checks if the failure has been triggered.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    fn live(&self) -> bool {
        self.armed.load(Ordering::SeqCst) && !self.crashed.load(Ordering::SeqCst)
    }

    fn trigger(&self, point: CrashPoint, count: u32) -> bool {
        let should_crash = self.crash_point == point && count >= self.skip;
        if should_crash {
            self.crashed.store(true, Ordering::SeqCst);
        }
        should_crash
    }

    /// Records an append and returns `true` if it must fail.
    pub fn on_append(&self) -> bool {
        if !self.live() {
            return false;
        }
        let count = self.append_count.fetch_add(1, Ordering::SeqCst);
        self.trigger(CrashPoint::BeforeAppend, count)
    }

    /// Records a sync and returns `true` if it must fail.
    pub fn on_sync(&self) -> bool {
        if !self.live() {
            return false;
        }
        let count = self.sync_count.fetch_add(1, Ordering::SeqCst);
        self.trigger(CrashPoint::BeforeSync, count)
    }

    /// Returns the configured crash point.
    pub fn crash_point(&self) -> CrashPoint {
        self.crash_point
    }

    /// Returns the number of appends observed since arming.
    pub fn append_count(&self) -> u32 {
        self.append_count.load(Ordering::SeqCst)
    }

    /// Returns the number of syncs observed since arming.
    pub fn sync_count(&self) -> u32 {
        self.sync_count.load(Ordering::SeqCst)
    }
}
