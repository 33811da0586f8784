//! Bounded-retry and deadline-polling primitives.
//!
//! Every protocol phase is built from the same two moves: repeat a
//! send/receive round trip a fixed number of times, or poll a condition with
//! a short sleep until a wall-clock deadline passes. The mode transition and
//! the transfer session share the one policy defined here.
//!
//! Bus-level failures during the read half of a round trip are folded into
//! [`Status::Nack`] rather than raised: a missing acknowledgment and a bad
//! status byte count against the same retry budget.

use std::thread;
use std::time::{Duration, Instant};

use log::trace;

use crate::bus::Bus;
use crate::protocol::frame::{Frame, Status};

/// Time source used by all polling loops.
///
/// Production code uses [`SystemClock`]; tests inject a manual clock so
/// timeout behavior is verified without real wall-clock delays.
pub trait Clock {
    /// Current instant.
    fn now(&self) -> Instant;
    /// Cooperative pause.
    fn sleep(&self, dur: Duration);
}

/// Wall-clock [`Clock`] backed by `std::time` and `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, dur: Duration) {
        thread::sleep(dur);
    }
}

/// Repeat a status round trip up to `attempts` times.
///
/// Returns `Ok(())` on the first [`Status::Ok`], otherwise the last status
/// seen after the budget is exhausted. The closure receives the 1-based
/// attempt number. At least one attempt always runs.
pub fn retry_status<F>(attempts: usize, mut round_trip: F) -> Result<(), Status>
where
    F: FnMut(usize) -> Status,
{
    let mut last = Status::Nack;
    for attempt in 1..=attempts.max(1) {
        last = round_trip(attempt);
        if last.is_ok() {
            return Ok(());
        }
        trace!("attempt {attempt}/{attempts} returned {last}");
    }
    Err(last)
}

/// Poll `condition` every `interval` until it holds or `timeout` elapses.
///
/// The condition is always checked at least once; returns whether it held.
pub fn poll_until<C, F>(clock: &C, timeout: Duration, interval: Duration, mut condition: F) -> bool
where
    C: Clock,
    F: FnMut() -> bool,
{
    let deadline = clock.now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if clock.now() >= deadline {
            return false;
        }
        clock.sleep(interval);
    }
}

/// Send a frame and read one status byte, polling the read up to `timeout`.
///
/// A write failure, or no readable status byte before the deadline, yields
/// [`Status::Nack`].
pub fn exchange<B, C>(
    bus: &mut B,
    clock: &C,
    frame: &Frame,
    timeout: Duration,
    interval: Duration,
) -> Status
where
    B: Bus,
    C: Clock,
{
    let raw = frame.build();
    trace!("=> {}", hex::encode(&raw));
    if let Err(e) = bus.write_block(raw[0], &raw[1..]) {
        trace!("frame write failed: {e}");
        return Status::Nack;
    }

    let mut status = Status::Nack;
    poll_until(clock, timeout, interval, || match bus.read_byte() {
        Ok(byte) => {
            status = Status::from_raw(byte);
            true
        }
        Err(_) => false,
    });
    trace!("<= {status}");
    status
}

/// Send a frame and read one status byte, no response polling.
///
/// Used where the device answers immediately once reachable (handshake
/// acknowledgments, resets).
pub fn exchange_once<B: Bus>(bus: &mut B, frame: &Frame) -> Status {
    let raw = frame.build();
    trace!("=> {}", hex::encode(&raw));
    if bus.write_block(raw[0], &raw[1..]).is_err() {
        return Status::Nack;
    }
    let status = match bus.read_byte() {
        Ok(byte) => Status::from_raw(byte),
        Err(_) => Status::Nack,
    };
    trace!("<= {status}");
    status
}
