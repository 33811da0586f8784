//! Bus abstraction for the register-addressable device transport.
//!
//! The device shares a two-wire bus with the host and answers on one of two
//! fixed addresses depending on which firmware is running. Everything above
//! this module works in terms of the [`Bus`] trait; the protocol layer stays
//! I/O-agnostic and fully testable without hardware.
//!
//! ```text
//! +-----------------------+     +-----------------------+
//! |    Protocol layer     |     |    Protocol layer     |
//! | (frames, transfer)    |     | (frames, transfer)    |
//! +----------+------------+     +----------+------------+
//!            |                             |
//!            v                             v
//! +----------+------------+     +----------+------------+
//! |       Bus trait       |     |       Bus trait       |
//! +----------+------------+     +----------+------------+
//!            |                             |
//!            v                             v
//! +----------+------------+     +----------+------------+
//! |  NativeBus (i2cdev)   |     |   scripted test bus   |
//! +-----------------------+     +-----------------------+
//!        Linux host                    unit tests
//! ```
//!
//! This layer has no knowledge of frames, checksums or retries; it moves
//! bytes and reports whether a peer acknowledges at all.

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use crate::error::Result;

/// Byte-level transport bound to one fixed bus address.
///
/// All operations are blocking and may fail with a transport-level error
/// (no acknowledgment, bus busy, driver timeout).
pub trait Bus {
    /// The fixed peer address this endpoint talks to.
    fn address(&self) -> u16;

    /// Read a single byte from the peer (SMBus receive-byte).
    fn read_byte(&mut self) -> Result<u8>;

    /// Read `len` bytes starting at `register`.
    fn read_block(&mut self, register: u8, len: usize) -> Result<Vec<u8>>;

    /// Write `data` to `register` as one block transfer.
    fn write_block(&mut self, register: u8, data: &[u8]) -> Result<()>;

    /// Whether a peer currently acknowledges at this address.
    ///
    /// Implemented as a zero-effect read; no-ack and bus-busy conditions are
    /// caught and reported as absence.
    fn is_present(&mut self) -> bool;
}

// Re-export the native implementation when built for a Linux host
#[cfg(feature = "native")]
pub use native::NativeBus;
