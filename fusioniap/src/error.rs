//! Error types for fusioniap.

use std::io;
use thiserror::Error;

use crate::device::DeviceMode;
use crate::flasher::Phase;
use crate::protocol::frame::Status;

/// Result type for fusioniap operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for fusioniap operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// I2C bus error from the native transport.
    #[cfg(feature = "native")]
    #[error("I2C bus error: {0}")]
    I2c(#[from] i2cdev::linux::LinuxI2CError),

    /// Generic transport failure.
    #[error("bus error: {0}")]
    Bus(String),

    /// Firmware image does not fit in the flash region. Checked before any
    /// bus traffic is generated.
    #[error("firmware image is {len} bytes, exceeds the {max}-byte flash region")]
    FirmwareTooLarge {
        /// Actual image length in bytes.
        len: usize,
        /// Flash region capacity in bytes.
        max: usize,
    },

    /// Neither the application nor the bootloader address responded.
    #[error("no device present at either bus address")]
    DeviceNotFound,

    /// The device is running in the wrong mode for the requested operation.
    #[error("device is in {actual} mode but the operation requires {required} mode")]
    WrongMode {
        /// Mode the operation requires.
        required: DeviceMode,
        /// Mode the device was probed in.
        actual: DeviceMode,
    },

    /// The application firmware refused the enter-bootloader command.
    #[error("device refused to enter the bootloader: {status}")]
    BootEntryRejected {
        /// Status byte returned by the application firmware.
        status: Status,
    },

    /// The bootloader address never acknowledged within the deadline.
    #[error("bootloader did not answer within the transition deadline")]
    BootEntryTimeout,

    /// A transfer phase failed; carries the last raw status byte so the
    /// device's own error code (checksum, size, flash, alignment) survives
    /// up to the caller.
    #[error("{phase} failed: device returned {status}")]
    Phase {
        /// The phase that failed.
        phase: Phase,
        /// Last status byte read for that phase.
        status: Status,
    },

    /// Malformed frame bytes.
    #[error("invalid frame: {0}")]
    Frame(String),

    /// Interrupted by the embedding application (e.g. Ctrl-C).
    #[error("operation interrupted")]
    Interrupted,
}
