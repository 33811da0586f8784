//! # fusioniap
//!
//! A library for updating the firmware of an I2C-attached companion
//! microcontroller through its in-application-programming (IAP) protocol.
//!
//! The device answers on one of two fixed bus addresses depending on which
//! firmware is running (`0x17` application, `0x5D` bootloader). This crate
//! provides:
//!
//! - Byte-exact frame encoding/decoding with XOR checksums
//! - Mode probing and the application → bootloader transition handshake
//! - The erase / chunked-write / verify transfer session with bounded
//!   retries and progress reporting
//! - Version, main-entry and board-id register reads for both modes
//!
//! ## Supported Platforms
//!
//! - **Native** (default): Linux hosts with `/dev/i2c-N`, via the `i2cdev`
//!   crate
//! - Any other transport by implementing the [`Bus`] trait
//!
//! ## Example
//!
//! ```rust,no_run
//! use fusioniap::{DeviceHandle, FirmwareImage, SessionConfig, SystemClock};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::from_file("firmware.bin")?;
//!
//!     let mut handle = DeviceHandle::open(1)?;
//!     let clock = SystemClock;
//!
//!     fusioniap::run_update(
//!         &mut handle,
//!         &clock,
//!         &image,
//!         SessionConfig::default(),
//!         &mut |phase, current, total| {
//!             println!("{phase}: {current}/{total}");
//!         },
//!     )?;
//!
//!     // boot the freshly written application
//!     fusioniap::reset_device(&mut handle)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod bus;
pub mod device;
pub mod error;
pub mod flasher;
pub mod image;
pub mod protocol;
pub mod retry;
pub mod transition;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). A transfer
/// session checks it between chunks; a round trip already in flight always
/// completes first.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupt_requested() -> bool {
    INTERRUPT_CHECKER.get().is_some_and(|checker| checker())
}

// Re-exports for convenience
// Native-specific re-exports
#[cfg(feature = "native")]
pub use bus::NativeBus;
pub use {
    bus::Bus,
    device::{
        APP_ADDR, BOARD_ID, BOOT_ADDR, DeviceHandle, DeviceMode, MainEntry, RegisterMap,
        VersionTriple,
    },
    error::{Error, Result},
    flasher::{
        CHUNK_SIZE, FLASH_TARGET_ADDR, IAP_RETRY_TIMES, Phase, SessionConfig, TransferSession,
        reset_device, restore_factory, run_update,
    },
    image::{FIRMWARE_MAX_BYTES, FirmwareImage},
    protocol::frame::{Frame, PAGE_SIZE, Status, page_count, xor_checksum},
    retry::{Clock, SystemClock},
    transition::{BootEntry, ENTER_BOOT_TIMEOUT, enter_bootloader},
};
