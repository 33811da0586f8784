//! Firmware transfer session and whole-update orchestration.
//!
//! A [`TransferSession`] drives one update attempt over the bootloader
//! endpoint: erase the target pages, stream the image in 24-byte chunks,
//! then ask the device to verify the whole region against an XOR checksum.
//! Sessions are created per attempt and never resumed; a failed session is
//! discarded and the caller decides whether to start over from erase.
//!
//! [`run_update`] wraps the full workflow: mode probe, bootloader entry,
//! then the session phases. [`reset_device`] and [`restore_factory`] are the
//! standalone device operations sharing the same retry policy.

use std::fmt;
use std::time::Duration;

use log::{debug, info, warn};

use crate::bus::Bus;
use crate::device::{DeviceHandle, DeviceMode};
use crate::error::{Error, Result};
use crate::image::FirmwareImage;
use crate::is_interrupt_requested;
use crate::protocol::frame::Frame;
use crate::retry::{Clock, exchange, exchange_once, retry_status};
use crate::transition::enter_bootloader;

/// Bytes of image data carried per write round trip.
pub const CHUNK_SIZE: usize = 24;

/// Round-trip budget for erase, reset and restore commands.
pub const IAP_RETRY_TIMES: usize = 5;

/// Flash address the update region starts at.
pub const FLASH_TARGET_ADDR: u32 = 0x0800_7800;

/// Deadline for one status byte to become readable after a command.
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between status read attempts.
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Pause between consecutive write chunks.
const INTER_CHUNK_DELAY: Duration = Duration::from_millis(10);

/// The sequential phases of an update, reported through progress callbacks
/// and carried inside [`Error::Phase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Page erase of the target region.
    Erase,
    /// Chunked image write.
    Write,
    /// Whole-image checksum verification.
    Verify,
    /// Device reset out of the current mode.
    Reset,
    /// Factory image restore.
    Restore,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Erase => write!(f, "erase"),
            Self::Write => write!(f, "write"),
            Self::Verify => write!(f, "verify"),
            Self::Reset => write!(f, "reset"),
            Self::Restore => write!(f, "factory restore"),
        }
    }
}

/// Tunable retry policy of a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Round-trip budget for the erase phase.
    pub phase_attempts: usize,
    /// Round trips allowed per write chunk.
    ///
    /// Defaults to 1: a chunk that comes back non-OK aborts the session
    /// immediately. Erase, reset and restore keep the full
    /// [`IAP_RETRY_TIMES`] budget either way.
    pub chunk_attempts: usize,
    /// Deadline for each status byte.
    pub status_timeout: Duration,
    /// Pause between status read attempts.
    pub poll_interval: Duration,
    /// Pause between consecutive chunks.
    pub inter_chunk_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            phase_attempts: IAP_RETRY_TIMES,
            chunk_attempts: 1,
            status_timeout: STATUS_TIMEOUT,
            poll_interval: STATUS_POLL_INTERVAL,
            inter_chunk_delay: INTER_CHUNK_DELAY,
        }
    }
}

/// One in-flight update attempt against the bootloader endpoint.
///
/// The write offset only moves forward; it is the caller-visible progress
/// measure. Exactly one session may use the bus at a time.
pub struct TransferSession<'a, B: Bus, C: Clock> {
    bus: &'a mut B,
    clock: &'a C,
    image: &'a FirmwareImage,
    config: SessionConfig,
    offset: usize,
}

impl<'a, B: Bus, C: Clock> TransferSession<'a, B, C> {
    /// Create a session with the default configuration.
    pub fn new(bus: &'a mut B, clock: &'a C, image: &'a FirmwareImage) -> Self {
        Self::with_config(bus, clock, image, SessionConfig::default())
    }

    /// Create a session with an explicit configuration.
    pub fn with_config(
        bus: &'a mut B,
        clock: &'a C,
        image: &'a FirmwareImage,
        config: SessionConfig,
    ) -> Self {
        Self {
            bus,
            clock,
            image,
            config,
            offset: 0,
        }
    }

    /// Bytes of the image confirmed written so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Run erase, write and verify in order, reporting progress per phase.
    pub fn run<F>(&mut self, progress: &mut F) -> Result<()>
    where
        F: FnMut(Phase, usize, usize),
    {
        let total = self.image.len();
        progress(Phase::Erase, 0, total);
        self.erase()?;
        progress(Phase::Write, 0, total);
        self.write(progress)?;
        progress(Phase::Verify, total, total);
        self.verify()?;
        Ok(())
    }

    /// Erase enough pages for the image at the fixed target address.
    pub fn erase(&mut self) -> Result<()> {
        info!(
            "erasing {} pages at 0x{FLASH_TARGET_ADDR:08X}",
            self.image.pages()
        );
        let frame = Frame::erase(FLASH_TARGET_ADDR, self.image.len());
        retry_status(self.config.phase_attempts, |attempt| {
            if attempt > 1 {
                debug!("erase attempt {attempt}/{}", self.config.phase_attempts);
            }
            exchange(
                self.bus,
                self.clock,
                &frame,
                self.config.status_timeout,
                self.config.poll_interval,
            )
        })
        .map_err(|status| {
            warn!("erase failed: {status}");
            Error::Phase {
                phase: Phase::Erase,
                status,
            }
        })
    }

    /// Stream the image in [`CHUNK_SIZE`]-byte write frames.
    ///
    /// Any non-OK chunk status aborts the whole transfer; the device's
    /// status byte travels up unchanged.
    pub fn write<F>(&mut self, progress: &mut F) -> Result<()>
    where
        F: FnMut(Phase, usize, usize),
    {
        let image = self.image;
        let total = image.len();
        info!("writing {total} bytes in {CHUNK_SIZE}-byte chunks");

        for (offset, chunk) in image.chunks(CHUNK_SIZE) {
            if is_interrupt_requested() {
                return Err(Error::Interrupted);
            }

            #[allow(clippy::cast_possible_truncation)] // offsets stay below 24 KiB
            let frame = Frame::write(offset as u16, chunk);
            retry_status(self.config.chunk_attempts, |_| {
                exchange(
                    self.bus,
                    self.clock,
                    &frame,
                    self.config.status_timeout,
                    self.config.poll_interval,
                )
            })
            .map_err(|status| {
                warn!("write failed at offset {offset}: {status}");
                Error::Phase {
                    phase: Phase::Write,
                    status,
                }
            })?;

            self.offset = (offset + CHUNK_SIZE).min(total);
            progress(Phase::Write, self.offset, total);

            if self.offset < total {
                self.clock.sleep(self.config.inter_chunk_delay);
            }
        }
        Ok(())
    }

    /// Ask the device to checksum the written region against the image.
    ///
    /// A single round trip; the device either confirms or names its own
    /// failure code.
    pub fn verify(&mut self) -> Result<()> {
        info!("verifying {} bytes", self.image.len());
        let frame = Frame::verify(FLASH_TARGET_ADDR, self.image.as_bytes());
        let status = exchange_once(self.bus, &frame);
        if status.is_ok() {
            Ok(())
        } else {
            warn!("verify failed: {status}");
            Err(Error::Phase {
                phase: Phase::Verify,
                status,
            })
        }
    }
}

/// Run a complete update: enter the bootloader if needed, then erase, write
/// and verify the image.
///
/// The image size invariant is enforced at [`FirmwareImage`] construction,
/// before any bus traffic. The device is left in bootloader mode; call
/// [`reset_device`] to boot the new application.
pub fn run_update<B, C, F>(
    handle: &mut DeviceHandle<B>,
    clock: &C,
    image: &FirmwareImage,
    config: SessionConfig,
    progress: &mut F,
) -> Result<()>
where
    B: Bus,
    C: Clock,
    F: FnMut(Phase, usize, usize),
{
    enter_bootloader(handle, clock)?;
    let mut session = TransferSession::with_config(handle.boot_bus(), clock, image, config);
    session.run(progress)?;
    info!("update complete");
    Ok(())
}

/// Reset the device in whichever mode it is currently running.
pub fn reset_device<B: Bus>(handle: &mut DeviceHandle<B>) -> Result<()> {
    let (frame, mode) = match handle.probe_mode() {
        DeviceMode::Application => (Frame::app_reset(), DeviceMode::Application),
        DeviceMode::Bootloader => (Frame::boot_reset(), DeviceMode::Bootloader),
        DeviceMode::Unreachable => return Err(Error::DeviceNotFound),
    };
    info!("resetting device out of {mode} mode");

    let bus = match mode {
        DeviceMode::Application => handle.app_bus(),
        _ => handle.boot_bus(),
    };
    retry_status(IAP_RETRY_TIMES, |_| exchange_once(bus, &frame)).map_err(|status| Error::Phase {
        phase: Phase::Reset,
        status,
    })
}

/// Make the factory image the active one again.
///
/// Requires the bootloader; the device is driven there first if needed.
/// Differs from [`reset_device`] only in which image becomes active.
pub fn restore_factory<B, C>(handle: &mut DeviceHandle<B>, clock: &C) -> Result<()>
where
    B: Bus,
    C: Clock,
{
    enter_bootloader(handle, clock)?;
    info!("restoring factory firmware");
    let bus = handle.boot_bus();
    retry_status(IAP_RETRY_TIMES, |_| {
        exchange_once(bus, &Frame::restore_factory())
    })
    .map_err(|status| Error::Phase {
        phase: Phase::Restore,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockBus;
    use crate::device::{APP_ADDR, BOOT_ADDR};
    use crate::protocol::frame::{IAP_CMD_ERASE, IAP_CMD_VERIFY, IAP_CMD_WRITE, Status};
    use crate::retry::testing::ManualClock;

    fn init_logs() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn boot_bus() -> MockBus {
        MockBus::new(BOOT_ADDR)
    }

    fn no_progress() -> impl FnMut(Phase, usize, usize) {
        |_, _, _| {}
    }

    #[test]
    fn test_full_session_exact_image() {
        init_logs();
        // 24576 bytes exactly: 24 pages, 1024 full chunks, verify size 24576
        let image = FirmwareImage::new(vec![0x5A; 24 * 1024]).unwrap();
        let clock = ManualClock::new();
        let mut bus = boot_bus();
        bus.push_statuses(Status::Ok, 1 + 1024 + 1);

        let mut session = TransferSession::new(&mut bus, &clock, &image);
        let mut reached = Vec::new();
        session
            .run(&mut |phase, current, total| reached.push((phase, current, total)))
            .unwrap();

        assert_eq!(session.offset(), 24576);
        drop(session);

        assert_eq!(bus.writes.len(), 1026);

        // erase frame: 24 pages at the fixed target address
        let (reg, erase) = &bus.writes[0];
        assert_eq!(*reg, 0xD0);
        assert_eq!(erase[0], IAP_CMD_ERASE);
        assert_eq!(&erase[3..9], &[0x08, 0x00, 0x78, 0x00, 0x00, 0x18]);

        // first and last write frames carry the right offsets
        let (_, first) = &bus.writes[1];
        assert_eq!(first[0], IAP_CMD_WRITE);
        assert_eq!(&first[3..5], &[0x00, 0x00]);
        let (_, last_write) = &bus.writes[1024];
        assert_eq!(&last_write[3..5], &[0x5F, 0xE8]); // 24552

        // verify frame carries size 24576
        let (_, verify) = &bus.writes[1025];
        assert_eq!(verify[0], IAP_CMD_VERIFY);
        assert_eq!(&verify[7..9], &[0x60, 0x00]);
        assert_eq!(verify[9], 0x00); // XOR of an even count of 0x5A

        // progress reached 100% of the write phase
        assert!(reached.contains(&(Phase::Write, 24576, 24576)));
        assert_eq!(*reached.last().unwrap(), (Phase::Verify, 24576, 24576));
    }

    #[test]
    fn test_checksum_error_aborts_write_immediately() {
        init_logs();
        let image = FirmwareImage::new(vec![0xA5; 100]).unwrap();
        let clock = ManualClock::new();
        let mut bus = boot_bus();
        bus.push_status(Status::Ok); // erase
        bus.push_status(Status::Ok); // chunk 0
        bus.push_status(Status::ChecksumErr); // chunk 1 rejected

        let mut session = TransferSession::new(&mut bus, &clock, &image);
        let err = session.run(&mut no_progress()).unwrap_err();
        match err {
            Error::Phase { phase, status } => {
                assert_eq!(phase, Phase::Write);
                assert_eq!(status, Status::ChecksumErr);
                assert_eq!(status.raw(), 0xE1);
            }
            other => panic!("expected phase error, got {other}"),
        }
        assert_eq!(session.offset(), 24);
        drop(session);
        // erase + two write frames, then nothing more
        assert_eq!(bus.writes.len(), 3);
    }

    #[test]
    fn test_erase_retries_up_to_budget() {
        let image = FirmwareImage::new(vec![1; 10]).unwrap();
        let clock = ManualClock::new();
        let mut bus = boot_bus();
        bus.push_statuses(Status::Fail, 4);
        bus.push_status(Status::Ok);

        let mut session = TransferSession::new(&mut bus, &clock, &image);
        session.erase().unwrap();
        drop(session);
        assert_eq!(bus.writes.len(), 5);
    }

    #[test]
    fn test_erase_exhausted_reports_last_status() {
        let image = FirmwareImage::new(vec![1; 10]).unwrap();
        let clock = ManualClock::new();
        let mut bus = boot_bus();
        bus.push_statuses(Status::FlashErr, IAP_RETRY_TIMES);

        let mut session = TransferSession::new(&mut bus, &clock, &image);
        let err = session.erase().unwrap_err();
        assert!(matches!(
            err,
            Error::Phase {
                phase: Phase::Erase,
                status: Status::FlashErr,
            }
        ));
    }

    #[test]
    fn test_write_chunk_retry_is_opt_in() {
        let image = FirmwareImage::new(vec![1; 10]).unwrap();
        let clock = ManualClock::new();
        let mut bus = boot_bus();
        bus.push_status(Status::Nack); // first try drops
        bus.push_status(Status::Ok); // retry lands

        let config = SessionConfig {
            chunk_attempts: 2,
            ..SessionConfig::default()
        };
        let mut session = TransferSession::with_config(&mut bus, &clock, &image, config);
        session.write(&mut no_progress()).unwrap();
        drop(session);
        assert_eq!(bus.writes.len(), 2);
    }

    #[test]
    fn test_verify_single_round_trip() {
        let image = FirmwareImage::new(vec![7; 30]).unwrap();
        let clock = ManualClock::new();
        let mut bus = boot_bus();
        bus.push_status(Status::SizeErr);

        let mut session = TransferSession::new(&mut bus, &clock, &image);
        let err = session.verify().unwrap_err();
        assert!(matches!(
            err,
            Error::Phase {
                phase: Phase::Verify,
                status: Status::SizeErr,
            }
        ));
        drop(session);
        assert_eq!(bus.writes.len(), 1);
    }

    #[test]
    fn test_oversized_image_never_reaches_the_bus() {
        // the size invariant trips at construction, before any session exists
        let err = FirmwareImage::new(vec![0; 24 * 1024 + 1]).unwrap_err();
        assert!(matches!(err, Error::FirmwareTooLarge { len: 24577, .. }));
    }

    #[test]
    fn test_reset_in_application_mode() {
        let mut app = MockBus::new(APP_ADDR);
        app.present = true;
        app.push_status(Status::Ok);
        let mut boot = boot_bus();
        boot.present = false;
        let mut handle = DeviceHandle::new(app, boot);

        reset_device(&mut handle).unwrap();
        assert_eq!(handle.app_bus().writes, [(0xAC, vec![0x00, 0x01, 0xAE])]);
        assert!(handle.boot_bus().writes.is_empty());
    }

    #[test]
    fn test_reset_in_boot_mode_retries() {
        let mut app = MockBus::new(APP_ADDR);
        app.present = false;
        let mut boot = boot_bus();
        boot.present = true;
        boot.push_status(Status::Fail);
        boot.push_status(Status::Ok);
        let mut handle = DeviceHandle::new(app, boot);

        reset_device(&mut handle).unwrap();
        assert_eq!(handle.boot_bus().writes.len(), 2);
        assert_eq!(handle.boot_bus().writes[0].1, vec![0xAE, 0x01, 0xED]);
    }

    #[test]
    fn test_restore_factory_from_boot_mode() {
        let clock = ManualClock::new();
        let mut app = MockBus::new(APP_ADDR);
        app.present = false;
        let mut boot = boot_bus();
        boot.present = true;
        boot.push_status(Status::Ok); // handshake
        boot.push_status(Status::Ok); // restore
        let mut handle = DeviceHandle::new(app, boot);

        restore_factory(&mut handle, &clock).unwrap();
        let writes = &handle.boot_bus().writes;
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1], (0xD0, vec![0xDF, 0x01, 0xED]));
    }

    #[test]
    fn test_run_update_enters_bootloader_first() {
        let image = FirmwareImage::new(vec![3; 24]).unwrap();
        let clock = ManualClock::new();
        let mut app = MockBus::new(APP_ADDR);
        app.present = true;
        app.push_status(Status::Ok); // enter-boot accepted
        let mut boot = boot_bus();
        boot.present = false;
        boot.presence.push_back(true);
        boot.push_status(Status::Ok); // handshake
        boot.push_status(Status::Ok); // erase
        boot.push_status(Status::Ok); // single chunk
        boot.push_status(Status::Ok); // verify
        let mut handle = DeviceHandle::new(app, boot);

        run_update(
            &mut handle,
            &clock,
            &image,
            SessionConfig::default(),
            &mut no_progress(),
        )
        .unwrap();

        assert_eq!(handle.app_bus().writes.len(), 1);
        assert_eq!(handle.boot_bus().writes.len(), 4);
    }
}
