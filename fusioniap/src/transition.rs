//! Driving the device from application mode into the bootloader.
//!
//! Entering the bootloader makes the device reboot and reappear on the other
//! bus address, so the handshake runs in two phases: an advanced command to
//! the application address, then presence-polling the bootloader address
//! until it acknowledges an IAP ACK frame. The transition tolerates the
//! address flip happening at any point mid-poll.

use std::time::Duration;

use log::{debug, info};

use crate::bus::Bus;
use crate::device::{DeviceHandle, DeviceMode};
use crate::error::{Error, Result};
use crate::protocol::frame::{Frame, Status};
use crate::retry::{Clock, exchange_once, poll_until};

/// Wall-clock deadline for the bootloader to appear and acknowledge.
pub const ENTER_BOOT_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between bootloader presence/handshake attempts.
const BOOT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Settle time after the enter-boot command before reading its status.
const COMMAND_SETTLE: Duration = Duration::from_millis(100);

/// Settle time for the internal reset before polling the new address.
const REBOOT_SETTLE: Duration = Duration::from_secs(1);

/// How a successful transition came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootEntry {
    /// The bootloader was already running; only the handshake was performed.
    AlreadyActive,
    /// The device was commanded out of application mode and re-acquired.
    Entered,
}

/// Bring the device into bootloader mode, wherever it starts from.
///
/// Returns once the bootloader has acknowledged the handshake. On a
/// deadline miss the device is left in whatever mode it settled in.
pub fn enter_bootloader<B, C>(handle: &mut DeviceHandle<B>, clock: &C) -> Result<BootEntry>
where
    B: Bus,
    C: Clock,
{
    match handle.probe_mode() {
        DeviceMode::Bootloader => {
            debug!("device already in bootloader mode");
            handshake(handle.boot_bus(), clock)?;
            Ok(BootEntry::AlreadyActive)
        }
        DeviceMode::Application => {
            info!("commanding device into bootloader mode");
            let raw = Frame::enter_boot().build();
            handle.app_bus().write_block(raw[0], &raw[1..])?;
            clock.sleep(COMMAND_SETTLE);

            let status = match handle.app_bus().read_byte() {
                Ok(byte) => Status::from_raw(byte),
                Err(_) => Status::Nack,
            };
            if !status.is_ok() {
                return Err(Error::BootEntryRejected { status });
            }

            // the device now resets and moves from 0x17 to 0x5D
            clock.sleep(REBOOT_SETTLE);
            wait_for_bootloader(handle, clock)?;
            info!("device entered bootloader mode");
            Ok(BootEntry::Entered)
        }
        DeviceMode::Unreachable => Err(Error::DeviceNotFound),
    }
}

/// Handshake with an already-present bootloader: ACK until OK or deadline.
pub(crate) fn handshake<B, C>(bus: &mut B, clock: &C) -> Result<()>
where
    B: Bus,
    C: Clock,
{
    let acknowledged = poll_until(clock, ENTER_BOOT_TIMEOUT, BOOT_POLL_INTERVAL, || {
        exchange_once(bus, &Frame::ack()).is_ok()
    });
    if acknowledged {
        Ok(())
    } else {
        Err(Error::BootEntryTimeout)
    }
}

/// Poll for the bootloader address, then handshake, within one deadline.
fn wait_for_bootloader<B, C>(handle: &mut DeviceHandle<B>, clock: &C) -> Result<()>
where
    B: Bus,
    C: Clock,
{
    let entered = poll_until(clock, ENTER_BOOT_TIMEOUT, BOOT_POLL_INTERVAL, || {
        let bus = handle.boot_bus();
        bus.is_present() && exchange_once(bus, &Frame::ack()).is_ok()
    });
    if entered {
        Ok(())
    } else {
        Err(Error::BootEntryTimeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockBus;
    use crate::device::{APP_ADDR, BOOT_ADDR};
    use crate::retry::testing::ManualClock;

    fn handle(app_present: bool, boot_present: bool) -> DeviceHandle<MockBus> {
        let mut app = MockBus::new(APP_ADDR);
        app.present = app_present;
        let mut boot = MockBus::new(BOOT_ADDR);
        boot.present = boot_present;
        DeviceHandle::new(app, boot)
    }

    #[test]
    fn test_already_in_bootloader() {
        let clock = ManualClock::new();
        let mut h = handle(false, true);
        h.boot_bus().push_status(Status::Ok);

        let entry = enter_bootloader(&mut h, &clock).unwrap();
        assert_eq!(entry, BootEntry::AlreadyActive);
        // the ACK control frame went to the bootloader endpoint
        assert_eq!(h.boot_bus().writes, [(0xD0, vec![0xAC, 0x01, 0xED])]);
    }

    #[test]
    fn test_transition_from_application() {
        let clock = ManualClock::new();
        let mut h = handle(true, false);
        h.app_bus().push_status(Status::Ok); // enter-boot accepted
        // bootloader appears on the third presence check
        h.boot_bus().presence.extend([false, false, true]);
        h.boot_bus().push_status(Status::Ok); // handshake ACK

        let entry = enter_bootloader(&mut h, &clock).unwrap();
        assert_eq!(entry, BootEntry::Entered);
        assert_eq!(h.app_bus().writes, [(0xAC, vec![0x04, 0x01, 0xAE])]);
        assert_eq!(h.boot_bus().writes, [(0xD0, vec![0xAC, 0x01, 0xED])]);
        // 100ms settle + 1s reboot settle + two poll sleeps
        assert_eq!(clock.elapsed(), Duration::from_millis(1120));
    }

    #[test]
    fn test_enter_boot_rejected_by_application() {
        let clock = ManualClock::new();
        let mut h = handle(true, false);
        h.app_bus().push_status(Status::Fail);

        let err = enter_bootloader(&mut h, &clock).unwrap_err();
        assert!(matches!(
            err,
            Error::BootEntryRejected {
                status: Status::Fail
            }
        ));
        // never touched the bootloader address
        assert!(h.boot_bus().writes.is_empty());
    }

    #[test]
    fn test_bootloader_never_appears_within_deadline() {
        let clock = ManualClock::new();
        let mut h = handle(true, false);
        h.app_bus().push_status(Status::Ok);
        // boot endpoint stays absent forever
        h.boot_bus().present = false;

        let err = enter_bootloader(&mut h, &clock).unwrap_err();
        assert!(matches!(err, Error::BootEntryTimeout));
        assert!(h.boot_bus().writes.is_empty());
        // full settle plus the 5s polling window elapsed
        assert!(clock.elapsed() >= Duration::from_millis(1100) + ENTER_BOOT_TIMEOUT);
    }

    #[test]
    fn test_unreachable_device() {
        let clock = ManualClock::new();
        let mut h = handle(false, false);
        assert!(matches!(
            enter_bootloader(&mut h, &clock),
            Err(Error::DeviceNotFound)
        ));
    }
}
