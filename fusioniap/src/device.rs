//! Device addressing, mode probing and register-map reads.
//!
//! The device occupies exactly one of two fixed bus addresses at a time:
//! `0x17` while its application firmware runs, `0x5D` while the bootloader
//! runs. Rebooting between modes physically moves it from one address to the
//! other, so the current mode is always derived by presence-probing and never
//! cached across operations.
//!
//! The two firmwares expose different register layouts; every read here
//! resolves the mode once, then uses the matching [`RegisterMap`] constant.

use std::fmt;

use byteorder::{BigEndian, ReadBytesExt};
use log::debug;

use crate::bus::Bus;
use crate::error::{Error, Result};

/// Bus address of the application firmware.
pub const APP_ADDR: u16 = 0x17;
/// Bus address of the bootloader.
pub const BOOT_ADDR: u16 = 0x5D;

/// Board identifier reported by the application firmware.
pub const BOARD_ID: u16 = 1908;

/// Board-id register in the application map (2 bytes, big-endian).
const BOARD_ID_REG: u8 = 3;

/// Register offsets for one firmware's map.
#[derive(Debug, Clone, Copy)]
pub struct RegisterMap {
    /// Bootloader version triple (3 consecutive registers).
    pub boot_version: u8,
    /// Factory-image version triple.
    pub factory_version: u8,
    /// Application version triple.
    pub app_version: u8,
    /// Main-entry address word (4 consecutive registers, big-endian).
    pub main_entry: u8,
}

/// Register layout of the application firmware.
pub const APP_REGISTERS: RegisterMap = RegisterMap {
    boot_version: 207,
    factory_version: 204,
    app_version: 5,
    main_entry: 200,
};

/// Register layout of the bootloader, a smaller set at different offsets.
pub const BOOT_REGISTERS: RegisterMap = RegisterMap {
    boot_version: 0,
    factory_version: 3,
    app_version: 6,
    main_entry: 10,
};

/// Which firmware the device is currently running, derived by probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    /// Application firmware answers at [`APP_ADDR`].
    Application,
    /// Bootloader answers at [`BOOT_ADDR`].
    Bootloader,
    /// Neither address acknowledges.
    Unreachable,
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Application => write!(f, "application"),
            Self::Bootloader => write!(f, "bootloader"),
            Self::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// A firmware version as three unsigned components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionTriple {
    /// Major component.
    pub major: u8,
    /// Minor component.
    pub minor: u8,
    /// Patch component.
    pub patch: u8,
}

impl VersionTriple {
    fn from_registers(raw: &[u8]) -> Result<Self> {
        let [major, minor, patch] = *raw else {
            return Err(Error::Bus(format!(
                "short version read: {} bytes",
                raw.len()
            )));
        };
        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

impl fmt::Display for VersionTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Entry address of the image the device will boot into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MainEntry(pub u32);

impl fmt::Display for MainEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Owns one transport endpoint per fixed address.
///
/// At most one endpoint has a live peer at any moment; all mode-sensitive
/// reads re-probe before touching registers. Callers must serialize all
/// protocol operations on one handle: two concurrent sessions would
/// interleave bytes on the shared bus.
pub struct DeviceHandle<B: Bus> {
    app: B,
    boot: B,
}

impl<B: Bus> DeviceHandle<B> {
    /// Build a handle from the application and bootloader endpoints.
    pub fn new(app: B, boot: B) -> Self {
        Self { app, boot }
    }

    /// The application-address endpoint.
    pub fn app_bus(&mut self) -> &mut B {
        &mut self.app
    }

    /// The bootloader-address endpoint.
    pub fn boot_bus(&mut self) -> &mut B {
        &mut self.boot
    }

    /// Probe which mode the device is in: application address first, then
    /// bootloader, else unreachable.
    pub fn probe_mode(&mut self) -> DeviceMode {
        let mode = if self.app.is_present() {
            DeviceMode::Application
        } else if self.boot.is_present() {
            DeviceMode::Bootloader
        } else {
            DeviceMode::Unreachable
        };
        debug!("probed device mode: {mode}");
        mode
    }

    /// Read `len` registers from whichever map the current mode selects.
    fn read_mapped(&mut self, app_reg: u8, boot_reg: u8, len: usize) -> Result<Vec<u8>> {
        match self.probe_mode() {
            DeviceMode::Application => self.app.read_block(app_reg, len),
            DeviceMode::Bootloader => self.boot.read_block(boot_reg, len),
            DeviceMode::Unreachable => Err(Error::DeviceNotFound),
        }
    }

    /// Bootloader firmware version.
    pub fn boot_version(&mut self) -> Result<VersionTriple> {
        let raw = self.read_mapped(APP_REGISTERS.boot_version, BOOT_REGISTERS.boot_version, 3)?;
        VersionTriple::from_registers(&raw)
    }

    /// Application firmware version.
    pub fn app_version(&mut self) -> Result<VersionTriple> {
        let raw = self.read_mapped(APP_REGISTERS.app_version, BOOT_REGISTERS.app_version, 3)?;
        VersionTriple::from_registers(&raw)
    }

    /// Factory image version.
    pub fn factory_version(&mut self) -> Result<VersionTriple> {
        let raw = self.read_mapped(
            APP_REGISTERS.factory_version,
            BOOT_REGISTERS.factory_version,
            3,
        )?;
        VersionTriple::from_registers(&raw)
    }

    /// Entry address of the active image, assembled big-endian from four
    /// consecutive registers.
    pub fn main_entry(&mut self) -> Result<MainEntry> {
        let raw = self.read_mapped(APP_REGISTERS.main_entry, BOOT_REGISTERS.main_entry, 4)?;
        let mut rdr = &raw[..];
        Ok(MainEntry(rdr.read_u32::<BigEndian>()?))
    }

    /// Board identifier, available from the application firmware only.
    pub fn board_id(&mut self) -> Result<u16> {
        match self.probe_mode() {
            DeviceMode::Application => {
                let raw = self.app.read_block(BOARD_ID_REG, 2)?;
                let mut rdr = &raw[..];
                Ok(rdr.read_u16::<BigEndian>()?)
            }
            actual => Err(Error::WrongMode {
                required: DeviceMode::Application,
                actual,
            }),
        }
    }
}

#[cfg(feature = "native")]
mod native_impl {
    use super::{APP_ADDR, BOOT_ADDR, DeviceHandle};
    use crate::bus::NativeBus;
    use crate::error::Result;

    impl DeviceHandle<NativeBus> {
        /// Open both endpoints on `/dev/i2c-<bus>`.
        pub fn open(bus: u8) -> Result<Self> {
            let app = NativeBus::open(bus, APP_ADDR)?;
            let boot = NativeBus::open(bus, BOOT_ADDR)?;
            Ok(Self::new(app, boot))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockBus;

    fn handle(app_present: bool, boot_present: bool) -> DeviceHandle<MockBus> {
        let mut app = MockBus::new(APP_ADDR);
        app.present = app_present;
        let mut boot = MockBus::new(BOOT_ADDR);
        boot.present = boot_present;
        DeviceHandle::new(app, boot)
    }

    #[test]
    fn test_probe_prefers_application() {
        // both present never happens on real hardware; application wins the probe order
        assert_eq!(handle(true, true).probe_mode(), DeviceMode::Application);
        assert_eq!(handle(true, false).probe_mode(), DeviceMode::Application);
        assert_eq!(handle(false, true).probe_mode(), DeviceMode::Bootloader);
        assert_eq!(handle(false, false).probe_mode(), DeviceMode::Unreachable);
    }

    #[test]
    fn test_probe_is_idempotent() {
        let mut h = handle(false, true);
        let first = h.probe_mode();
        let second = h.probe_mode();
        assert_eq!(first, second);
    }

    #[test]
    fn test_version_read_selects_map_by_mode() {
        let mut h = handle(true, false);
        h.app_bus().push_block(&[2, 1, 9]);
        let version = h.app_version().unwrap();
        assert_eq!(version.to_string(), "2.1.9");

        let mut h = handle(false, true);
        h.boot_bus().push_block(&[1, 0, 0]);
        let version = h.boot_version().unwrap();
        assert_eq!(version.to_string(), "1.0.0");
    }

    #[test]
    fn test_version_read_unreachable() {
        let mut h = handle(false, false);
        assert!(matches!(h.factory_version(), Err(Error::DeviceNotFound)));
    }

    #[test]
    fn test_main_entry_big_endian() {
        let mut h = handle(true, false);
        h.app_bus().push_block(&[0x08, 0x00, 0x78, 0x00]);
        let entry = h.main_entry().unwrap();
        assert_eq!(entry.0, 0x0800_7800);
        assert_eq!(entry.to_string(), "0x08007800");
    }

    #[test]
    fn test_board_id_in_application_mode() {
        let mut h = handle(true, false);
        h.app_bus().push_block(&[0x07, 0x74]);
        assert_eq!(h.board_id().unwrap(), BOARD_ID);
    }

    #[test]
    fn test_board_id_rejected_in_boot_mode() {
        let mut h = handle(false, true);
        assert!(matches!(
            h.board_id(),
            Err(Error::WrongMode {
                required: DeviceMode::Application,
                actual: DeviceMode::Bootloader,
            })
        ));
    }
}
