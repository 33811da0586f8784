//! Native Linux bus implementation over `/dev/i2c-N`.

use i2cdev::core::I2CDevice;
use i2cdev::linux::LinuxI2CDevice;
use log::trace;

use crate::bus::Bus;
use crate::error::Result;

/// [`Bus`] implementation backed by the Linux userspace I2C interface.
pub struct NativeBus {
    dev: LinuxI2CDevice,
    path: String,
    addr: u16,
}

impl NativeBus {
    /// Open `/dev/i2c-<bus>` bound to the peer at `addr`.
    pub fn open(bus: u8, addr: u16) -> Result<Self> {
        let path = format!("/dev/i2c-{bus}");
        let dev = LinuxI2CDevice::new(&path, addr)?;
        trace!("opened {path} @ 0x{addr:02X}");
        Ok(Self { dev, path, addr })
    }

    /// Device node this endpoint was opened on.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Bus for NativeBus {
    fn address(&self) -> u16 {
        self.addr
    }

    fn read_byte(&mut self) -> Result<u8> {
        Ok(self.dev.smbus_read_byte()?)
    }

    fn read_block(&mut self, register: u8, len: usize) -> Result<Vec<u8>> {
        // SMBus block transfers cap at 32 bytes; every register read in the
        // protocol is 4 bytes or fewer.
        #[allow(clippy::cast_possible_truncation)]
        let len = len.min(32) as u8;
        Ok(self.dev.smbus_read_i2c_block_data(register, len)?)
    }

    fn write_block(&mut self, register: u8, data: &[u8]) -> Result<()> {
        Ok(self.dev.smbus_write_i2c_block_data(register, data)?)
    }

    fn is_present(&mut self) -> bool {
        self.dev.smbus_read_byte().is_ok()
    }
}
