//! Firmware image loading and invariants.

use std::path::Path;

use log::debug;

use crate::error::{Error, Result};
use crate::protocol::frame::{page_count, xor_checksum};

/// Largest firmware image the device's update region can hold (24 KiB).
pub const FIRMWARE_MAX_BYTES: usize = 24 * 1024;

/// An immutable firmware image, held fully in memory.
///
/// Construction enforces the size invariant, so an oversized file is
/// rejected before a single byte reaches the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Wrap raw image bytes, rejecting anything over [`FIRMWARE_MAX_BYTES`].
    pub fn new(data: Vec<u8>) -> Result<Self> {
        if data.len() > FIRMWARE_MAX_BYTES {
            return Err(Error::FirmwareTooLarge {
                len: data.len(),
                max: FIRMWARE_MAX_BYTES,
            });
        }
        Ok(Self { data })
    }

    /// Read an image file fully into memory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        debug!("loaded {} bytes from {}", data.len(), path.display());
        Self::new(data)
    }

    /// Image length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The raw image bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// XOR checksum of the whole image, as carried in the verify frame.
    pub fn checksum(&self) -> u8 {
        xor_checksum(&self.data)
    }

    /// Number of flash pages the image occupies.
    pub fn pages(&self) -> u16 {
        page_count(self.data.len())
    }

    /// Iterate the image in `(offset, chunk)` steps of `chunk_size` bytes;
    /// the final chunk may be shorter.
    pub fn chunks(&self, chunk_size: usize) -> impl Iterator<Item = (usize, &[u8])> {
        self.data
            .chunks(chunk_size)
            .enumerate()
            .map(move |(i, chunk)| (i * chunk_size, chunk))
    }
}
