//! IAP wire protocol frames and checksums.
//!
//! The device understands two frame families. Both are written as one SMBus
//! block transfer where the start byte doubles as the command/register byte.
//!
//! ## Advanced command (application firmware only)
//!
//! ```text
//! +-------+-----+-------+------+
//! | Start | Cmd | Value | End  |
//! +-------+-----+-------+------+
//! | 0xAC  | 1   | 1     | 0xAE |
//! +-------+-----+-------+------+
//! ```
//!
//! ## IAP command (bootloader only)
//!
//! Control form, used for ACK / RESET / RESTORE_FACTORY:
//!
//! ```text
//! +-------+-----+-------+------+
//! | Start | Cmd | Value | End  |
//! +-------+-----+-------+------+
//! | 0xD0  | 1   | 1     | 0xED |
//! +-------+-----+-------+------+
//! ```
//!
//! Data form, used for ERASE / WRITE / VERIFY:
//!
//! ```text
//! +-------+-----+----------+-----+--------------+------+
//! | Start | Cmd | Checksum | Len | Payload      | End  |
//! +-------+-----+----------+-----+--------------+------+
//! | 0xD0  | 1   | 1        | 1   | Len bytes    | 0xED |
//! +-------+-----+----------+-----+--------------+------+
//! ```
//!
//! `Checksum` is the bitwise XOR of the payload bytes only; start, cmd, len
//! and end are never part of it. Multi-byte payload fields are big-endian.
//!
//! | Command | Payload |
//! |---|---|
//! | Erase  | addr(4, BE) + page_num(2, BE) |
//! | Write  | data_offset(2, BE) + data padded with 0xFF to a 4-byte multiple |
//! | Verify | addr(4, BE) + size(2, BE) + image_checksum(1) |

use std::fmt;

use byteorder::{BigEndian, WriteBytesExt};

use crate::error::{Error, Result};

/// Advanced command frame start byte.
pub const ADV_START: u8 = 0xAC;
/// Advanced command frame end byte.
pub const ADV_END: u8 = 0xAE;
/// IAP command frame start byte.
pub const IAP_START: u8 = 0xD0;
/// IAP command frame end byte.
pub const IAP_END: u8 = 0xED;

/// Advanced command: reset the device (application firmware).
pub const ADV_CMD_RESET: u8 = 0x00;
/// Advanced command: enter the bootloader.
pub const ADV_CMD_ENTER_BOOT: u8 = 0x04;

/// IAP command: acknowledge the bootloader handshake.
pub const IAP_CMD_ACK: u8 = 0xAC;
/// IAP command: reset the device (bootloader).
pub const IAP_CMD_RESET: u8 = 0xAE;
/// IAP command: erase flash pages.
pub const IAP_CMD_ERASE: u8 = 0xDC;
/// IAP command: write one chunk of image data.
pub const IAP_CMD_WRITE: u8 = 0xDD;
/// IAP command: verify the whole written image.
pub const IAP_CMD_VERIFY: u8 = 0xDE;
/// IAP command: make the factory image active again.
pub const IAP_CMD_RESTORE_FACTORY: u8 = 0xDF;

/// Flash erase granularity in bytes.
pub const PAGE_SIZE: usize = 1024;

/// Outgoing write chunks are padded with 0xFF to a multiple of this.
const WORD_ALIGN: usize = 4;
const PAD_BYTE: u8 = 0xFF;

/// Status byte returned by the device after every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Command accepted (0xE0).
    Ok,
    /// Generic failure (0xEF).
    Fail,
    /// Payload checksum mismatch (0xE1).
    ChecksumErr,
    /// Image or payload size rejected (0xE2).
    SizeErr,
    /// Flash erase/program failure (0xE3).
    FlashErr,
    /// Payload not 4-byte aligned (0xE4).
    AlignErr,
    /// Payload data rejected (0xE5).
    DataErr,
    /// Local: no acknowledgment or response timeout (0xFF).
    Nack,
    /// Any other byte the device produced.
    Other(u8),
}

impl Status {
    /// Map a raw status byte onto a known code.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0xE0 => Self::Ok,
            0xEF => Self::Fail,
            0xE1 => Self::ChecksumErr,
            0xE2 => Self::SizeErr,
            0xE3 => Self::FlashErr,
            0xE4 => Self::AlignErr,
            0xE5 => Self::DataErr,
            0xFF => Self::Nack,
            other => Self::Other(other),
        }
    }

    /// The literal status byte.
    pub fn raw(self) -> u8 {
        match self {
            Self::Ok => 0xE0,
            Self::Fail => 0xEF,
            Self::ChecksumErr => 0xE1,
            Self::SizeErr => 0xE2,
            Self::FlashErr => 0xE3,
            Self::AlignErr => 0xE4,
            Self::DataErr => 0xE5,
            Self::Nack => 0xFF,
            Self::Other(raw) => raw,
        }
    }

    /// Whether this is the OK status.
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::Fail => "FAIL",
            Self::ChecksumErr => "CHECKSUM_ERR",
            Self::SizeErr => "SIZE_ERR",
            Self::FlashErr => "FLASH_ERR",
            Self::AlignErr => "ALIGN_ERR",
            Self::DataErr => "DATA_ERR",
            Self::Nack => "NACK",
            Self::Other(_) => "UNKNOWN",
        };
        write!(f, "{name} (0x{:02X})", self.raw())
    }
}

/// Bitwise XOR of all bytes.
pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Number of flash pages an image of `len` bytes occupies (integer ceiling).
#[allow(clippy::cast_possible_truncation)] // images are capped well below 64 MiB
pub fn page_count(len: usize) -> u16 {
    len.div_ceil(PAGE_SIZE) as u16
}

/// A single protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// 4-byte advanced command, accepted by the application firmware.
    Advanced {
        /// Command byte.
        cmd: u8,
        /// Value byte.
        value: u8,
    },
    /// 4-byte IAP control command, accepted by the bootloader.
    Control {
        /// Command byte.
        cmd: u8,
        /// Value byte.
        value: u8,
    },
    /// Checksummed variable-length IAP command, accepted by the bootloader.
    Data {
        /// Command byte.
        cmd: u8,
        /// Payload bytes (checksummed, length-prefixed on the wire).
        payload: Vec<u8>,
    },
}

impl Frame {
    /// Build the enter-bootloader advanced command.
    pub fn enter_boot() -> Self {
        Frame::Advanced {
            cmd: ADV_CMD_ENTER_BOOT,
            value: 1,
        }
    }

    /// Build the application-mode reset command.
    pub fn app_reset() -> Self {
        Frame::Advanced {
            cmd: ADV_CMD_RESET,
            value: 1,
        }
    }

    /// Build the bootloader handshake acknowledgment.
    pub fn ack() -> Self {
        Frame::Control {
            cmd: IAP_CMD_ACK,
            value: 1,
        }
    }

    /// Build the bootloader-mode reset command.
    pub fn boot_reset() -> Self {
        Frame::Control {
            cmd: IAP_CMD_RESET,
            value: 1,
        }
    }

    /// Build the restore-factory-firmware command.
    pub fn restore_factory() -> Self {
        Frame::Control {
            cmd: IAP_CMD_RESTORE_FACTORY,
            value: 1,
        }
    }

    /// Build an erase frame for an image of `image_len` bytes starting at
    /// flash address `addr`.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn erase(addr: u32, image_len: usize) -> Self {
        let mut payload = Vec::with_capacity(6);
        payload.write_u32::<BigEndian>(addr).unwrap();
        payload.write_u16::<BigEndian>(page_count(image_len)).unwrap();
        Frame::Data {
            cmd: IAP_CMD_ERASE,
            payload,
        }
    }

    /// Build a write frame for one chunk at `offset` bytes into the image.
    ///
    /// The chunk is padded with 0xFF up to a 4-byte multiple; the padding is
    /// part of the checksummed payload.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn write(offset: u16, chunk: &[u8]) -> Self {
        let padded_len = chunk.len().div_ceil(WORD_ALIGN) * WORD_ALIGN;
        let mut payload = Vec::with_capacity(2 + padded_len);
        payload.write_u16::<BigEndian>(offset).unwrap();
        payload.extend_from_slice(chunk);
        payload.resize(2 + padded_len, PAD_BYTE);
        Frame::Data {
            cmd: IAP_CMD_WRITE,
            payload,
        }
    }

    /// Build the verify frame for the exact image that was written.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    #[allow(clippy::cast_possible_truncation)] // images are capped at 24 KiB
    pub fn verify(addr: u32, image: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(7);
        payload.write_u32::<BigEndian>(addr).unwrap();
        payload.write_u16::<BigEndian>(image.len() as u16).unwrap();
        payload.push(xor_checksum(image));
        Frame::Data {
            cmd: IAP_CMD_VERIFY,
            payload,
        }
    }

    /// The command byte of this frame.
    pub fn command(&self) -> u8 {
        match self {
            Frame::Advanced { cmd, .. } | Frame::Control { cmd, .. } | Frame::Data { cmd, .. } => {
                *cmd
            }
        }
    }

    /// Assemble the complete on-wire bytes.
    #[allow(clippy::cast_possible_truncation)] // payloads are at most 2 + 24 bytes
    pub fn build(&self) -> Vec<u8> {
        match self {
            Frame::Advanced { cmd, value } => vec![ADV_START, *cmd, *value, ADV_END],
            Frame::Control { cmd, value } => vec![IAP_START, *cmd, *value, IAP_END],
            Frame::Data { cmd, payload } => {
                let mut buf = Vec::with_capacity(5 + payload.len());
                buf.push(IAP_START);
                buf.push(*cmd);
                buf.push(xor_checksum(payload));
                buf.push(payload.len() as u8);
                buf.extend_from_slice(payload);
                buf.push(IAP_END);
                buf
            }
        }
    }

    /// Parse raw frame bytes back into a `Frame`.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        match raw {
            [ADV_START, cmd, value, ADV_END] => Ok(Frame::Advanced {
                cmd: *cmd,
                value: *value,
            }),
            [IAP_START, cmd, value, IAP_END] => Ok(Frame::Control {
                cmd: *cmd,
                value: *value,
            }),
            [IAP_START, cmd, checksum, len, rest @ ..] if rest.last() == Some(&IAP_END) => {
                let payload = &rest[..rest.len() - 1];
                if payload.len() != *len as usize {
                    return Err(Error::Frame(format!(
                        "declared {len} payload bytes, found {}",
                        payload.len()
                    )));
                }
                let computed = xor_checksum(payload);
                if computed != *checksum {
                    return Err(Error::Frame(format!(
                        "checksum mismatch: expected 0x{checksum:02X}, computed 0x{computed:02X}"
                    )));
                }
                Ok(Frame::Data {
                    cmd: *cmd,
                    payload: payload.to_vec(),
                })
            }
            _ => Err(Error::Frame(format!("unrecognized frame: {}", hex::encode(raw)))),
        }
    }
}
