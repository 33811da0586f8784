//! Scripted in-memory bus for unit tests.

use std::collections::VecDeque;

use crate::bus::Bus;
use crate::error::{Error, Result};
use crate::protocol::frame::Status;

/// Test double for [`Bus`]: records writes, replays scripted reads.
pub(crate) struct MockBus {
    addr: u16,
    /// Scripted single-byte reads; `None` simulates a bus error. An empty
    /// script also reads as a bus error.
    pub reads: VecDeque<Option<u8>>,
    /// Scripted block reads, consumed in order.
    pub block_reads: VecDeque<Vec<u8>>,
    /// Every `write_block` call as `(register, data)`.
    pub writes: Vec<(u8, Vec<u8>)>,
    /// Presence script consumed by `is_present`; falls back to `present`.
    pub presence: VecDeque<bool>,
    /// Steady-state presence once the script is drained.
    pub present: bool,
    /// Make every write fail.
    pub fail_writes: bool,
}

impl MockBus {
    pub(crate) fn new(addr: u16) -> Self {
        Self {
            addr,
            reads: VecDeque::new(),
            block_reads: VecDeque::new(),
            writes: Vec::new(),
            presence: VecDeque::new(),
            present: true,
            fail_writes: false,
        }
    }

    pub(crate) fn push_status(&mut self, status: Status) {
        self.reads.push_back(Some(status.raw()));
    }

    pub(crate) fn push_statuses(&mut self, status: Status, count: usize) {
        for _ in 0..count {
            self.push_status(status);
        }
    }

    pub(crate) fn push_read_error(&mut self) {
        self.reads.push_back(None);
    }

    pub(crate) fn push_block(&mut self, data: &[u8]) {
        self.block_reads.push_back(data.to_vec());
    }
}

impl Bus for MockBus {
    fn address(&self) -> u16 {
        self.addr
    }

    fn read_byte(&mut self) -> Result<u8> {
        match self.reads.pop_front() {
            Some(Some(byte)) => Ok(byte),
            _ => Err(Error::Bus("scripted read error".into())),
        }
    }

    fn read_block(&mut self, _register: u8, len: usize) -> Result<Vec<u8>> {
        match self.block_reads.pop_front() {
            Some(data) => {
                assert_eq!(data.len(), len, "scripted block length mismatch");
                Ok(data)
            }
            None => Err(Error::Bus("scripted block read error".into())),
        }
    }

    fn write_block(&mut self, register: u8, data: &[u8]) -> Result<()> {
        if self.fail_writes {
            return Err(Error::Bus("scripted write error".into()));
        }
        self.writes.push((register, data.to_vec()));
        Ok(())
    }

    fn is_present(&mut self) -> bool {
        self.presence.pop_front().unwrap_or(self.present)
    }
}
