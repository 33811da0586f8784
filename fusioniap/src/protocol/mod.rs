//! Protocol implementations.

pub mod frame;

// Re-export common types
pub use frame::{Frame, Status, page_count, xor_checksum, PAGE_SIZE};
