//! Record identifiers for CairnDB.

use crate::page::PageId;
use serde::{Deserialize, Serialize};

/// Identifier for a record (tuple) in the database.
///
/// A record id names the heap page holding the tuple and the slot within
/// that page. B+ tree leaves store record ids as their values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId {
    /// Page holding the record.
    pub page_id: PageId,
    /// Slot number within the page.
    pub slot: u32,
}

impl RecordId {
    /// Size of the on-page encoding in bytes.
    pub const ENCODED_LEN: usize = 8;

    /// Creates a new record id.
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }

    /// Serializes into an 8-byte buffer.
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.page_id.0.to_le_bytes());
        buf[4..8].copy_from_slice(&self.slot.to_le_bytes());
    }

    /// Deserializes from an 8-byte buffer.
    pub fn decode_from(buf: &[u8]) -> Self {
        Self {
            page_id: PageId(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
            slot: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.page_id.0, self.slot)
    }
}
