//! Position/length table and payload placement
//!
//! Every line owns one slot: the offset and byte length of its compressed
//! stream. Space is handed out from a single free cursor at the end of the
//! payload. A re-encoded line goes back where it was when it fits, grows or
//! shrinks in place when it is the last thing before the cursor, and
//! otherwise moves to the cursor. Vacated bytes are only counted, never
//! reused.

use super::header::{Lc2Header, POSLEN_SIZE};
use crate::error::{MatrixError, Result};
use serde::{Deserialize, Serialize};

/// Where a line's compressed bytes live
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosLen {
    /// Byte offset in the file
    pub pos: u32,
    /// Byte length, 0 for a line never written
    pub len: u32,
}

impl PosLen {
    pub fn new(pos: u32, len: u32) -> Self {
        PosLen { pos, len }
    }

    pub fn end(&self) -> u64 {
        self.pos as u64 + self.len as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// How a slot was chosen for a re-encoded line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Last slot before the cursor, resized in place
    Tail,
    /// Fits in the old slot
    InPlace,
    /// Moved to the free cursor
    Appended,
}

/// A slot decision not yet applied to the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    pub index: usize,
    pub slot: PosLen,
    pub free_pos: u32,
    pub placement: Placement,
    /// Bytes that stop being referenced
    pub released: u32,
}

#[derive(Debug, Clone)]
pub struct SlotTable {
    entries: Vec<PosLen>,
    payload_start: u32,
    free_pos: u32,
    used: u64,
}

impl SlotTable {
    /// Empty table sized for `header`
    pub fn new(header: &Lc2Header) -> Result<Self> {
        let count = usize::try_from(header.slots())
            .map_err(|_| MatrixError::OutOfSpace("too many lines".to_string()))?;
        Ok(SlotTable {
            entries: vec![PosLen::default(); count],
            payload_start: header.free_pos,
            free_pos: header.free_pos,
            used: 0,
        })
    }

    /// Parse a table read from disk and check it against the header
    pub fn from_bytes(header: &Lc2Header, bytes: &[u8]) -> Result<Self> {
        let mut table = SlotTable::new(header)?;
        table.payload_start = u32::try_from(header.payload_start())
            .map_err(|_| MatrixError::corrupt("position table extends past 4 GiB"))?;
        table.free_pos = header.free_pos;

        if (bytes.len() as u64) < header.table_bytes() {
            return Err(MatrixError::corrupt(format!(
                "position table needs {} bytes, got {}",
                header.table_bytes(),
                bytes.len()
            )));
        }

        for (i, (entry, raw)) in table
            .entries
            .iter_mut()
            .zip(bytes.chunks_exact(POSLEN_SIZE as usize))
            .enumerate()
        {
            let pos = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            let len = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
            let slot = PosLen::new(pos, len);

            if !slot.is_empty()
                && (pos < table.payload_start || slot.end() > table.free_pos as u64)
            {
                return Err(MatrixError::corrupt(format!(
                    "slot {} at {}+{} lies outside the payload {}..{}",
                    i, pos, len, table.payload_start, table.free_pos
                )));
            }
            *entry = slot;
            table.used += len as u64;
        }

        Ok(table)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.entries.len() * POSLEN_SIZE as usize);
        for slot in &self.entries {
            bytes.extend_from_slice(&slot.pos.to_le_bytes());
            bytes.extend_from_slice(&slot.len.to_le_bytes());
        }
        bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> PosLen {
        self.entries[index]
    }

    pub fn free_pos(&self) -> u32 {
        self.free_pos
    }

    pub fn payload_start(&self) -> u32 {
        self.payload_start
    }

    /// Bytes referenced by the table
    pub fn used(&self) -> u64 {
        self.used
    }

    /// Payload bytes not referenced by any slot
    pub fn free(&self) -> u64 {
        (self.free_pos - self.payload_start) as u64 - self.used
    }

    /// Slots holding data
    pub fn occupied(&self) -> usize {
        self.entries.iter().filter(|s| !s.is_empty()).count()
    }

    /// Decide where `new_len` bytes for line `index` go
    pub fn plan(&self, index: usize, new_len: u32) -> Result<Plan> {
        let old = self.entries[index];

        let (pos, free_pos, placement) =
            if !old.is_empty() && old.end() == self.free_pos as u64 && new_len != old.len {
                (old.pos, old.pos as u64 + new_len as u64, Placement::Tail)
            } else if new_len <= old.len {
                (old.pos, self.free_pos as u64, Placement::InPlace)
            } else {
                (
                    self.free_pos,
                    self.free_pos as u64 + new_len as u64,
                    Placement::Appended,
                )
            };

        let free_pos = u32::try_from(free_pos).map_err(|_| {
            MatrixError::OutOfSpace(format!(
                "line {} needs {} bytes past offset {}",
                index, new_len, pos
            ))
        })?;

        let released = match placement {
            Placement::Tail => 0,
            _ => old.len,
        };

        Ok(Plan {
            index,
            slot: PosLen::new(pos, new_len),
            free_pos,
            placement,
            released,
        })
    }

    /// Apply a plan whose bytes are on disk
    pub fn commit(&mut self, plan: &Plan) {
        let old = self.entries[plan.index];
        self.used = self.used - old.len as u64 + plan.slot.len as u64;
        self.entries[plan.index] = plan.slot;
        self.free_pos = plan.free_pos;
    }

    /// Copy counters into `header`
    pub fn sync_header(&self, header: &mut Lc2Header) {
        header.free_pos = self.free_pos;
        header.used = self.used.min(u32::MAX as u64) as u32;
        header.free = self.free().min(u32::MAX as u64) as u32;
    }
}
