//! Memory images
//!
//! A program sees three address ranges:
//!
//! ```text
//! 0x00000 ..= StackTop     thread stack (private, grows down from StackTop)
//! DataStart ..             global data (shared by every thread)
//! CodeStart ..             code (read only, fetched through RIP)
//! ```
//!
//! Stack address `A` lives at byte `StackSize + (A - StackTop)` of the
//! thread's stack buffer, so a push from `RSB = StackTop` fills the last
//! word. Global data is a word array addressed by byte offset.

use super::{VmError, VmResult};
use crate::compiler::bytecode::{ProgramHeader, STACK_ALIGNMENT};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

const WORD: usize = STACK_ALIGNMENT as usize;

/// Resolved storage for a memory address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Byte offset into the thread stack
    Stack(usize),
    /// Byte offset into global data
    Global(usize),
}

/// Address layout taken from a program header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressSpace {
    stack_top: u32,
    stack_size: u32,
    data_start: u32,
}

impl AddressSpace {
    /// Layout described by a header
    pub fn new(header: &ProgramHeader) -> Self {
        Self {
            stack_top: header.stack_top,
            stack_size: header.stack_size,
            data_start: header.data_start,
        }
    }

    /// Highest stack address; RST and RSB start here
    pub fn stack_top(&self) -> u32 {
        self.stack_top
    }

    /// Bytes of stack per thread
    pub fn stack_size(&self) -> u32 {
        self.stack_size
    }

    /// Map a computed address to its storage
    pub fn map(&self, address: i64) -> VmResult<Slot> {
        if address >= self.data_start as i64 {
            return Ok(Slot::Global((address - self.data_start as i64) as usize));
        }
        let byte = self.stack_size as i64 + (address - self.stack_top as i64);
        if byte < 0 {
            return Err(VmError::MemoryOutOfBounds(address));
        }
        Ok(Slot::Stack(byte as usize))
    }
}

// ============================================================================
// Global data
// ============================================================================

/// The global data segment, shared by every VM thread.
///
/// Words are read and written with relaxed atomics: threads see each other's
/// stores eventually, with no ordering between different words.
#[derive(Debug, Clone)]
pub struct GlobalData {
    words: Arc<[AtomicU32]>,
}

impl GlobalData {
    /// A segment of `len` zeroed words
    pub fn zeroed(len: usize) -> Self {
        Self {
            words: (0..len).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    /// Number of words
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    fn word(&self, offset: i64) -> VmResult<&AtomicU32> {
        if offset < 0 {
            return Err(VmError::MemoryOutOfBounds(offset));
        }
        if offset % WORD as i64 != 0 {
            return Err(VmError::MisalignedAccess(offset));
        }
        self.words
            .get(offset as usize / WORD)
            .ok_or(VmError::MemoryOutOfBounds(offset))
    }

    /// Load the word at a byte offset
    #[inline]
    pub fn load(&self, offset: i64) -> VmResult<u32> {
        Ok(self.word(offset)?.load(Ordering::Relaxed))
    }

    /// Store a word at a byte offset
    #[inline]
    pub fn store(&self, offset: i64, value: u32) -> VmResult<()> {
        self.word(offset)?.store(value, Ordering::Relaxed);
        Ok(())
    }

    /// Copy of every word
    pub fn snapshot(&self) -> Vec<u32> {
        self.words.iter().map(|w| w.load(Ordering::Relaxed)).collect()
    }
}

// ============================================================================
// Thread stack
// ============================================================================

/// A thread's private stack buffer
#[derive(Debug, Clone)]
pub struct ThreadStack {
    bytes: Vec<u8>,
}

impl ThreadStack {
    /// A zeroed stack of `size` bytes
    pub fn new(size: usize) -> Self {
        Self { bytes: vec![0; size] }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn range(&self, byte: usize) -> VmResult<std::ops::Range<usize>> {
        match byte.checked_add(WORD) {
            Some(end) if end <= self.bytes.len() => Ok(byte..end),
            _ => Err(VmError::MemoryOutOfBounds(byte as i64)),
        }
    }

    /// Load the little-endian word starting at `byte`
    #[inline]
    pub fn load(&self, byte: usize) -> VmResult<u32> {
        let range = self.range(byte)?;
        let mut word = [0u8; WORD];
        word.copy_from_slice(&self.bytes[range]);
        Ok(u32::from_le_bytes(word))
    }

    /// Store a little-endian word starting at `byte`
    #[inline]
    pub fn store(&mut self, byte: usize, value: u32) -> VmResult<()> {
        let range = self.range(byte)?;
        self.bytes[range].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Copy `data` so that it ends at the top of the stack
    pub fn seed_top(&mut self, data: &[u8]) -> VmResult<()> {
        let start = self
            .bytes
            .len()
            .checked_sub(data.len())
            .ok_or(VmError::MemoryOutOfBounds(data.len() as i64))?;
        self.bytes[start..].copy_from_slice(data);
        Ok(())
    }
}
