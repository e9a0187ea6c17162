//! Linear memory and the heap allocator that lives inside it.
//!
//! One byte buffer holds both regions: the heap at `[0, heap_size)` and the
//! stack at `[heap_size, heap_size + stack_size)`, growing down from the
//! top. The first [`NULL_PAGE_SIZE`] bytes are never handed out and any
//! access to them faults, which catches dereferences of null.
//!
//! Heap blocks carry a 4-byte header in front of their payload holding
//! `(block_size << 1) | used`, where `block_size` includes the header.

use crate::bytecode::{MemoryLayout, NULL_PAGE_SIZE};
use crate::types::BitWidth;

use super::runtime_error::RuntimeErrorKind;

const HEADER_SIZE: u32 = 4;
const ALIGNMENT: u32 = 4;
/// Smallest block worth splitting off: a header plus one word.
const MIN_BLOCK_SIZE: u32 = HEADER_SIZE + ALIGNMENT;

#[derive(Debug, Clone)]
pub struct Memory {
    bytes: Vec<u8>,
}

impl Memory {
    pub fn new(layout: &MemoryLayout) -> Self {
        Self {
            bytes: vec![0; layout.memory_size() as usize],
        }
    }

    pub fn size(&self) -> u32 {
        self.bytes.len() as u32
    }

    fn range(&self, address: u64, len: u32) -> Result<std::ops::Range<usize>, RuntimeErrorKind> {
        if address < NULL_PAGE_SIZE as u64 {
            return Err(RuntimeErrorKind::NullPointer {
                address: address as u32,
            });
        }
        let end = address + len as u64;
        if end > self.bytes.len() as u64 {
            return Err(RuntimeErrorKind::MemoryOutOfBounds { address, size: len });
        }
        Ok(address as usize..end as usize)
    }

    /// Little-endian load, zero-extended to 64 bits.
    pub fn read(&self, address: u64, width: BitWidth) -> Result<u64, RuntimeErrorKind> {
        let range = self.range(address, width.bytes())?;
        let mut buf = [0u8; 8];
        buf[..range.len()].copy_from_slice(&self.bytes[range]);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn write(&mut self, address: u64, width: BitWidth, value: u64) -> Result<(), RuntimeErrorKind> {
        let range = self.range(address, width.bytes())?;
        let len = range.len();
        self.bytes[range].copy_from_slice(&value.to_le_bytes()[..len]);
        Ok(())
    }

    pub fn read_bytes(&self, address: u64, len: u32) -> Result<&[u8], RuntimeErrorKind> {
        if len == 0 {
            return Ok(&[]);
        }
        let range = self.range(address, len)?;
        Ok(&self.bytes[range])
    }

    pub fn write_bytes(&mut self, address: u64, data: &[u8]) -> Result<(), RuntimeErrorKind> {
        if data.is_empty() {
            return Ok(());
        }
        let range = self.range(address, data.len() as u32)?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    pub fn fill_zero(&mut self, address: u64, len: u32) -> Result<(), RuntimeErrorKind> {
        if len == 0 {
            return Ok(());
        }
        let range = self.range(address, len)?;
        self.bytes[range].fill(0);
        Ok(())
    }

    fn header(&self, at: u32) -> (u32, bool) {
        let start = at as usize;
        let raw = u32::from_le_bytes([
            self.bytes[start],
            self.bytes[start + 1],
            self.bytes[start + 2],
            self.bytes[start + 3],
        ]);
        (raw >> 1, raw & 1 == 1)
    }

    fn set_header(&mut self, at: u32, size: u32, used: bool) {
        let raw = (size << 1) | used as u32;
        let start = at as usize;
        self.bytes[start..start + 4].copy_from_slice(&raw.to_le_bytes());
    }
}

// =============================================================================
// Heap
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapBlock {
    /// Address of the payload, as returned to the program.
    pub address: u32,
    /// Payload bytes.
    pub size: u32,
    pub used: bool,
}

/// Block list of the heap at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeapSnapshot {
    pub blocks: Vec<HeapBlock>,
}

impl HeapSnapshot {
    pub fn used_blocks(&self) -> impl Iterator<Item = &HeapBlock> {
        self.blocks.iter().filter(|b| b.used)
    }

    pub fn used_bytes(&self) -> u32 {
        self.used_blocks().map(|b| b.size).sum()
    }

    pub fn free_bytes(&self) -> u32 {
        self.blocks.iter().filter(|b| !b.used).map(|b| b.size).sum()
    }

    /// True when everything allocated has been freed.
    pub fn is_clean(&self) -> bool {
        self.used_blocks().next().is_none()
    }
}

/// First-fit allocator over `[NULL_PAGE_SIZE, heap_size)`. The block list
/// itself lives in [`Memory`]; this only remembers the bounds.
#[derive(Debug, Clone, Copy)]
pub struct Heap {
    start: u32,
    end: u32,
}

impl Heap {
    /// Lays out one free block spanning the whole heap.
    pub fn new(layout: &MemoryLayout, memory: &mut Memory) -> Self {
        let start = NULL_PAGE_SIZE;
        let end = layout.heap_size & !(ALIGNMENT - 1);
        let heap = Self {
            start,
            end: end.max(start),
        };
        if heap.end - heap.start >= MIN_BLOCK_SIZE {
            memory.set_header(start, heap.end - start, false);
        }
        heap
    }

    fn blocks<'m>(&self, memory: &'m Memory) -> impl Iterator<Item = (u32, u32, bool)> + 'm {
        let end = if self.end - self.start >= MIN_BLOCK_SIZE {
            self.end
        } else {
            self.start
        };
        let mut at = self.start;
        std::iter::from_fn(move || {
            if at >= end {
                return None;
            }
            let (size, used) = memory.header(at);
            if size < HEADER_SIZE {
                return None;
            }
            let block = (at, size, used);
            at += size;
            Some(block)
        })
    }

    /// Returns the payload address of a zero-filled block of at least
    /// `size` bytes.
    pub fn allocate(&self, memory: &mut Memory, size: u32) -> Result<u32, RuntimeErrorKind> {
        let payload = size
            .max(1)
            .checked_add(ALIGNMENT - 1)
            .map(|s| s & !(ALIGNMENT - 1))
            .ok_or(RuntimeErrorKind::OutOfMemory(size))?;
        let needed = payload
            .checked_add(HEADER_SIZE)
            .ok_or(RuntimeErrorKind::OutOfMemory(size))?;

        let found = self
            .blocks(memory)
            .find(|&(_, block_size, used)| !used && block_size >= needed);
        let Some((at, block_size, _)) = found else {
            return Err(RuntimeErrorKind::OutOfMemory(size));
        };

        if block_size - needed >= MIN_BLOCK_SIZE {
            memory.set_header(at, needed, true);
            memory.set_header(at + needed, block_size - needed, false);
        } else {
            memory.set_header(at, block_size, true);
        }
        let (taken, _) = memory.header(at);
        memory.fill_zero((at + HEADER_SIZE) as u64, taken - HEADER_SIZE)?;
        Ok(at + HEADER_SIZE)
    }

    /// Releases the block whose payload starts at `address` and merges it
    /// with free neighbours. Anything else is an invalid free.
    pub fn free(&self, memory: &mut Memory, address: u32) -> Result<(), RuntimeErrorKind> {
        let mut previous_free: Option<(u32, u32)> = None;
        let mut target = None;
        for (at, size, used) in self.blocks(memory) {
            if at + HEADER_SIZE == address {
                if !used {
                    return Err(RuntimeErrorKind::InvalidFree(address));
                }
                target = Some((at, size));
                break;
            }
            previous_free = if used { None } else { Some((at, size)) };
        }
        let Some((at, mut size)) = target else {
            return Err(RuntimeErrorKind::InvalidFree(address));
        };

        let next = at + size;
        if next < self.end {
            let (next_size, next_used) = memory.header(next);
            if !next_used && next_size >= HEADER_SIZE {
                size += next_size;
            }
        }
        match previous_free {
            Some((prev_at, prev_size)) => memory.set_header(prev_at, prev_size + size, false),
            None => memory.set_header(at, size, false),
        }
        Ok(())
    }

    pub fn snapshot(&self, memory: &Memory) -> HeapSnapshot {
        HeapSnapshot {
            blocks: self
                .blocks(memory)
                .map(|(at, size, used)| HeapBlock {
                    address: at + HEADER_SIZE,
                    size: size - HEADER_SIZE,
                    used,
                })
                .collect(),
        }
    }
}
