//! Bump allocator with LIFO trim over a shared byte region
//!
//! The heap hands out 4-aligned blocks from a rising watermark. Every block
//! carries a trailing 4-byte tag word: the low bit is the free flag, the
//! remaining bits store the block's start address. Freed blocks are only
//! reclaimed when they are contiguous with the top of the stack; freeing the
//! top block walks the watermark down through every contiguous freed tag.
//! Analytic workloads allocate a small number of large, long-lived tables,
//! so interior fragmentation stays bounded in practice.

use super::block::Block;
use super::region::SharedRegion;
use crate::{EngineError, Result};
use parking_lot::Mutex;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Reserved bytes at the start of every heap region.
pub const HEAP_HEADER_SIZE: usize = 16;

/// Byte offset of the allocation watermark word.
const WATERMARK_OFFSET: usize = 4;
/// Byte offset of the allocation lock word.
const LOCK_OFFSET: usize = 8;

/// Low bit of a tag word: set when the block has been freed.
const FREE_FLAG: u32 = 1;

const MIB_16: usize = 16 * 1024 * 1024;

/// A thread-safe stack-style allocator over one contiguous byte region.
///
/// Region layout: bytes 0-3 reserved (zero), bytes 4-7 the u32 LE
/// allocation watermark (starts at 16), bytes 8-11 the i32 LE lock word,
/// bytes 12-15 reserved (zero).
pub struct Heap {
    region: SharedRegion,
    // Spin-then-park allocation lock; its held/released state is mirrored
    // into the region's lock word so the header layout stays bit-exact.
    lock: Mutex<()>,
}

impl Heap {
    /// Create a heap over a fresh zeroed region of `size` bytes.
    ///
    /// `size` must be a multiple of 4; below 16 MiB it must additionally be
    /// a power of two, at or above 16 MiB a multiple of 16 MiB.
    pub fn new(size: usize) -> Result<Arc<Heap>> {
        if size < HEAP_HEADER_SIZE + 4 || size % 4 != 0 {
            return Err(EngineError::AllocationFailure(format!(
                "heap size {} is not a usable multiple of 4",
                size
            )));
        }
        if size < MIB_16 {
            if !size.is_power_of_two() {
                return Err(EngineError::AllocationFailure(format!(
                    "heap size {} below 16 MiB must be a power of two",
                    size
                )));
            }
        } else if size % MIB_16 != 0 {
            return Err(EngineError::AllocationFailure(format!(
                "heap size {} at or above 16 MiB must be a multiple of 16 MiB",
                size
            )));
        }

        let region = SharedRegion::zeroed(size);
        region
            .atomic_u32(WATERMARK_OFFSET)
            .store(HEAP_HEADER_SIZE as u32, Ordering::SeqCst);
        Ok(Arc::new(Heap {
            region,
            lock: Mutex::new(()),
        }))
    }

    /// Total region size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.region.len()
    }

    /// Current allocation watermark.
    #[inline]
    pub fn watermark(&self) -> u32 {
        self.region.atomic_u32(WATERMARK_OFFSET).load(Ordering::SeqCst)
    }

    /// Bytes remaining above the watermark.
    #[inline]
    pub fn free_memory(&self) -> usize {
        self.size() - self.watermark() as usize
    }

    /// Largest payload any single allocation could ever receive.
    #[inline]
    pub fn max_alloc(&self) -> usize {
        self.size() - HEAP_HEADER_SIZE - 4
    }

    #[inline]
    pub(crate) fn region(&self) -> &SharedRegion {
        &self.region
    }

    /// Run `f` with the allocation lock held and the lock word mirrored.
    fn locked<T>(&self, f: impl FnOnce() -> T) -> T {
        let guard = self.lock.lock();
        self.region.atomic_u32(LOCK_OFFSET).store(1, Ordering::SeqCst);
        let out = f();
        self.region.atomic_u32(LOCK_OFFSET).store(0, Ordering::SeqCst);
        drop(guard);
        out
    }

    /// Allocate a block with at least `size` payload bytes.
    ///
    /// The payload is rounded up to a multiple of 4 and one tag word is
    /// appended. The returned block starts 4-aligned at or above offset 16.
    pub fn allocate(self: &Arc<Self>, size: usize) -> Result<Block> {
        if size == 0 {
            return Err(EngineError::AllocationFailure(
                "zero-length allocation".to_string(),
            ));
        }
        let payload = match size.checked_add(3) {
            Some(v) => v & !3,
            None => {
                return Err(EngineError::AllocationFailure(format!(
                    "allocation of {} bytes overflows",
                    size
                )))
            }
        };
        if payload > self.max_alloc() {
            return Err(EngineError::AllocationFailure(format!(
                "allocation of {} bytes exceeds heap capacity {}",
                size,
                self.max_alloc()
            )));
        }
        let block_size = payload + 4;

        let addr = self.locked(|| {
            if block_size > self.free_memory() {
                log::debug!(
                    "heap exhausted: requested {} bytes, {} free",
                    block_size,
                    self.free_memory()
                );
                return Err(EngineError::AllocationFailure(format!(
                    "insufficient heap: requested {} bytes, {} free",
                    block_size,
                    self.free_memory()
                )));
            }
            let addr = self
                .region
                .atomic_u32(WATERMARK_OFFSET)
                .fetch_add(block_size as u32, Ordering::SeqCst) as usize;
            // Tag word: start address, free flag clear.
            self.region
                .atomic_u32(addr + payload)
                .store(addr as u32, Ordering::SeqCst);
            Ok(addr)
        })?;

        Ok(Block::new(Arc::clone(self), addr, payload))
    }

    /// Allocate and zero the payload. The region starts zeroed, but memory
    /// reclaimed by the top walk may still hold old bytes.
    pub fn allocate_zeroed(self: &Arc<Self>, size: usize) -> Result<Block> {
        let block = self.allocate(size)?;
        self.region.fill_zero(block.addr(), block.len());
        Ok(block)
    }

    /// Release a block. Marks its tag freed; when the block sits at the top
    /// of the stack the watermark walks down through every contiguous freed
    /// tag, reclaiming the memory.
    pub fn free(&self, block: &Block) -> Result<()> {
        self.check_owned(block)?;
        let addr = block.addr();
        let payload = block.len();

        self.locked(|| {
            let tag = self.region.atomic_u32(addr + payload);
            if tag.load(Ordering::SeqCst) & FREE_FLAG != 0 {
                return Err(EngineError::InvalidBlock(format!(
                    "double free of block at {}",
                    addr
                )));
            }
            tag.fetch_or(FREE_FLAG, Ordering::SeqCst);

            let watermark = self.region.atomic_u32(WATERMARK_OFFSET);
            if watermark.load(Ordering::SeqCst) as usize == addr + payload + 4 {
                let mut top = addr + payload + 4;
                while top > HEAP_HEADER_SIZE {
                    let word = self.region.atomic_u32(top - 4).load(Ordering::SeqCst);
                    if word & FREE_FLAG == 0 {
                        break;
                    }
                    top = (word & !FREE_FLAG) as usize;
                }
                watermark.store(top as u32, Ordering::SeqCst);
            }
            Ok(())
        })
    }

    /// Shrink a block's payload to `new_size` bytes (rounded up to 4).
    ///
    /// Shrinking the top block moves the watermark down immediately. For an
    /// interior block the trimmed tail becomes a freed pseudo-block that the
    /// top walk reclaims once everything above it is released. Growing is a
    /// no-op; shrinking to zero is an error.
    pub fn shrink(&self, block: &mut Block, new_size: usize) -> Result<()> {
        self.check_owned(block)?;
        if new_size == 0 {
            return Err(EngineError::InvalidBlock(format!(
                "shrink of block at {} to zero",
                block.addr()
            )));
        }
        let addr = block.addr();
        let old_payload = block.len();
        let new_payload = (new_size + 3) & !3;
        if new_payload >= old_payload {
            return Ok(());
        }

        self.locked(|| {
            let tag = self.region.atomic_u32(addr + old_payload);
            if tag.load(Ordering::SeqCst) & FREE_FLAG != 0 {
                return Err(EngineError::InvalidBlock(format!(
                    "shrink of freed block at {}",
                    addr
                )));
            }
            let watermark = self.region.atomic_u32(WATERMARK_OFFSET);
            let top = watermark.load(Ordering::SeqCst) as usize == addr + old_payload + 4;

            // New tag for the kept block, still allocated.
            self.region
                .atomic_u32(addr + new_payload)
                .store(addr as u32, Ordering::SeqCst);

            if top {
                watermark.store((addr + new_payload + 4) as u32, Ordering::SeqCst);
            } else {
                // The tail [addr+new_payload+4, addr+old_payload+4) becomes a
                // freed pseudo-block; its tag backlinks to the tail start so
                // a later top walk steps over it.
                self.region.atomic_u32(addr + old_payload).store(
                    ((addr + new_payload + 4) as u32) | FREE_FLAG,
                    Ordering::SeqCst,
                );
            }
            Ok(())
        })?;

        block.set_len(new_payload);
        Ok(())
    }

    fn check_owned(&self, block: &Block) -> Result<()> {
        if !std::ptr::eq(self, block.heap().as_ref()) {
            return Err(EngineError::InvalidBlock(format!(
                "block at {} belongs to a different heap",
                block.addr()
            )));
        }
        let addr = block.addr();
        if addr < HEAP_HEADER_SIZE
            || addr % 4 != 0
            || addr + block.len() + 4 > self.size()
        {
            return Err(EngineError::InvalidBlock(format!(
                "block at {} (payload {}) is out of heap range",
                addr,
                block.len()
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("size", &self.size())
            .field("watermark", &self.watermark())
            .finish()
    }
}
