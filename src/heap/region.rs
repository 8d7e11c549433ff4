//! Shared byte region backing a heap
//!
//! One aligned, fixed-size allocation visible to every worker thread. All
//! control words (watermark, lock word, tag words, row counters, batch
//! counters) are 4-byte-aligned and accessed through `&AtomicU32` views;
//! row payload bytes are accessed through unaligned little-endian typed
//! loads and stores. The `unsafe` lives here and nowhere above.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::atomic::AtomicU32;

/// Region allocations are cache-line aligned so every 4-aligned offset is a
/// valid `AtomicU32` address.
const REGION_ALIGN: usize = 64;

/// A contiguous zero-initialized byte region shared across threads.
///
/// Concurrency contract: control words are only touched through
/// [`SharedRegion::atomic_u32`]; plain typed reads and writes must target
/// ranges that no other thread is concurrently writing (table rows are
/// immutable once published, result slots are owned by the reserving
/// worker).
pub(crate) struct SharedRegion {
    base: NonNull<u8>,
    len: usize,
}

// The region hands out raw access from `&self`; synchronization is the
// callers' contract described above.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Allocate a zeroed region of `len` bytes. `len` must be a non-zero
    /// multiple of 4 (validated by the heap before construction).
    pub fn zeroed(len: usize) -> Self {
        assert!(len > 0 && len % 4 == 0, "region length must be a positive multiple of 4");
        let layout = Layout::from_size_align(len, REGION_ALIGN).expect("region layout");
        // SAFETY: layout has non-zero size; allocation failure aborts below.
        let ptr = unsafe { alloc_zeroed(layout) };
        let base = NonNull::new(ptr).unwrap_or_else(|| std::alloc::handle_alloc_error(layout));
        SharedRegion { base, len }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    fn check(&self, offset: usize, width: usize) {
        assert!(
            offset.checked_add(width).map_or(false, |end| end <= self.len),
            "region access out of range: offset {} width {} len {}",
            offset,
            width,
            self.len
        );
    }

    /// Atomic view of the 32-bit word at `offset` (must be 4-aligned).
    #[inline]
    pub fn atomic_u32(&self, offset: usize) -> &AtomicU32 {
        self.check(offset, 4);
        assert!(offset % 4 == 0, "atomic access at unaligned offset {}", offset);
        // SAFETY: in range, 4-aligned (region base is 64-aligned), and
        // AtomicU32 has the same layout as u32.
        unsafe { &*(self.base.as_ptr().add(offset) as *const AtomicU32) }
    }

    /// Borrow `len` bytes at `offset`.
    ///
    /// Callers must not hold the slice across writes to the same range by
    /// another thread.
    #[inline]
    pub fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        self.check(offset, len);
        // SAFETY: range checked above; see the concurrency contract.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr().add(offset), len) }
    }

    #[inline]
    pub fn write_bytes(&self, offset: usize, src: &[u8]) {
        self.check(offset, src.len());
        // SAFETY: range checked; `src` is a caller-owned buffer, so the
        // copy cannot overlap the destination.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.base.as_ptr().add(offset), src.len());
        }
    }

    /// Copy `len` bytes from `src_offset` in `src` into `dst_offset` here.
    /// The two ranges must not overlap (distinct allocations always qualify;
    /// within one region the allocator never hands out overlapping blocks).
    #[inline]
    pub fn copy_from(&self, dst_offset: usize, src: &SharedRegion, src_offset: usize, len: usize) {
        self.check(dst_offset, len);
        src.check(src_offset, len);
        // SAFETY: both ranges checked; non-overlap per the block contract.
        unsafe {
            std::ptr::copy_nonoverlapping(
                src.base.as_ptr().add(src_offset),
                self.base.as_ptr().add(dst_offset),
                len,
            );
        }
    }

    #[inline]
    pub fn fill_zero(&self, offset: usize, len: usize) {
        self.check(offset, len);
        // SAFETY: range checked.
        unsafe {
            std::ptr::write_bytes(self.base.as_ptr().add(offset), 0, len);
        }
    }

    #[inline]
    fn load<const N: usize>(&self, offset: usize) -> [u8; N] {
        self.check(offset, N);
        let mut buf = [0u8; N];
        // SAFETY: range checked; unaligned byte copy.
        unsafe {
            std::ptr::copy_nonoverlapping(self.base.as_ptr().add(offset), buf.as_mut_ptr(), N);
        }
        buf
    }

    #[inline]
    pub fn read_u8(&self, offset: usize) -> u8 {
        self.load::<1>(offset)[0]
    }

    #[inline]
    pub fn read_i8(&self, offset: usize) -> i8 {
        self.load::<1>(offset)[0] as i8
    }

    #[inline]
    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes(self.load::<2>(offset))
    }

    #[inline]
    pub fn read_i16(&self, offset: usize) -> i16 {
        i16::from_le_bytes(self.load::<2>(offset))
    }

    #[inline]
    pub fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.load::<4>(offset))
    }

    #[inline]
    pub fn read_i32(&self, offset: usize) -> i32 {
        i32::from_le_bytes(self.load::<4>(offset))
    }

    #[inline]
    pub fn read_f32(&self, offset: usize) -> f32 {
        f32::from_le_bytes(self.load::<4>(offset))
    }

    #[inline]
    pub fn write_u8(&self, offset: usize, v: u8) {
        self.write_bytes(offset, &[v]);
    }

    #[inline]
    pub fn write_i8(&self, offset: usize, v: i8) {
        self.write_bytes(offset, &[v as u8]);
    }

    #[inline]
    pub fn write_u16(&self, offset: usize, v: u16) {
        self.write_bytes(offset, &v.to_le_bytes());
    }

    #[inline]
    pub fn write_i16(&self, offset: usize, v: i16) {
        self.write_bytes(offset, &v.to_le_bytes());
    }

    #[inline]
    pub fn write_u32(&self, offset: usize, v: u32) {
        self.write_bytes(offset, &v.to_le_bytes());
    }

    #[inline]
    pub fn write_i32(&self, offset: usize, v: i32) {
        self.write_bytes(offset, &v.to_le_bytes());
    }

    #[inline]
    pub fn write_f32(&self, offset: usize, v: f32) {
        self.write_bytes(offset, &v.to_le_bytes());
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.len, REGION_ALIGN).expect("region layout");
        // SAFETY: allocated in `zeroed` with the identical layout.
        unsafe { dealloc(self.base.as_ptr(), layout) };
    }
}
