use core::ptr::{self, NonNull};

use crate::header::{HEADER_SIZE, Header};

/// A mapped byte range addressed by offset.
///
/// Every raw memory access the allocator makes goes through here, and every
/// access is bounds checked against the mapping.
pub(crate) struct Region {
    base: NonNull<u8>,
    len: usize,
}

impl Region {
    /// # Safety
    /// `base..base + len` must be readable and writable for as long as the
    /// region is used, and must not be reachable through any reference.
    pub unsafe fn new(base: NonNull<u8>, len: usize) -> Self {
        Region { base, len }
    }

    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Offset of `ptr` from the base, if it lies within the region.
    pub fn offset_of(&self, ptr: *const u8) -> Option<usize> {
        let offset = ptr.addr().checked_sub(self.base.as_ptr().addr())?;
        (offset < self.len).then_some(offset)
    }

    pub fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        assert!(offset <= self.len, "offset {offset:#x} outside region");
        unsafe { self.base.add(offset) }
    }

    pub fn read_header(&self, offset: usize) -> Header {
        self.check_header(offset);
        unsafe { ptr::read_unaligned(self.base.as_ptr().add(offset).cast::<Header>()) }
    }

    pub fn write_header(&mut self, offset: usize, header: Header) {
        self.check_header(offset);
        unsafe { ptr::write_unaligned(self.base.as_ptr().add(offset).cast::<Header>(), header) }
    }

    pub fn fill(&mut self, offset: usize, len: usize, byte: u8) {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len),
            "fill {offset:#x}+{len} outside region"
        );
        unsafe { self.base.as_ptr().add(offset).write_bytes(byte, len) }
    }

    fn check_header(&self, offset: usize) {
        assert!(
            offset
                .checked_add(HEADER_SIZE)
                .is_some_and(|end| end <= self.len),
            "header at {offset:#x} outside region"
        );
    }
}
