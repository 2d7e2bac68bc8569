use log::{debug, trace};

use crate::error::ArenaError;
use crate::header::{HEADER_SIZE, Header};
use crate::region::Region;

/// A chunk as seen from outside the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Offset of the chunk header from the arena base.
    pub offset: usize,
    /// Usable bytes following the header.
    pub payload_len: usize,
    pub free: bool,
}

impl ChunkInfo {
    /// Offset of the first payload byte from the arena base.
    pub fn payload_offset(&self) -> usize {
        self.offset + HEADER_SIZE
    }
}

// Headers are inlined in the region, linked in address order.
// The first chunk always lives at offset 0: coalescing only ever merges a
// chunk into its lower neighbour, so the lowest header is never absorbed.
pub(crate) struct ChunkList {
    region: Region,
}

impl ChunkList {
    /// Installs one free chunk covering the whole region.
    pub fn install(mut region: Region) -> Self {
        assert!(region.len() > HEADER_SIZE, "region too small for a chunk");
        let head = Header::new(region.len() - HEADER_SIZE, None, None);
        region.write_header(0, head);

        ChunkList { region }
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn region_mut(&mut self) -> &mut Region {
        &mut self.region
    }

    pub fn into_region(self) -> Region {
        self.region
    }

    /// First free chunk, in address order, with at least `size` payload bytes.
    fn first_fit(&self, size: usize) -> Option<usize> {
        let mut cursor = Some(0);

        while let Some(offset) = cursor {
            let header = self.region.read_header(offset);
            trace!(
                "visit chunk {:#x}: {} bytes, free: {}",
                offset,
                header.size(),
                header.is_free()
            );

            if header.is_free() && header.size() >= size {
                return Some(offset);
            }
            cursor = header.next();
        }

        None
    }

    /// Shrinks the chunk at `offset` to `size` bytes and links a free chunk
    /// holding the rest directly after it.
    fn split(&mut self, offset: usize, size: usize) {
        let mut header = self.region.read_header(offset);
        let remainder_offset = offset + HEADER_SIZE + size;
        let remainder = Header::new(
            header.size() - size - HEADER_SIZE,
            Some(offset),
            header.next(),
        );

        if let Some(next) = header.next() {
            let mut next_header = self.region.read_header(next);
            next_header.set_prev(Some(remainder_offset));
            self.region.write_header(next, next_header);
        }
        self.region.write_header(remainder_offset, remainder);

        header.set_size(size);
        header.set_next(Some(remainder_offset));
        self.region.write_header(offset, header);

        debug!(
            "split chunk {:#x}: {} bytes kept, {} bytes free at {:#x}",
            offset,
            size,
            remainder.size(),
            remainder_offset
        );
    }

    /// First-fit allocation. Returns the payload offset of the chunk handed out.
    ///
    /// The chunk is split only when the rest can hold a header and at least
    /// one payload byte (`available - size > HEADER_SIZE`); otherwise the
    /// whole chunk is handed out.
    pub fn allocate(&mut self, size: usize) -> Option<usize> {
        let offset = self.first_fit(size)?;
        let available = self.region.read_header(offset).size();

        // The remainder needs its own header plus at least one byte.
        if available - size > HEADER_SIZE {
            self.split(offset, size);
        } else {
            debug!(
                "chunk {:#x} handed out whole: {} bytes for a {} byte request",
                offset, available, size
            );
        }

        let mut header = self.region.read_header(offset);
        header.mark_used();
        self.region.write_header(offset, header);

        Some(offset + HEADER_SIZE)
    }

    /// Finds the used chunk whose payload starts at `payload`.
    ///
    /// The header must carry the used tag and agree with both neighbours,
    /// otherwise the handle is rejected.
    pub fn used_chunk_at(&self, payload: usize) -> Result<usize, ArenaError> {
        let invalid = ArenaError::InvalidHandle {
            addr: self.region.base().as_ptr().addr().wrapping_add(payload),
        };

        let Some(offset) = payload.checked_sub(HEADER_SIZE) else {
            return Err(invalid);
        };
        let header = self.region.read_header(offset);

        if !header.is_used() || !self.links_consistent(offset, &header) {
            return Err(invalid);
        }

        Ok(offset)
    }

    /// Marks the chunk at `offset` free and merges it with free neighbours,
    /// backward first. Returns the offset of the resulting free chunk.
    pub fn release(&mut self, offset: usize) -> usize {
        let mut header = self.region.read_header(offset);
        header.free();
        self.region.write_header(offset, header);

        let merged = self.coalesce_backward(offset);
        self.coalesce_forward(merged);

        merged
    }

    fn coalesce_backward(&mut self, offset: usize) -> usize {
        let header = self.region.read_header(offset);
        let Some(prev) = header.prev() else {
            return offset;
        };

        let prev_header = self.region.read_header(prev);
        if !prev_header.is_free() {
            return offset;
        }

        self.absorb(prev, prev_header, offset, header);
        prev
    }

    fn coalesce_forward(&mut self, offset: usize) {
        let header = self.region.read_header(offset);
        let Some(next) = header.next() else {
            return;
        };

        let next_header = self.region.read_header(next);
        if next_header.is_free() {
            self.absorb(offset, header, next, next_header);
        }
    }

    /// Folds `victim` into its lower neighbour `keeper`.
    fn absorb(
        &mut self,
        keeper: usize,
        mut keeper_header: Header,
        victim: usize,
        victim_header: Header,
    ) {
        keeper_header.add_size(HEADER_SIZE + victim_header.size());
        keeper_header.set_next(victim_header.next());

        if let Some(next) = victim_header.next() {
            let mut next_header = self.region.read_header(next);
            next_header.set_prev(Some(keeper));
            self.region.write_header(next, next_header);
        }

        self.region.write_header(keeper, keeper_header);
        self.region.write_header(victim, Header::scrubbed());

        debug!(
            "coalesced chunk {:#x} into {:#x}: {} bytes free",
            victim,
            keeper,
            keeper_header.size()
        );
    }

    /// Checks that `header` at `offset` fills the gap up to its successor and
    /// that both neighbours link back to it.
    fn links_consistent(&self, offset: usize, header: &Header) -> bool {
        let len = self.region.len();
        let Some(end) = offset
            .checked_add(HEADER_SIZE)
            .and_then(|payload| payload.checked_add(header.size()))
        else {
            return false;
        };

        match header.next() {
            None if end != len => return false,
            None => {}
            Some(next) => {
                if next != end || next > len - HEADER_SIZE {
                    return false;
                }
                if self.region.read_header(next).prev() != Some(offset) {
                    return false;
                }
            }
        }

        match header.prev() {
            None => offset == 0,
            Some(prev) => {
                if prev >= offset {
                    return false;
                }
                let prev_header = self.region.read_header(prev);
                let prev_end = prev
                    .checked_add(HEADER_SIZE)
                    .and_then(|payload| payload.checked_add(prev_header.size()));
                prev_header.next() == Some(offset) && prev_end == Some(offset)
            }
        }
    }

    /// Walks the whole list checking tags, links, adjacency and that no two
    /// neighbours are both free.
    pub fn validate(&self) -> Result<(), ArenaError> {
        let mut cursor = Some(0);
        let mut prev_free = false;

        while let Some(offset) = cursor {
            let header = self.region.read_header(offset);
            if !header.is_live() || !self.links_consistent(offset, &header) {
                return Err(ArenaError::Corrupted { offset });
            }
            if prev_free && header.is_free() {
                return Err(ArenaError::Corrupted { offset });
            }

            prev_free = header.is_free();
            cursor = header.next();
        }

        Ok(())
    }

    pub fn iter(&self) -> Chunks<'_> {
        Chunks {
            list: self,
            cursor: Some(0),
        }
    }
}

/// Iterator over the chunks of an arena in address order.
pub struct Chunks<'a> {
    list: &'a ChunkList,
    cursor: Option<usize>,
}

impl Iterator for Chunks<'_> {
    type Item = ChunkInfo;

    fn next(&mut self) -> Option<ChunkInfo> {
        let offset = self.cursor?;
        let header = self.list.region.read_header(offset);

        // Links only ever point forward; stop rather than loop on a bad one.
        self.cursor = header.next().filter(|&next| next > offset);

        Some(ChunkInfo {
            offset,
            payload_len: header.size(),
            free: header.is_free(),
        })
    }
}
