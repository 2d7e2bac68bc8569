/// Bytes occupied by a chunk header inside the arena.
pub const HEADER_SIZE: usize = size_of::<Header>();

const NIL: usize = usize::MAX;

const FREE_TAG: usize = 0x4652_4545;
const USED_TAG: usize = 0x5553_4544;

/// Metadata written in front of every chunk payload.
///
/// Links are arena offsets of the neighbouring headers in address order.
/// The tag word marks the chunk free or used; any other value means the bytes
/// are not a live header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub(crate) struct Header {
    size: usize,
    next: usize,
    prev: usize,
    tag: usize,
}

impl Header {
    pub fn new(size: usize, prev: Option<usize>, next: Option<usize>) -> Header {
        Header {
            size,
            next: next.unwrap_or(NIL),
            prev: prev.unwrap_or(NIL),
            tag: FREE_TAG,
        }
    }

    /// A header that no longer describes a chunk.
    pub fn scrubbed() -> Header {
        Header {
            size: 0,
            next: NIL,
            prev: NIL,
            tag: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn set_size(&mut self, size: usize) {
        self.size = size
    }

    pub fn add_size(&mut self, size: usize) {
        self.size += size
    }

    pub fn next(&self) -> Option<usize> {
        (self.next != NIL).then_some(self.next)
    }

    pub fn set_next(&mut self, next: Option<usize>) {
        self.next = next.unwrap_or(NIL)
    }

    pub fn prev(&self) -> Option<usize> {
        (self.prev != NIL).then_some(self.prev)
    }

    pub fn set_prev(&mut self, prev: Option<usize>) {
        self.prev = prev.unwrap_or(NIL)
    }

    pub fn free(&mut self) {
        self.tag = FREE_TAG
    }

    pub fn mark_used(&mut self) {
        self.tag = USED_TAG
    }

    pub fn is_free(&self) -> bool {
        self.tag == FREE_TAG
    }

    pub fn is_used(&self) -> bool {
        self.tag == USED_TAG
    }

    pub fn is_live(&self) -> bool {
        self.is_free() || self.is_used()
    }
}
