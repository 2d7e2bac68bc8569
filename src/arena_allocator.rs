use core::ptr::NonNull;

use log::{debug, info, warn};

use crate::chunk_list::{ChunkInfo, ChunkList, Chunks};
use crate::error::{ArenaError, Status};
use crate::header::HEADER_SIZE;
use crate::page_allocator::{MmapPages, PageProvider};
use crate::region::Region;

/// Largest arena `init` accepts by default: 1 GiB.
pub const MAX_ARENA_SIZE: usize = 1 << 30;

/// Tunables fixed at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Upper bound for the size passed to [`ArenaAllocator::init`].
    pub max_arena_size: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        ArenaConfig {
            max_arena_size: MAX_ARENA_SIZE,
        }
    }
}

/// Occupancy summary of an active arena.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    pub chunks: usize,
    pub free_chunks: usize,
    /// Payload bytes in free chunks.
    pub free_bytes: usize,
    /// Payload bytes handed out, including any slack from unsplit chunks.
    pub used_bytes: usize,
    /// Payload of the largest free chunk; the biggest request that can succeed.
    pub largest_free: usize,
}

/// A first-fit allocator over one contiguous region obtained from a
/// [`PageProvider`].
///
/// The arena starts uninitialized. [`init`](Self::init) maps the backing
/// region and installs a single free chunk; [`destroy`](Self::destroy) (or
/// dropping the allocator) unmaps it, after which every pointer handed out
/// is dangling.
///
/// Not thread-safe: every operation takes `&mut self`.
pub struct ArenaAllocator<P: PageProvider = MmapPages> {
    pages: P,
    config: ArenaConfig,
    chunks: Option<ChunkList>,
    status: Status,
}

impl ArenaAllocator<MmapPages> {
    pub fn new() -> Self {
        Self::with_provider(MmapPages)
    }
}

impl Default for ArenaAllocator<MmapPages> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: PageProvider> ArenaAllocator<P> {
    pub fn with_provider(pages: P) -> Self {
        Self::with_config(pages, ArenaConfig::default())
    }

    pub fn with_config(pages: P, config: ArenaConfig) -> Self {
        ArenaAllocator {
            pages,
            config,
            chunks: None,
            status: Status::Ok,
        }
    }

    /// Outcome of the most recent operation on this arena.
    pub fn last_status(&self) -> Status {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.chunks.is_some()
    }

    /// Bytes mapped for the arena, or 0 when uninitialized.
    pub fn len(&self) -> usize {
        self.chunks.as_ref().map_or(0, |list| list.region().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Base address of the mapping, if active.
    pub fn base(&self) -> Option<NonNull<u8>> {
        self.chunks.as_ref().map(|list| list.region().base())
    }

    pub fn contains(&self, ptr: *const u8) -> bool {
        self.chunks
            .as_ref()
            .is_some_and(|list| list.region().offset_of(ptr).is_some())
    }

    pub fn provider(&self) -> &P {
        &self.pages
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.pages
    }

    fn record<T>(&mut self, result: Result<T, ArenaError>) -> Result<T, ArenaError> {
        self.status = Status::from(&result);
        if let Err(err) = &result {
            warn!("arena operation failed: {}", err);
        }

        result
    }

    fn active(&self) -> Result<&ChunkList, ArenaError> {
        self.chunks.as_ref().ok_or(ArenaError::Uninitialized)
    }

    fn active_mut(&mut self) -> Result<&mut ChunkList, ArenaError> {
        self.chunks.as_mut().ok_or(ArenaError::Uninitialized)
    }

    /// Maps an arena of at least `size` bytes, rounded up to whole pages.
    ///
    /// Returns the number of bytes actually mapped.
    pub fn init(&mut self, size: usize) -> Result<usize, ArenaError> {
        let result = self.try_init(size);
        self.record(result)
    }

    fn try_init(&mut self, size: usize) -> Result<usize, ArenaError> {
        info!("initializing arena: requested {} bytes", size);

        if self.chunks.is_some() {
            return Err(ArenaError::AlreadyInitialized);
        }
        if size == 0 || size > self.config.max_arena_size {
            return Err(ArenaError::BadArguments);
        }

        let page_size = self.pages.page_size()?;
        if page_size <= HEADER_SIZE {
            return Err(ArenaError::SystemCallFailed {
                call: "page_size",
                errno: 0,
            });
        }
        let adjusted = size
            .div_ceil(page_size)
            .checked_mul(page_size)
            .ok_or(ArenaError::BadArguments)?;
        debug!(
            "page size {} bytes, adjusted arena size {} bytes",
            page_size, adjusted
        );

        let (base, len) = self.pages.reserve(adjusted)?;
        if len < adjusted || len % page_size != 0 {
            warn!(
                "provider mapped {} bytes for a {} byte request, unmapping",
                len, adjusted
            );
            unsafe { self.pages.release(base, len)? };
            return Err(ArenaError::SystemCallFailed {
                call: "mmap",
                errno: 0,
            });
        }
        let region = unsafe { Region::new(base, len) };
        self.chunks = Some(ChunkList::install(region));

        info!(
            "arena mapped at {:p}..{:p} ({} bytes)",
            base,
            base.as_ptr().wrapping_add(len),
            len
        );
        Ok(len)
    }

    /// Unmaps the arena. On failure the arena stays active and the call may
    /// be retried.
    pub fn destroy(&mut self) -> Result<(), ArenaError> {
        let result = self.try_destroy();
        self.record(result)
    }

    fn try_destroy(&mut self) -> Result<(), ArenaError> {
        info!("destroying arena");

        let region = self.active()?.region();
        let (base, len) = (region.base(), region.len());

        unsafe { self.pages.release(base, len)? };
        self.chunks = None;

        info!("arena at {:p} released ({} bytes)", base, len);
        Ok(())
    }

    /// Hands out `size` bytes from the first free chunk large enough.
    ///
    /// The returned pointer carries no alignment guarantee beyond byte
    /// alignment and stays valid until it is passed to
    /// [`deallocate`](Self::deallocate) or the arena is destroyed.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, ArenaError> {
        let result = self.try_allocate(size, false);
        self.record(result)
    }

    /// Like [`allocate`](Self::allocate), with the payload zero-filled.
    pub fn allocate_zeroed(&mut self, size: usize) -> Result<NonNull<u8>, ArenaError> {
        let result = self.try_allocate(size, true);
        self.record(result)
    }

    fn try_allocate(&mut self, size: usize, zeroed: bool) -> Result<NonNull<u8>, ArenaError> {
        let list = self.active_mut()?;
        if size == 0 {
            return Err(ArenaError::BadArguments);
        }

        let payload = list
            .allocate(size)
            .ok_or(ArenaError::OutOfMemory { requested: size })?;
        if zeroed {
            list.region_mut().fill(payload, size, 0);
        }
        let ptr = list.region().ptr_at(payload);

        debug!("allocate({}) -> {:p}", size, ptr);
        Ok(ptr)
    }

    /// Returns a chunk to the arena, merging it with free neighbours.
    ///
    /// Null pointers are rejected with `BadArguments`. Pointers that do not
    /// start a live allocation of this arena (foreign, interior or already
    /// freed) are rejected with `InvalidHandle` and leave the arena untouched.
    pub fn deallocate(&mut self, ptr: *mut u8) -> Result<(), ArenaError> {
        let result = self.try_deallocate(ptr);
        self.record(result)
    }

    fn try_deallocate(&mut self, ptr: *mut u8) -> Result<(), ArenaError> {
        let list = self.active_mut()?;
        if ptr.is_null() {
            return Err(ArenaError::BadArguments);
        }

        let payload = list
            .region()
            .offset_of(ptr)
            .ok_or(ArenaError::InvalidHandle { addr: ptr.addr() })?;
        let offset = list.used_chunk_at(payload)?;
        let merged = list.release(offset);

        debug!(
            "deallocate({:p}): chunk {:#x} free as part of {:#x}",
            ptr, offset, merged
        );
        Ok(())
    }

    /// Walks the chunk list in address order.
    pub fn chunks(&self) -> Result<Chunks<'_>, ArenaError> {
        Ok(self.active()?.iter())
    }

    pub fn stats(&self) -> Result<ArenaStats, ArenaError> {
        let stats = self
            .active()?
            .iter()
            .fold(ArenaStats::default(), |mut stats, chunk: ChunkInfo| {
                stats.chunks += 1;
                if chunk.free {
                    stats.free_chunks += 1;
                    stats.free_bytes += chunk.payload_len;
                    stats.largest_free = stats.largest_free.max(chunk.payload_len);
                } else {
                    stats.used_bytes += chunk.payload_len;
                }
                stats
            });

        Ok(stats)
    }

    /// Checks the structural invariants of the chunk list.
    pub fn validate(&self) -> Result<(), ArenaError> {
        self.active()?.validate()
    }
}

impl<P: PageProvider> Drop for ArenaAllocator<P> {
    fn drop(&mut self) {
        if let Some(list) = self.chunks.take() {
            let region = list.into_region();
            let (base, len) = (region.base(), region.len());
            if let Err(err) = unsafe { self.pages.release(base, len) } {
                warn!("leaking arena at {:p} ({} bytes): {}", base, len, err);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn page() -> usize {
        MmapPages.page_size().unwrap()
    }

    #[test]
    fn init_rounds_to_pages() {
        let page = page();

        let mut arena = ArenaAllocator::new();
        assert_eq!(arena.init(1).unwrap(), page);
        arena.destroy().unwrap();

        assert_eq!(arena.init(page).unwrap(), page);
        arena.destroy().unwrap();

        assert_eq!(arena.init(page + 1).unwrap(), 2 * page);
        assert_eq!(arena.len(), 2 * page);
        arena.destroy().unwrap();
        assert!(arena.is_empty());
    }

    #[test]
    fn init_rejects_bad_sizes() {
        let mut arena = ArenaAllocator::new();

        assert_eq!(arena.init(0), Err(ArenaError::BadArguments));
        assert_eq!(arena.last_status(), Status::BadArguments);
        assert_eq!(arena.init(MAX_ARENA_SIZE + 1), Err(ArenaError::BadArguments));
        assert!(!arena.is_active());
    }

    #[test]
    fn init_twice_is_rejected() {
        let mut arena = ArenaAllocator::new();
        arena.init(4096).unwrap();
        let base = arena.base();

        assert_eq!(arena.init(4096), Err(ArenaError::AlreadyInitialized));
        assert_eq!(arena.last_status(), Status::AlreadyInitialized);
        assert_eq!(arena.base(), base);
        arena.validate().unwrap();
    }

    #[test]
    fn configured_ceiling() {
        let config = ArenaConfig {
            max_arena_size: 8192,
        };
        let mut arena = ArenaAllocator::with_config(MmapPages, config);

        assert_eq!(arena.init(8193), Err(ArenaError::BadArguments));
        assert!(arena.init(8192).is_ok());
    }

    #[test]
    fn unbounded_ceiling_rejects_unroundable_size() {
        let config = ArenaConfig {
            max_arena_size: usize::MAX,
        };
        let mut arena = ArenaAllocator::with_config(MmapPages, config);

        assert_eq!(arena.init(usize::MAX), Err(ArenaError::BadArguments));
        assert_eq!(arena.last_status(), Status::BadArguments);
        assert!(!arena.is_active());
    }

    #[test]
    fn uninitialized_operations() {
        let mut arena = ArenaAllocator::new();

        assert_eq!(arena.allocate(8), Err(ArenaError::Uninitialized));
        assert_eq!(
            arena.deallocate(core::ptr::null_mut()),
            Err(ArenaError::Uninitialized)
        );
        assert_eq!(arena.destroy(), Err(ArenaError::Uninitialized));
        assert_eq!(arena.last_status(), Status::Uninitialized);
        assert!(arena.stats().is_err());
    }

    #[test]
    fn alloc_chunks() {
        let mut arena = ArenaAllocator::new();
        arena.init(4096).unwrap();

        unsafe {
            let one = arena.allocate(16).unwrap();
            let two = arena.allocate(16).unwrap();
            let three = arena.allocate(16).unwrap();
            assert_eq!(arena.last_status(), Status::Ok);

            one.as_ptr().write_bytes(1, 16);
            two.as_ptr().write_bytes(2, 16);
            three.as_ptr().write_bytes(3, 16);

            assert_eq!(*one.as_ptr().add(15), 1);
            assert_eq!(*two.as_ptr(), 2);
            assert_eq!(*three.as_ptr().add(7), 3);

            arena.deallocate(three.as_ptr()).unwrap();
            arena.deallocate(one.as_ptr()).unwrap();
            arena.deallocate(two.as_ptr()).unwrap();
        }

        let stats = arena.stats().unwrap();
        assert_eq!(stats.chunks, 1);
        assert_eq!(stats.free_bytes, arena.len() - HEADER_SIZE);
    }

    #[test]
    fn zeroed() {
        let mut arena = ArenaAllocator::new();
        arena.init(4096).unwrap();

        let dirty = arena.allocate(64).unwrap();
        unsafe { dirty.as_ptr().write_bytes(0xFF, 64) };
        arena.deallocate(dirty.as_ptr()).unwrap();

        let clean = arena.allocate_zeroed(64).unwrap();
        assert_eq!(clean, dirty);
        let sum: usize = (0..64)
            .map(|i| unsafe { *clean.as_ptr().add(i) } as usize)
            .sum();
        assert_eq!(sum, 0);

        assert_eq!(arena.allocate_zeroed(0), Err(ArenaError::BadArguments));
    }

    #[test]
    fn null_and_foreign_handles() {
        let mut arena = ArenaAllocator::new();
        arena.init(4096).unwrap();
        let ptr = arena.allocate(32).unwrap();

        assert_eq!(
            arena.deallocate(core::ptr::null_mut()),
            Err(ArenaError::BadArguments)
        );

        let mut outside = 0u64;
        let outside = &mut outside as *mut u64 as *mut u8;
        assert_eq!(
            arena.deallocate(outside),
            Err(ArenaError::InvalidHandle {
                addr: outside.addr()
            })
        );

        let interior = ptr.as_ptr().wrapping_add(4);
        assert!(matches!(
            arena.deallocate(interior),
            Err(ArenaError::InvalidHandle { .. })
        ));
        assert_eq!(arena.last_status(), Status::InvalidHandle);

        arena.deallocate(ptr.as_ptr()).unwrap();
        assert!(matches!(
            arena.deallocate(ptr.as_ptr()),
            Err(ArenaError::InvalidHandle { .. })
        ));
        arena.validate().unwrap();
    }

    #[test]
    fn contains_tracks_mapping() {
        let mut arena = ArenaAllocator::new();
        let len = arena.init(4096).unwrap();
        let base = arena.base().unwrap().as_ptr();

        assert!(arena.contains(base));
        assert!(arena.contains(base.wrapping_add(len - 1)));
        assert!(!arena.contains(base.wrapping_add(len)));

        arena.destroy().unwrap();
        assert!(!arena.contains(base));
    }

    #[test]
    fn out_of_memory_keeps_allocations() {
        let mut arena = ArenaAllocator::new();
        let len = arena.init(4096).unwrap();

        let big = arena.allocate(len - 2 * HEADER_SIZE - 8).unwrap();
        unsafe { big.as_ptr().write_bytes(0x5A, 8) };

        assert_eq!(
            arena.allocate(9),
            Err(ArenaError::OutOfMemory { requested: 9 })
        );
        assert_eq!(arena.last_status(), Status::OutOfMemory);

        assert_eq!(unsafe { *big.as_ptr().add(7) }, 0x5A);
        assert!(arena.allocate(8).is_ok());
        assert_eq!(arena.last_status(), Status::Ok);
    }
}
