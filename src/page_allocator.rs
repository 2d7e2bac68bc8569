use core::ffi::c_void;
use core::ptr::{self, NonNull};

use lazy_static::lazy_static;
use log::{debug, warn};

use crate::error::ArenaError;

lazy_static! {
    static ref PAGE_SIZE: Option<usize> = query_page_size();
}

fn query_page_size() -> Option<usize> {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        return None;
    }
    Some(size as usize)
}

#[cfg(any(target_os = "linux", target_os = "emscripten"))]
fn errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
fn errno() -> i32 {
    unsafe { *libc::__error() }
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "emscripten",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd"
)))]
fn errno() -> i32 {
    0
}

/// Source of page-aligned backing memory for an arena.
pub trait PageProvider {
    /// Granularity of [`reserve`](PageProvider::reserve), in bytes.
    fn page_size(&self) -> Result<usize, ArenaError>;

    /// Maps at least `len` bytes of zero-filled, read-write memory.
    ///
    /// Returns the base of the mapping and its actual length.
    fn reserve(&mut self, len: usize) -> Result<(NonNull<u8>, usize), ArenaError>;

    /// Returns a mapping to the system.
    ///
    /// # Safety
    /// `base` and `len` must describe a mapping returned by `reserve` on this
    /// provider that has not been released yet. Nothing may touch the range
    /// afterwards.
    unsafe fn release(&mut self, base: NonNull<u8>, len: usize) -> Result<(), ArenaError>;
}

/// Anonymous private mappings straight from `mmap(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MmapPages;

impl PageProvider for MmapPages {
    fn page_size(&self) -> Result<usize, ArenaError> {
        (*PAGE_SIZE).ok_or_else(|| ArenaError::SystemCallFailed {
            call: "sysconf",
            errno: errno(),
        })
    }

    fn reserve(&mut self, len: usize) -> Result<(NonNull<u8>, usize), ArenaError> {
        let mem_ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if mem_ptr == libc::MAP_FAILED {
            let errno = errno();
            warn!("mmap of {} bytes failed (errno {})", len, errno);
            return Err(ArenaError::SystemCallFailed {
                call: "mmap",
                errno,
            });
        }
        debug!("mapped {} bytes at {:p}", len, mem_ptr);

        match NonNull::new(mem_ptr.cast::<u8>()) {
            Some(base) => Ok((base, len)),
            None => Err(ArenaError::SystemCallFailed {
                call: "mmap",
                errno: 0,
            }),
        }
    }

    unsafe fn release(&mut self, base: NonNull<u8>, len: usize) -> Result<(), ArenaError> {
        let res = unsafe { libc::munmap(base.as_ptr().cast::<c_void>(), len) };
        if res == -1 {
            let errno = errno();
            warn!("munmap of {} bytes at {:p} failed (errno {})", len, base, errno);
            return Err(ArenaError::SystemCallFailed {
                call: "munmap",
                errno,
            });
        }
        debug!("unmapped {} bytes at {:p}", len, base);

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn page_size_is_power_of_two() {
        let size = MmapPages.page_size().unwrap();
        assert!(size >= 4096);
        assert!(size.is_power_of_two());
    }

    #[test]
    fn reserve_is_zeroed_and_writable() {
        let mut pages = MmapPages;
        let page = pages.page_size().unwrap();

        let (base, len) = pages.reserve(page * 2).unwrap();
        assert_eq!(len, page * 2);
        assert_eq!(base.as_ptr().addr() % page, 0);

        unsafe {
            let sum: usize = (0..len).map(|i| *base.as_ptr().add(i) as usize).sum();
            assert_eq!(sum, 0);

            base.as_ptr().write(0xAB);
            base.as_ptr().add(len - 1).write(0xCD);
            assert_eq!(*base.as_ptr(), 0xAB);
            assert_eq!(*base.as_ptr().add(len - 1), 0xCD);

            pages.release(base, len).unwrap();
        }
    }

    #[test]
    fn oversized_reserve_reports_mmap() {
        let mut pages = MmapPages;

        match pages.reserve(usize::MAX - 4095) {
            Err(ArenaError::SystemCallFailed { call, errno }) => {
                assert_eq!(call, "mmap");
                assert_ne!(errno, 0);
            }
            other => panic!("expected mmap failure, got {:?}", other),
        }
    }
}
