//! A first-fit chunk allocator over a single mmap'd arena.
//!
//! Chunk headers live inside the arena, in front of each payload, and form a
//! doubly linked list in address order:
//!
//! ```text
//! ┌────────┬──────────┬────────┬──────────┬────────┬─────────────────────┐
//! │ header │ payload  │ header │ payload  │ header │ payload (free)      │
//! │ used   │          │ free   │          │ used   │                     │
//! └────────┴──────────┴────────┴──────────┴────────┴─────────────────────┘
//! ```
//!
//! Allocation takes the first free chunk that fits and splits off the rest
//! when it can hold a header plus one byte. Deallocation merges the chunk
//! with a free predecessor, then with a free successor, so no two free chunks
//! are ever adjacent.
//!
//! ```rust,ignore
//! use arenalloc::ArenaAllocator;
//!
//! let mut arena = ArenaAllocator::new();
//! arena.init(4096)?;
//!
//! let ptr = arena.allocate(64)?;
//! unsafe { ptr.as_ptr().write_bytes(0, 64) };
//! arena.deallocate(ptr.as_ptr())?;
//!
//! arena.destroy()?;
//! ```
#![cfg_attr(not(test), no_std)]

pub mod arena_allocator;
pub mod chunk_list;
pub mod error;
mod header;
pub mod page_allocator;
mod region;

pub use arena_allocator::{ArenaAllocator, ArenaConfig, ArenaStats, MAX_ARENA_SIZE};
pub use chunk_list::{ChunkInfo, Chunks};
pub use error::{ArenaError, Status};
pub use header::HEADER_SIZE;
pub use page_allocator::{MmapPages, PageProvider};
