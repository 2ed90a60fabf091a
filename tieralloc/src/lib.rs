//! Three-tier memory allocation: a shared first-fit heap, per-type pools
//! with per-thread arenas, and per-thread linear regions.

pub mod config;
pub mod diag;
mod error;
pub mod heap;
pub mod linear;
mod mm;
pub mod pal;
pub mod pool;
pub mod sync;
mod system;

/// Static label attached to allocations for diagnostics.
pub type Tag = &'static str;

pub use config::MemoryConfig;
pub use error::{AllocError, Result};
pub use heap::HeapAllocator;
pub use linear::{LinearAllocator, LinearRegistry};
pub use mm::{align_up, padding_for};
pub use pool::PoolAllocator;
pub use sync::{RawSpinLock, SpinMutex, SpinMutexGuard};
pub use system::MemorySystem;
