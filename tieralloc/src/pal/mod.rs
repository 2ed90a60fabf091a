pub mod sys_alloc;
pub mod thread;
pub use sys_alloc::{page_size, round_to_pages, MappedRegion, PageHeap};
