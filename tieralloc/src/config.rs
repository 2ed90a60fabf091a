//! Build-time constants and the runtime configuration of a [`MemorySystem`].
//!
//! `HEAP_SIZE`, `CHUNK_SIZE` and `LINEAR_REGION_SIZE` are generated by
//! `build.rs` and can be overridden with the `TIERALLOC_HEAP_SIZE`,
//! `TIERALLOC_CHUNK_SIZE` and `TIERALLOC_LINEAR_SIZE` environment variables.
//!
//! [`MemorySystem`]: crate::MemorySystem

include!(concat!(env!("OUT_DIR"), "/consts.rs"));

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryConfig {
    pub heap_size: usize,
    pub linear_region_size: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            heap_size: HEAP_SIZE,
            linear_region_size: LINEAR_REGION_SIZE,
        }
    }
}

impl MemoryConfig {
    pub fn heap_size(mut self, bytes: usize) -> Self {
        self.heap_size = bytes;
        self
    }

    pub fn linear_region_size(mut self, bytes: usize) -> Self {
        self.linear_region_size = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_constants_are_sane() {
        assert!(CHUNK_SIZE.is_power_of_two());
        assert!(HEAP_SIZE >= 2 * CHUNK_SIZE);
        assert!(LINEAR_REGION_SIZE > 0);
    }

    #[test]
    fn builder_overrides_defaults() {
        let cfg = MemoryConfig::default().heap_size(1 << 20).linear_region_size(4096);
        assert_eq!(cfg.heap_size, 1 << 20);
        assert_eq!(cfg.linear_region_size, 4096);
        assert_eq!(MemoryConfig::default().heap_size, HEAP_SIZE);
    }
}
