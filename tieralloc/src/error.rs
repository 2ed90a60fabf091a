use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// Out of memory: no free block can hold the request
    #[error("out of memory: no free block for {size} bytes aligned to {align}")]
    OutOfMemory { size: usize, align: usize },

    /// Bad layout
    #[error("alignment {0} is not a non-zero power of two")]
    InvalidAlignment(usize),

    /// Bad size
    #[error("zero-sized allocation")]
    ZeroSize,

    /// Double free, or a pointer this allocator never handed out
    #[error("address {0:#x} has no live allocation record")]
    UnknownAddress(usize),

    /// The platform refused to map backing memory
    #[error("failed to map {size} bytes of backing memory")]
    MapFailed { size: usize },

    /// Internal bookkeeping no longer adds up
    #[error("allocator state corrupted: {0}")]
    Corrupted(String),
}

impl AllocError {
    pub fn to_raw_errno(&self) -> i32 {
        match self {
            AllocError::OutOfMemory { .. } => -1,
            AllocError::UnknownAddress(_) => -2,
            AllocError::InvalidAlignment(_) => -4,
            AllocError::ZeroSize => -5,
            AllocError::MapFailed { .. } => -6,
            AllocError::Corrupted(_) => -8,
        }
    }
}

pub type Result<T> = core::result::Result<T, AllocError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_codes_are_distinct() {
        let all = [
            AllocError::OutOfMemory { size: 1, align: 1 },
            AllocError::UnknownAddress(0x10),
            AllocError::InvalidAlignment(3),
            AllocError::ZeroSize,
            AllocError::MapFailed { size: 4096 },
            AllocError::Corrupted(String::new()),
        ];
        for (i, a) in all.iter().enumerate() {
            assert!(a.to_raw_errno() < 0);
            for b in &all[i + 1..] {
                assert_ne!(a.to_raw_errno(), b.to_raw_errno());
            }
        }
    }

    #[test]
    fn display_mentions_address() {
        let msg = AllocError::UnknownAddress(0xdead).to_string();
        assert!(msg.contains("0xdead"), "{}", msg);
    }
}
