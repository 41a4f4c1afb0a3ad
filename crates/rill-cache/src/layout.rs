/// Block-cache geometry for one stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheLayout {
    /// Fetch/cache granularity in bytes. Every cached block has exactly this
    /// length except the final block of the resource.
    pub block_size: u64,

    /// Upper bound on blocks retained per stream. Exceeding it on insert
    /// evicts exactly one block.
    pub max_cached_blocks: usize,

    /// Prefetch window: how many blocks past the read head the scheduler
    /// will speculatively fill.
    pub max_forward_blocks: u64,
}

impl Default for CacheLayout {
    fn default() -> Self {
        Self {
            block_size: 256 * 1024,
            max_cached_blocks: 64,
            max_forward_blocks: 32,
        }
    }
}

impl CacheLayout {
    pub fn with_block_size(mut self, block_size: u64) -> Self {
        assert!(block_size > 0, "block size must be non-zero");
        self.block_size = block_size;
        self
    }

    pub fn with_max_cached_blocks(mut self, blocks: usize) -> Self {
        self.max_cached_blocks = blocks;
        self
    }

    pub fn with_max_forward_blocks(mut self, blocks: u64) -> Self {
        self.max_forward_blocks = blocks;
        self
    }

    /// Number of blocks needed to cover `len` bytes.
    #[must_use]
    pub fn block_count(&self, len: u64) -> u64 {
        len.div_ceil(self.block_size)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::empty(0, 0)]
    #[case::partial(1, 1)]
    #[case::exact(256 * 1024, 1)]
    #[case::one_over(256 * 1024 + 1, 2)]
    #[case::ten(10 * 256 * 1024, 10)]
    fn block_count(#[case] len: u64, #[case] expected: u64) {
        assert_eq!(CacheLayout::default().block_count(len), expected);
    }

    #[test]
    #[should_panic(expected = "block size must be non-zero")]
    fn zero_block_size_rejected() {
        let _ = CacheLayout::default().with_block_size(0);
    }
}
