use super::PoolPos;

/// ClockReplacer implements the clock page replacement policy for a buffer pool.
/// Whether a frame can be evicted at all is decided by the caller.
pub(in crate::buffer) struct ClockReplacer {
    pool_size: usize,
    clock_hand: PoolPos,
    ref_bits: Vec<bool>,
}

impl ClockReplacer {
    /// Construct a new ClockReplacer for a BufferPool with a given pool_size
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            clock_hand: 0,
            ref_bits: vec![false; pool_size],
        }
    }

    /// The frame at the given position was accessed
    pub fn touch(&mut self, frame: PoolPos) {
        self.ref_bits[frame] = true;
    }

    /// Finds a frame to evict among the frames for which `evictable` returns true.
    /// Recently touched frames get a second chance. Returns None if no frame is evictable.
    pub fn find_victim(&mut self, evictable: impl Fn(PoolPos) -> bool) -> Option<PoolPos> {
        // the first round may only clear reference bits
        for _ in 0..2 * self.pool_size {
            let frame = self.clock_hand;
            self.clock_hand = (self.clock_hand + 1) % self.pool_size;
            if !evictable(frame) {
                continue;
            }
            if !self.ref_bits[frame] {
                return Some(frame);
            } else {
                self.ref_bits[frame] = false;
            }
        }
        None
    }
}
