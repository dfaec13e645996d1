//! Deterministic payload and slice generation.
//!
//! The payload is generated once per process from a fixed seed and shared
//! read-only by every scenario. `Bytes` keeps it reference counted, so
//! handing slices to the transport never copies the data.

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::ops::Range;

/// Default payload length (1 MiB).
pub const DEFAULT_PAYLOAD_LEN: usize = 1024 * 1024;

/// Default upper bound of a single write slice (64 KiB).
pub const DEFAULT_MAX_SLICE: usize = 64 * 1024;

/// Immutable, seeded byte buffer.
#[derive(Debug, Clone)]
pub struct Payload {
    bytes: Bytes,
    seed: u64,
}

impl Payload {
    /// Fill `len` bytes from a PRNG seeded with `seed`.
    pub fn generate(seed: u64, len: usize) -> Self {
        let mut data = vec![0u8; len];
        StdRng::seed_from_u64(seed).fill_bytes(&mut data);
        Self {
            bytes: Bytes::from(data),
            seed,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Zero-copy view of `range`.
    pub fn slice(&self, range: Range<usize>) -> Bytes {
        self.bytes.slice(range)
    }

    /// Copy of this payload with the byte at `offset` inverted.
    ///
    /// Used as the expected view of a participant to force a mismatch.
    pub fn corrupted_at(&self, offset: usize) -> Self {
        let mut data = self.bytes.to_vec();
        if let Some(byte) = data.get_mut(offset) {
            *byte = !*byte;
        }
        Self {
            bytes: Bytes::from(data),
            seed: self.seed,
        }
    }
}

/// Random partition of `[0, total)` into consecutive slices.
///
/// Each slice length is drawn uniformly from `[1, max_slice]` and clamped to
/// the bytes remaining, so the slices cover the range exactly once.
pub struct SliceSchedule {
    rng: StdRng,
    offset: usize,
    total: usize,
    max_slice: usize,
}

impl SliceSchedule {
    pub fn new(seed: u64, total: usize, max_slice: usize) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            offset: 0,
            total,
            max_slice: max_slice.max(1),
        }
    }
}

impl Iterator for SliceSchedule {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Range<usize>> {
        if self.offset >= self.total {
            return None;
        }
        let drawn = self.rng.random_range(1..=self.max_slice);
        let len = drawn.min(self.total - self.offset);
        let start = self.offset;
        self.offset += len;
        Some(start..self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_generate_is_deterministic() {
        let a = Payload::generate(42, 4096);
        let b = Payload::generate(42, 4096);
        let c = Payload::generate(43, 4096);

        assert_eq!(a.len(), 4096);
        assert_eq!(a.as_slice(), b.as_slice());
        assert_ne!(a.as_slice(), c.as_slice());
    }

    #[test]
    fn test_default_payload_len() {
        let payload = Payload::generate(7, DEFAULT_PAYLOAD_LEN);
        assert_eq!(payload.len(), 1_048_576);
    }

    #[test]
    fn test_slice_is_zero_copy_view() {
        let payload = Payload::generate(1, 1024);
        let slice = payload.slice(100..200);
        assert_eq!(&slice[..], &payload.as_slice()[100..200]);
    }

    #[test]
    fn test_corrupted_at() {
        let payload = Payload::generate(1, 20000);
        let corrupted = payload.corrupted_at(12345);

        assert_ne!(corrupted.as_slice()[12345], payload.as_slice()[12345]);
        assert_eq!(corrupted.as_slice()[..12345], payload.as_slice()[..12345]);
        assert_eq!(corrupted.as_slice()[12346..], payload.as_slice()[12346..]);
    }

    #[test]
    fn test_empty_schedule() {
        assert_eq!(SliceSchedule::new(1, 0, 10).count(), 0);
    }

    #[test]
    fn test_schedule_single_byte_slices() {
        let slices: Vec<_> = SliceSchedule::new(9, 5, 1).collect();
        assert_eq!(slices, vec![0..1, 1..2, 2..3, 3..4, 4..5]);
    }

    proptest! {
        #[test]
        fn slices_cover_total_exactly(
            seed in any::<u64>(),
            total in 0usize..300_000,
            max_slice in 1usize..=65_536,
        ) {
            let mut expected_start = 0;
            for slice in SliceSchedule::new(seed, total, max_slice) {
                prop_assert_eq!(slice.start, expected_start);
                prop_assert!(!slice.is_empty());
                prop_assert!(slice.len() <= max_slice);
                expected_start = slice.end;
            }
            prop_assert_eq!(expected_start, total);
        }
    }
}
