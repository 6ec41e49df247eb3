//! Key → partition assignment
//!
//! Uses the murmur2 hash with the same seed and positive-modulo reduction as
//! the Kafka default partitioner, so a key maps to the same partition from
//! any producer process.

const SEED: u32 = 0x9747_b28c;
const M: u32 = 0x5bd1_e995;
const R: u32 = 24;

/// 32-bit murmur2 hash of `data`
pub fn murmur2(data: &[u8]) -> i32 {
    let length = data.len();
    let mut h: u32 = SEED ^ (length as u32);

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() >= 3 {
        h ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        h ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        h ^= tail[0] as u32;
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;

    h as i32
}

/// Partition for `key` on a topic with `partitions` partitions
pub fn partition_for_key(key: &str, partitions: u32) -> u32 {
    debug_assert!(partitions > 0, "topic must have at least one partition");
    let positive = (murmur2(key.as_bytes()) & 0x7fff_ffff) as u32;
    positive % partitions.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_murmur2_known_vectors() {
        assert_eq!(murmur2(b"21"), -973932308);
        assert_eq!(murmur2(b"foobar"), -790332482);
        assert_eq!(murmur2(b"a-little-bit-long-string"), -985981536);
        assert_eq!(murmur2(b"abc"), 479470107);
    }

    #[test]
    fn test_partition_is_stable_and_in_range() {
        for partitions in 1..8 {
            for key in ["a", "bb", "ccc", "product-42", "9f1c7a54-3a2b-4b7e-8a1e-5b8f0f3f2d11"] {
                let p = partition_for_key(key, partitions);
                assert!(p < partitions);
                assert_eq!(p, partition_for_key(key, partitions));
            }
        }
    }

    #[test]
    fn test_partition_known_values() {
        assert_eq!(partition_for_key("21", 3), 0);
        assert_eq!(partition_for_key("a-little-bit-long-string", 3), 2);
    }
}
