//! Distance kernels for packed binary codes and their real-valued relaxation.
//!
//! Hamming distance is computed over 64-bit words with manual unrolling so the
//! compiler can emit `popcnt` on every lane. The squared L2 kernel is used by
//! k-means while centroids still live in real space.

/// Compute the Hamming distance between two packed binary codes.
///
/// Both slices must have the same length (the code size in bytes).
#[inline]
pub fn hamming(a: &[u8], b: &[u8]) -> u32 {
    debug_assert_eq!(a.len(), b.len(), "Code sizes must match");

    let mut sum0 = 0u32;
    let mut sum1 = 0u32;
    let mut sum2 = 0u32;
    let mut sum3 = 0u32;

    let a_chunks = a.chunks_exact(32);
    let b_chunks = b.chunks_exact(32);
    let a_remainder = a_chunks.remainder();
    let b_remainder = b_chunks.remainder();

    for (a_chunk, b_chunk) in a_chunks.zip(b_chunks) {
        sum0 += (word(a_chunk, 0) ^ word(b_chunk, 0)).count_ones();
        sum1 += (word(a_chunk, 1) ^ word(b_chunk, 1)).count_ones();
        sum2 += (word(a_chunk, 2) ^ word(b_chunk, 2)).count_ones();
        sum3 += (word(a_chunk, 3) ^ word(b_chunk, 3)).count_ones();
    }

    let a_words = a_remainder.chunks_exact(8);
    let b_words = b_remainder.chunks_exact(8);
    let a_tail = a_words.remainder();
    let b_tail = b_words.remainder();

    for (a_word, b_word) in a_words.zip(b_words) {
        sum0 += (word(a_word, 0) ^ word(b_word, 0)).count_ones();
    }

    for (x, y) in a_tail.iter().zip(b_tail.iter()) {
        sum1 += (x ^ y).count_ones();
    }

    sum0 + sum1 + sum2 + sum3
}

/// Byte-at-a-time Hamming distance. Reference for the unrolled kernel.
#[inline]
pub fn hamming_naive(a: &[u8], b: &[u8]) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

#[inline(always)]
fn word(chunk: &[u8], i: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&chunk[i * 8..i * 8 + 8]);
    u64::from_le_bytes(buf)
}

/// Compute squared L2 (Euclidean) distance between two vectors.
///
/// This is faster than L2 distance as it avoids the sqrt operation.
/// Use this for comparisons where only relative ordering matters.
#[inline]
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    // Process in chunks of 8 for better SIMD utilization
    let mut sum0 = 0.0f32;
    let mut sum1 = 0.0f32;
    let mut sum2 = 0.0f32;
    let mut sum3 = 0.0f32;

    let a_chunks = a.chunks_exact(8);
    let b_chunks = b.chunks_exact(8);
    let a_remainder = a_chunks.remainder();
    let b_remainder = b_chunks.remainder();

    for (a_chunk, b_chunk) in a_chunks.zip(b_chunks) {
        let d0 = a_chunk[0] - b_chunk[0];
        let d1 = a_chunk[1] - b_chunk[1];
        let d2 = a_chunk[2] - b_chunk[2];
        let d3 = a_chunk[3] - b_chunk[3];
        let d4 = a_chunk[4] - b_chunk[4];
        let d5 = a_chunk[5] - b_chunk[5];
        let d6 = a_chunk[6] - b_chunk[6];
        let d7 = a_chunk[7] - b_chunk[7];

        sum0 += d0 * d0 + d4 * d4;
        sum1 += d1 * d1 + d5 * d5;
        sum2 += d2 * d2 + d6 * d6;
        sum3 += d3 * d3 + d7 * d7;
    }

    for (a_val, b_val) in a_remainder.iter().zip(b_remainder.iter()) {
        let d = a_val - b_val;
        sum0 += d * d;
    }

    sum0 + sum1 + sum2 + sum3
}
