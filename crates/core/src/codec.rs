//! Conversions between packed binary codes and real-valued coordinates.
//!
//! Bit `i` of a code lives in byte `i / 8` at position `i % 8` (LSB first).
//! Decoding maps each bit to `0.0` or `1.0`; encoding thresholds each
//! coordinate at [`BINARIZE_THRESHOLD`].

/// Coordinates strictly above this value become a 1 bit.
pub const BINARIZE_THRESHOLD: f32 = 0.5;

/// Read bit `i` of a packed code.
#[inline]
pub fn get_bit(code: &[u8], i: usize) -> bool {
    (code[i >> 3] >> (i & 7)) & 1 == 1
}

/// Expand a packed code into `0.0` / `1.0` coordinates.
///
/// `out` must hold exactly `code.len() * 8` values.
#[inline]
pub fn decode_bits(code: &[u8], out: &mut [f32]) {
    debug_assert_eq!(out.len(), code.len() * 8);
    for (byte, lane) in code.iter().zip(out.chunks_exact_mut(8)) {
        for (j, v) in lane.iter_mut().enumerate() {
            *v = ((byte >> j) & 1) as f32;
        }
    }
}

/// Re-binarize real coordinates into a packed code.
///
/// `out` must hold exactly `real.len() / 8` bytes.
#[inline]
pub fn encode_bits(real: &[f32], out: &mut [u8]) {
    debug_assert_eq!(real.len(), out.len() * 8);
    for (lane, byte) in real.chunks_exact(8).zip(out.iter_mut()) {
        let mut b = 0u8;
        for (j, &v) in lane.iter().enumerate() {
            if v > BINARIZE_THRESHOLD {
                b |= 1 << j;
            }
        }
        *byte = b;
    }
}

/// Add the bits of `code` to per-coordinate counters.
#[inline]
pub fn accumulate_bits(counts: &mut [u32], code: &[u8]) {
    debug_assert_eq!(counts.len(), code.len() * 8);
    for (byte, lane) in code.iter().zip(counts.chunks_exact_mut(8)) {
        if *byte == 0 {
            continue;
        }
        for (j, c) in lane.iter_mut().enumerate() {
            *c += ((byte >> j) & 1) as u32;
        }
    }
}

/// Majority vote per coordinate: a bit is set when more than half of the
/// `total` accumulated codes had it set. A tie gives 0.
pub fn majority_bits(counts: &[u32], total: usize, out: &mut [u8]) {
    debug_assert_eq!(counts.len(), out.len() * 8);
    if total == 0 {
        out.fill(0);
        return;
    }
    for (lane, byte) in counts.chunks_exact(8).zip(out.iter_mut()) {
        let mut b = 0u8;
        for (j, &c) in lane.iter().enumerate() {
            if 2 * c as usize > total {
                b |= 1 << j;
            }
        }
        *byte = b;
    }
}
