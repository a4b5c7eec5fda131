//! Raw IQ byte blocks to normalized complex samples.
//!
//! Acquisition hardware delivers interleaved little-endian signed 16-bit
//! pairs: `I0 Q0 I1 Q1 ...`, four bytes per complex sample. Conversion
//! scales both components by `1 / 32767.5`, mapping the full i16 range
//! symmetrically into approximately [-1, 1).

use num_complex::Complex32;

/// Bytes occupied by one interleaved (I, Q) pair.
pub const BYTES_PER_SAMPLE: usize = 4;

/// Symmetric normalization factor for 16-bit samples.
pub const IQ_SCALE: f32 = 1.0 / 32767.5;

/// Decode the sample pair at `index` (in samples, not bytes) from a raw block.
///
/// # Panics
/// Panics if the block does not contain `index + 1` full sample pairs.
pub fn sample_pair(block: &[u8], index: usize) -> Complex32 {
    let at = index * BYTES_PER_SAMPLE;
    let i = i16::from_le_bytes([block[at], block[at + 1]]);
    let q = i16::from_le_bytes([block[at + 2], block[at + 3]]);
    Complex32::new(f32::from(i) * IQ_SCALE, f32::from(q) * IQ_SCALE)
}

/// Decode `out.len()` consecutive pairs starting at sample `start_pair`.
pub fn convert_pairs(block: &[u8], start_pair: usize, out: &mut [Complex32]) {
    let bytes = &block[start_pair * BYTES_PER_SAMPLE..][..out.len() * BYTES_PER_SAMPLE];
    for (pair, sample) in bytes.chunks_exact(BYTES_PER_SAMPLE).zip(out.iter_mut()) {
        let i = i16::from_le_bytes([pair[0], pair[1]]);
        let q = i16::from_le_bytes([pair[2], pair[3]]);
        *sample = Complex32::new(f32::from(i) * IQ_SCALE, f32::from(q) * IQ_SCALE);
    }
}

/// Number of complex samples held by a block of `len` bytes.
pub fn samples_in(len: usize) -> usize {
    len / BYTES_PER_SAMPLE
}
