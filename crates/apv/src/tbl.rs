//! Constant tables and format-wide dimensions.

use std::sync::OnceLock;

/// Macroblock width and height in luma samples.
pub(crate) const MB: usize = 16;
/// Transform block width and height.
pub(crate) const BLK: usize = 8;
/// Coefficients per transform block.
pub(crate) const BLK_D: usize = BLK * BLK;
pub(crate) const LOG2_BLK: u8 = 3;

pub(crate) const MAX_COMPS: usize = 4;
pub(crate) const MAX_TILE_COLS: usize = 20;
pub(crate) const MAX_TILE_ROWS: usize = 20;
pub(crate) const MIN_TILE_W: u32 = 256;
pub(crate) const MIN_TILE_H: u32 = 128;
pub(crate) const MAX_THREADS: usize = 32;
pub(crate) const MAX_AU_FRAMES: usize = 16;
pub(crate) const MAX_META_GROUPS: usize = 16;

pub(crate) const MAX_TX_DYNAMIC_RANGE: u8 = 15;
pub(crate) const QUANT_SHIFT: u8 = 14;
/// Dead-zone numerator applied at `1/512` granularity during quantization.
pub(crate) const QUANT_DEADZONE: i32 = 171;

pub(crate) const MIN_QP: u8 = 0;
pub(crate) const KPARAM_DC_MAX: u8 = 5;
pub(crate) const KPARAM_AC_MAX: u8 = 4;
pub(crate) const KPARAM_RUN_MAX: u8 = 2;

/// Highest quantization parameter for the given bit depth.
pub(crate) const fn max_qp(bit_depth: u8) -> u8 {
    63 + (bit_depth - 10) * 6
}

/// Per-`qp % 6` forward quantization scales, 15-bit precision.
pub(crate) const QUANT_SCALE: [i32; 6] = [26214, 23302, 20560, 18396, 16384, 14769];

/// Per-`qp % 6` dequantization scales; paired with [`QUANT_SCALE`] the
/// product is one step of `2^20`.
pub(crate) const DQ_SCALE: [u8; 6] = [40, 45, 51, 57, 64, 71];

/// The 8-point integer transform matrix.
pub(crate) const TM8: [[i8; 8]; 8] = [
    [64, 64, 64, 64, 64, 64, 64, 64],
    [89, 75, 50, 18, -18, -50, -75, -89],
    [83, 36, -36, -83, -83, -36, 36, 83],
    [75, -18, -89, -50, 50, 89, 18, -75],
    [64, -64, -64, 64, 64, -64, -64, 64],
    [50, -89, 18, 75, -75, -18, 89, -50],
    [36, -83, 83, -36, -36, 83, -83, 36],
    [18, -50, 75, -89, 89, -75, 50, -18],
];

/// Zig-zag scan order for an 8x8 block.
pub(crate) const SCAN: [u8; BLK_D] = [
    0, 1, 8, 16, 9, 2, 3, 10,
    17, 24, 32, 25, 18, 11, 4, 5,
    12, 19, 26, 33, 40, 48, 41, 34,
    27, 20, 13, 6, 7, 14, 21, 28,
    35, 42, 49, 56, 57, 50, 43, 36,
    29, 22, 15, 23, 30, 37, 44, 51,
    58, 59, 52, 45, 38, 31, 39, 46,
    53, 60, 61, 54, 47, 55, 62, 63,
];

/// Builds the codeword for a non-negative value under parameter `k`.
///
/// The word is returned MSB-first in the low bits of the result together
/// with its length. Lengths can exceed 32 bits for large values, so the
/// word is accumulated in 64 bits.
pub(crate) const fn vlc_codeword(val: u32, k: u32) -> (u64, u32) {
    let val = val as u64;
    let mut k = k as u64;
    if val < (1 << k) {
        // short prefix, value fits the current parameter
        (1 << k | val, 1 + k as u32)
    } else if val < (2 << k) {
        (0b01 << k | (val - (1 << k)), 2 + k as u32)
    } else {
        let mut code: u64 = 0b00;
        let mut len: u32 = 2;
        let mut rest = val - (2 << k);
        while rest >= (1 << k) {
            rest -= 1 << k;
            code <<= 1;
            len += 1;
            k += 1;
        }
        code = (code << 1) | 1;
        len += 1;
        code = (code << k) | rest;
        (code, len + k as u32)
    }
}

/// Codeword cache for the first 100 values and the first 5 parameters,
/// indexed `[value][k]`.
pub(crate) static VLC_CODE: [[(u16, u8); 5]; 100] = build_vlc_code();

const fn build_vlc_code() -> [[(u16, u8); 5]; 100] {
    let mut table = [[(0u16, 0u8); 5]; 100];
    let mut v = 0;
    while v < 100 {
        let mut k = 0;
        while k < 5 {
            let (code, len) = vlc_codeword(v as u32, k as u32);
            table[v][k] = (code as u16, len as u8);
            k += 1;
        }
        v += 1;
    }
    table
}

/// Reconstruction refinement table for the inverse transform, one 64-entry
/// row per last-significant scan position.
///
/// Rows hold the truncation error of the integer inverse transform against
/// an exact-arithmetic reference for a basis block, measured before the
/// final descaling shift and stored at 1/16 resolution.
pub(crate) fn itrans_diff() -> &'static [[i16; 64]; 64] {
    static TABLE: OnceLock<Box<[[i16; 64]; 64]>> = OnceLock::new();
    TABLE.get_or_init(build_itrans_diff)
}

fn build_itrans_diff() -> Box<[[i16; 64]; 64]> {
    const AMPLITUDE: i32 = 1024;
    let mut table = Box::new([[0i16; 64]; 64]);
    for (pos, row) in table.iter_mut().enumerate() {
        let mut coef = [0i32; BLK_D];
        coef[SCAN[pos] as usize] = AMPLITUDE;

        let exact = itx_exact(&coef);
        let truncated = itx_truncated(&coef);
        for i in 0..BLK_D {
            let err = exact[i] - truncated[i] as f64;
            row[i] = (err / 16.0).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        }
    }
    table
}

fn itx_pass_exact(src: &[f64; BLK_D], dst: &mut [f64; BLK_D], scale: f64) {
    for j in 0..BLK {
        for x in 0..BLK {
            let mut acc = 0.0;
            for u in 0..BLK {
                acc += TM8[u][x] as f64 * src[u * BLK + j];
            }
            dst[j * BLK + x] = acc / scale;
        }
    }
}

fn itx_exact(coef: &[i32; BLK_D]) -> [f64; BLK_D] {
    let src: [f64; BLK_D] = std::array::from_fn(|i| coef[i] as f64);
    let mut mid = [0.0; BLK_D];
    let mut out = [0.0; BLK_D];
    itx_pass_exact(&src, &mut mid, 128.0);
    itx_pass_exact(&mid, &mut out, 1.0);
    out
}

fn itx_pass_truncated(src: &[i32; BLK_D], dst: &mut [i32; BLK_D], shift: u32) {
    let add = if shift > 0 { 1i64 << (shift - 1) } else { 0 };
    for j in 0..BLK {
        for x in 0..BLK {
            let mut acc = 0i64;
            for u in 0..BLK {
                acc += TM8[u][x] as i64 * src[u * BLK + j] as i64;
            }
            dst[j * BLK + x] = ((acc + add) >> shift) as i32;
        }
    }
}

fn itx_truncated(coef: &[i32; BLK_D]) -> [i32; BLK_D] {
    let mut mid = [0i32; BLK_D];
    let mut out = [0i32; BLK_D];
    itx_pass_truncated(coef, &mut mid, 7);
    itx_pass_truncated(&mid, &mut out, 0);
    out
}

#[cfg(test)]
#[cfg_attr(all(test, coverage_nightly), coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn scan_is_a_permutation() {
        let mut seen = [false; BLK_D];
        for &p in SCAN.iter() {
            assert!(!seen[p as usize]);
            seen[p as usize] = true;
        }
    }

    #[test]
    fn quant_scales_pair_up() {
        for i in 0..6 {
            let product = QUANT_SCALE[i] as i64 * DQ_SCALE[i] as i64;
            let err = (product - (1 << 20)).abs();
            assert!(err < 1 << 7, "qp%6={i}: {product}");
        }
    }

    #[test]
    fn codeword_reference_vectors() {
        assert_eq!(vlc_codeword(0, 0), (0b1, 1));
        assert_eq!(vlc_codeword(1, 0), (0b01, 2));
        assert_eq!(vlc_codeword(2, 0), (0b001, 3));
        assert_eq!(vlc_codeword(3, 1), (0b011, 3));
        assert_eq!(vlc_codeword(1, 1), (0b11, 2));
    }

    #[test]
    fn code_table_matches_codeword() {
        for v in 0..100u32 {
            for k in 0..5u32 {
                let (code, len) = vlc_codeword(v, k);
                let (tcode, tlen) = VLC_CODE[v as usize][k as usize];
                assert_eq!((tcode as u64, tlen as u32), (code, len), "v={v} k={k}");
            }
        }
    }

    #[test]
    fn itrans_diff_rows_are_small() {
        let table = itrans_diff();
        for row in table.iter() {
            for &d in row.iter() {
                assert!(d.unsigned_abs() < 1 << 12);
            }
        }
    }

    #[test]
    fn max_qp_tracks_bit_depth() {
        assert_eq!(max_qp(10), 63);
        assert_eq!(max_qp(12), 75);
    }
}
