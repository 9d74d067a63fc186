//! Transform and quantization kernels.
//!
//! Every kernel is reachable through a [`Kernels`] dispatch table selected
//! per codec instance from the detected CPU tier, so vectorised variants
//! can slot in without touching call sites. The scalar tier is always
//! available and is the reference behaviour.

use crate::tbl::{
    BLK, BLK_D, DQ_SCALE, LOG2_BLK, MAX_TX_DYNAMIC_RANGE, QUANT_SCALE, QUANT_SHIFT, TM8,
};

pub(crate) type TxFn = fn(&mut [i16; BLK_D], u32, u32);
pub(crate) type ItxPreFn = fn(&[i16; BLK_D], &mut [i32; BLK_D], u32);
pub(crate) type ItxAdjustFn = fn(&mut [i32; BLK_D], &[i16; BLK_D], i32, u32);
pub(crate) type QuantFn = fn(&mut [i16; BLK_D], &[i32; BLK_D], u32, i64);
pub(crate) type DequantFn = fn(&mut [i16; BLK_D], &[i16; BLK_D], i8);

/// Transform-domain headroom left above the sample depth.
pub(crate) fn tr_shift(bit_depth: u8) -> u32 {
    (MAX_TX_DYNAMIC_RANGE - bit_depth - LOG2_BLK) as u32
}

/// Shifts of the two forward passes.
pub(crate) fn fwd_shifts(bit_depth: u8) -> (u32, u32) {
    ((LOG2_BLK - 1 + bit_depth - 8) as u32, (LOG2_BLK + 6) as u32)
}

/// Shifts of the two inverse passes; together they mirror the forward gain.
pub(crate) fn inv_shifts(bit_depth: u8) -> (u32, u32) {
    (7, (26 - bit_depth) as u32)
}

pub(crate) fn quant_shift(qp: u8, bit_depth: u8) -> u32 {
    QUANT_SHIFT as u32 + tr_shift(bit_depth) + (qp / 6) as u32
}

pub(crate) fn quant_offset(deadzone: i32, shift: u32) -> i64 {
    (deadzone as i64) << (shift - 9)
}

pub(crate) fn dequant_shift(qp: u8, bit_depth: u8) -> i8 {
    bit_depth as i8 - 2 - (qp / 6) as i8
}

/// Forward quantization matrix: one multiplier per coefficient.
pub(crate) fn enc_qmat(qp: u8, q_matrix: &[u8; BLK_D]) -> [i32; BLK_D] {
    let scale = QUANT_SCALE[(qp % 6) as usize];
    std::array::from_fn(|i| scale * 16 / q_matrix[i] as i32)
}

/// Dequantization matrix; fits 16 bits by construction.
pub(crate) fn dec_qmat(qp: u8, q_matrix: &[u8; BLK_D]) -> [i16; BLK_D] {
    let scale = DQ_SCALE[(qp % 6) as usize] as i16;
    std::array::from_fn(|i| scale * q_matrix[i] as i16)
}

/// Step and shift driving the reconstruction refinement.
pub(crate) fn itx_adjust_params(qp: u8) -> (i32, u32) {
    ((DQ_SCALE[(qp % 6) as usize] as i32) << 2, 4)
}

fn tx_part(src: &[i16; BLK_D], dst: &mut [i16; BLK_D], shift: u32) {
    let add = 1i32 << (shift - 1);
    for j in 0..BLK {
        let row = &src[j * BLK..j * BLK + BLK];
        let mut e = [0i32; 4];
        let mut o = [0i32; 4];
        for k in 0..4 {
            e[k] = row[k] as i32 + row[7 - k] as i32;
            o[k] = row[k] as i32 - row[7 - k] as i32;
        }
        let ee = [e[0] + e[3], e[1] + e[2]];
        let eo = [e[0] - e[3], e[1] - e[2]];

        dst[j] = ((TM8[0][0] as i32 * ee[0] + TM8[0][1] as i32 * ee[1] + add) >> shift) as i16;
        dst[4 * BLK + j] = ((TM8[4][0] as i32 * ee[0] + TM8[4][1] as i32 * ee[1] + add) >> shift) as i16;
        dst[2 * BLK + j] = ((TM8[2][0] as i32 * eo[0] + TM8[2][1] as i32 * eo[1] + add) >> shift) as i16;
        dst[6 * BLK + j] = ((TM8[6][0] as i32 * eo[0] + TM8[6][1] as i32 * eo[1] + add) >> shift) as i16;

        for &row_idx in &[1usize, 3, 5, 7] {
            let t = &TM8[row_idx];
            let v = t[0] as i32 * o[0] + t[1] as i32 * o[1] + t[2] as i32 * o[2] + t[3] as i32 * o[3];
            dst[row_idx * BLK + j] = ((v + add) >> shift) as i16;
        }
    }
}

fn fwd_tx(coef: &mut [i16; BLK_D], shift1: u32, shift2: u32) {
    let mut tmp = [0i16; BLK_D];
    tx_part(coef, &mut tmp, shift1);
    tx_part(&tmp, coef, shift2);
}

/// One inverse butterfly column set; `None` shift keeps 32-bit outputs.
fn itx_column(src: &[i16; BLK_D], j: usize) -> ([i32; 4], [i32; 4]) {
    let mut o = [0i32; 4];
    for k in 0..4 {
        o[k] = TM8[1][k] as i32 * src[BLK + j] as i32
            + TM8[3][k] as i32 * src[3 * BLK + j] as i32
            + TM8[5][k] as i32 * src[5 * BLK + j] as i32
            + TM8[7][k] as i32 * src[7 * BLK + j] as i32;
    }
    let eo = [
        TM8[2][0] as i32 * src[2 * BLK + j] as i32 + TM8[6][0] as i32 * src[6 * BLK + j] as i32,
        TM8[2][1] as i32 * src[2 * BLK + j] as i32 + TM8[6][1] as i32 * src[6 * BLK + j] as i32,
    ];
    let ee = [
        TM8[0][0] as i32 * src[j] as i32 + TM8[4][0] as i32 * src[4 * BLK + j] as i32,
        TM8[0][1] as i32 * src[j] as i32 + TM8[4][1] as i32 * src[4 * BLK + j] as i32,
    ];
    let e = [ee[0] + eo[0], ee[1] + eo[1], ee[1] - eo[1], ee[0] - eo[0]];
    (e, o)
}

fn itx_part(src: &[i16; BLK_D], dst: &mut [i16; BLK_D], shift: u32) {
    let add = 1i32 << (shift - 1);
    for j in 0..BLK {
        let (e, o) = itx_column(src, j);
        for k in 0..4 {
            dst[j * BLK + k] = ((e[k] + o[k] + add) >> shift) as i16;
            dst[j * BLK + k + 4] = ((e[3 - k] - o[3 - k] + add) >> shift) as i16;
        }
    }
}

fn inv_tx(coef: &mut [i16; BLK_D], shift1: u32, shift2: u32) {
    let mut tmp = [0i16; BLK_D];
    itx_part(coef, &mut tmp, shift1);
    itx_part(&tmp, coef, shift2);
}

/// Inverse transform stopped before the final descaling shift, leaving the
/// second pass in 32-bit precision for refinement.
fn inv_tx_pre(coef: &[i16; BLK_D], out: &mut [i32; BLK_D], shift1: u32) {
    let mut tmp = [0i16; BLK_D];
    itx_part(coef, &mut tmp, shift1);
    for j in 0..BLK {
        let (e, o) = itx_column(&tmp, j);
        for k in 0..4 {
            out[j * BLK + k] = e[k] + o[k];
            out[j * BLK + k + 4] = e[3 - k] - o[3 - k];
        }
    }
}

/// Applies the final descaling shift of the inverse transform.
pub(crate) fn itx_finish(pre: &[i32; BLK_D], out: &mut [i16; BLK_D], shift2: u32) {
    let add = 1i32 << (shift2 - 1);
    for i in 0..BLK_D {
        out[i] = ((pre[i] + add) >> shift2).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
    }
}

fn itx_adjust(blk: &mut [i32; BLK_D], diff: &[i16; BLK_D], diff_step: i32, shift: u32) {
    // quadrant interleave of the second-pass output layout
    const MAP: [usize; 16] = [0, 1, 2, 3, 8, 9, 10, 11, 4, 5, 6, 7, 12, 13, 14, 15];
    let offset = 1i32 << (shift - 1);
    for q in 0..4 {
        let d = &diff[q * 16..q * 16 + 16];
        let b = &mut blk[q * 16..q * 16 + 16];
        for i in 0..16 {
            b[i] += (d[MAP[i]] as i32 * diff_step + offset) >> shift;
        }
    }
}

fn quant(coef: &mut [i16; BLK_D], qmat: &[i32; BLK_D], shift: u32, offset: i64) {
    for i in 0..BLK_D {
        let negative = coef[i] < 0;
        let lev = (coef[i].unsigned_abs() as i64 * qmat[i] as i64 + offset) >> shift;
        let lev = if negative { -lev } else { lev };
        coef[i] = lev.clamp(i16::MIN as i64, i16::MAX as i64) as i16;
    }
}

fn dequant(coef: &mut [i16; BLK_D], dqmat: &[i16; BLK_D], shift: i8) {
    if shift > 0 {
        let offset = 1i64 << (shift - 1);
        for i in 0..BLK_D {
            let lev = (coef[i] as i64 * dqmat[i] as i64 + offset) >> shift;
            coef[i] = lev.clamp(i16::MIN as i64, i16::MAX as i64) as i16;
        }
    } else {
        let left = (-shift) as u32;
        for i in 0..BLK_D {
            let lev = (coef[i] as i64 * dqmat[i] as i64) << left;
            coef[i] = lev.clamp(i16::MIN as i64, i16::MAX as i64) as i16;
        }
    }
}

/// CPU capability tier used to pick a kernel set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CpuTier {
    Scalar,
    #[cfg(target_arch = "x86_64")]
    Avx2,
}

impl CpuTier {
    pub(crate) fn detect() -> Self {
        #[cfg(target_arch = "x86_64")]
        if std::arch::is_x86_feature_detected!("avx2") {
            return CpuTier::Avx2;
        }
        CpuTier::Scalar
    }
}

/// Per-instance kernel dispatch table.
#[derive(Clone, Copy)]
pub(crate) struct Kernels {
    pub(crate) fwd_tx: TxFn,
    pub(crate) inv_tx: TxFn,
    pub(crate) inv_tx_pre: ItxPreFn,
    pub(crate) itx_adjust: ItxAdjustFn,
    pub(crate) quant: QuantFn,
    pub(crate) dequant: DequantFn,
}

impl Kernels {
    const SCALAR: Kernels = Kernels {
        fwd_tx,
        inv_tx,
        inv_tx_pre,
        itx_adjust,
        quant,
        dequant,
    };

    pub(crate) fn select(tier: CpuTier) -> Self {
        match tier {
            CpuTier::Scalar => Self::SCALAR,
            // vector tiers resolve to scalar until their kernels land
            #[cfg(target_arch = "x86_64")]
            CpuTier::Avx2 => Self::SCALAR,
        }
    }
}
