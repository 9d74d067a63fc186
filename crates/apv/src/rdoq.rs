//! Rate-distortion optimised quantization.
//!
//! For each coefficient the engine weighs the baseline quantized level and
//! its decrement against dropping the coefficient entirely, scoring
//! `distortion + lambda * rate` with the VLC cost model. Decisions are
//! greedy in scan order; with `lambda = 0` the baseline quantizer wins
//! everywhere.

use crate::tbl::{BLK_D, MAX_TX_DYNAMIC_RANGE, SCAN};
use crate::tq;
use crate::vlc::{kparam_ac, level_cost, run_cost};

/// Distortion scale per coefficient position for the given quantization
/// matrix.
pub(crate) fn err_scale_table(qmat: &[i32; BLK_D], bit_depth: u8) -> [f64; BLK_D] {
    let tr = tq::tr_shift(bit_depth) as i32;
    std::array::from_fn(|i| 2f64.powi(-tr) / qmat[i] as f64)
}

/// Lagrange multiplier for the given quantization parameter.
pub(crate) fn lambda_for_qp(qp: u8) -> f64 {
    0.57 * 2f64.powf((qp as f64 - 12.0) / 3.0)
}

/// Candidate level pair around the baseline, kept inside the coded range.
fn clamp_candidates(org: i32) -> (i32, i32) {
    if org > 0 {
        (org.min(i16::MAX as i32), org.min(i16::MAX as i32) - 1)
    } else {
        (org.max(i16::MIN as i32 + 1) + 1, org.max(i16::MIN as i32 + 1))
    }
}

/// Quantizes one transformed block with rate-distortion decisions.
///
/// `prev_dc`, `k_dc` and `k_ac` carry the entropy state the block will be
/// coded with; they are read but not updated, the caller refreshes them
/// when the block is actually written. Returns the number of non-zero
/// levels.
#[allow(clippy::too_many_arguments)]
pub(crate) fn rdoq_block(
    src: &[i16; BLK_D],
    dst: &mut [i16; BLK_D],
    qmat: &[i32; BLK_D],
    err_scale: &[f64; BLK_D],
    q_bits: u32,
    lambda: f64,
    prev_dc: i32,
    k_dc: u8,
    k_ac: u8,
) -> u32 {
    let mut level_exact = [0i64; BLK_D];
    let mut baseline = [0i32; BLK_D];
    let mut base_dist = 0f64;
    let mut floor_sum: u64 = 0;

    for scan_pos in 0..BLK_D {
        let blk_pos = SCAN[scan_pos] as usize;
        let exact = src[blk_pos].unsigned_abs() as i64 * qmat[blk_pos] as i64;
        level_exact[blk_pos] = exact;
        let floor_level = ((exact >> q_bits) as u64).min((1 << MAX_TX_DYNAMIC_RANGE) - 1);
        floor_sum += floor_level;
        let candidate = floor_level as i32 + 1;
        baseline[blk_pos] = if src[blk_pos] >= 0 { candidate } else { -candidate };
        let err = exact as f64 * err_scale[blk_pos];
        base_dist += err * err;
    }

    if floor_sum == 0 {
        dst.fill(0);
        return 0;
    }

    let mut nnz = 0u32;
    let mut k_ac = k_ac;
    let mut run: u32 = 0;
    let mut prev_run: u32 = 0;

    let mut best_dist = base_dist;
    let mut best_bit_cost =
        run_cost(63, 0, lambda) + level_cost(prev_dc.unsigned_abs(), k_dc, lambda);
    let mut best_cost = best_dist + best_bit_cost;
    let mut base_dist = best_dist;
    let mut base_bit_cost = best_bit_cost;
    let mut prev_run_bit_cost = 0f64;
    let mut base_prev_run_bit_cost = 0f64;

    // DC
    {
        let org = baseline[0];
        let uncoded = {
            let err = level_exact[0] as f64 * err_scale[0];
            err * err
        };
        let (hi, lo) = clamp_candidates(org);
        let mut best_level = 0i32;
        for level in (lo..=hi).rev() {
            if level == 0 {
                continue;
            }
            let delta = (level_exact[0] - ((level.unsigned_abs() as i64) << q_bits)) as f64;
            let err = delta * err_scale[0];
            let curr_dist = best_dist - uncoded + err * err;
            let curr_run_bit_cost = run_cost(63, 0, lambda);
            let curr_bit_cost =
                level_cost((level - prev_dc).unsigned_abs(), k_dc, lambda) + curr_run_bit_cost;
            let curr_cost = curr_dist + curr_bit_cost;
            if curr_cost < best_cost {
                best_level = level;
                base_dist = curr_dist;
                base_bit_cost = curr_bit_cost;
                best_cost = curr_cost;
                base_prev_run_bit_cost = curr_run_bit_cost;
            }
        }
        dst[0] = best_level as i16;
        best_dist = base_dist;
        best_bit_cost = base_bit_cost;
        prev_run_bit_cost = base_prev_run_bit_cost;
    }

    // runs and AC levels
    for scan_pos in 1..BLK_D {
        let blk_pos = SCAN[scan_pos] as usize;
        let org = baseline[blk_pos];
        let uncoded = {
            let err = level_exact[blk_pos] as f64 * err_scale[blk_pos];
            err * err
        };
        let rice_run = (prev_run / 4).min(2) as u8;
        let rice_level = k_ac;

        let (hi, lo) = clamp_candidates(org);
        let mut best_level = 0i32;
        for level in (lo..=hi).rev() {
            if level == 0 {
                continue;
            }
            let delta = (level_exact[blk_pos] - ((level.unsigned_abs() as i64) << q_bits)) as f64;
            let err = delta * err_scale[blk_pos];
            let curr_dist = best_dist - uncoded + err * err;
            let rice_run_last = (run / 4).min(2) as u8;
            let trailing = if blk_pos == 63 {
                0.0
            } else {
                run_cost(63 - scan_pos as u32, rice_run_last, lambda)
            };
            let curr_bit_cost = best_bit_cost - prev_run_bit_cost
                + run_cost(run, rice_run, lambda)
                + level_cost(level.unsigned_abs() - 1, rice_level, lambda)
                + trailing;
            let curr_cost = curr_dist + curr_bit_cost;
            if curr_cost < best_cost {
                best_level = level;
                base_dist = curr_dist;
                base_bit_cost = curr_bit_cost;
                best_cost = curr_cost;
                base_prev_run_bit_cost = trailing;
            }
        }
        dst[blk_pos] = best_level as i16;
        best_dist = base_dist;
        best_bit_cost = base_bit_cost;
        prev_run_bit_cost = base_prev_run_bit_cost;

        if dst[blk_pos] != 0 {
            prev_run = run;
            k_ac = kparam_ac(dst[blk_pos].unsigned_abs() as u32);
            run = 0;
            nnz += 1;
        } else {
            run += 1;
        }
    }
    nnz
}
