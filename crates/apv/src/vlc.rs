//! Entropy coding of coefficients.
//!
//! Values are coded with a Golomb-Rice family driven by a running `k`
//! parameter. Short values resolve through a precomputed codeword table;
//! everything else goes through the iterative coder.

use crate::bs::{BitReader, BitWriter};
use crate::error::{Error, Result};
use crate::tbl::{BLK_D, KPARAM_AC_MAX, KPARAM_DC_MAX, KPARAM_RUN_MAX, SCAN, VLC_CODE, vlc_codeword};

/// Next DC parameter after coding a delta of the given magnitude.
pub(crate) fn kparam_dc(abs_delta: u32) -> u8 {
    if abs_delta == 0 {
        0
    } else {
        (abs_delta.ilog2() as u8).min(KPARAM_DC_MAX)
    }
}

/// Next AC parameter after coding a level of the given magnitude.
pub(crate) fn kparam_ac(level: u32) -> u8 {
    (((level - 1) / 4) as u8).min(KPARAM_AC_MAX)
}

/// Next run parameter after coding the given run length.
pub(crate) fn kparam_run(run: u32) -> u8 {
    ((run / 4) as u8).min(KPARAM_RUN_MAX)
}

pub(crate) fn encode_value(bw: &mut BitWriter<'_>, val: u32, k: u8) -> Result<()> {
    if val < 100 && k < 5 {
        let (code, len) = VLC_CODE[val as usize][k as usize];
        bw.write(code as u32, len as u32)
    } else {
        let (code, len) = vlc_codeword(val, k as u32);
        bw.write64(code, len)
    }
}

pub(crate) fn decode_value(br: &mut BitReader<'_>, k: u8) -> Result<u32> {
    let mut k = k as u32;
    if br.read1()? == 1 {
        return if k > 0 { br.read(k) } else { Ok(0) };
    }
    if br.read1()? == 1 {
        let rest = if k > 0 { br.read(k)? } else { 0 };
        return Ok((1 << k) + rest);
    }
    let mut base = 2u32 << k;
    loop {
        if br.read1()? == 1 {
            break;
        }
        base += 1 << k;
        k += 1;
        if k > 24 {
            return Err(Error::MalformedBitstream("vlc prefix too long"));
        }
    }
    let rest = if k > 0 { br.read(k)? } else { 0 };
    Ok(base + rest)
}

/// Codes a DC delta and refreshes the running parameter.
pub(crate) fn encode_dc(bw: &mut BitWriter<'_>, delta: i32, k_dc: &mut u8) -> Result<()> {
    let abs = delta.unsigned_abs();
    encode_value(bw, abs, *k_dc)?;
    if abs != 0 {
        bw.write1((delta < 0) as u32)?;
    }
    *k_dc = kparam_dc(abs);
    Ok(())
}

pub(crate) fn decode_dc(br: &mut BitReader<'_>, k_dc: &mut u8) -> Result<i32> {
    let abs = decode_value(br, *k_dc)?;
    *k_dc = kparam_dc(abs);
    if abs == 0 {
        return Ok(0);
    }
    if abs > u16::MAX as u32 {
        return Err(Error::MalformedBitstream("dc delta out of range"));
    }
    let sign = br.read1()?;
    Ok(if sign == 1 { -(abs as i32) } else { abs as i32 })
}

/// Codes positions 1..63 of a block as zero runs and non-zero levels.
///
/// The parameter written back through `k_ac` is the one derived from the
/// block's first AC level; it seeds the next block of the same component.
pub(crate) fn encode_ac(bw: &mut BitWriter<'_>, coef: &[i16; BLK_D], k_ac: &mut u8) -> Result<()> {
    let mut run: u32 = 0;
    let mut k_run: u8 = 0;
    let mut k = *k_ac;
    let mut first_ac = true;
    for scan_pos in 1..BLK_D {
        let c = coef[SCAN[scan_pos] as usize];
        if c == 0 {
            run += 1;
            continue;
        }
        encode_value(bw, run, k_run)?;
        k_run = kparam_run(run);
        run = 0;

        let level = c.unsigned_abs() as u32;
        encode_value(bw, level - 1, k)?;
        k = kparam_ac(level);
        if first_ac {
            first_ac = false;
            *k_ac = k;
        }
        bw.write1((c < 0) as u32)?;
    }
    if run > 0 {
        // trailing zeros after the last level
        encode_value(bw, run, k_run)?;
    }
    Ok(())
}

pub(crate) fn decode_ac(br: &mut BitReader<'_>, coef: &mut [i16; BLK_D], k_ac: &mut u8) -> Result<()> {
    let mut scan_pos = 1usize;
    let mut k_run: u8 = 0;
    let mut k = *k_ac;
    let mut first_ac = true;
    loop {
        let run = decode_value(br, k_run)?;
        scan_pos += run as usize;
        if scan_pos >= BLK_D {
            if scan_pos == BLK_D {
                break;
            }
            return Err(Error::MalformedBitstream("coefficient run beyond block"));
        }
        k_run = kparam_run(run);

        let level = decode_value(br, k)?.wrapping_add(1);
        k = kparam_ac(level);
        if first_ac {
            first_ac = false;
            *k_ac = k;
        }

        let sign = br.read1()?;
        let value = if sign == 1 { -(level as i64) } else { level as i64 };
        if value < i16::MIN as i64 || value > i16::MAX as i64 {
            return Err(Error::MalformedBitstream("coefficient level out of range"));
        }
        coef[SCAN[scan_pos] as usize] = value as i16;
        scan_pos += 1;
        if scan_pos >= BLK_D {
            break;
        }
    }
    Ok(())
}

/// Codeword length of `val` under parameter `k`, in bits.
pub(crate) fn vlc_rate(val: u32, k: u8) -> u32 {
    if val < 100 && k < 5 {
        VLC_CODE[val as usize][k as usize].1 as u32
    } else {
        vlc_codeword(val, k as u32).1
    }
}

/// Rate-scaled cost of coding a level magnitude, including its sign bit.
pub(crate) fn level_cost(val: u32, k: u8, lambda: f64) -> f64 {
    let mut rate = vlc_rate(val, k);
    if val != 0 {
        rate += 1;
    }
    rate as f64 * lambda
}

/// Rate-scaled cost of coding a zero run.
pub(crate) fn run_cost(run: u32, k: u8, lambda: f64) -> f64 {
    vlc_rate(run, k) as f64 * lambda
}
