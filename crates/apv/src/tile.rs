//! Per-tile encoding and decoding.
//!
//! A tile is coded component by component: each component's blocks form
//! one contiguous byte segment whose size lands in the tile header. DC
//! prediction and the entropy parameters are local to a component segment
//! and never cross tiles.

use crate::bs::{BitReader, BitWriter};
use crate::enums::ChromaFormat;
use crate::error::{Error, Result};
use crate::frame::{Picture, Plane};
use crate::hdr::{TileHeader, mb_aligned};
use crate::rdoq;
use crate::tbl::{self, BLK, BLK_D, MAX_COMPS, MB, SCAN, max_qp};
use crate::tq::{self, Kernels};
use crate::vlc;

/// The tile grid of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TileLayout {
    pub(crate) cols: u32,
    pub(crate) rows: u32,
    pub(crate) tile_w: u32,
    pub(crate) tile_h: u32,
    pub(crate) padded_w: u32,
    pub(crate) padded_h: u32,
}

/// A tile's rectangle in padded luma coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TileRect {
    pub(crate) x: u32,
    pub(crate) y: u32,
    pub(crate) w: u32,
    pub(crate) h: u32,
}

impl TileLayout {
    pub(crate) fn new(width: u32, height: u32, tile_w: u32, tile_h: u32) -> Self {
        let padded_w = mb_aligned(width);
        let padded_h = mb_aligned(height);
        Self {
            cols: padded_w.div_ceil(tile_w),
            rows: padded_h.div_ceil(tile_h),
            tile_w,
            tile_h,
            padded_w,
            padded_h,
        }
    }

    pub(crate) fn num_tiles(&self) -> usize {
        (self.cols * self.rows) as usize
    }

    pub(crate) fn rect(&self, index: usize) -> TileRect {
        let col = index as u32 % self.cols;
        let row = index as u32 / self.cols;
        let x = col * self.tile_w;
        let y = row * self.tile_h;
        TileRect {
            x,
            y,
            w: self.tile_w.min(self.padded_w - x),
            h: self.tile_h.min(self.padded_h - y),
        }
    }
}

/// Reconstructed samples of one tile, per component.
pub(crate) struct TileRecon {
    pub(crate) rect: TileRect,
    format: ChromaFormat,
    planes: Vec<Vec<u16>>,
}

impl TileRecon {
    pub(crate) fn new(format: ChromaFormat, rect: TileRect) -> Self {
        let planes = (0..format.num_comps())
            .map(|c| vec![0u16; ((rect.w >> format.shift_x(c)) * rect.h) as usize])
            .collect();
        Self { rect, format, planes }
    }

    pub(crate) fn stride(&self, comp: usize) -> usize {
        (self.rect.w >> self.format.shift_x(comp)) as usize
    }

    pub(crate) fn plane(&self, comp: usize) -> &[u16] {
        &self.planes[comp]
    }

    fn store_block(&mut self, comp: usize, x: usize, y: usize, samples: &[u16; BLK_D]) {
        let stride = self.stride(comp);
        for row in 0..BLK {
            let dst = &mut self.planes[comp][(y + row) * stride + x..];
            dst[..BLK].copy_from_slice(&samples[row * BLK..row * BLK + BLK]);
        }
    }
}

/// Frame-constant inputs of tile encoding.
pub(crate) struct EncTileParams<'a> {
    pub(crate) kernels: &'a Kernels,
    pub(crate) format: ChromaFormat,
    pub(crate) bit_depth: u8,
    pub(crate) qps: [u8; MAX_COMPS],
    pub(crate) enc_qmats: &'a [[i32; BLK_D]; MAX_COMPS],
    pub(crate) dec_qmats: &'a [[i16; BLK_D]; MAX_COMPS],
    pub(crate) use_rdoq: bool,
    pub(crate) lambda: f64,
    pub(crate) err_scales: &'a [[f64; BLK_D]; MAX_COMPS],
}

fn load_block(plane: &Plane, x0: usize, y0: usize, bias: i32, out: &mut [i16; BLK_D]) {
    let w = plane.width();
    let h = plane.height();
    for by in 0..BLK {
        let row = plane.row((y0 + by).min(h - 1));
        for bx in 0..BLK {
            // edge samples repeat into the padded area
            out[by * BLK + bx] = (row[(x0 + bx).min(w - 1)] as i32 - bias) as i16;
        }
    }
}

/// Dequantizes and inverse-transforms one block back to samples.
pub(crate) fn reconstruct_block(
    kernels: &Kernels,
    qcoef: &[i16; BLK_D],
    dqmat: &[i16; BLK_D],
    qp: u8,
    bit_depth: u8,
) -> [u16; BLK_D] {
    let bias = 1i32 << (bit_depth - 1);
    let max = (1i32 << bit_depth) - 1;
    if qcoef.iter().all(|&c| c == 0) {
        return [bias as u16; BLK_D];
    }
    let mut coef = *qcoef;
    (kernels.dequant)(&mut coef, dqmat, tq::dequant_shift(qp, bit_depth));

    let (s1, s2) = tq::inv_shifts(bit_depth);
    let last_nz = (0..BLK_D)
        .rev()
        .find(|&p| qcoef[SCAN[p] as usize] != 0)
        .unwrap_or(0);

    let mut resid = [0i16; BLK_D];
    if last_nz == 0 {
        // flat blocks take the plain inverse, no ripple to compensate
        (kernels.inv_tx)(&mut coef, s1, s2);
        resid = coef;
    } else {
        let mut pre = [0i32; BLK_D];
        (kernels.inv_tx_pre)(&coef, &mut pre, s1);
        let (step, shift) = tq::itx_adjust_params(qp);
        (kernels.itx_adjust)(&mut pre, &tbl::itrans_diff()[last_nz], step, shift);
        tq::itx_finish(&pre, &mut resid, s2);
    }
    std::array::from_fn(|i| (resid[i] as i32 + bias).clamp(0, max) as u16)
}

/// Encodes one tile into `out`, returning the bytes used (size field,
/// header and data). Reconstruction is produced on demand for recon
/// output and frame hashing.
pub(crate) fn encode_tile(
    pic: &Picture,
    rect: TileRect,
    tile_index: u16,
    p: &EncTileParams<'_>,
    out: &mut [u8],
    mut recon: Option<&mut TileRecon>,
) -> Result<usize> {
    let num_comps = p.format.num_comps();
    let bias = pic.mid_grey();
    let (f1, f2) = tq::fwd_shifts(p.bit_depth);
    let q_offset: [i64; MAX_COMPS] = std::array::from_fn(|c| {
        tq::quant_offset(tbl::QUANT_DEADZONE, tq::quant_shift(p.qps[c], p.bit_depth))
    });

    let mut bw = BitWriter::new(out);
    let size_slot = bw.reserve_u32()?;
    let mut th = TileHeader::new(tile_index, p.qps);
    th.write(&mut bw, num_comps)?;

    for comp in 0..num_comps {
        let shift_x = p.format.shift_x(comp);
        let plane = pic.plane(comp);
        let qp = p.qps[comp];
        let q_shift = tq::quant_shift(qp, p.bit_depth);
        let seg_start = bw.byte_pos();

        let mut prev_dc: i32 = 0;
        let mut k_dc: u8 = 0;
        let mut k_ac: u8 = 0;

        for mb_y in (0..rect.h).step_by(MB) {
            for mb_x in (0..rect.w).step_by(MB) {
                let cx = ((rect.x + mb_x) >> shift_x) as usize;
                let cy = (rect.y + mb_y) as usize;
                for by in (0..MB).step_by(BLK) {
                    for bx in (0..MB >> shift_x).step_by(BLK) {
                        let mut blk = [0i16; BLK_D];
                        load_block(plane, cx + bx, cy + by, bias, &mut blk);
                        (p.kernels.fwd_tx)(&mut blk, f1, f2);

                        let mut qblk = [0i16; BLK_D];
                        if p.use_rdoq {
                            rdoq::rdoq_block(
                                &blk,
                                &mut qblk,
                                &p.enc_qmats[comp],
                                &p.err_scales[comp],
                                q_shift,
                                p.lambda,
                                prev_dc,
                                k_dc,
                                k_ac,
                            );
                        } else {
                            qblk = blk;
                            (p.kernels.quant)(
                                &mut qblk,
                                &p.enc_qmats[comp],
                                q_shift,
                                q_offset[comp],
                            );
                        }

                        let dc = qblk[0] as i32;
                        vlc::encode_dc(&mut bw, dc - prev_dc, &mut k_dc)?;
                        prev_dc = dc;
                        vlc::encode_ac(&mut bw, &qblk, &mut k_ac)?;

                        if let Some(r) = recon.as_deref_mut() {
                            let samples = reconstruct_block(
                                p.kernels,
                                &qblk,
                                &p.dec_qmats[comp],
                                qp,
                                p.bit_depth,
                            );
                            r.store_block(
                                comp,
                                (mb_x >> shift_x) as usize + bx,
                                (mb_y as usize) + by,
                                &samples,
                            );
                        }
                    }
                }
            }
        }

        bw.align8()?;
        th.data_sizes[comp] = (bw.byte_pos() - seg_start) as u32;
    }

    let total = bw.byte_pos();
    bw.patch_u32(size_slot, (total - 4) as u32)?;
    for comp in 0..num_comps {
        bw.patch_u32(
            size_slot + 4 + TileHeader::data_size_offset(comp),
            th.data_sizes[comp],
        )?;
    }
    Ok(total)
}

/// Frame-constant inputs of tile decoding.
pub(crate) struct DecTileParams<'a> {
    pub(crate) kernels: &'a Kernels,
    pub(crate) format: ChromaFormat,
    pub(crate) bit_depth: u8,
    pub(crate) q_matrix: &'a [[u8; BLK_D]; MAX_COMPS],
}

/// Decodes one tile payload (header plus data, without the size field).
///
/// Returns the tile's index and its reconstructed samples.
pub(crate) fn decode_tile(
    payload: &[u8],
    layout: &TileLayout,
    p: &DecTileParams<'_>,
) -> Result<(u16, TileRecon)> {
    let num_comps = p.format.num_comps();
    let mut br = BitReader::new(payload);
    let th = TileHeader::parse(&mut br, num_comps)?;
    if (th.tile_index as usize) >= layout.num_tiles() {
        return Err(Error::MalformedBitstream("tile index out of range"));
    }
    let rect = layout.rect(th.tile_index as usize);
    let mut recon = TileRecon::new(p.format, rect);

    let mut offset = TileHeader::size(num_comps);
    for comp in 0..num_comps {
        let qp = th.qps[comp];
        if qp > max_qp(p.bit_depth) {
            return Err(Error::MalformedBitstream("tile qp out of range"));
        }
        let size = th.data_sizes[comp] as usize;
        if offset + size > payload.len() {
            return Err(Error::MalformedBitstream("tile component overruns tile"));
        }
        let segment = &payload[offset..offset + size];
        offset += size;

        let dqmat = tq::dec_qmat(qp, &p.q_matrix[comp]);
        decode_component(segment, comp, rect, qp, &dqmat, p, &mut recon)?;
    }
    Ok((th.tile_index, recon))
}

fn decode_component(
    segment: &[u8],
    comp: usize,
    rect: TileRect,
    qp: u8,
    dqmat: &[i16; BLK_D],
    p: &DecTileParams<'_>,
    recon: &mut TileRecon,
) -> Result<()> {
    let shift_x = p.format.shift_x(comp);
    let mut br = BitReader::new(segment);
    let mut prev_dc: i32 = 0;
    let mut k_dc: u8 = 0;
    let mut k_ac: u8 = 0;

    for mb_y in (0..rect.h).step_by(MB) {
        for mb_x in (0..rect.w).step_by(MB) {
            for by in (0..MB).step_by(BLK) {
                for bx in (0..MB >> shift_x).step_by(BLK) {
                    let mut qblk = [0i16; BLK_D];
                    let delta = vlc::decode_dc(&mut br, &mut k_dc)?;
                    let dc = prev_dc + delta;
                    if dc < i16::MIN as i32 || dc > i16::MAX as i32 {
                        return Err(Error::MalformedBitstream("dc out of range"));
                    }
                    prev_dc = dc;
                    qblk[0] = dc as i16;
                    vlc::decode_ac(&mut br, &mut qblk, &mut k_ac)?;

                    let samples =
                        reconstruct_block(p.kernels, &qblk, dqmat, qp, p.bit_depth);
                    recon.store_block(
                        comp,
                        (mb_x >> shift_x) as usize + bx,
                        (mb_y as usize) + by,
                        &samples,
                    );
                }
            }
        }
    }
    Ok(())
}
