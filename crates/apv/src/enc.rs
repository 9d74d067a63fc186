//! Encoder instance and access-unit composition.

use rayon::prelude::*;
use tracing::debug;

use crate::enums::PbuType;
use crate::error::{Error, Result};
use crate::frame::{Frame, Picture};
use crate::hdr::{AuFrameInfo, AuInfo, FrameHeader, FrameInfo, PbuHeader};
use crate::meta::MetadataContainer;
use crate::param::{EncoderParams, abr_base_qp, resolve_threads};
use crate::rdoq;
use crate::tbl::{BLK_D, MAX_AU_FRAMES, MAX_COMPS, MB, MIN_QP, max_qp};
use crate::tile::{self, EncTileParams, TileLayout, TileRecon};
use crate::tq::{self, CpuTier, Kernels};
use crate::bs::BitWriter;

/// Framing of the produced bitstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuFormat {
    /// Access units carry their total size up front.
    #[default]
    Raw,
    /// Bare PBU sequence without the access-unit size field.
    Bare,
}

/// Construction description for an [`Encoder`].
#[derive(Debug, Clone)]
pub struct EncoderDesc {
    /// Worker thread count; 0 resolves from the machine and tile grid.
    pub threads: usize,
    /// Per-frame parameters; frame `i` of every access unit uses entry `i`.
    pub params: Vec<EncoderParams>,
}

impl Default for EncoderDesc {
    fn default() -> Self {
        Self { threads: 0, params: vec![EncoderParams::default()] }
    }
}

/// Result of one encode call.
#[derive(Debug, Clone)]
pub struct EncodeStat {
    /// Bytes written into the bitstream buffer.
    pub written: usize,
    pub au_info: AuInfo,
    /// Byte size of each frame PBU including its size field.
    pub frame_sizes: Vec<usize>,
    /// Per-frame, per-component reconstruction digests when frame hashing
    /// is enabled.
    pub frame_hashes: Vec<Vec<[u8; 16]>>,
}

/// An APV encoder holding its worker pool and per-tile scratch buffers.
pub struct Encoder {
    pool: rayon::ThreadPool,
    params: Vec<EncoderParams>,
    layouts: Vec<TileLayout>,
    kernels: Kernels,
    qp_min: u8,
    qp_max: u8,
    use_frame_hash: bool,
    au_format: AuFormat,
    scratch: Vec<Vec<u8>>,
}

impl Encoder {
    /// Creates an encoder, resolving every auto parameter.
    pub fn new(desc: &EncoderDesc) -> Result<Self> {
        if desc.params.is_empty() {
            return Err(Error::InvalidArgument("no frame parameters"));
        }
        if desc.params.len() > MAX_AU_FRAMES {
            return Err(Error::ReachedMax("frames in access unit"));
        }
        let mut params = desc.params.clone();
        let mut layouts = Vec::with_capacity(params.len());
        let mut min_tiles = usize::MAX;
        for param in params.iter_mut() {
            param.resolve()?;
            let layout =
                TileLayout::new(param.width, param.height, param.tile_width, param.tile_height);
            min_tiles = min_tiles.min(layout.num_tiles());
            layouts.push(layout);
        }
        let threads = resolve_threads(desc.threads, min_tiles);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|_| Error::FailedSyscall)?;
        debug!(threads, frames = params.len(), "encoder created");
        Ok(Self {
            pool,
            params,
            layouts,
            kernels: Kernels::select(CpuTier::detect()),
            qp_min: MIN_QP,
            qp_max: max_qp(12),
            use_frame_hash: false,
            au_format: AuFormat::default(),
            scratch: Vec::new(),
        })
    }

    fn check_frame(&self, index: usize, frame: &Frame) -> Result<()> {
        let param = &self.params[index];
        if !frame.pbu_type.is_frame() {
            return Err(Error::InvalidArgument("pbu type is not a frame"));
        }
        if frame.group_id == u16::MAX {
            return Err(Error::InvalidArgument("reserved group id"));
        }
        let pic = &frame.pic;
        if pic.width() != param.width || pic.height() != param.height {
            return Err(Error::InvalidArgument("picture does not match parameters"));
        }
        let format = param.profile.chroma_format().ok_or(Error::Unsupported("profile"))?;
        let bit_depth = param.profile.bit_depth().ok_or(Error::Unsupported("profile"))?;
        if pic.format() != format || pic.bit_depth() != bit_depth {
            return Err(Error::UnsupportedColorspace);
        }
        Ok(())
    }

    fn frame_qp(&self, param: &EncoderParams, bit_depth: u8) -> u8 {
        let qp = param.qp.unwrap_or_else(|| {
            abr_base_qp(
                param.bitrate_kbps,
                param.width,
                param.height,
                param.fps_num,
                param.fps_den,
                bit_depth,
            )
        });
        qp.clamp(self.qp_min, self.qp_max.min(max_qp(bit_depth)))
    }

    fn frame_info(&self, index: usize, frame: &Frame) -> FrameInfo {
        let param = &self.params[index];
        FrameInfo {
            profile_idc: param.profile.into(),
            level_idc: param.level_idc.unwrap_or_default(),
            band_idc: param.band_idc,
            width: param.width,
            height: param.height,
            chroma_format: frame.pic.format(),
            bit_depth: frame.pic.bit_depth(),
            capture_time_distance: frame.capture_time_distance,
        }
    }

    /// Encodes one access unit into `out`.
    ///
    /// `metadata` groups become metadata PBUs; `recon` receives the
    /// reconstructed frames when provided. The call is synchronous; tiles
    /// are coded on the instance's worker pool.
    pub fn encode(
        &mut self,
        frames: &[Frame],
        metadata: Option<&MetadataContainer>,
        out: &mut [u8],
        mut recon: Option<&mut Vec<Frame>>,
    ) -> Result<EncodeStat> {
        if frames.is_empty() {
            return Err(Error::InvalidArgument("no frames"));
        }
        if frames.len() > self.params.len() {
            return Err(Error::InvalidArgument("more frames than parameter sets"));
        }
        for (i, frame) in frames.iter().enumerate() {
            self.check_frame(i, frame)?;
        }

        let au_info = AuInfo {
            frames: frames
                .iter()
                .enumerate()
                .map(|(i, f)| AuFrameInfo {
                    pbu_type: f.pbu_type,
                    group_id: f.group_id,
                    info: self.frame_info(i, f),
                })
                .collect(),
        };

        let mut bw = BitWriter::new(out);
        let au_size_slot = match self.au_format {
            AuFormat::Raw => Some(bw.reserve_u32()?),
            AuFormat::Bare => None,
        };

        // access-unit information leads the unit
        let aui_payload = AuInfo::payload_size(frames.len());
        bw.write((PbuHeader::SIZE + aui_payload) as u32, 32)?;
        PbuHeader { pbu_type: PbuType::AuInfo, group_id: 0 }.write(&mut bw)?;
        au_info.write(&mut bw)?;

        let mut frame_sizes = Vec::with_capacity(frames.len());
        let mut frame_hashes = Vec::new();
        for (i, frame) in frames.iter().enumerate() {
            let start = bw.byte_pos();
            let recon_pic = self.encode_frame(&mut bw, i, frame, recon.is_some())?;
            frame_sizes.push(bw.byte_pos() - start);

            if let Some(pic) = recon_pic {
                if self.use_frame_hash {
                    frame_hashes
                        .push((0..pic.num_comps()).map(|c| pic.plane(c).md5()).collect());
                }
                if let Some(recon_out) = recon.as_deref_mut() {
                    recon_out.push(Frame {
                        pbu_type: frame.pbu_type,
                        group_id: frame.group_id,
                        capture_time_distance: frame.capture_time_distance,
                        pic,
                    });
                }
            }
        }

        if let Some(md) = metadata {
            for group_id in md.group_ids() {
                let payload = md.group_payload_size(group_id);
                bw.write((PbuHeader::SIZE + payload) as u32, 32)?;
                PbuHeader { pbu_type: PbuType::Metadata, group_id }.write(&mut bw)?;
                md.write_group(&mut bw, group_id)?;
            }
        }

        self.write_filler(&mut bw, frames.len())?;

        let total = bw.byte_pos();
        if let Some(slot) = au_size_slot {
            bw.patch_u32(slot, (total - 4) as u32)?;
        }
        bw.flush()?;
        debug!(written = total, frames = frames.len(), "access unit encoded");

        Ok(EncodeStat { written: total, au_info, frame_sizes, frame_hashes })
    }

    fn encode_frame(
        &mut self,
        bw: &mut BitWriter<'_>,
        index: usize,
        frame: &Frame,
        want_recon: bool,
    ) -> Result<Option<Picture>> {
        let param = self.params[index].clone();
        let layout = self.layouts[index];
        let pic = &frame.pic;
        let bit_depth = pic.bit_depth();
        let format = pic.format();
        let num_tiles = layout.num_tiles();

        let frame_qp = self.frame_qp(&param, bit_depth);
        let qps = param.comp_qps(frame_qp, bit_depth);
        let q_matrix = param.q_matrix.unwrap_or([[16u8; BLK_D]; MAX_COMPS]);
        let enc_qmats: [[i32; BLK_D]; MAX_COMPS] =
            std::array::from_fn(|c| tq::enc_qmat(qps[c], &q_matrix[c]));
        let dec_qmats: [[i16; BLK_D]; MAX_COMPS] =
            std::array::from_fn(|c| tq::dec_qmat(qps[c], &q_matrix[c]));
        let err_scales: [[f64; BLK_D]; MAX_COMPS] =
            std::array::from_fn(|c| rdoq::err_scale_table(&enc_qmats[c], bit_depth));

        let ep = EncTileParams {
            kernels: &self.kernels,
            format,
            bit_depth,
            qps,
            enc_qmats: &enc_qmats,
            dec_qmats: &dec_qmats,
            use_rdoq: param.preset.use_rdoq(),
            lambda: rdoq::lambda_for_qp(frame_qp),
            err_scales: &err_scales,
        };

        // disjoint scratch regions bound the worst-case tile payload
        let region_size = tile_region_bound(&layout, format, bit_depth);
        if self.scratch.len() < num_tiles {
            self.scratch.resize_with(num_tiles, Vec::new);
        }
        for region in self.scratch[..num_tiles].iter_mut() {
            if region.len() < region_size {
                region.resize(region_size, 0);
            }
        }

        let need_recon = want_recon || self.use_frame_hash;
        let scratch = &mut self.scratch[..num_tiles];
        let results: Result<Vec<(usize, Option<TileRecon>)>> = self.pool.install(|| {
            scratch
                .par_iter_mut()
                .enumerate()
                .map(|(tile_index, region)| {
                    let rect = layout.rect(tile_index);
                    let mut tile_recon = need_recon.then(|| TileRecon::new(format, rect));
                    let used = tile::encode_tile(
                        pic,
                        rect,
                        tile_index as u16,
                        &ep,
                        region,
                        tile_recon.as_mut(),
                    )?;
                    Ok((used, tile_recon))
                })
                .collect()
        });
        let results = results?;

        let pbu_slot = bw.reserve_u32()?;
        PbuHeader { pbu_type: frame.pbu_type, group_id: frame.group_id }.write(bw)?;

        let mut fh =
            FrameHeader::new(self.frame_info(index, frame), param.tile_width / MB as u32, param.tile_height / MB as u32);
        fh.color_description = param.color_description;
        if param.q_matrix.is_some() {
            fh.use_q_matrix = true;
            fh.q_matrix = q_matrix;
        }
        if param.tile_size_in_fh {
            fh.tile_size_present_in_fh = true;
            fh.tile_sizes = results.iter().map(|(used, _)| (*used - 4) as u32).collect();
        }
        fh.write(bw)?;

        // emission stays in tile-index order regardless of completion order
        let mut recon_pic = if need_recon {
            Some(Picture::new(format, bit_depth, pic.width(), pic.height())?)
        } else {
            None
        };
        for (tile_index, (used, tile_recon)) in results.into_iter().enumerate() {
            bw.write_bytes(&self.scratch[tile_index][..used])?;
            if let (Some(out_pic), Some(tr)) = (recon_pic.as_mut(), tile_recon) {
                blit_tile(out_pic, &tr);
            }
        }

        let pbu_size = bw.byte_pos() - (pbu_slot + 4);
        bw.patch_u32(pbu_slot, pbu_size as u32)?;
        Ok(recon_pic)
    }

    fn write_filler(&self, bw: &mut BitWriter<'_>, num_frames: usize) -> Result<()> {
        let param = &self.params[0];
        if !param.use_filler || param.bitrate_kbps == 0 {
            return Ok(());
        }
        let per_frame = param.bitrate_kbps as u64 * 125 * param.fps_den as u64 / param.fps_num as u64;
        let target = per_frame as usize * num_frames;
        let written = bw.byte_pos();
        if written + 8 >= target {
            return Ok(());
        }
        let filler = target - written - 8;
        bw.write((PbuHeader::SIZE + filler) as u32, 32)?;
        PbuHeader { pbu_type: PbuType::Filler, group_id: 0 }.write(bw)?;
        for _ in 0..filler {
            bw.write(0xFF, 8)?;
        }
        Ok(())
    }

    /// Sets a fixed QP for every frame.
    pub fn set_qp(&mut self, qp: u8) -> Result<()> {
        if qp > max_qp(12) {
            return Err(Error::InvalidArgument("qp"));
        }
        for param in self.params.iter_mut() {
            param.qp = Some(qp);
        }
        Ok(())
    }

    /// QP of the primary frame parameters.
    pub fn qp(&self) -> Option<u8> {
        self.params[0].qp
    }

    /// Retargets the bitrate, rechecking the level caps.
    pub fn set_bitrate(&mut self, kbps: u32) -> Result<()> {
        let mut updated = self.params.clone();
        for param in updated.iter_mut() {
            param.bitrate_kbps = kbps;
            param.qp = None;
            param.resolve()?;
        }
        self.params = updated;
        Ok(())
    }

    pub fn bitrate(&self) -> u32 {
        self.params[0].bitrate_kbps
    }

    /// Changes the frame rate, rechecking the level selection.
    pub fn set_fps(&mut self, num: u32, den: u32) -> Result<()> {
        let mut updated = self.params.clone();
        for param in updated.iter_mut() {
            param.fps_num = num;
            param.fps_den = den;
            param.resolve()?;
        }
        self.params = updated;
        Ok(())
    }

    pub fn fps(&self) -> (u32, u32) {
        (self.params[0].fps_num, self.params[0].fps_den)
    }

    pub fn set_qp_range(&mut self, min: u8, max: u8) -> Result<()> {
        if min > max || max > max_qp(12) {
            return Err(Error::InvalidArgument("qp range"));
        }
        self.qp_min = min;
        self.qp_max = max;
        Ok(())
    }

    pub fn qp_range(&self) -> (u8, u8) {
        (self.qp_min, self.qp_max)
    }

    /// Enables reconstruction digests in [`EncodeStat::frame_hashes`].
    pub fn set_use_frame_hash(&mut self, enable: bool) {
        self.use_frame_hash = enable;
    }

    pub fn use_frame_hash(&self) -> bool {
        self.use_frame_hash
    }

    pub fn set_au_format(&mut self, format: AuFormat) {
        self.au_format = format;
    }

    pub fn au_format(&self) -> AuFormat {
        self.au_format
    }

    pub fn width(&self) -> u32 {
        self.params[0].width
    }

    pub fn height(&self) -> u32 {
        self.params[0].height
    }
}

/// Upper bound in bytes for one tile's coded payload.
fn tile_region_bound(layout: &TileLayout, format: crate::enums::ChromaFormat, bit_depth: u8) -> usize {
    let mut samples = 0usize;
    for comp in 0..format.num_comps() {
        samples += ((layout.tile_w >> format.shift_x(comp)) * layout.tile_h) as usize;
    }
    // a saturated level costs up to 33 bits, plus run, sign and header slack
    samples * (bit_depth as usize + 42) / 8 + 1024
}

/// Copies a tile's reconstruction into the picture, clipping the padded
/// area.
pub(crate) fn blit_tile(pic: &mut Picture, tile: &TileRecon) {
    for comp in 0..pic.num_comps() {
        let shift_x = pic.format().shift_x(comp);
        let stride = tile.stride(comp);
        let src = tile.plane(comp);
        let plane = pic.plane_mut(comp);
        let x0 = (tile.rect.x >> shift_x) as usize;
        let copy_w = stride.min(plane.width().saturating_sub(x0));
        if copy_w == 0 {
            continue;
        }
        let y0 = tile.rect.y as usize;
        let rows = (tile.rect.h as usize).min(plane.height().saturating_sub(y0));
        for row in 0..rows {
            let dst = &mut plane.row_mut(y0 + row)[x0..x0 + copy_w];
            dst.copy_from_slice(&src[row * stride..row * stride + copy_w]);
        }
    }
}
