//! Decoder instance and access-unit parsing.

use rayon::prelude::*;
use tracing::{debug, trace};

use crate::bs::BitReader;
use crate::enc::blit_tile;
use crate::enums::PbuType;
use crate::error::{Error, Result};
use crate::frame::{Frame, Picture};
use crate::hdr::{AuInfo, FrameHeader, PbuHeader, read_size};
use crate::meta::MetadataContainer;
use crate::param::resolve_threads;
use crate::tbl::MB;
use crate::tile::{self, DecTileParams, TileLayout};
use crate::tq::{CpuTier, Kernels};

/// Construction description for a [`Decoder`].
#[derive(Debug, Clone, Default)]
pub struct DecoderDesc {
    /// Worker thread count; 0 resolves from the machine.
    pub threads: usize,
}

/// Result of one decode call.
#[derive(Debug, Clone)]
pub struct DecodeStat {
    /// Bytes consumed from the bitstream.
    pub read: usize,
    pub au_info: AuInfo,
    /// Byte size of each frame PBU including its size field.
    pub frame_sizes: Vec<usize>,
    /// Per-frame, per-component output digests when frame hashing is
    /// enabled.
    pub frame_hashes: Vec<Vec<[u8; 16]>>,
}

/// An APV decoder holding its worker pool.
pub struct Decoder {
    pool: rayon::ThreadPool,
    kernels: Kernels,
    use_frame_hash: bool,
}

impl Decoder {
    pub fn new(desc: &DecoderDesc) -> Result<Self> {
        let threads = resolve_threads(desc.threads, usize::MAX);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|_| Error::FailedSyscall)?;
        debug!(threads, "decoder created");
        Ok(Self {
            pool,
            kernels: Kernels::select(CpuTier::detect()),
            use_frame_hash: false,
        })
    }

    /// Enables output digests in [`DecodeStat::frame_hashes`].
    pub fn set_use_frame_hash(&mut self, enable: bool) {
        self.use_frame_hash = enable;
    }

    pub fn use_frame_hash(&self) -> bool {
        self.use_frame_hash
    }

    /// Decodes one access unit.
    ///
    /// Metadata PBUs are delivered into `metadata` when a container is
    /// provided and skipped otherwise. A malformed unit aborts the call;
    /// the instance stays reusable.
    pub fn decode(
        &mut self,
        bitstream: &[u8],
        mut metadata: Option<&mut MetadataContainer>,
    ) -> Result<(Vec<Frame>, DecodeStat)> {
        let mut br = BitReader::new(bitstream);
        let au_size = read_size(&mut br, "au size")? as usize;
        if 4 + au_size > bitstream.len() {
            return Err(Error::MalformedBitstream("access unit truncated"));
        }
        let au_end = 4 + au_size;

        let mut frames = Vec::new();
        let mut frame_sizes = Vec::new();
        let mut frame_hashes = Vec::new();
        let mut au_info: Option<AuInfo> = None;

        while br.byte_pos() < au_end {
            let pbu_size = read_size(&mut br, "pbu size")? as usize;
            if br.byte_pos() + pbu_size > au_end {
                return Err(Error::MalformedBitstream("pbu overruns access unit"));
            }
            let unit = br.peek_bytes(pbu_size)?;
            br.skip_bytes(pbu_size)?;

            let mut pr = BitReader::new(unit);
            let header = PbuHeader::parse(&mut pr)?;
            trace!(pbu_type = u8::from(header.pbu_type), pbu_size, "pbu");

            if header.pbu_type.is_frame() {
                let frame = self.decode_frame(&unit[PbuHeader::SIZE..], header)?;
                if self.use_frame_hash {
                    frame_hashes.push(
                        (0..frame.pic.num_comps())
                            .map(|c| frame.pic.plane(c).md5())
                            .collect(),
                    );
                }
                frame_sizes.push(4 + pbu_size);
                frames.push(frame);
            } else if header.pbu_type == PbuType::AuInfo {
                au_info = Some(AuInfo::parse(&mut pr)?);
            } else if header.pbu_type == PbuType::Metadata {
                if let Some(md) = metadata.as_deref_mut() {
                    md.parse_group(&mut pr, pbu_size as u32, header.group_id)?;
                }
            } else {
                // filler
                for _ in 0..pbu_size - PbuHeader::SIZE {
                    if pr.read(8)? != 0xFF {
                        return Err(Error::MalformedBitstream("filler byte"));
                    }
                }
            }
        }

        let read = br.byte_pos();
        debug!(read, frames = frames.len(), "access unit decoded");
        let stat = DecodeStat {
            read,
            au_info: au_info.unwrap_or_default(),
            frame_sizes,
            frame_hashes,
        };
        Ok((frames, stat))
    }

    fn decode_frame(&self, payload: &[u8], header: PbuHeader) -> Result<Frame> {
        let mut br = BitReader::new(payload);
        let fh = FrameHeader::parse(&mut br)?;
        let info = &fh.info;
        let layout = TileLayout::new(
            info.width,
            info.height,
            fh.tile_width_in_mbs * MB as u32,
            fh.tile_height_in_mbs * MB as u32,
        );
        let num_tiles = layout.num_tiles();

        let mut tiles = Vec::with_capacity(num_tiles);
        for i in 0..num_tiles {
            let tile_size = read_size(&mut br, "tile size")? as usize;
            if fh.tile_size_present_in_fh && fh.tile_sizes[i] as usize != tile_size {
                return Err(Error::MalformedBitstream("tile size table mismatch"));
            }
            let tile_payload = br.peek_bytes(tile_size)?;
            br.skip_bytes(tile_size)?;
            tiles.push(tile_payload);
        }

        let dp = DecTileParams {
            kernels: &self.kernels,
            format: info.chroma_format,
            bit_depth: info.bit_depth,
            q_matrix: &fh.q_matrix,
        };
        let recons: Result<Vec<_>> = self.pool.install(|| {
            tiles
                .par_iter()
                .map(|tile_payload| tile::decode_tile(tile_payload, &layout, &dp))
                .collect()
        });

        let mut pic = Picture::new(info.chroma_format, info.bit_depth, info.width, info.height)?;
        let mut seen = vec![false; num_tiles];
        for (index, recon) in recons? {
            if seen[index as usize] {
                return Err(Error::MalformedBitstream("duplicate tile index"));
            }
            seen[index as usize] = true;
            blit_tile(&mut pic, &recon);
        }

        Ok(Frame {
            pbu_type: header.pbu_type,
            group_id: header.group_id,
            capture_time_distance: info.capture_time_distance,
            pic,
        })
    }
}

/// Reads the frame inventory of an access unit without decoding tiles.
///
/// Prefers the AU-info unit; falls back to scanning frame headers.
pub fn probe_au_info(bitstream: &[u8]) -> Result<AuInfo> {
    let mut br = BitReader::new(bitstream);
    let au_size = read_size(&mut br, "au size")? as usize;
    if 4 + au_size > bitstream.len() {
        return Err(Error::MalformedBitstream("access unit truncated"));
    }
    let au_end = 4 + au_size;

    let mut fallback = AuInfo::default();
    while br.byte_pos() < au_end {
        let pbu_size = read_size(&mut br, "pbu size")? as usize;
        if br.byte_pos() + pbu_size > au_end {
            return Err(Error::MalformedBitstream("pbu overruns access unit"));
        }
        let unit = br.peek_bytes(pbu_size)?;
        br.skip_bytes(pbu_size)?;

        let mut pr = BitReader::new(unit);
        let header = PbuHeader::parse(&mut pr)?;
        if header.pbu_type == PbuType::AuInfo {
            return AuInfo::parse(&mut pr);
        }
        if header.pbu_type.is_frame() {
            let fh = FrameHeader::parse(&mut pr)?;
            fallback.frames.push(crate::hdr::AuFrameInfo {
                pbu_type: header.pbu_type,
                group_id: header.group_id,
                info: fh.info,
            });
        }
    }
    if fallback.frames.is_empty() {
        return Err(Error::MalformedBitstream("no frames in access unit"));
    }
    Ok(fallback)
}
