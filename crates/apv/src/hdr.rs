//! Frame, tile and access-unit header model.
//!
//! All multi-bit fields are big-endian within their bit positions and every
//! reserved field must read back as zero; anything else is malformed.

use crate::bs::{BitReader, BitWriter};
use crate::enums::{ChromaFormat, PbuType};
use crate::error::{Error, Result};
use crate::tbl::{BLK_D, MAX_AU_FRAMES, MAX_COMPS, MAX_TILE_COLS, MAX_TILE_ROWS, MB};

/// Rounds a picture dimension up to whole macroblocks.
pub(crate) fn mb_aligned(v: u32) -> u32 {
    v.div_ceil(MB as u32) * MB as u32
}

/// The per-frame signalling common to frame headers and AU info.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    pub profile_idc: u8,
    pub level_idc: u8,
    pub band_idc: u8,
    pub width: u32,
    pub height: u32,
    pub chroma_format: ChromaFormat,
    pub bit_depth: u8,
    pub capture_time_distance: u8,
}

impl FrameInfo {
    /// Serialized size in bytes.
    pub(crate) const SIZE: usize = 12;

    pub fn num_comps(&self) -> usize {
        self.chroma_format.num_comps()
    }

    pub(crate) fn write(&self, bw: &mut BitWriter<'_>) -> Result<()> {
        bw.write(self.profile_idc as u32, 8)?;
        bw.write(self.level_idc as u32, 8)?;
        bw.write(self.band_idc as u32, 3)?;
        bw.write(0, 5)?;
        bw.write(self.width, 24)?;
        bw.write(self.height, 24)?;
        bw.write(u8::from(self.chroma_format) as u32, 4)?;
        bw.write((self.bit_depth - 8) as u32, 4)?;
        bw.write(self.capture_time_distance as u32, 8)?;
        bw.write(0, 8)?;
        Ok(())
    }

    pub(crate) fn parse(br: &mut BitReader<'_>) -> Result<Self> {
        let profile_idc = br.read(8)? as u8;
        let level_idc = br.read(8)? as u8;
        let band_idc = br.read(3)? as u8;
        if br.read(5)? != 0 {
            return Err(Error::MalformedBitstream("frame info reserved bits"));
        }
        let width = br.read(24)?;
        let height = br.read(24)?;
        if width == 0 || height == 0 {
            return Err(Error::MalformedBitstream("zero frame dimension"));
        }
        let chroma_format = ChromaFormat::from(br.read(4)? as u8);
        if !chroma_format.is_valid() {
            return Err(Error::MalformedBitstream("reserved chroma format"));
        }
        let bit_depth_minus8 = br.read(4)? as u8;
        if !(2..=7).contains(&bit_depth_minus8) {
            return Err(Error::MalformedBitstream("bit depth out of range"));
        }
        let capture_time_distance = br.read(8)? as u8;
        if br.read(8)? != 0 {
            return Err(Error::MalformedBitstream("frame info reserved byte"));
        }
        if chroma_format == ChromaFormat::Yuv422 && width % 2 != 0 {
            return Err(Error::InvalidWidth);
        }
        Ok(Self {
            profile_idc,
            level_idc,
            band_idc,
            width,
            height,
            chroma_format,
            bit_depth: bit_depth_minus8 + 8,
            capture_time_distance,
        })
    }
}

/// Optional colour interpretation signalling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorDescription {
    pub primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,
    pub full_range: bool,
}

impl Default for ColorDescription {
    fn default() -> Self {
        // unspecified, limited range
        Self {
            primaries: 2,
            transfer_characteristics: 2,
            matrix_coefficients: 2,
            full_range: false,
        }
    }
}

/// The frame header preceding the tiles of one coded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameHeader {
    pub info: FrameInfo,
    pub color_description: Option<ColorDescription>,
    pub use_q_matrix: bool,
    /// Per-component quantization matrices in raster order; identity (16)
    /// when `use_q_matrix` is off.
    pub q_matrix: [[u8; BLK_D]; MAX_COMPS],
    pub tile_width_in_mbs: u32,
    pub tile_height_in_mbs: u32,
    pub tile_size_present_in_fh: bool,
    /// Byte size of each tile, present only with
    /// [`tile_size_present_in_fh`](Self::tile_size_present_in_fh).
    pub tile_sizes: Vec<u32>,
}

impl FrameHeader {
    pub(crate) fn new(info: FrameInfo, tile_width_in_mbs: u32, tile_height_in_mbs: u32) -> Self {
        Self {
            info,
            color_description: None,
            use_q_matrix: false,
            q_matrix: [[16; BLK_D]; MAX_COMPS],
            tile_width_in_mbs,
            tile_height_in_mbs,
            tile_size_present_in_fh: false,
            tile_sizes: Vec::new(),
        }
    }

    pub(crate) fn tile_grid(&self) -> (u32, u32) {
        let cols = mb_aligned(self.info.width).div_ceil(self.tile_width_in_mbs * MB as u32);
        let rows = mb_aligned(self.info.height).div_ceil(self.tile_height_in_mbs * MB as u32);
        (cols, rows)
    }

    pub(crate) fn write(&self, bw: &mut BitWriter<'_>) -> Result<()> {
        debug_assert!(bw.is_aligned());
        self.info.write(bw)?;
        bw.write(0, 8)?;
        bw.write1(self.color_description.is_some() as u32)?;
        if let Some(cd) = self.color_description {
            bw.write(cd.primaries as u32, 8)?;
            bw.write(cd.transfer_characteristics as u32, 8)?;
            bw.write(cd.matrix_coefficients as u32, 8)?;
            bw.write1(cd.full_range as u32)?;
        }
        bw.write1(self.use_q_matrix as u32)?;
        if self.use_q_matrix {
            for comp in 0..self.info.num_comps() {
                for &q in self.q_matrix[comp].iter() {
                    bw.write(q as u32, 8)?;
                }
            }
        }
        bw.write(self.tile_width_in_mbs, 20)?;
        bw.write(self.tile_height_in_mbs, 20)?;
        bw.write1(self.tile_size_present_in_fh as u32)?;
        if self.tile_size_present_in_fh {
            for &size in &self.tile_sizes {
                bw.write(size, 32)?;
            }
        }
        bw.write(0, 8)?;
        bw.align8()
    }

    pub(crate) fn parse(br: &mut BitReader<'_>) -> Result<Self> {
        let info = FrameInfo::parse(br)?;
        if br.read(8)? != 0 {
            return Err(Error::MalformedBitstream("frame header reserved byte"));
        }
        let color_description = if br.read1()? == 1 {
            Some(ColorDescription {
                primaries: br.read(8)? as u8,
                transfer_characteristics: br.read(8)? as u8,
                matrix_coefficients: br.read(8)? as u8,
                full_range: br.read1()? == 1,
            })
        } else {
            None
        };

        let use_q_matrix = br.read1()? == 1;
        let mut q_matrix = [[16u8; BLK_D]; MAX_COMPS];
        if use_q_matrix {
            for comp in 0..info.num_comps() {
                for i in 0..BLK_D {
                    let q = br.read(8)? as u8;
                    if q == 0 {
                        return Err(Error::MalformedBitstream("zero quantization matrix entry"));
                    }
                    q_matrix[comp][i] = q;
                }
            }
        }

        let tile_width_in_mbs = br.read(20)?;
        let tile_height_in_mbs = br.read(20)?;
        if tile_width_in_mbs == 0 || tile_height_in_mbs == 0 {
            return Err(Error::MalformedBitstream("zero tile dimension"));
        }
        let mut fh = Self {
            info,
            color_description,
            use_q_matrix,
            q_matrix,
            tile_width_in_mbs,
            tile_height_in_mbs,
            tile_size_present_in_fh: false,
            tile_sizes: Vec::new(),
        };
        let (cols, rows) = fh.tile_grid();
        if cols as usize > MAX_TILE_COLS || rows as usize > MAX_TILE_ROWS {
            return Err(Error::MalformedBitstream("tile grid too large"));
        }
        fh.tile_size_present_in_fh = br.read1()? == 1;
        if fh.tile_size_present_in_fh {
            for _ in 0..cols * rows {
                let size = br.read(32)?;
                if size == 0 {
                    return Err(Error::MalformedBitstream("zero tile size"));
                }
                fh.tile_sizes.push(size);
            }
        }
        if br.read(8)? != 0 {
            return Err(Error::MalformedBitstream("frame header reserved byte"));
        }
        br.align8();
        Ok(fh)
    }
}

/// The fixed-layout header at the start of every tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileHeader {
    pub tile_index: u16,
    pub data_sizes: [u32; MAX_COMPS],
    pub qps: [u8; MAX_COMPS],
}

impl TileHeader {
    pub(crate) fn size(num_comps: usize) -> usize {
        5 + 5 * num_comps
    }

    /// Byte offset of a component's data-size field, relative to the start
    /// of the tile header.
    pub(crate) fn data_size_offset(comp: usize) -> usize {
        4 + 4 * comp
    }

    pub(crate) fn new(tile_index: u16, qps: [u8; MAX_COMPS]) -> Self {
        // non-zero data sizes keep the dummy pre-encode header valid
        Self { tile_index, data_sizes: [1; MAX_COMPS], qps }
    }

    pub(crate) fn write(&self, bw: &mut BitWriter<'_>, num_comps: usize) -> Result<()> {
        debug_assert!(bw.is_aligned());
        bw.write(Self::size(num_comps) as u32, 16)?;
        bw.write(self.tile_index as u32, 16)?;
        for comp in 0..num_comps {
            bw.write(self.data_sizes[comp], 32)?;
        }
        for comp in 0..num_comps {
            bw.write(self.qps[comp] as u32, 8)?;
        }
        bw.write(0, 8)?;
        Ok(())
    }

    pub(crate) fn parse(br: &mut BitReader<'_>, num_comps: usize) -> Result<Self> {
        let header_size = br.read(16)? as usize;
        if header_size != Self::size(num_comps) {
            return Err(Error::MalformedBitstream("tile header size"));
        }
        let tile_index = br.read(16)? as u16;
        let mut th = Self { tile_index, data_sizes: [0; MAX_COMPS], qps: [0; MAX_COMPS] };
        for comp in 0..num_comps {
            th.data_sizes[comp] = br.read(32)?;
            if th.data_sizes[comp] == 0 {
                return Err(Error::MalformedBitstream("zero tile component size"));
            }
        }
        for comp in 0..num_comps {
            th.qps[comp] = br.read(8)? as u8;
        }
        if br.read(8)? != 0 {
            return Err(Error::MalformedBitstream("tile header reserved byte"));
        }
        br.align8();
        Ok(th)
    }
}

/// The four bytes following every PBU size field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PbuHeader {
    pub pbu_type: PbuType,
    pub group_id: u16,
}

impl PbuHeader {
    pub(crate) const SIZE: usize = 4;

    pub(crate) fn write(&self, bw: &mut BitWriter<'_>) -> Result<()> {
        bw.write(u8::from(self.pbu_type) as u32, 8)?;
        bw.write(self.group_id as u32, 16)?;
        bw.write(0, 8)?;
        Ok(())
    }

    pub(crate) fn parse(br: &mut BitReader<'_>) -> Result<Self> {
        let pbu_type = PbuType::from(br.read(8)? as u8);
        if !pbu_type.is_valid() {
            return Err(Error::MalformedBitstream("reserved pbu type"));
        }
        let group_id = br.read(16)? as u16;
        if group_id == u16::MAX {
            return Err(Error::MalformedBitstream("reserved group id"));
        }
        if br.read(8)? != 0 {
            return Err(Error::MalformedBitstream("pbu header reserved byte"));
        }
        Ok(Self { pbu_type, group_id })
    }
}

/// Per-frame entry of the access-unit information unit.
#[derive(Debug, Clone, PartialEq)]
pub struct AuFrameInfo {
    pub pbu_type: PbuType,
    pub group_id: u16,
    pub info: FrameInfo,
}

/// The access-unit information carried by the leading PBU of an AU.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuInfo {
    pub frames: Vec<AuFrameInfo>,
}

impl AuInfo {
    /// Payload size in bytes, excluding the PBU header.
    pub(crate) fn payload_size(num_frames: usize) -> usize {
        2 + num_frames * (4 + FrameInfo::SIZE) + 1
    }

    pub(crate) fn write(&self, bw: &mut BitWriter<'_>) -> Result<()> {
        bw.write(self.frames.len() as u32, 16)?;
        for frame in &self.frames {
            bw.write(u8::from(frame.pbu_type) as u32, 8)?;
            bw.write(frame.group_id as u32, 16)?;
            bw.write(0, 8)?;
            frame.info.write(bw)?;
        }
        bw.write(0, 8)?;
        bw.align8()
    }

    pub(crate) fn parse(br: &mut BitReader<'_>) -> Result<Self> {
        let num_frames = br.read(16)? as usize;
        if num_frames > MAX_AU_FRAMES {
            return Err(Error::ReachedMax("frames in access unit"));
        }
        let mut au = AuInfo::default();
        for _ in 0..num_frames {
            let pbu_type = PbuType::from(br.read(8)? as u8);
            let group_id = br.read(16)? as u16;
            if br.read(8)? != 0 {
                return Err(Error::MalformedBitstream("au info reserved byte"));
            }
            let info = FrameInfo::parse(br)?;
            au.frames.push(AuFrameInfo { pbu_type, group_id, info });
        }
        if br.read(8)? != 0 {
            return Err(Error::MalformedBitstream("au info reserved byte"));
        }
        br.align8();
        Ok(au)
    }
}

/// Reads a size field that must be positive.
pub(crate) fn read_size(br: &mut BitReader<'_>, what: &'static str) -> Result<u32> {
    let size = br.read(32)?;
    if size == 0 || size == u32::MAX {
        return Err(Error::MalformedBitstream(what));
    }
    Ok(size)
}

#[cfg(test)]
#[cfg_attr(all(test, coverage_nightly), coverage(off))]
mod tests {
    use super::*;

    fn frame_info() -> FrameInfo {
        FrameInfo {
            profile_idc: 33,
            level_idc: 30,
            band_idc: 2,
            width: 1920,
            height: 1080,
            chroma_format: ChromaFormat::Yuv422,
            bit_depth: 10,
            capture_time_distance: 0,
        }
    }

    fn round_trip_fh(fh: &FrameHeader) -> FrameHeader {
        let mut buf = vec![0u8; 4096];
        let written;
        {
            let mut bw = BitWriter::new(&mut buf);
            fh.write(&mut bw).unwrap();
            written = bw.finish().unwrap();
        }
        FrameHeader::parse(&mut BitReader::new(&buf[..written])).unwrap()
    }

    #[test]
    fn frame_info_round_trip() {
        let fi = frame_info();
        let mut buf = [0u8; 16];
        let written;
        {
            let mut bw = BitWriter::new(&mut buf);
            fi.write(&mut bw).unwrap();
            written = bw.finish().unwrap();
        }
        assert_eq!(written, FrameInfo::SIZE);
        let parsed = FrameInfo::parse(&mut BitReader::new(&buf[..written])).unwrap();
        assert_eq!(parsed, fi);
    }

    #[test]
    fn frame_info_rejects_reserved_bits() {
        let fi = frame_info();
        let mut buf = [0u8; 16];
        {
            let mut bw = BitWriter::new(&mut buf);
            fi.write(&mut bw).unwrap();
            bw.finish().unwrap();
        }
        // the five bits after band_idc must be zero
        buf[2] |= 0x10;
        assert!(matches!(
            FrameInfo::parse(&mut BitReader::new(&buf)),
            Err(Error::MalformedBitstream(_))
        ));
    }

    #[test]
    fn frame_info_rejects_reserved_chroma() {
        let mut fi = frame_info();
        fi.chroma_format = ChromaFormat::Reserved420;
        fi.width = 1920;
        let mut buf = [0u8; 16];
        {
            let mut bw = BitWriter::new(&mut buf);
            fi.write(&mut bw).unwrap();
            bw.finish().unwrap();
        }
        assert!(matches!(
            FrameInfo::parse(&mut BitReader::new(&buf)),
            Err(Error::MalformedBitstream(_))
        ));
    }

    #[test]
    fn frame_header_round_trip_plain() {
        let fh = FrameHeader::new(frame_info(), 16, 8);
        assert_eq!(round_trip_fh(&fh), fh);
    }

    #[test]
    fn frame_header_round_trip_with_options() {
        let mut fh = FrameHeader::new(frame_info(), 16, 8);
        fh.color_description = Some(ColorDescription {
            primaries: 9,
            transfer_characteristics: 16,
            matrix_coefficients: 9,
            full_range: true,
        });
        fh.use_q_matrix = true;
        for comp in 0..3 {
            for i in 0..BLK_D {
                fh.q_matrix[comp][i] = (16 + comp as u8 + (i % 32) as u8).max(1);
            }
        }
        fh.tile_size_present_in_fh = true;
        let (cols, rows) = fh.tile_grid();
        fh.tile_sizes = (1..=cols * rows).map(|i| i * 100).collect();
        assert_eq!((cols, rows), (8, 9));
        assert_eq!(round_trip_fh(&fh), fh);
    }

    #[test]
    fn tile_grid_for_full_hd() {
        let fh = FrameHeader::new(frame_info(), 16, 8);
        assert_eq!(fh.tile_grid(), (8, 9));
    }

    #[test]
    fn tile_header_round_trip() {
        let th = TileHeader {
            tile_index: 7,
            data_sizes: [100, 50, 51, 0],
            qps: [32, 33, 34, 0],
        };
        let mut buf = [0u8; 64];
        let written;
        {
            let mut bw = BitWriter::new(&mut buf);
            th.write(&mut bw, 3).unwrap();
            written = bw.finish().unwrap();
        }
        assert_eq!(written, TileHeader::size(3));
        let parsed = TileHeader::parse(&mut BitReader::new(&buf[..written]), 3).unwrap();
        assert_eq!(parsed.tile_index, 7);
        assert_eq!(&parsed.data_sizes[..3], &[100, 50, 51]);
        assert_eq!(&parsed.qps[..3], &[32, 33, 34]);
    }

    #[test]
    fn au_info_round_trip() {
        let au = AuInfo {
            frames: vec![
                AuFrameInfo {
                    pbu_type: PbuType::PrimaryFrame,
                    group_id: 1,
                    info: frame_info(),
                },
                AuFrameInfo {
                    pbu_type: PbuType::AlphaFrame,
                    group_id: 1,
                    info: frame_info(),
                },
            ],
        };
        let mut buf = vec![0u8; 256];
        let written;
        {
            let mut bw = BitWriter::new(&mut buf);
            au.write(&mut bw).unwrap();
            written = bw.finish().unwrap();
        }
        assert_eq!(written, AuInfo::payload_size(2));
        let parsed = AuInfo::parse(&mut BitReader::new(&buf[..written])).unwrap();
        assert_eq!(parsed, au);
    }

    #[test]
    fn pbu_header_rejects_reserved_types() {
        for ty in [0u8, 3, 24, 28, 64, 68, 200] {
            let buf = [ty, 0, 1, 0];
            assert!(
                PbuHeader::parse(&mut BitReader::new(&buf)).is_err(),
                "type {ty}"
            );
        }
        let buf = [1u8, 0, 1, 0];
        let h = PbuHeader::parse(&mut BitReader::new(&buf)).unwrap();
        assert_eq!(h.pbu_type, PbuType::PrimaryFrame);
        assert_eq!(h.group_id, 1);
    }
}
