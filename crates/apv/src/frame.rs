//! Planar picture buffers exchanged with the encoder and decoder.

use md5::{Digest, Md5};

use crate::enums::{ChromaFormat, PbuType};
use crate::error::{Error, Result};

/// One component plane of 16-bit samples, tightly packed.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    width: usize,
    height: usize,
    data: Vec<u16>,
}

impl Plane {
    fn new(width: usize, height: usize) -> Self {
        Self { width, height, data: vec![0; width * height] }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn row(&self, y: usize) -> &[u16] {
        &self.data[y * self.width..(y + 1) * self.width]
    }

    pub fn row_mut(&mut self, y: usize) -> &mut [u16] {
        &mut self.data[y * self.width..(y + 1) * self.width]
    }

    pub fn data(&self) -> &[u16] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u16] {
        &mut self.data
    }

    /// MD5 digest over the plane's samples in row-major order, each sample
    /// as two little-endian bytes.
    pub fn md5(&self) -> [u8; 16] {
        let mut hasher = Md5::new();
        for &s in &self.data {
            hasher.update(s.to_le_bytes());
        }
        hasher.finalize().into()
    }
}

/// A planar picture with its chroma format and sample depth.
#[derive(Debug, Clone, PartialEq)]
pub struct Picture {
    format: ChromaFormat,
    bit_depth: u8,
    width: u32,
    height: u32,
    planes: Vec<Plane>,
}

impl Picture {
    /// Allocates a zeroed picture.
    pub fn new(format: ChromaFormat, bit_depth: u8, width: u32, height: u32) -> Result<Self> {
        if !format.is_valid() {
            return Err(Error::UnsupportedColorspace);
        }
        if !(10..=15).contains(&bit_depth) {
            return Err(Error::UnsupportedColorspace);
        }
        if width == 0 || height == 0 || width >= (1 << 24) || height >= (1 << 24) {
            return Err(Error::InvalidArgument("picture dimensions"));
        }
        if format == ChromaFormat::Yuv422 && width % 2 != 0 {
            return Err(Error::InvalidWidth);
        }
        let planes = (0..format.num_comps())
            .map(|c| Plane::new((width >> format.shift_x(c)) as usize, height as usize))
            .collect();
        Ok(Self { format, bit_depth, width, height, planes })
    }

    pub fn format(&self) -> ChromaFormat {
        self.format
    }

    pub fn bit_depth(&self) -> u8 {
        self.bit_depth
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn num_comps(&self) -> usize {
        self.planes.len()
    }

    pub fn plane(&self, comp: usize) -> &Plane {
        &self.planes[comp]
    }

    pub fn plane_mut(&mut self, comp: usize) -> &mut Plane {
        &mut self.planes[comp]
    }

    /// The neutral sample value, subtracted before the transform.
    pub(crate) fn mid_grey(&self) -> i32 {
        1 << (self.bit_depth - 1)
    }

    /// Sets every sample of one component.
    pub fn fill(&mut self, comp: usize, value: u16) {
        self.planes[comp].data.fill(value);
    }
}

/// A picture together with its role inside an access unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub pbu_type: PbuType,
    pub group_id: u16,
    pub capture_time_distance: u8,
    pub pic: Picture,
}

impl Frame {
    /// Wraps a picture as the primary frame of its access unit.
    pub fn primary(pic: Picture) -> Self {
        Self {
            pbu_type: PbuType::PrimaryFrame,
            group_id: 1,
            capture_time_distance: 0,
            pic,
        }
    }
}
