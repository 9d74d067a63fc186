//! Encoding parameters and their validation.
//!
//! Auto values (level, qp, bitrate, threads) resolve when an encoder is
//! created; explicit values are checked against the level and band tables.

use crate::enums::Profile;
use crate::error::{Error, Result};
use crate::hdr::{ColorDescription, mb_aligned};
use crate::tbl::{
    BLK_D, MAX_COMPS, MAX_THREADS, MAX_TILE_COLS, MAX_TILE_ROWS, MB, MIN_QP, MIN_TILE_H,
    MIN_TILE_W, max_qp,
};

/// Trade-off between encoding speed and compression efficiency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Preset {
    Fastest,
    Fast,
    #[default]
    Medium,
    Slow,
    Placebo,
}

impl Preset {
    /// Whether rate-distortion optimised quantization runs at this preset.
    pub(crate) fn use_rdoq(self) -> bool {
        self >= Preset::Medium
    }
}

/// Per-frame encoding parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderParams {
    pub profile: Profile,
    /// Coded level; `None` selects the smallest level covering the
    /// configured sample rate and bitrate.
    pub level_idc: Option<u8>,
    /// Data-rate band within the level, 0..=3.
    pub band_idc: u8,
    pub width: u32,
    pub height: u32,
    pub fps_num: u32,
    pub fps_den: u32,
    /// Fixed quantization parameter; `None` derives one from the bitrate.
    pub qp: Option<u8>,
    /// Added to the frame QP per component; component 0 stays at the
    /// frame QP.
    pub qp_offsets: [i8; MAX_COMPS],
    /// Target bitrate in kbit/s; 0 defers to the level cap.
    pub bitrate_kbps: u32,
    /// Pad the access unit with filler to hold the target bitrate.
    pub use_filler: bool,
    /// Custom quantization matrices in raster order, one per component.
    pub q_matrix: Option<[[u8; BLK_D]; MAX_COMPS]>,
    /// Tile width in luma samples, a multiple of the macroblock width.
    pub tile_width: u32,
    /// Tile height in luma samples, a multiple of the macroblock height.
    pub tile_height: u32,
    pub preset: Preset,
    pub color_description: Option<ColorDescription>,
    /// Write the tile-size table into the frame header for random access.
    pub tile_size_in_fh: bool,
}

impl Default for EncoderParams {
    fn default() -> Self {
        Self {
            profile: Profile::Yuv422_10,
            level_idc: None,
            band_idc: 2,
            width: 0,
            height: 0,
            fps_num: 60,
            fps_den: 1,
            qp: None,
            qp_offsets: [0; MAX_COMPS],
            bitrate_kbps: 0,
            use_filler: false,
            q_matrix: None,
            tile_width: 16 * MB as u32,
            tile_height: 16 * MB as u32,
            preset: Preset::default(),
            color_description: None,
            tile_size_in_fh: false,
        }
    }
}

const NUM_LEVELS: usize = 14;
const NUM_BANDS: usize = 4;

/// Available levels as `level_idc` values (level times 30).
const LEVEL_IDC: [u8; NUM_LEVELS] = [30, 33, 60, 63, 90, 93, 120, 123, 150, 153, 180, 183, 210, 213];

/// Maximum coded data rate in kbit/s per level and band.
const MAX_CODED_DATA_RATE: [[u32; NUM_BANDS]; NUM_LEVELS] = [
    [7_000, 11_000, 14_000, 21_000],
    [14_000, 21_000, 28_000, 42_000],
    [36_000, 53_000, 71_000, 106_000],
    [71_000, 106_000, 141_000, 212_000],
    [101_000, 151_000, 201_000, 301_000],
    [201_000, 301_000, 401_000, 602_000],
    [401_000, 602_000, 780_000, 1_170_000],
    [780_000, 1_170_000, 1_560_000, 2_340_000],
    [1_560_000, 2_340_000, 3_324_000, 4_986_000],
    [3_324_000, 4_986_000, 6_648_000, 9_972_000],
    [6_648_000, 9_972_000, 13_296_000, 19_944_000],
    [13_296_000, 19_944_000, 26_592_000, 39_888_000],
    [26_592_000, 39_888_000, 53_184_000, 79_776_000],
    [53_184_000, 79_776_000, 106_368_000, 159_552_000],
];

/// Maximum luma samples per second per level.
const MAX_LUMA_SAMPLE_RATE: [u64; NUM_LEVELS] = [
    3_041_280,
    6_082_560,
    15_667_200,
    31_334_400,
    66_846_720,
    133_693_440,
    265_420_800,
    530_841_600,
    1_061_683_200,
    2_123_366_400,
    4_777_574_400,
    8_493_465_600,
    16_986_931_200,
    33_973_862_400,
];

fn level_index(level_idc: u8) -> Result<usize> {
    LEVEL_IDC
        .iter()
        .position(|&idc| idc == level_idc)
        .ok_or(Error::InvalidLevel)
}

impl EncoderParams {
    /// Basic field validation shared by all resolution steps.
    fn check(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 || self.width >= (1 << 24) || self.height >= (1 << 24)
        {
            return Err(Error::InvalidArgument("frame dimensions"));
        }
        if self.fps_num == 0 || self.fps_den == 0 {
            return Err(Error::InvalidArgument("frame rate"));
        }
        if self.band_idc > 3 {
            return Err(Error::InvalidArgument("band"));
        }
        let format = self.profile.chroma_format().ok_or(Error::Unsupported("profile"))?;
        if format == crate::enums::ChromaFormat::Yuv422 && self.width % 2 != 0 {
            return Err(Error::InvalidWidth);
        }
        let bit_depth = self.profile.bit_depth().ok_or(Error::Unsupported("profile"))?;
        if let Some(qp) = self.qp {
            if qp < MIN_QP || qp > max_qp(bit_depth) {
                return Err(Error::InvalidArgument("qp"));
            }
        }
        if let Some(q_matrix) = &self.q_matrix {
            for comp in q_matrix.iter() {
                if comp.iter().any(|&q| q == 0) {
                    return Err(Error::InvalidArgument("quantization matrix entry"));
                }
            }
        }
        Ok(())
    }

    /// Shrinks oversized tile grids and validates the tile geometry.
    fn update_tile(&mut self) -> Result<(u32, u32)> {
        if self.tile_width < MIN_TILE_W || self.tile_height < MIN_TILE_H {
            return Err(Error::InvalidArgument("tile size below minimum"));
        }
        if self.tile_width % MB as u32 != 0 || self.tile_height % MB as u32 != 0 {
            return Err(Error::InvalidArgument("tile size not macroblock aligned"));
        }
        let pic_w = mb_aligned(self.width);
        let pic_h = mb_aligned(self.height);

        if pic_w.div_ceil(self.tile_width) > MAX_TILE_COLS as u32 {
            let w = pic_w.div_ceil(MAX_TILE_COLS as u32);
            self.tile_width = w.div_ceil(MB as u32) * MB as u32;
        }
        if pic_h.div_ceil(self.tile_height) > MAX_TILE_ROWS as u32 {
            let h = pic_h.div_ceil(MAX_TILE_ROWS as u32);
            self.tile_height = h.div_ceil(MB as u32) * MB as u32;
        }
        Ok((pic_w.div_ceil(self.tile_width), pic_h.div_ceil(self.tile_height)))
    }

    /// Picks or validates the level against sample rate and bitrate.
    fn update_level(&mut self) -> Result<()> {
        let w = mb_aligned(self.width) as u64;
        let h = mb_aligned(self.height) as u64;
        let luma_sample_rate = w * h * self.fps_num as u64 / self.fps_den as u64;

        let mut min_idx = NUM_LEVELS - 1;
        for (i, &cap) in MAX_LUMA_SAMPLE_RATE.iter().enumerate() {
            if luma_sample_rate <= cap {
                min_idx = i;
                break;
            }
        }
        if self.bitrate_kbps > 0 {
            for i in min_idx..NUM_LEVELS {
                if self.bitrate_kbps <= MAX_CODED_DATA_RATE[i][self.band_idc as usize] {
                    min_idx = i;
                    break;
                }
            }
        }
        let min_level_idc = LEVEL_IDC[min_idx];
        match self.level_idc {
            None => self.level_idc = Some(min_level_idc),
            Some(idc) => {
                level_index(idc)?;
                if idc < min_level_idc {
                    return Err(Error::InvalidLevel);
                }
            }
        }
        Ok(())
    }

    /// Applies the level cap to the bitrate, defaulting it for
    /// rate-controlled encodes.
    fn update_bitrate(&mut self) -> Result<()> {
        let idx = level_index(self.level_idc.expect("level resolved"))?;
        let cap = MAX_CODED_DATA_RATE[idx][self.band_idc as usize];
        if self.bitrate_kbps == 0 && self.qp.is_none() {
            self.bitrate_kbps = cap;
        } else if self.bitrate_kbps > cap {
            return Err(Error::InvalidLevel);
        }
        Ok(())
    }

    /// Resolves every auto value in place and returns the tile grid.
    pub(crate) fn resolve(&mut self) -> Result<(u32, u32)> {
        self.check()?;
        let grid = self.update_tile()?;
        self.update_level()?;
        self.update_bitrate()?;
        Ok(grid)
    }

    /// QP of each component after offsets, clamped to the legal range.
    pub(crate) fn comp_qps(&self, frame_qp: u8, bit_depth: u8) -> [u8; MAX_COMPS] {
        std::array::from_fn(|c| {
            (frame_qp as i32 + self.qp_offsets[c] as i32)
                .clamp(MIN_QP as i32, max_qp(bit_depth) as i32) as u8
        })
    }

    /// Sets one parameter from its string form, the same names the
    /// command-line front-ends use.
    pub fn parse(&mut self, name: &str, value: &str) -> Result<()> {
        let name = name.trim_start_matches("--").replace('_', "-");
        let int = |v: &str| -> Result<i64> {
            v.parse::<i64>().map_err(|_| Error::InvalidArgument("integer value"))
        };
        match name.as_str() {
            "profile" => {
                self.profile = match value {
                    "422-10" => Profile::Yuv422_10,
                    "422-12" => Profile::Yuv422_12,
                    "400-10" => Profile::Monochrome10,
                    _ => return Err(Error::InvalidArgument("profile")),
                };
            }
            "level" => {
                if value == "auto" {
                    self.level_idc = None;
                } else {
                    let level: f64 =
                        value.parse().map_err(|_| Error::InvalidArgument("level"))?;
                    let idc = (level * 30.0 + 0.5) as u8;
                    level_index(idc).map_err(|_| Error::InvalidArgument("level"))?;
                    self.level_idc = Some(idc);
                }
            }
            "band" => {
                let band = int(value)?;
                if !(0..=3).contains(&band) {
                    return Err(Error::InvalidArgument("band"));
                }
                self.band_idc = band as u8;
            }
            "preset" => {
                self.preset = match value {
                    "fastest" => Preset::Fastest,
                    "fast" => Preset::Fast,
                    "medium" => Preset::Medium,
                    "slow" => Preset::Slow,
                    "placebo" => Preset::Placebo,
                    _ => return Err(Error::InvalidArgument("preset")),
                };
            }
            "width" => {
                let w = int(value)?;
                if w <= 0 {
                    return Err(Error::InvalidWidth);
                }
                self.width = w as u32;
            }
            "height" => {
                let h = int(value)?;
                if h <= 0 {
                    return Err(Error::InvalidArgument("height"));
                }
                self.height = h as u32;
            }
            "fps" => {
                if let Some((num, den)) = value.split_once('/') {
                    self.fps_num = int(num)? as u32;
                    self.fps_den = int(den)? as u32;
                } else if value.contains('.') {
                    let fps: f64 = value.parse().map_err(|_| Error::InvalidArgument("fps"))?;
                    self.fps_num = (fps * 10000.0) as u32;
                    self.fps_den = 10000;
                } else {
                    self.fps_num = int(value)? as u32;
                    self.fps_den = 1;
                }
            }
            "qp" => {
                if value == "auto" {
                    self.qp = None;
                } else {
                    let qp = int(value)?;
                    if !(MIN_QP as i64..=max_qp(12) as i64).contains(&qp) {
                        return Err(Error::InvalidArgument("qp"));
                    }
                    self.qp = Some(qp as u8);
                }
            }
            "qp-offset-c1" | "qp-offset-c2" | "qp-offset-c3" => {
                let comp = name.as_bytes()[name.len() - 1] - b'0';
                self.qp_offsets[comp as usize] =
                    int(value)?.try_into().map_err(|_| Error::InvalidArgument("qp offset"))?;
            }
            "bitrate" => {
                self.bitrate_kbps = parse_kbps(value)?;
            }
            "q-matrix-c0" | "q-matrix-c1" | "q-matrix-c2" | "q-matrix-c3" => {
                let comp = (name.as_bytes()[name.len() - 1] - b'0') as usize;
                let mut q_matrix = self.q_matrix.unwrap_or([[16; BLK_D]; MAX_COMPS]);
                q_matrix[comp] = parse_q_matrix(value)?;
                self.q_matrix = Some(q_matrix);
            }
            "tile-w" => {
                let w = int(value)?;
                if w < MIN_TILE_W as i64 || w % MB as i64 != 0 {
                    return Err(Error::InvalidArgument("tile width"));
                }
                self.tile_width = w as u32;
            }
            "tile-h" => {
                let h = int(value)?;
                if h < MIN_TILE_H as i64 || h % MB as i64 != 0 {
                    return Err(Error::InvalidArgument("tile height"));
                }
                self.tile_height = h as u32;
            }
            "color-primaries" => {
                let v = lookup(COLOR_PRIMARIES, value)?;
                self.color_description.get_or_insert_with(Default::default).primaries = v;
            }
            "color-transfer" => {
                let v = lookup(COLOR_TRANSFER, value)?;
                self.color_description
                    .get_or_insert_with(Default::default)
                    .transfer_characteristics = v;
            }
            "color-matrix" => {
                let v = lookup(COLOR_MATRIX, value)?;
                self.color_description
                    .get_or_insert_with(Default::default)
                    .matrix_coefficients = v;
            }
            "color-range" => {
                let full = match value {
                    "limited" | "tv" => false,
                    "full" | "pc" => true,
                    _ => return Err(Error::InvalidArgument("color range")),
                };
                self.color_description.get_or_insert_with(Default::default).full_range = full;
            }
            _ => return Err(Error::InvalidArgument("unknown parameter")),
        }
        Ok(())
    }
}

fn parse_kbps(value: &str) -> Result<u32> {
    let err = Error::InvalidArgument("bitrate");
    let value = value.trim();
    if value.is_empty() {
        return Err(err);
    }
    let (digits, scale) = match value.as_bytes()[value.len() - 1].to_ascii_lowercase() {
        b'k' => (&value[..value.len() - 1], 1.0),
        b'm' => (&value[..value.len() - 1], 1_000.0),
        b'g' => (&value[..value.len() - 1], 1_000_000.0),
        _ => (value, 1.0),
    };
    let n: f64 = digits.trim().parse().map_err(|_| Error::InvalidArgument("bitrate"))?;
    let kbps = (n * scale) as i64;
    if kbps <= 0 {
        return Err(Error::InvalidArgument("bitrate"));
    }
    Ok(kbps as u32)
}

fn parse_q_matrix(value: &str) -> Result<[u8; BLK_D]> {
    let mut out = [0u8; BLK_D];
    let mut count = 0;
    for token in value.split_ascii_whitespace() {
        if count >= BLK_D {
            return Err(Error::InvalidArgument("quantization matrix length"));
        }
        let q: u32 = token.parse().map_err(|_| Error::InvalidArgument("quantization matrix"))?;
        if !(1..=255).contains(&q) {
            return Err(Error::InvalidArgument("quantization matrix entry"));
        }
        out[count] = q as u8;
        count += 1;
    }
    if count != BLK_D {
        return Err(Error::InvalidArgument("quantization matrix length"));
    }
    Ok(out)
}

fn lookup(dict: &[(&str, u8)], key: &str) -> Result<u8> {
    dict.iter()
        .find(|(name, _)| *name == key)
        .map(|&(_, v)| v)
        .ok_or(Error::InvalidArgument("unknown name"))
}

const COLOR_PRIMARIES: &[(&str, u8)] = &[
    ("bt709", 1),
    ("unspecified", 2),
    ("bt470m", 4),
    ("bt470bg", 5),
    ("smpte170m", 6),
    ("smpte240m", 7),
    ("film", 8),
    ("bt2020", 9),
    ("smpte428", 10),
    ("smpte431", 11),
    ("smpte432", 12),
];

const COLOR_TRANSFER: &[(&str, u8)] = &[
    ("bt709", 1),
    ("unspecified", 2),
    ("bt470m", 4),
    ("bt470bg", 5),
    ("smpte170m", 6),
    ("smpte240m", 7),
    ("linear", 8),
    ("log100", 9),
    ("log316", 10),
    ("iec61966-2-4", 11),
    ("bt1361e", 12),
    ("iec61966-2-1", 13),
    ("bt2020-10", 14),
    ("bt2020-12", 15),
    ("smpte2084", 16),
    ("smpte428", 17),
    ("arib-std-b67", 18),
];

const COLOR_MATRIX: &[(&str, u8)] = &[
    ("gbr", 0),
    ("bt709", 1),
    ("unspecified", 2),
    ("fcc", 4),
    ("bt470bg", 5),
    ("smpte170m", 6),
    ("smpte240m", 7),
    ("ycgco", 8),
    ("bt2020nc", 9),
    ("bt2020c", 10),
    ("smpte2085", 11),
    ("chroma-derived-nc", 12),
    ("chroma-derived-c", 13),
    ("ictcp", 14),
];

/// Worker count for the given request and per-frame tile minimum.
pub(crate) fn resolve_threads(requested: usize, min_tiles: usize) -> usize {
    if requested > 0 {
        return requested.min(MAX_THREADS);
    }
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    MAX_THREADS.min(cores).min(min_tiles.max(1))
}

/// Bitrate family presets scaled off the 4:2:2 high-quality curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Yuv422Lq,
    Yuv422Sq,
    Yuv422Hq,
    Yuv444Hq,
}

/// Anchor points of the reference bitrate curve: pixel count to Mbit/s at
/// 30 fps.
const FAMILY_KEY: [(u64, f64); 6] = [
    (0, 38.0),
    (960 * 540, 72.0),
    (1280 * 720, 98.0),
    (1920 * 1080, 198.0),
    (2048 * 1080, 211.0),
    (3840 * 2160, 796.0),
];

fn key_bitrate(width: u32, height: u32) -> f64 {
    let wh = width as u64 * height as u64;
    for i in 1..FAMILY_KEY.len() {
        if wh < FAMILY_KEY[i].0 {
            let (wh_lo, bit_lo) = FAMILY_KEY[i - 1];
            let (wh_hi, bit_hi) = FAMILY_KEY[i];
            let ratio = (bit_hi - bit_lo) / (wh_hi - wh_lo) as f64;
            return bit_lo + ratio * (wh - wh_lo) as f64;
        }
    }
    let (wh_hi, bit_hi) = FAMILY_KEY[FAMILY_KEY.len() - 1];
    bit_hi * wh as f64 / wh_hi as f64
}

/// Recommended bitrate in kbit/s for a family at the given resolution and
/// frame rate.
pub fn family_bitrate(family: Family, width: u32, height: u32, fps_num: u32, fps_den: u32) -> Result<u32> {
    if width == 0 || height == 0 || fps_num == 0 || fps_den == 0 {
        return Err(Error::InvalidArgument("family bitrate inputs"));
    }
    let ratio = match family {
        Family::Yuv422Lq => 1.0 / (1.4 * 1.4),
        Family::Yuv422Sq => 1.0 / 1.4,
        Family::Yuv422Hq => 1.0,
        Family::Yuv444Hq => 1.5,
    };
    let key = key_bitrate(width, height);
    let fps = fps_num as f64 / fps_den as f64;
    Ok((key * ratio * fps / 30.0 * 1000.0) as u32)
}

/// Single-pass estimate of the base QP hitting a target bitrate.
///
/// This is the rate-control seed; per-tile refinement hangs off the tile
/// engine when a rate loop is layered on top.
pub(crate) fn abr_base_qp(bitrate_kbps: u32, width: u32, height: u32, fps_num: u32, fps_den: u32, bit_depth: u8) -> u8 {
    let pixels = width as f64 * height as f64;
    let fps = fps_num as f64 / fps_den as f64;
    let bpp = (bitrate_kbps as f64 * 1000.0) / (pixels * fps);
    let qp = 30.0 - 5.0 * bpp.max(1e-6).log2();
    qp.round().clamp(MIN_QP as f64, max_qp(bit_depth) as f64) as u8
}
