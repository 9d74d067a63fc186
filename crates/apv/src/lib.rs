//! A pure-Rust encoder and decoder for the Advanced Professional Video
//! (APV) bitstream.
//!
//! APV is an intra-only, tile-partitioned codec built on an 8x8 integer
//! transform with quantization and Golomb-Rice entropy coding, aimed at
//! professional 4:2:2/4:4:4/monochrome content at 10- and 12-bit depth.
//! This crate converts planar pictures to and from conformant access
//! units; picture I/O, container formats and command-line tooling live
//! outside it.
//!
//! # Examples
//!
//! ```rust
//! # fn test() -> Result<(), apv_codec::Error> {
//! use apv_codec::{ChromaFormat, Decoder, DecoderDesc, Encoder, EncoderDesc, Frame, Picture};
//!
//! let mut desc = EncoderDesc::default();
//! desc.params[0].width = 256;
//! desc.params[0].height = 128;
//! desc.params[0].qp = Some(30);
//! let mut encoder = Encoder::new(&desc)?;
//!
//! let pic = Picture::new(ChromaFormat::Yuv422, 10, 256, 128)?;
//! let mut bitstream = vec![0u8; 1 << 20];
//! let stat = encoder.encode(&[Frame::primary(pic)], None, &mut bitstream, None)?;
//!
//! let mut decoder = Decoder::new(&DecoderDesc::default())?;
//! let (frames, _) = decoder.decode(&bitstream[..stat.written], None)?;
//! assert_eq!(frames.len(), 1);
//! # Ok(())
//! # }
//! # test().expect("round trip failed");
//! ```
#![cfg_attr(all(coverage_nightly, test), feature(coverage_attribute))]
#![deny(unsafe_code)]
#![deny(unreachable_pub)]

mod bs;
mod rdoq;
mod tbl;
mod tile;
mod tq;
mod vlc;

pub mod dec;
pub mod enc;
pub mod enums;
pub mod error;
pub mod frame;
pub mod hdr;
pub mod meta;
pub mod param;

pub use self::dec::{DecodeStat, Decoder, DecoderDesc, probe_au_info};
pub use self::enc::{AuFormat, EncodeStat, Encoder, EncoderDesc};
pub use self::enums::{ChromaFormat, MetadataKind, PbuType, Profile};
pub use self::error::{Error, Result};
pub use self::frame::{Frame, Picture, Plane};
pub use self::hdr::{AuFrameInfo, AuInfo, ColorDescription, FrameHeader, FrameInfo};
pub use self::meta::{MetadataContainer, MetadataPayload};
pub use self::param::{EncoderParams, Family, Preset, family_bitrate};

#[cfg(test)]
mod tests;
