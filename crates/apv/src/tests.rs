//! End-to-end encode/decode scenarios.

use bytes::Bytes;

use crate::bs::BitReader;
use crate::enums::{ChromaFormat, MetadataKind, PbuType, Profile};
use crate::error::Error;
use crate::frame::{Frame, Picture};
use crate::hdr::{FrameHeader, PbuHeader};
use crate::meta::MetadataContainer;
use crate::param::EncoderParams;
use crate::{AuFormat, Decoder, DecoderDesc, Encoder, EncoderDesc, probe_au_info};

fn desc_for(width: u32, height: u32, qp: u8) -> EncoderDesc {
    let mut desc = EncoderDesc::default();
    desc.params[0] = EncoderParams {
        width,
        height,
        qp: Some(qp),
        fps_num: 30,
        fps_den: 1,
        ..Default::default()
    };
    desc
}

fn textured(format: ChromaFormat, bit_depth: u8, width: u32, height: u32) -> Picture {
    let mut pic = Picture::new(format, bit_depth, width, height).unwrap();
    let mid = 1u16 << (bit_depth - 1);
    for comp in 0..pic.num_comps() {
        let plane = pic.plane_mut(comp);
        let w = plane.width();
        for y in 0..plane.height() {
            let row = plane.row_mut(y);
            for x in 0..w {
                let v = ((x * 5 + y * 3 + comp * 17) % 97) as i32 - 48;
                row[x] = (mid as i32 + v) as u16;
            }
        }
    }
    pic
}

fn encode_one(desc: &EncoderDesc, pic: Picture) -> (Vec<u8>, usize) {
    let mut encoder = Encoder::new(desc).unwrap();
    let mut bitstream = vec![0u8; 1 << 24];
    let stat = encoder
        .encode(&[Frame::primary(pic)], None, &mut bitstream, None)
        .unwrap();
    (bitstream, stat.written)
}

/// Walks the PBUs of a raw access unit, returning `(type, offset, size)`
/// triples where `size` includes the 4-byte size field.
fn walk_pbus(au: &[u8]) -> Vec<(PbuType, usize, usize)> {
    let mut br = BitReader::new(au);
    let au_size = crate::hdr::read_size(&mut br, "au").unwrap() as usize;
    assert_eq!(au_size + 4, au.len());
    let mut out = Vec::new();
    while br.byte_pos() < au.len() {
        let size = crate::hdr::read_size(&mut br, "pbu").unwrap() as usize;
        let offset = br.byte_pos() - 4;
        let unit = br.peek_bytes(size).unwrap();
        let header = PbuHeader::parse(&mut BitReader::new(unit)).unwrap();
        br.skip_bytes(size).unwrap();
        out.push((header.pbu_type, offset, size + 4));
    }
    out
}

#[test]
fn solid_grey_round_trips_exactly_at_qp_zero() {
    let mut pic = Picture::new(ChromaFormat::Yuv422, 10, 256, 128).unwrap();
    for comp in 0..3 {
        pic.fill(comp, 512);
    }
    let source = pic.clone();
    let (bitstream, written) = encode_one(&desc_for(256, 128, 0), pic);

    let mut decoder = Decoder::new(&DecoderDesc::default()).unwrap();
    let (frames, stat) = decoder.decode(&bitstream[..written], None).unwrap();
    assert_eq!(stat.read, written);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].pbu_type, PbuType::PrimaryFrame);
    for comp in 0..3 {
        assert_eq!(frames[0].pic.plane(comp), source.plane(comp), "comp {comp}");
    }
}

#[test]
fn decoder_output_matches_encoder_reconstruction() {
    for &qp in &[8u8, 30, 51] {
        let pic = textured(ChromaFormat::Yuv422, 10, 640, 256);
        let mut encoder = Encoder::new(&desc_for(640, 256, qp)).unwrap();
        let mut bitstream = vec![0u8; 1 << 23];
        let mut recon = Vec::new();
        let stat = encoder
            .encode(&[Frame::primary(pic)], None, &mut bitstream, Some(&mut recon))
            .unwrap();
        assert_eq!(recon.len(), 1);

        let mut decoder = Decoder::new(&DecoderDesc::default()).unwrap();
        let (frames, _) = decoder.decode(&bitstream[..stat.written], None).unwrap();
        for comp in 0..3 {
            assert_eq!(
                frames[0].pic.plane(comp),
                recon[0].pic.plane(comp),
                "qp={qp} comp={comp}"
            );
        }
    }
}

#[test]
fn twelve_bit_profile_round_trips() {
    let mut desc = desc_for(256, 128, 40);
    desc.params[0].profile = Profile::Yuv422_12;
    let pic = textured(ChromaFormat::Yuv422, 12, 256, 128);

    let mut encoder = Encoder::new(&desc).unwrap();
    let mut bitstream = vec![0u8; 1 << 22];
    let mut recon = Vec::new();
    let stat = encoder
        .encode(&[Frame::primary(pic)], None, &mut bitstream, Some(&mut recon))
        .unwrap();

    let mut decoder = Decoder::new(&DecoderDesc::default()).unwrap();
    let (frames, _) = decoder.decode(&bitstream[..stat.written], None).unwrap();
    assert_eq!(frames[0].pic.bit_depth(), 12);
    for comp in 0..3 {
        assert_eq!(frames[0].pic.plane(comp), recon[0].pic.plane(comp));
    }
}

#[test]
fn full_hd_uses_the_documented_tile_grid() {
    let mut pic = Picture::new(ChromaFormat::Yuv422, 10, 1920, 1080).unwrap();
    for comp in 0..3 {
        pic.fill(comp, 512);
    }
    let mut desc = desc_for(1920, 1080, 45);
    desc.params[0].tile_width = 256;
    desc.params[0].tile_height = 128;
    desc.params[0].tile_size_in_fh = true;
    let (bitstream, written) = encode_one(&desc, pic);
    let au = &bitstream[..written];

    let pbus = walk_pbus(au);
    let (_, frame_off, frame_size) = *pbus
        .iter()
        .find(|(ty, _, _)| ty.is_frame())
        .expect("frame pbu");
    let payload = &au[frame_off + 8..frame_off + frame_size];

    let mut br = BitReader::new(payload);
    let fh = FrameHeader::parse(&mut br).unwrap();
    assert_eq!(fh.tile_width_in_mbs, 16);
    assert_eq!(fh.tile_height_in_mbs, 8);
    assert_eq!(fh.tile_grid(), (8, 9));
    assert!(fh.tile_size_present_in_fh);
    assert_eq!(fh.tile_sizes.len(), 72);

    // the size table matches the emitted tiles
    for &size in &fh.tile_sizes {
        let declared = crate::hdr::read_size(&mut br, "tile").unwrap();
        assert_eq!(declared, size);
        br.skip_bytes(size as usize).unwrap();
    }

    let mut decoder = Decoder::new(&DecoderDesc::default()).unwrap();
    let (frames, _) = decoder.decode(au, None).unwrap();
    assert_eq!(frames[0].pic.width(), 1920);
    assert_eq!(frames[0].pic.height(), 1080);
}

#[test]
fn au_size_accounts_for_every_pbu() {
    let pic = textured(ChromaFormat::Yuv422, 10, 256, 128);
    let (bitstream, written) = encode_one(&desc_for(256, 128, 30), pic);
    let au = &bitstream[..written];

    let pbus = walk_pbus(au);
    let total: usize = pbus.iter().map(|&(_, _, size)| size).sum();
    assert_eq!(total + 4, written);
    assert_eq!(pbus[0].0, PbuType::AuInfo);
}

#[test]
fn metadata_round_trips_through_an_access_unit() {
    let mut md = MetadataContainer::new();
    md.set(7, MetadataKind::MasteringDisplayColourVolume.into(), Bytes::from(vec![0u8; 24]))
        .unwrap();
    md.set(7, MetadataKind::ContentLightLevel.into(), Bytes::from(vec![0u8; 4]))
        .unwrap();

    let pic = textured(ChromaFormat::Yuv422, 10, 256, 128);
    let mut encoder = Encoder::new(&desc_for(256, 128, 30)).unwrap();
    let mut bitstream = vec![0u8; 1 << 22];
    let stat = encoder
        .encode(&[Frame::primary(pic)], Some(&md), &mut bitstream, None)
        .unwrap();

    let mut decoder = Decoder::new(&DecoderDesc::default()).unwrap();
    let mut out_md = MetadataContainer::new();
    decoder
        .decode(&bitstream[..stat.written], Some(&mut out_md))
        .unwrap();
    assert_eq!(out_md.get_all(), md.get_all());
}

#[test]
fn reserved_bits_fail_decoding() {
    let pic = textured(ChromaFormat::Yuv422, 10, 256, 128);
    let (bitstream, written) = encode_one(&desc_for(256, 128, 30), pic);

    // the reserved byte of the AU-info PBU header
    let mut corrupt = bitstream[..written].to_vec();
    corrupt[11] = 1;
    let mut decoder = Decoder::new(&DecoderDesc::default()).unwrap();
    assert!(matches!(
        decoder.decode(&corrupt, None),
        Err(Error::MalformedBitstream(_))
    ));

    // the five reserved bits inside the AU-info frame entry
    let mut corrupt = bitstream[..written].to_vec();
    corrupt[20] |= 0x01;
    assert!(matches!(
        decoder.decode(&corrupt, None),
        Err(Error::MalformedBitstream(_))
    ));

    // the decoder survives malformed input and keeps working
    let (frames, _) = decoder.decode(&bitstream[..written], None).unwrap();
    assert_eq!(frames.len(), 1);
}

#[test]
fn bare_format_drops_the_au_size_field() {
    let pic = textured(ChromaFormat::Yuv422, 10, 256, 128);
    let mut encoder = Encoder::new(&desc_for(256, 128, 30)).unwrap();
    encoder.set_au_format(AuFormat::Bare);
    assert_eq!(encoder.au_format(), AuFormat::Bare);
    let mut bare = vec![0u8; 1 << 22];
    let bare_written = encoder
        .encode(&[Frame::primary(pic.clone())], None, &mut bare, None)
        .unwrap()
        .written;

    encoder.set_au_format(AuFormat::Raw);
    let mut raw = vec![0u8; 1 << 22];
    let raw_written = encoder
        .encode(&[Frame::primary(pic)], None, &mut raw, None)
        .unwrap()
        .written;

    assert_eq!(raw_written, bare_written + 4);
    assert_eq!(&raw[4..raw_written], &bare[..bare_written]);
}

#[test]
fn frame_hashes_agree_between_encoder_and_decoder() {
    let pic = textured(ChromaFormat::Yuv422, 10, 256, 128);
    let mut encoder = Encoder::new(&desc_for(256, 128, 30)).unwrap();
    encoder.set_use_frame_hash(true);
    let mut bitstream = vec![0u8; 1 << 22];
    let stat = encoder
        .encode(&[Frame::primary(pic)], None, &mut bitstream, None)
        .unwrap();
    assert_eq!(stat.frame_hashes.len(), 1);

    let mut decoder = Decoder::new(&DecoderDesc::default()).unwrap();
    decoder.set_use_frame_hash(true);
    let (_, dstat) = decoder.decode(&bitstream[..stat.written], None).unwrap();
    assert_eq!(dstat.frame_hashes, stat.frame_hashes);
}

#[test]
fn auxiliary_frames_travel_in_the_same_access_unit() {
    let mut desc = desc_for(256, 128, 30);
    desc.params.push(EncoderParams {
        profile: Profile::Monochrome10,
        width: 256,
        height: 128,
        qp: Some(30),
        fps_num: 30,
        fps_den: 1,
        ..Default::default()
    });
    let mut encoder = Encoder::new(&desc).unwrap();

    let primary = Frame::primary(textured(ChromaFormat::Yuv422, 10, 256, 128));
    let alpha = Frame {
        pbu_type: PbuType::AlphaFrame,
        group_id: 1,
        capture_time_distance: 0,
        pic: textured(ChromaFormat::Monochrome, 10, 256, 128),
    };

    let mut bitstream = vec![0u8; 1 << 23];
    let stat = encoder
        .encode(&[primary, alpha], None, &mut bitstream, None)
        .unwrap();
    assert_eq!(stat.frame_sizes.len(), 2);

    let probed = probe_au_info(&bitstream[..stat.written]).unwrap();
    assert_eq!(probed.frames.len(), 2);
    assert_eq!(probed.frames[0].pbu_type, PbuType::PrimaryFrame);
    assert_eq!(probed.frames[1].pbu_type, PbuType::AlphaFrame);
    assert_eq!(probed.frames[1].info.chroma_format, ChromaFormat::Monochrome);

    let mut decoder = Decoder::new(&DecoderDesc::default()).unwrap();
    let (frames, dstat) = decoder.decode(&bitstream[..stat.written], None).unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1].pic.num_comps(), 1);
    assert_eq!(dstat.au_info, probed);
}

#[test]
fn tiny_output_buffer_reports_exhaustion() {
    let pic = textured(ChromaFormat::Yuv422, 10, 256, 128);
    let mut encoder = Encoder::new(&desc_for(256, 128, 30)).unwrap();
    let mut bitstream = vec![0u8; 64];
    assert!(matches!(
        encoder.encode(&[Frame::primary(pic)], None, &mut bitstream, None),
        Err(Error::OutOfBitstreamBuffer)
    ));
}

#[test]
fn narrow_422_picture_encodes() {
    let mut desc = desc_for(2, 16, 20);
    desc.params[0].tile_width = 256;
    desc.params[0].tile_height = 128;
    let mut pic = Picture::new(ChromaFormat::Yuv422, 10, 2, 16).unwrap();
    for comp in 0..3 {
        pic.fill(comp, 700);
    }
    let source = pic.clone();
    let (bitstream, written) = encode_one(&desc, pic);

    let mut decoder = Decoder::new(&DecoderDesc::default()).unwrap();
    let (frames, _) = decoder.decode(&bitstream[..written], None).unwrap();
    assert_eq!(frames[0].pic.width(), 2);
    assert_eq!(frames[0].pic.plane(0).width(), 2);
    assert_eq!(frames[0].pic.plane(1).width(), 1);
    // lossy, but close at a low qp
    for comp in 0..3 {
        for (a, b) in frames[0].pic.plane(comp).data().iter().zip(source.plane(comp).data()) {
            assert!((*a as i32 - *b as i32).abs() <= 8, "comp {comp}");
        }
    }
}

#[test]
fn q_matrix_signalling_round_trips() {
    let mut desc = desc_for(256, 128, 30);
    let mut qm = [[16u8; 64]; 4];
    for (i, entry) in qm[0].iter_mut().enumerate() {
        *entry = 8 + (i % 24) as u8;
    }
    desc.params[0].q_matrix = Some(qm);

    let pic = textured(ChromaFormat::Yuv422, 10, 256, 128);
    let mut encoder = Encoder::new(&desc).unwrap();
    let mut bitstream = vec![0u8; 1 << 22];
    let mut recon = Vec::new();
    let stat = encoder
        .encode(&[Frame::primary(pic)], None, &mut bitstream, Some(&mut recon))
        .unwrap();

    let mut decoder = Decoder::new(&DecoderDesc::default()).unwrap();
    let (frames, _) = decoder.decode(&bitstream[..stat.written], None).unwrap();
    for comp in 0..3 {
        assert_eq!(frames[0].pic.plane(comp), recon[0].pic.plane(comp));
    }
}
