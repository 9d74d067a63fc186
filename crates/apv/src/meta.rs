//! Metadata container carried alongside the coded frames of an access
//! unit.
//!
//! Payloads are grouped by the `group_id` that links them to frames. Within
//! a group there is at most one payload per kind, except user-defined
//! payloads which are keyed by their leading UUID. Insertion order is kept
//! so serialisation is deterministic.

use bytes::Bytes;

use crate::bs::{BitReader, BitWriter};
use crate::enums::MetadataKind;
use crate::error::{Error, Result};
use crate::tbl::MAX_META_GROUPS;

/// A payload together with its addressing information.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataPayload {
    pub group_id: u16,
    pub kind: u32,
    /// Key of user-defined payloads; mirrors the first 16 data bytes.
    pub uuid: Option<[u8; 16]>,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
struct Payload {
    kind: u32,
    data: Bytes,
}

impl Payload {
    fn uuid(&self) -> Option<[u8; 16]> {
        if self.kind == u32::from(MetadataKind::UserDefined) {
            let mut uuid = [0u8; 16];
            uuid.copy_from_slice(&self.data[..16]);
            Some(uuid)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Group {
    group_id: u16,
    payloads: Vec<Payload>,
}

/// Keyed store of metadata payloads for up to 16 groups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataContainer {
    groups: Vec<Group>,
}

fn verify_payload(kind: u32, data: &[u8]) -> Result<()> {
    let malformed = Err(Error::MalformedBitstream("metadata payload size"));
    if kind == u32::from(MetadataKind::ItuTT35) {
        if data.is_empty() || (data[0] == 0xFF && data.len() == 1) {
            return malformed;
        }
    } else if kind == u32::from(MetadataKind::MasteringDisplayColourVolume) {
        if data.len() != 24 {
            return malformed;
        }
    } else if kind == u32::from(MetadataKind::ContentLightLevel) {
        if data.len() != 4 {
            return malformed;
        }
    } else if kind == u32::from(MetadataKind::UserDefined) && data.len() < 16 {
        return malformed;
    }
    Ok(())
}

/// Bytes taken by a type or size value in the 0xFF-run encoding.
fn varint_len(v: u32) -> usize {
    v as usize / 255 + 1
}

impl MetadataContainer {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_group(&self, group_id: u16) -> Option<usize> {
        self.groups.iter().position(|g| g.group_id == group_id)
    }

    fn find_payload(group: &Group, kind: u32, uuid: Option<&[u8; 16]>) -> Option<usize> {
        if kind == u32::from(MetadataKind::UserDefined) {
            let uuid = uuid?;
            group
                .payloads
                .iter()
                .position(|p| p.kind == kind && &p.data[..16] == uuid)
        } else {
            group.payloads.iter().position(|p| p.kind == kind)
        }
    }

    /// Inserts or replaces a payload.
    ///
    /// The UUID key of user-defined payloads is taken from the data itself.
    pub fn set(&mut self, group_id: u16, kind: u32, data: Bytes) -> Result<()> {
        if group_id == u16::MAX {
            return Err(Error::InvalidArgument("reserved group id"));
        }
        if data.is_empty() {
            return Err(Error::InvalidArgument("empty metadata payload"));
        }
        verify_payload(kind, &data)?;

        let group_idx = match self.find_group(group_id) {
            Some(idx) => idx,
            None => {
                if self.groups.len() >= MAX_META_GROUPS {
                    return Err(Error::ReachedMax("metadata groups"));
                }
                self.groups.push(Group { group_id, payloads: Vec::new() });
                self.groups.len() - 1
            }
        };

        let group = &mut self.groups[group_idx];
        let uuid = if kind == u32::from(MetadataKind::UserDefined) {
            let mut u = [0u8; 16];
            u.copy_from_slice(&data[..16]);
            Some(u)
        } else {
            None
        };
        match Self::find_payload(group, kind, uuid.as_ref()) {
            Some(idx) => group.payloads[idx].data = data,
            None => group.payloads.push(Payload { kind, data }),
        }
        Ok(())
    }

    /// Looks up a payload. User-defined payloads need their UUID.
    pub fn get(&self, group_id: u16, kind: u32, uuid: Option<&[u8; 16]>) -> Result<&Bytes> {
        let group = &self.groups[self.find_group(group_id).ok_or(Error::NotFound)?];
        let idx = Self::find_payload(group, kind, uuid).ok_or(Error::NotFound)?;
        Ok(&group.payloads[idx].data)
    }

    /// Removes a payload.
    pub fn remove(&mut self, group_id: u16, kind: u32, uuid: Option<&[u8; 16]>) -> Result<()> {
        let group_idx = self.find_group(group_id).ok_or(Error::NotFound)?;
        let group = &mut self.groups[group_idx];
        let idx = Self::find_payload(group, kind, uuid).ok_or(Error::NotFound)?;
        group.payloads.remove(idx);
        Ok(())
    }

    /// Inserts every payload in order. On failure earlier insertions are
    /// kept; the caller decides whether to roll back.
    pub fn set_all(&mut self, payloads: &[MetadataPayload]) -> Result<()> {
        for p in payloads {
            self.set(p.group_id, p.kind, p.data.clone())?;
        }
        Ok(())
    }

    /// Returns every payload in serialisation order.
    pub fn get_all(&self) -> Vec<MetadataPayload> {
        let mut out = Vec::with_capacity(self.num_payloads());
        for group in &self.groups {
            for p in &group.payloads {
                out.push(MetadataPayload {
                    group_id: group.group_id,
                    kind: p.kind,
                    uuid: p.uuid(),
                    data: p.data.clone(),
                });
            }
        }
        out
    }

    pub fn remove_all(&mut self) {
        self.groups.clear();
    }

    pub fn num_payloads(&self) -> usize {
        self.groups.iter().map(|g| g.payloads.len()).sum()
    }

    /// Group ids that currently hold payloads, in insertion order.
    pub(crate) fn group_ids(&self) -> Vec<u16> {
        self.groups
            .iter()
            .filter(|g| !g.payloads.is_empty())
            .map(|g| g.group_id)
            .collect()
    }

    /// Payload bytes of one group, including the leading size field.
    pub(crate) fn group_payload_size(&self, group_id: u16) -> usize {
        let Some(idx) = self.find_group(group_id) else {
            return 0;
        };
        4 + self.groups[idx]
            .payloads
            .iter()
            .map(|p| varint_len(p.kind) + varint_len(p.data.len() as u32) + p.data.len())
            .sum::<usize>()
    }

    /// Serialises one group as a metadata PBU payload.
    pub(crate) fn write_group(&self, bw: &mut BitWriter<'_>, group_id: u16) -> Result<()> {
        let idx = self
            .find_group(group_id)
            .ok_or(Error::Unexpected("serialising unknown metadata group"))?;
        let group = &self.groups[idx];
        let size = self.group_payload_size(group_id) as u32 - 4;
        bw.write(size, 32)?;
        for p in &group.payloads {
            let mut kind = p.kind;
            while kind >= 255 {
                bw.write(0xFF, 8)?;
                kind -= 255;
            }
            bw.write(kind, 8)?;
            let mut len = p.data.len() as u32;
            while len >= 255 {
                bw.write(0xFF, 8)?;
                len -= 255;
            }
            bw.write(len, 8)?;
            for &b in p.data.iter() {
                bw.write(b as u32, 8)?;
            }
        }
        Ok(())
    }

    /// Parses a metadata PBU payload into this container.
    ///
    /// `pbu_size` is the unit's declared size; bytes between the payload
    /// list and the end of the unit must be filler.
    pub(crate) fn parse_group(
        &mut self,
        br: &mut BitReader<'_>,
        pbu_size: u32,
        group_id: u16,
    ) -> Result<()> {
        let metadata_size = br.read(32)?;
        if pbu_size < 8 || metadata_size > pbu_size - 8 {
            return Err(Error::MalformedBitstream("metadata size"));
        }
        let start = br.byte_pos();
        let mut remaining = metadata_size;

        while remaining > 0 {
            let mut kind: u32 = 0;
            loop {
                if remaining == 0 {
                    return Err(Error::MalformedBitstream("truncated metadata type"));
                }
                let b = br.read(8)?;
                remaining -= 1;
                kind += b;
                if b != 0xFF {
                    break;
                }
            }
            let mut size: u32 = 0;
            loop {
                if remaining == 0 {
                    return Err(Error::MalformedBitstream("truncated metadata size"));
                }
                let b = br.read(8)?;
                remaining -= 1;
                size += b;
                if b != 0xFF {
                    break;
                }
            }
            if size > remaining {
                return Err(Error::MalformedBitstream("metadata payload overruns"));
            }
            let data = Bytes::copy_from_slice(br.peek_bytes(size as usize)?);
            br.skip_bytes(size as usize)?;
            remaining -= size;
            self.set(group_id, kind, data)?;
        }

        let consumed = (br.byte_pos() - start) as u32;
        let target = pbu_size - 8;
        if consumed > target {
            return Err(Error::MalformedBitstream("metadata overruns pbu"));
        }
        for _ in 0..target - consumed {
            if br.read(8)? != 0xFF {
                return Err(Error::MalformedBitstream("metadata trailing filler"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(all(test, coverage_nightly), coverage(off))]
mod tests {
    use super::*;

    const MDCV: u32 = 5;
    const CLL: u32 = 6;
    const USER: u32 = 170;

    #[test]
    fn set_get_remove() {
        let mut md = MetadataContainer::new();
        md.set(7, MDCV, Bytes::from(vec![0u8; 24])).unwrap();
        md.set(7, CLL, Bytes::from(vec![1u8; 4])).unwrap();
        assert_eq!(md.get(7, MDCV, None).unwrap().len(), 24);
        assert_eq!(md.get(7, CLL, None).unwrap()[0], 1);
        assert!(matches!(md.get(8, MDCV, None), Err(Error::NotFound)));

        md.remove(7, CLL, None).unwrap();
        assert!(matches!(md.get(7, CLL, None), Err(Error::NotFound)));
        assert!(matches!(md.remove(7, CLL, None), Err(Error::NotFound)));
    }

    #[test]
    fn set_replaces_same_key() {
        let mut md = MetadataContainer::new();
        md.set(1, CLL, Bytes::from(vec![0u8; 4])).unwrap();
        md.set(1, CLL, Bytes::from(vec![9u8; 4])).unwrap();
        assert_eq!(md.num_payloads(), 1);
        assert_eq!(md.get(1, CLL, None).unwrap()[0], 9);
    }

    #[test]
    fn user_defined_keyed_by_uuid() {
        let mut md = MetadataContainer::new();
        let mut a = vec![0u8; 20];
        a[0] = 0xAA;
        let mut b = vec![0u8; 20];
        b[0] = 0xBB;
        md.set(1, USER, Bytes::from(a.clone())).unwrap();
        md.set(1, USER, Bytes::from(b.clone())).unwrap();
        assert_eq!(md.num_payloads(), 2);

        let uuid_a: [u8; 16] = a[..16].try_into().unwrap();
        let got = md.get(1, USER, Some(&uuid_a)).unwrap();
        assert_eq!(&got[..], &a[..]);

        md.remove(1, USER, Some(&uuid_a)).unwrap();
        assert_eq!(md.num_payloads(), 1);
    }

    #[test]
    fn validation_rejects_bad_sizes() {
        let mut md = MetadataContainer::new();
        assert!(matches!(
            md.set(1, MDCV, Bytes::from(vec![0u8; 23])),
            Err(Error::MalformedBitstream(_))
        ));
        assert!(matches!(
            md.set(1, CLL, Bytes::from(vec![0u8; 5])),
            Err(Error::MalformedBitstream(_))
        ));
        assert!(matches!(
            md.set(1, USER, Bytes::from(vec![0u8; 15])),
            Err(Error::MalformedBitstream(_))
        ));
        // T.35 starting with 0xFF needs a second byte
        assert!(matches!(
            md.set(1, 4, Bytes::from(vec![0xFFu8])),
            Err(Error::MalformedBitstream(_))
        ));
        assert!(md.set(1, 4, Bytes::from(vec![0xFFu8, 0x01])).is_ok());
    }

    #[test]
    fn group_limit_is_enforced() {
        let mut md = MetadataContainer::new();
        for g in 0..MAX_META_GROUPS as u16 {
            md.set(g, CLL, Bytes::from(vec![0u8; 4])).unwrap();
        }
        assert!(matches!(
            md.set(99, CLL, Bytes::from(vec![0u8; 4])),
            Err(Error::ReachedMax(_))
        ));
    }

    #[test]
    fn set_all_get_all_identity() {
        let mut md = MetadataContainer::new();
        md.set(7, MDCV, Bytes::from(vec![0u8; 24])).unwrap();
        md.set(7, CLL, Bytes::from(vec![0u8; 4])).unwrap();
        md.set(3, USER, Bytes::from(vec![0xABu8; 18])).unwrap();

        let all = md.get_all();
        let mut other = MetadataContainer::new();
        other.set_all(&all).unwrap();
        assert_eq!(other.get_all(), all);
    }

    #[test]
    fn group_serialisation_round_trips() {
        let mut md = MetadataContainer::new();
        md.set(7, MDCV, Bytes::from(vec![0u8; 24])).unwrap();
        md.set(7, CLL, Bytes::from(vec![0u8; 4])).unwrap();

        let payload_size = md.group_payload_size(7);
        let mut buf = vec![0u8; payload_size];
        {
            let mut bw = BitWriter::new(&mut buf);
            md.write_group(&mut bw, 7).unwrap();
            assert_eq!(bw.finish().unwrap(), payload_size);
        }

        let mut parsed = MetadataContainer::new();
        let pbu_size = (payload_size + 4) as u32;
        parsed
            .parse_group(&mut BitReader::new(&buf), pbu_size, 7)
            .unwrap();
        assert_eq!(parsed.get(7, MDCV, None).unwrap(), md.get(7, MDCV, None).unwrap());
        assert_eq!(parsed.get(7, CLL, None).unwrap(), md.get(7, CLL, None).unwrap());
        assert_eq!(parsed.get_all(), md.get_all());
    }

    #[test]
    fn long_payload_uses_varint_runs() {
        let mut md = MetadataContainer::new();
        md.set(1, 300, Bytes::from(vec![0x42u8; 600])).unwrap();

        let payload_size = md.group_payload_size(1);
        // type 300 -> 2 bytes, size 600 -> 3 bytes
        assert_eq!(payload_size, 4 + 2 + 3 + 600);
        let mut buf = vec![0u8; payload_size];
        {
            let mut bw = BitWriter::new(&mut buf);
            md.write_group(&mut bw, 1).unwrap();
            bw.finish().unwrap();
        }
        assert_eq!(&buf[4..6], &[0xFF, 45]);
        assert_eq!(&buf[6..9], &[0xFF, 0xFF, 90]);

        let mut parsed = MetadataContainer::new();
        parsed
            .parse_group(&mut BitReader::new(&buf), (payload_size + 4) as u32, 1)
            .unwrap();
        assert_eq!(parsed.get(1, 300, None).unwrap().len(), 600);
    }
}
