//! Feed header — the 128-byte on-disk record naming a feed's identity,
//! its place in the parent/child hierarchy, and the trusted/appended
//! sequence range.
//!
//! ```text
//! Offset  Size  Field
//!    0     12   reserved (zero)
//!   12     32   fid
//!   44     32   parent_fid
//!   76      4   parent_seq  (u32 BE)
//!   80      4   anchor_seq  (u32 BE) — first trusted seq
//!   84     20   anchor_mid
//!  104      4   front_seq   (u32 BE) — highest appended seq
//!  108     20   front_mid
//! ```
//!
//! Only `front_seq`/`front_mid` mutate after creation, and only as the
//! second half of a header-after-body append: the packet is written to the
//! log first, then the header is rewritten so readers never observe a
//! `front_seq` whose packet is missing.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use thiserror::Error;

pub const HEADER_SIZE: usize = 128;
pub const FID_LEN: usize = 32;
pub const MID_LEN: usize = 20;

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("I/O error reading/writing feed header: {0}")]
    Io(#[from] io::Error),
    #[error("anchor_seq {anchor_seq} exceeds front_seq {front_seq}")]
    AnchorAfterFront { anchor_seq: u32, front_seq: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedHeader {
    pub fid: [u8; FID_LEN],
    pub parent_fid: [u8; FID_LEN],
    pub parent_seq: u32,
    pub anchor_seq: u32,
    pub anchor_mid: [u8; MID_LEN],
    pub front_seq: u32,
    pub front_mid: [u8; MID_LEN],
}

impl FeedHeader {
    /// A freshly created feed with no appended packets: `anchor_seq ==
    /// front_seq == 0` and both mids default to `fid[0..20]`, matching the
    /// genesis packet's `prev_mid` convention.
    pub fn new_genesis(fid: [u8; FID_LEN], parent_fid: [u8; FID_LEN], parent_seq: u32) -> Self {
        let mut fid_prefix = [0u8; MID_LEN];
        fid_prefix.copy_from_slice(&fid[..MID_LEN]);
        Self {
            fid,
            parent_fid,
            parent_seq,
            anchor_seq: 0,
            anchor_mid: fid_prefix,
            front_seq: 0,
            front_mid: fid_prefix,
        }
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<(), HeaderError> {
        if self.anchor_seq > self.front_seq {
            return Err(HeaderError::AnchorAfterFront {
                anchor_seq: self.anchor_seq,
                front_seq: self.front_seq,
            });
        }
        w.write_all(&[0u8; 12])?;
        w.write_all(&self.fid)?;
        w.write_all(&self.parent_fid)?;
        w.write_u32::<BigEndian>(self.parent_seq)?;
        w.write_u32::<BigEndian>(self.anchor_seq)?;
        w.write_all(&self.anchor_mid)?;
        w.write_u32::<BigEndian>(self.front_seq)?;
        w.write_all(&self.front_mid)?;
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Self, HeaderError> {
        let mut reserved = [0u8; 12];
        r.read_exact(&mut reserved)?;

        let mut fid = [0u8; FID_LEN];
        r.read_exact(&mut fid)?;
        let mut parent_fid = [0u8; FID_LEN];
        r.read_exact(&mut parent_fid)?;
        let parent_seq = r.read_u32::<BigEndian>()?;
        let anchor_seq = r.read_u32::<BigEndian>()?;
        let mut anchor_mid = [0u8; MID_LEN];
        r.read_exact(&mut anchor_mid)?;
        let front_seq = r.read_u32::<BigEndian>()?;
        let mut front_mid = [0u8; MID_LEN];
        r.read_exact(&mut front_mid)?;

        if anchor_seq > front_seq {
            return Err(HeaderError::AnchorAfterFront { anchor_seq, front_seq });
        }

        Ok(Self {
            fid,
            parent_fid,
            parent_seq,
            anchor_seq,
            anchor_mid,
            front_seq,
            front_mid,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        self.write(&mut buf).expect("in-memory write cannot fail");
        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    pub fn has_no_appends(&self) -> bool {
        self.anchor_seq == self.front_seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_round_trips_through_bytes() {
        let header = FeedHeader::new_genesis([7u8; FID_LEN], [0u8; FID_LEN], 0);
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        let back = FeedHeader::read(&mut &bytes[..]).unwrap();
        assert_eq!(back, header);
        assert!(back.has_no_appends());
    }

    #[test]
    fn rejects_anchor_after_front() {
        let mut header = FeedHeader::new_genesis([1u8; FID_LEN], [0u8; FID_LEN], 0);
        header.anchor_seq = 5;
        header.front_seq = 2;
        assert!(header.write(&mut Vec::new()).is_err());
    }

    #[test]
    fn advancing_front_preserves_anchor() {
        let mut header = FeedHeader::new_genesis([9u8; FID_LEN], [0u8; FID_LEN], 0);
        header.front_seq = 3;
        header.front_mid = [5u8; MID_LEN];
        let bytes = header.to_bytes();
        let back = FeedHeader::read(&mut &bytes[..]).unwrap();
        assert_eq!(back.front_seq, 3);
        assert_eq!(back.anchor_seq, 0);
    }
}
