//! Out-of-log blob sidechains — `chain20` packets and their blob records.
//!
//! A `chain20` packet's 48-byte payload holds a var int content length, as
//! much of the content as fits inline, and a 20-byte forward pointer:
//!
//! ```text
//! <--- 1 or 5B ---> <-- up to 28 - len(varint) --> <--- 20B --->
//! +-----------------+-------------------------------+-----------+
//! | var int length  | inline content                | pointer   |
//! +-----------------+-------------------------------+-----------+
//! ```
//!
//! Content that does not fit inline is split into 100-byte blob records
//! chained backward: each blob is 128 bytes on disk (8B reserved + 100B
//! payload + 20B pointer), and `pointer` holds the *next* blob's id — the
//! first 20 bytes of `sha256(payload || pointer)` of that next blob — or
//! twenty zero bytes for the last blob in the chain. The packet header's own
//! pointer field names the *first* blob's id, so reassembly always starts
//! from the header and walks forward.

use crate::crypto;
use crate::error::{FeedError, Result};
use crate::varint;

pub const BLOB_RECORD_SIZE: usize = 128;
pub const BLOB_RESERVED_LEN: usize = 8;
pub const BLOB_PAYLOAD_LEN: usize = 100;
pub const BLOB_POINTER_LEN: usize = 20;
pub const HEADER_PAYLOAD_LEN: usize = 48;
pub const HEADER_INLINE_LIMIT: usize = 28;

pub const NULL_POINTER: [u8; BLOB_POINTER_LEN] = [0u8; BLOB_POINTER_LEN];

/// A single blob record, reassembled or about to be written.
#[derive(Debug, Clone)]
pub struct BlobRecord {
    pub payload: [u8; BLOB_PAYLOAD_LEN],
    pub pointer: [u8; BLOB_POINTER_LEN],
}

impl BlobRecord {
    /// `sha256(payload || pointer)[0..20]` — the id a predecessor uses to
    /// name this blob.
    pub fn id(&self) -> [u8; BLOB_POINTER_LEN] {
        let mut buf = [0u8; BLOB_PAYLOAD_LEN + BLOB_POINTER_LEN];
        buf[..BLOB_PAYLOAD_LEN].copy_from_slice(&self.payload);
        buf[BLOB_PAYLOAD_LEN..].copy_from_slice(&self.pointer);
        let digest = crypto::sha256(&buf);
        let mut id = [0u8; BLOB_POINTER_LEN];
        id.copy_from_slice(&digest[..BLOB_POINTER_LEN]);
        id
    }

    pub fn to_wire(&self) -> [u8; BLOB_RECORD_SIZE] {
        let mut wire = [0u8; BLOB_RECORD_SIZE];
        wire[BLOB_RESERVED_LEN..BLOB_RESERVED_LEN + BLOB_PAYLOAD_LEN].copy_from_slice(&self.payload);
        wire[BLOB_RESERVED_LEN + BLOB_PAYLOAD_LEN..].copy_from_slice(&self.pointer);
        wire
    }

    pub fn from_wire(wire: &[u8; BLOB_RECORD_SIZE]) -> Self {
        let mut payload = [0u8; BLOB_PAYLOAD_LEN];
        payload.copy_from_slice(&wire[BLOB_RESERVED_LEN..BLOB_RESERVED_LEN + BLOB_PAYLOAD_LEN]);
        let mut pointer = [0u8; BLOB_POINTER_LEN];
        pointer.copy_from_slice(&wire[BLOB_RESERVED_LEN + BLOB_PAYLOAD_LEN..]);
        Self { payload, pointer }
    }
}

/// Result of [`build_chain`]: the `chain20` packet payload plus, in
/// content order, every blob record that must be appended after it.
pub struct Chain {
    pub header_payload: [u8; HEADER_PAYLOAD_LEN],
    pub blobs: Vec<BlobRecord>,
}

/// Build a `chain20` header payload and its blob records for arbitrary
/// length `content`. Content of 27 bytes or fewer fits entirely inline and
/// produces no blob records; the pointer field is then the null pointer.
pub fn build_chain(content: &[u8]) -> Chain {
    let content_len = content.len();
    let vil = varint::encoded_len(content_len as u32);

    if content_len <= HEADER_INLINE_LIMIT - 1 {
        let mut header_payload = [0u8; HEADER_PAYLOAD_LEN];
        let len_bytes = varint::encode_var_int(content_len as u32);
        header_payload[..len_bytes.len()].copy_from_slice(&len_bytes);
        header_payload[len_bytes.len()..len_bytes.len() + content_len].copy_from_slice(content);
        return Chain {
            header_payload,
            blobs: Vec::new(),
        };
    }

    let mut header_payload = [0u8; HEADER_PAYLOAD_LEN];
    let len_bytes = varint::encode_var_int(content_len as u32);
    header_payload[..vil].copy_from_slice(&len_bytes);
    let inline_len = HEADER_INLINE_LIMIT - vil;
    header_payload[vil..HEADER_INLINE_LIMIT].copy_from_slice(&content[..inline_len]);

    let remainder = &content[inline_len..];
    let num_blobs = remainder.len().div_ceil(BLOB_PAYLOAD_LEN);
    let mut padded = vec![0u8; num_blobs * BLOB_PAYLOAD_LEN];
    padded[..remainder.len()].copy_from_slice(remainder);

    let mut chain = Vec::with_capacity(num_blobs);
    let mut ptr = NULL_POINTER;
    let mut back = padded.len();
    loop {
        let front = back.saturating_sub(BLOB_PAYLOAD_LEN);
        let mut payload = [0u8; BLOB_PAYLOAD_LEN];
        payload.copy_from_slice(&padded[front..back]);
        let record = BlobRecord { payload, pointer: ptr };
        ptr = record.id();
        chain.push(record);
        if front == 0 {
            break;
        }
        back = front;
    }
    chain.reverse();

    header_payload[HEADER_INLINE_LIMIT..].copy_from_slice(&ptr);
    Chain {
        header_payload,
        blobs: chain,
    }
}

/// Reassemble the content addressed by a `chain20` header payload, given a
/// lookup from blob id to its record. Returns `IncompleteBlob` naming the
/// first missing pointer if the chain cannot be fully walked locally — the
/// caller (the feed store) uses that to drive a want-request.
pub fn reassemble<F>(fid: &[u8; 32], seq: u32, header_payload: &[u8; HEADER_PAYLOAD_LEN], mut lookup: F) -> Result<Vec<u8>>
where
    F: FnMut(&[u8; BLOB_POINTER_LEN]) -> Option<BlobRecord>,
{
    let (content_len, vil) = varint::decode_var_int(header_payload).ok_or_else(|| {
        FeedError::Malformed("chain20 payload missing var int length prefix".into())
    })?;
    let content_len = content_len as usize;

    if content_len <= HEADER_INLINE_LIMIT - 1 {
        return Ok(header_payload[vil..vil + content_len].to_vec());
    }

    let inline_len = HEADER_INLINE_LIMIT - vil;
    let mut out = header_payload[vil..HEADER_INLINE_LIMIT][..inline_len].to_vec();

    let mut next_id = {
        let mut id = [0u8; BLOB_POINTER_LEN];
        id.copy_from_slice(&header_payload[HEADER_INLINE_LIMIT..]);
        id
    };

    while next_id != NULL_POINTER {
        let record = lookup(&next_id).ok_or_else(|| FeedError::IncompleteBlob {
            fid: hex::encode(fid),
            seq,
            missing: hex::encode(next_id),
        })?;
        out.extend_from_slice(&record.payload);
        next_id = record.pointer;
    }

    out.truncate(content_len);
    Ok(out)
}
