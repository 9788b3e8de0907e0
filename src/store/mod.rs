//! The feed store — per-fid header + append-only log files, plus the
//! content-addressed blob pool shared by all feeds.
//!
//! On disk:
//!
//! ```text
//! <base>/_feeds/<hex fid>.head   128 B feed header
//! <base>/_feeds/<hex fid>.log    packets for seq in (anchor_seq, front_seq], 128 B each
//! <base>/_blobs/<xx>/<rest>      one file per blob record, named by hex(blob_id)
//! ```
//!
//! Every append is header-after-body: the packet (or blob) lands on disk
//! before the header is rewritten to advance `front_seq`, so a reader that
//! observes a given `front_seq` can always find its packet.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::blob::{self, BlobRecord, NULL_POINTER};
use crate::config::EngineConfig;
use crate::crypto;
use crate::error::{FeedError, Result};
use crate::header::FeedHeader;
use crate::packet::{self, Packet, PacketType, PREFIX_LEN};

pub const FID_LEN: usize = 32;
pub const MID_LEN: usize = 20;

fn hex_fid(fid: &[u8; FID_LEN]) -> String {
    hex::encode(fid)
}

/// An open feed: its header, kept in memory and resynced to disk on every
/// append.
#[derive(Debug, Clone)]
pub struct Feed {
    pub header: FeedHeader,
}

impl Feed {
    pub fn fid(&self) -> [u8; FID_LEN] {
        self.header.fid
    }

    pub fn length(&self) -> u32 {
        self.header.front_seq - self.header.anchor_seq
    }
}

pub struct FeedStore {
    base_dir: PathBuf,
    prefix: [u8; PREFIX_LEN],
}

impl FeedStore {
    /// Open (creating if absent) the feed store rooted at `config.base_dir`,
    /// speaking `config.prefix` on the wire.
    pub fn open(config: EngineConfig) -> Result<Self> {
        fs::create_dir_all(config.base_dir.join("_feeds"))?;
        fs::create_dir_all(config.base_dir.join("_blobs"))?;
        Ok(Self {
            base_dir: config.base_dir,
            prefix: config.prefix,
        })
    }

    fn header_path(&self, fid: &[u8; FID_LEN]) -> PathBuf {
        self.base_dir.join("_feeds").join(format!("{}.head", hex_fid(fid)))
    }

    fn log_path(&self, fid: &[u8; FID_LEN]) -> PathBuf {
        self.base_dir.join("_feeds").join(format!("{}.log", hex_fid(fid)))
    }

    fn blob_path(&self, blob_id: &[u8; MID_LEN]) -> PathBuf {
        let hex = hex::encode(blob_id);
        self.base_dir.join("_blobs").join(&hex[..2]).join(&hex[2..])
    }

    /// Create a brand new feed and persist its header. Does not append the
    /// genesis packet — callers append whichever genesis packet type fits
    /// their role (`plain48`, `ischild`, `iscontn`).
    pub fn create_feed(
        &self,
        fid: [u8; FID_LEN],
        parent_fid: [u8; FID_LEN],
        parent_seq: u32,
    ) -> Result<Feed> {
        let header = FeedHeader::new_genesis(fid, parent_fid, parent_seq);
        self.save_header(&header)?;
        File::create(self.log_path(&fid))?;
        debug!(fid = %hex_fid(&fid), "created feed");
        Ok(Feed { header })
    }

    pub fn open_feed(&self, fid: &[u8; FID_LEN]) -> Result<Feed> {
        let mut f = File::open(self.header_path(fid))?;
        let header = FeedHeader::read(&mut f).map_err(|e| FeedError::Malformed(e.to_string()))?;
        Ok(Feed { header })
    }

    pub fn feed_exists(&self, fid: &[u8; FID_LEN]) -> bool {
        self.header_path(fid).exists()
    }

    /// Size in bytes of `fid`'s on-disk log file. Used by the recovery
    /// scanner to detect a header whose `front_seq` promises more packets
    /// than the log actually contains.
    pub fn log_byte_len(&self, fid: &[u8; FID_LEN]) -> Result<u64> {
        Ok(fs::metadata(self.log_path(fid))?.len())
    }

    fn save_header(&self, header: &FeedHeader) -> Result<()> {
        let mut f = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.header_path(&header.fid))?;
        header.write(&mut f).map_err(|e| FeedError::Malformed(e.to_string()))?;
        Ok(())
    }

    fn resolve_index(feed: &Feed, i: i64) -> i64 {
        if i < 0 {
            feed.header.front_seq as i64 + i + 1
        } else {
            i
        }
    }

    /// Read the raw 128-byte wire packet at logical index `i`.
    pub fn get_wire(&self, feed: &Feed, i: i64) -> Result<[u8; packet::WIRE_PACKET_SIZE]> {
        let i = Self::resolve_index(feed, i);
        let anchor_seq = feed.header.anchor_seq as i64;
        let front_seq = feed.header.front_seq as i64;
        if i > front_seq || i <= anchor_seq {
            return Err(FeedError::OutOfRange {
                seq: i,
                anchor_seq: feed.header.anchor_seq,
                front_seq: feed.header.front_seq,
            });
        }

        let relative_i = i - anchor_seq;
        let mut f = File::open(self.log_path(&feed.header.fid))?;
        f.seek(SeekFrom::Start((packet::WIRE_PACKET_SIZE as u64) * (relative_i as u64 - 1)))?;
        let mut wire = [0u8; packet::WIRE_PACKET_SIZE];
        f.read_exact(&mut wire)?;
        Ok(wire)
    }

    pub fn get_type(&self, feed: &Feed, i: i64) -> Result<PacketType> {
        let wire = self.get_wire(feed, i)?;
        PacketType::from_u8(wire[15]).ok_or_else(|| FeedError::Malformed(format!("unknown packet type {:#04x}", wire[15])))
    }

    /// For non-`chain20` packets, the 48-byte payload verbatim. For
    /// `chain20`, the fully reassembled content.
    pub fn get_payload(&self, feed: &Feed, i: i64) -> Result<Vec<u8>> {
        let wire = self.get_wire(feed, i)?;
        let typ = PacketType::from_u8(wire[15]).ok_or_else(|| FeedError::Malformed(format!("unknown packet type {:#04x}", wire[15])))?;
        let mut header_payload = [0u8; packet::PAYLOAD_LEN];
        header_payload.copy_from_slice(&wire[16..64]);

        if typ != PacketType::Chain20 {
            return Ok(header_payload.to_vec());
        }

        let seq = Self::resolve_index(feed, i) as u32;
        blob::reassemble(&feed.header.fid, seq, &header_payload, |id| self.read_blob(id))
    }

    fn read_blob(&self, blob_id: &[u8; MID_LEN]) -> Option<BlobRecord> {
        let mut f = File::open(self.blob_path(blob_id)).ok()?;
        let mut wire = [0u8; blob::BLOB_RECORD_SIZE];
        f.read_exact(&mut wire).ok()?;
        Some(BlobRecord::from_wire(&wire))
    }

    fn write_blob(&self, record: &BlobRecord) -> Result<()> {
        let id = record.id();
        let path = self.blob_path(&id);
        fs::create_dir_all(path.parent().expect("blob path has a parent"))?;
        let mut f = File::create(path)?;
        f.write_all(&record.to_wire())?;
        Ok(())
    }

    fn append_wire(&self, feed: &mut Feed, wire: [u8; packet::WIRE_PACKET_SIZE], mid: [u8; MID_LEN]) -> Result<()> {
        let mut f = OpenOptions::new().append(true).open(self.log_path(&feed.header.fid))?;
        f.write_all(&wire)?;
        f.flush()?;

        feed.header.front_mid = mid;
        feed.header.front_seq += 1;
        self.save_header(&feed.header)
    }

    fn sign_and_append(
        &self,
        feed: &mut Feed,
        payload: &[u8],
        typ: PacketType,
        skey: &[u8; crypto::SKEY_LEN],
    ) -> Result<()> {
        if self.has_ended(feed)? {
            return Err(FeedError::Ended { fid: hex_fid(&feed.header.fid) });
        }
        let seq = feed.header.front_seq + 1;
        let (wire, mid) = packet::encode(&self.prefix, &feed.header.fid, seq, &feed.header.front_mid, payload, typ, skey)?;
        self.append_wire(feed, wire, mid)
    }

    fn has_ended(&self, feed: &Feed) -> Result<bool> {
        if feed.header.front_seq <= feed.header.anchor_seq {
            return Ok(false);
        }
        Ok(self.get_type(feed, -1)? == PacketType::ContDas)
    }

    pub fn append_plain48(&self, feed: &mut Feed, payload: &[u8], skey: &[u8; crypto::SKEY_LEN]) -> Result<()> {
        self.sign_and_append(feed, payload, PacketType::Plain48, skey)
    }

    pub fn append_ischild(&self, feed: &mut Feed, parent_fid: &[u8; FID_LEN], skey: &[u8; crypto::SKEY_LEN]) -> Result<()> {
        let mut payload = [0u8; packet::PAYLOAD_LEN];
        payload[..FID_LEN].copy_from_slice(parent_fid);
        self.sign_and_append(feed, &payload, PacketType::IsChild, skey)
    }

    pub fn append_iscontn(&self, feed: &mut Feed, payload: &[u8], skey: &[u8; crypto::SKEY_LEN]) -> Result<()> {
        self.sign_and_append(feed, payload, PacketType::IsContn, skey)
    }

    pub fn append_mkchild(&self, feed: &mut Feed, child_fid: &[u8; FID_LEN], skey: &[u8; crypto::SKEY_LEN]) -> Result<()> {
        let mut payload = [0u8; packet::PAYLOAD_LEN];
        payload[..FID_LEN].copy_from_slice(child_fid);
        self.sign_and_append(feed, &payload, PacketType::MkChild, skey)
    }

    pub fn append_contdas(&self, feed: &mut Feed, contn_fid: &[u8; FID_LEN], skey: &[u8; crypto::SKEY_LEN]) -> Result<()> {
        let mut payload = [0u8; packet::PAYLOAD_LEN];
        payload[..FID_LEN].copy_from_slice(contn_fid);
        self.sign_and_append(feed, &payload, PacketType::ContDas, skey)
    }

    pub fn append_updfile(&self, feed: &mut Feed, file_name: &str, base_version: u32, skey: &[u8; crypto::SKEY_LEN]) -> Result<()> {
        let name_bytes = file_name.as_bytes();
        if name_bytes.len() > 43 {
            return Err(FeedError::Malformed(format!("file name {file_name} exceeds 43 bytes")));
        }
        let len_bytes = crate::varint::encode_var_int(name_bytes.len() as u32);
        let mut payload = vec![0u8; packet::PAYLOAD_LEN];
        payload[..len_bytes.len()].copy_from_slice(&len_bytes);
        let name_start = len_bytes.len();
        payload[name_start..name_start + name_bytes.len()].copy_from_slice(name_bytes);
        let version_start = name_start + name_bytes.len();
        payload[version_start..version_start + 4].copy_from_slice(&base_version.to_be_bytes());
        self.sign_and_append(feed, &payload, PacketType::UpdFile, skey)
    }

    pub fn append_applyup(&self, feed: &mut Feed, file_fid: &[u8; FID_LEN], apply_version: u32, skey: &[u8; crypto::SKEY_LEN]) -> Result<()> {
        let mut payload = [0u8; packet::PAYLOAD_LEN];
        payload[..FID_LEN].copy_from_slice(file_fid);
        payload[FID_LEN..FID_LEN + 4].copy_from_slice(&apply_version.to_be_bytes());
        self.sign_and_append(feed, &payload, PacketType::ApplyUp, skey)
    }

    /// Construct a blob chain for `content`, write every blob record, then
    /// append the `chain20` header packet. The header packet is appended
    /// last so a reader never sees `front_seq` point at a chain whose blobs
    /// are not yet durable.
    pub fn append_blob(&self, feed: &mut Feed, content: &[u8], skey: &[u8; crypto::SKEY_LEN]) -> Result<()> {
        let chain = blob::build_chain(content);
        for record in &chain.blobs {
            self.write_blob(record)?;
        }
        self.sign_and_append(feed, &chain.header_payload, PacketType::Chain20, skey)
    }

    /// Verify an incoming wire packet under `(fid, front_seq+1, front_mid)`
    /// and append it if it checks out. Returns `Ok(false)` (not an error)
    /// when the signature fails to verify, matching the protocol's rule
    /// that bad packets are dropped, not fatal.
    pub fn verify_and_append_wire(&self, feed: &mut Feed, wire: &[u8; packet::WIRE_PACKET_SIZE]) -> Result<bool> {
        if self.has_ended(feed)? {
            return Err(FeedError::Ended { fid: hex_fid(&feed.header.fid) });
        }
        let seq = feed.header.front_seq + 1;
        let pkt: Packet = match packet::decode_and_verify(&self.prefix, &feed.header.fid, seq, &feed.header.front_mid, wire) {
            Ok(pkt) => pkt,
            Err(_) => {
                warn!(fid = %hex_fid(&feed.header.fid), seq, "dropped packet with invalid signature");
                return Ok(false);
            }
        };
        self.append_wire(feed, *wire, pkt.mid)?;
        Ok(true)
    }

    /// Accepts `blob_wire` only if its id matches [`Self::waiting_for_blob`].
    /// Persists it, then re-probes so the caller learns whether the chain is
    /// now complete (`None`) or still waiting on a further blob (`Some`).
    pub fn verify_and_append_blob(&self, feed: &Feed, blob_wire: &[u8; blob::BLOB_RECORD_SIZE]) -> Result<Option<[u8; MID_LEN]>> {
        let record = BlobRecord::from_wire(blob_wire);
        let expected = self.waiting_for_blob(feed)?;
        match expected {
            Some(want) if want == record.id() => {
                self.write_blob(&record)?;
                self.waiting_for_blob(feed)
            }
            _ => Ok(expected),
        }
    }

    pub fn next_dmx(&self, feed: &Feed) -> [u8; packet::DMX_LEN] {
        packet::dmx_for(&self.prefix, &feed.header.fid, feed.header.front_seq + 1, &feed.header.front_mid)
    }

    /// `None` if the front packet is not `chain20` or its chain is already
    /// complete; otherwise the first missing blob pointer.
    pub fn waiting_for_blob(&self, feed: &Feed) -> Result<Option<[u8; MID_LEN]>> {
        if feed.header.front_seq <= feed.header.anchor_seq {
            return Ok(None);
        }
        let wire = self.get_wire(feed, -1)?;
        if PacketType::from_u8(wire[15]) != Some(PacketType::Chain20) {
            return Ok(None);
        }

        let mut ptr = [0u8; MID_LEN];
        ptr.copy_from_slice(&wire[16 + blob::HEADER_INLINE_LIMIT..16 + blob::HEADER_INLINE_LIMIT + MID_LEN]);

        while ptr != NULL_POINTER {
            match self.read_blob(&ptr) {
                Some(record) => ptr = record.pointer,
                None => return Ok(Some(ptr)),
            }
        }
        Ok(None)
    }

    pub fn want_request(&self, feed: &Feed) -> Result<Vec<u8>> {
        let want_dmx = packet::want_dmx(&feed.header.fid);
        match self.waiting_for_blob(feed)? {
            None => {
                let mut out = Vec::with_capacity(43);
                out.extend_from_slice(&want_dmx);
                out.extend_from_slice(&feed.header.fid);
                out.extend_from_slice(&(feed.header.front_seq + 1).to_be_bytes());
                Ok(out)
            }
            Some(blob_ptr) => {
                let mut out = Vec::with_capacity(63);
                out.extend_from_slice(&want_dmx);
                out.extend_from_slice(&feed.header.fid);
                out.extend_from_slice(&feed.header.front_seq.to_be_bytes());
                out.extend_from_slice(&blob_ptr);
                Ok(out)
            }
        }
    }

    pub fn parent(&self, feed: &Feed) -> Result<Option<[u8; FID_LEN]>> {
        if feed.header.anchor_seq != 0 || feed.header.front_seq < 1 {
            return Ok(None);
        }
        let wire = self.get_wire(feed, 1)?;
        if PacketType::from_u8(wire[15]) != Some(PacketType::IsChild) {
            return Ok(None);
        }
        let mut fid = [0u8; FID_LEN];
        fid.copy_from_slice(&wire[16..48]);
        Ok(Some(fid))
    }

    pub fn children(&self, feed: &Feed) -> Result<Vec<[u8; FID_LEN]>> {
        let mut children = Vec::new();
        for i in (feed.header.anchor_seq + 1)..=feed.header.front_seq {
            let wire = self.get_wire(feed, i as i64)?;
            if PacketType::from_u8(wire[15]) == Some(PacketType::MkChild) {
                let mut fid = [0u8; FID_LEN];
                fid.copy_from_slice(&wire[16..48]);
                children.push(fid);
            }
        }
        Ok(children)
    }

    pub fn continuation(&self, feed: &Feed) -> Result<Option<[u8; FID_LEN]>> {
        if feed.header.front_seq < 1 {
            return Ok(None);
        }
        let wire = self.get_wire(feed, -1)?;
        if PacketType::from_u8(wire[15]) != Some(PacketType::ContDas) {
            return Ok(None);
        }
        let mut fid = [0u8; FID_LEN];
        fid.copy_from_slice(&wire[16..48]);
        Ok(Some(fid))
    }

    pub fn predecessor(&self, feed: &Feed) -> Result<Option<[u8; FID_LEN]>> {
        if feed.header.anchor_seq != 0 {
            return Ok(None);
        }
        let wire = self.get_wire(feed, 1)?;
        if PacketType::from_u8(wire[15]) != Some(PacketType::IsContn) {
            return Ok(None);
        }
        let mut fid = [0u8; FID_LEN];
        fid.copy_from_slice(&wire[16..48]);
        Ok(Some(fid))
    }

    /// Reads the `updfile` packet expected at seq 2 of a file update feed,
    /// returning `(file_name, base_version)`.
    pub fn read_updfile(&self, feed: &Feed, seq: i64) -> Result<(String, u32)> {
        let wire = self.get_wire(feed, seq)?;
        if PacketType::from_u8(wire[15]) != Some(PacketType::UpdFile) {
            return Err(FeedError::Malformed("packet at given seq is not updfile".into()));
        }
        let payload = &wire[16..64];
        let (name_len, vil) = crate::varint::decode_var_int(payload)
            .ok_or_else(|| FeedError::Malformed("updfile payload missing var int length".into()))?;
        let name_len = name_len as usize;
        let name = String::from_utf8(payload[vil..vil + name_len].to_vec())
            .map_err(|e| FeedError::Malformed(e.to_string()))?;
        let version_start = vil + name_len;
        let version = u32::from_be_bytes(payload[version_start..version_start + 4].try_into().unwrap());
        Ok((name, version))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use tempfile::tempdir;

    fn store() -> (FeedStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        (FeedStore::open(EngineConfig::new(dir.path())).unwrap(), dir)
    }

    #[test]
    fn create_append_and_read_round_trip() {
        let (store, _dir) = store();
        let (skey, fid) = crypto::generate_keypair(&mut OsRng);
        let mut feed = store.create_feed(fid, [0u8; FID_LEN], 0).unwrap();

        store.append_plain48(&mut feed, b"hello", &skey).unwrap();
        assert_eq!(feed.length(), 1);

        let reopened = store.open_feed(&fid).unwrap();
        assert_eq!(reopened.header.front_seq, 1);

        let payload = store.get_payload(&feed, 1).unwrap();
        assert_eq!(&payload[..5], b"hello");
    }

    #[test]
    fn blob_round_trip_through_store() {
        let (store, _dir) = store();
        let (skey, fid) = crypto::generate_keypair(&mut OsRng);
        let mut feed = store.create_feed(fid, [0u8; FID_LEN], 0).unwrap();

        let content: Vec<u8> = (0..400u32).map(|i| (i % 250) as u8).collect();
        store.append_blob(&mut feed, &content, &skey).unwrap();

        assert_eq!(store.waiting_for_blob(&feed).unwrap(), None);
        let payload = store.get_payload(&feed, 1).unwrap();
        assert_eq!(payload, content);
    }

    #[test]
    fn out_of_range_seq_is_rejected() {
        let (store, _dir) = store();
        let (skey, fid) = crypto::generate_keypair(&mut OsRng);
        let mut feed = store.create_feed(fid, [0u8; FID_LEN], 0).unwrap();
        store.append_plain48(&mut feed, b"x", &skey).unwrap();
        assert!(store.get_wire(&feed, 5).is_err());
        assert!(store.get_wire(&feed, 0).is_err());
    }

    #[test]
    fn mkchild_then_children_reports_child() {
        let (store, _dir) = store();
        let (parent_skey, parent_fid) = crypto::generate_keypair(&mut OsRng);
        let (_child_skey, child_fid) = crypto::generate_keypair(&mut OsRng);
        let mut parent = store.create_feed(parent_fid, [0u8; FID_LEN], 0).unwrap();
        store.append_mkchild(&mut parent, &child_fid, &parent_skey).unwrap();
        let children = store.children(&parent).unwrap();
        assert_eq!(children, vec![child_fid]);
    }

    #[test]
    fn appending_after_contdas_is_rejected() {
        let (store, _dir) = store();
        let (skey, fid) = crypto::generate_keypair(&mut OsRng);
        let (_contn_skey, contn_fid) = crypto::generate_keypair(&mut OsRng);
        let mut feed = store.create_feed(fid, [0u8; FID_LEN], 0).unwrap();
        store.append_contdas(&mut feed, &contn_fid, &skey).unwrap();
        assert!(store.append_plain48(&mut feed, b"late", &skey).is_err());
    }
}
