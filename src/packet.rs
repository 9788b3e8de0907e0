//! Wire packet codec — fixed 128-byte signed records.
//!
//! # On-disk layout (128 bytes)
//!
//! ```text
//! Offset  Size  Field
//!    0      8   reserved   = protocol prefix literal, e.g. "tiny-v02"
//!    8      7   dmx        sha256(block_name)[0..7]
//!   15      1   type       packet type tag
//!   16     48   payload    zero-padded if the logical payload is shorter
//!   64     64   signature  ed25519 signature over the 120-byte expanded body
//! ```
//!
//! # Virtual / expanded block (184 bytes)
//! Used only for signing and mid computation, never written to disk as-is:
//!
//! ```text
//! prefix(8) || fid(32) || seq(4) || prev_mid(20) || dmx(7) || type(1) || payload(48) || signature(64)
//! ```
//!
//! `block_name` is the first 64 bytes of the expanded block. `dmx` is the
//! first 7 bytes of `sha256(block_name)`. The signature covers everything
//! up to (but not including) itself — the first 120 bytes of the expanded
//! block. `mid` is the first 20 bytes of `sha256(expanded || signature)`.
//!
//! Every accepted packet's signature is verified under the claimed fid; the
//! protocol makes no provision for skipping this check.

use crate::crypto;
use crate::error::{FeedError, Result};

pub const WIRE_PACKET_SIZE: usize = 128;
pub const PREFIX_LEN: usize = 8;
pub const DMX_LEN: usize = 7;
pub const PAYLOAD_LEN: usize = 48;
pub const FID_LEN: usize = 32;
pub const SEQ_LEN: usize = 4;
pub const MID_LEN: usize = 20;
pub const SIGNATURE_LEN: usize = 64;

/// Current protocol prefix. `PREFIX_LEGACY` exists for interop with peers
/// still speaking the previous wire format; exactly one prefix is in effect
/// per build (see [`crate::config::StoreConfig::prefix`]).
pub const PREFIX_CURRENT: &[u8; PREFIX_LEN] = b"tiny-v02";
pub const PREFIX_LEGACY: &[u8; PREFIX_LEN] = b"tiny-v01";

/// Packet type tags (1 byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Plain48 = 0x00,
    Chain20 = 0x01,
    IsChild = 0x02,
    IsContn = 0x03,
    MkChild = 0x04,
    ContDas = 0x05,
    AckNldg = 0x06,
    UpdFile = 0x07,
    ApplyUp = 0x08,
}

impl PacketType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(Self::Plain48),
            0x01 => Some(Self::Chain20),
            0x02 => Some(Self::IsChild),
            0x03 => Some(Self::IsContn),
            0x04 => Some(Self::MkChild),
            0x05 => Some(Self::ContDas),
            0x06 => Some(Self::AckNldg),
            0x07 => Some(Self::UpdFile),
            0x08 => Some(Self::ApplyUp),
            _ => None,
        }
    }
}

/// A decoded, already-verified packet. The wire bytes are kept alongside the
/// decoded fields since callers (the feed store) persist the wire form
/// verbatim.
#[derive(Debug, Clone)]
pub struct Packet {
    pub fid: [u8; FID_LEN],
    pub seq: u32,
    pub prev_mid: [u8; MID_LEN],
    pub typ: PacketType,
    pub payload: [u8; PAYLOAD_LEN],
    pub wire: [u8; WIRE_PACKET_SIZE],
    pub mid: [u8; MID_LEN],
}

/// `block_name` = prefix || fid || seq || prev_mid (64 bytes).
fn block_name(prefix: &[u8; PREFIX_LEN], fid: &[u8; FID_LEN], seq: u32, prev_mid: &[u8; MID_LEN]) -> [u8; 64] {
    let mut out = [0u8; 64];
    out[0..8].copy_from_slice(prefix);
    out[8..40].copy_from_slice(fid);
    out[40..44].copy_from_slice(&seq.to_be_bytes());
    out[44..64].copy_from_slice(prev_mid);
    out
}

/// `dmx` a peer should look for given the addressing triple.
pub fn dmx_for(prefix: &[u8; PREFIX_LEN], fid: &[u8; FID_LEN], seq: u32, prev_mid: &[u8; MID_LEN]) -> [u8; DMX_LEN] {
    let name = block_name(prefix, fid, seq, prev_mid);
    let digest = crypto::sha256(&name);
    let mut dmx = [0u8; DMX_LEN];
    dmx.copy_from_slice(&digest[..DMX_LEN]);
    dmx
}

fn expanded_block(
    prefix: &[u8; PREFIX_LEN],
    fid: &[u8; FID_LEN],
    seq: u32,
    prev_mid: &[u8; MID_LEN],
    dmx: &[u8; DMX_LEN],
    typ: PacketType,
    payload: &[u8; PAYLOAD_LEN],
) -> [u8; 120] {
    let mut out = [0u8; 120];
    out[0..64].copy_from_slice(&block_name(prefix, fid, seq, prev_mid));
    out[64..71].copy_from_slice(dmx);
    out[71] = typ as u8;
    out[72..120].copy_from_slice(payload);
    out
}

/// Left-pad (actually right-pad with trailing zeros) `data` to 48 bytes.
/// Payloads longer than 48 bytes are rejected by the caller before this is
/// reached; this only fills the remainder.
fn pad_payload(data: &[u8]) -> Result<[u8; PAYLOAD_LEN]> {
    if data.len() > PAYLOAD_LEN {
        return Err(FeedError::Malformed(format!(
            "payload of {} bytes exceeds {PAYLOAD_LEN}",
            data.len()
        )));
    }
    let mut payload = [0u8; PAYLOAD_LEN];
    payload[..data.len()].copy_from_slice(data);
    Ok(payload)
}

/// Encode, sign, and return `(wire, mid)`. Deterministic for fixed inputs.
pub fn encode(
    prefix: &[u8; PREFIX_LEN],
    fid: &[u8; FID_LEN],
    seq: u32,
    prev_mid: &[u8; MID_LEN],
    payload: &[u8],
    typ: PacketType,
    skey: &[u8; crypto::SKEY_LEN],
) -> Result<([u8; WIRE_PACKET_SIZE], [u8; MID_LEN])> {
    let payload = pad_payload(payload)?;
    let dmx = dmx_for(prefix, fid, seq, prev_mid);
    let expanded = expanded_block(prefix, fid, seq, prev_mid, &dmx, typ, &payload);
    let signature = crypto::sign(skey, &expanded);

    let mut wire = [0u8; WIRE_PACKET_SIZE];
    wire[0..8].copy_from_slice(prefix);
    wire[8..15].copy_from_slice(&dmx);
    wire[15] = typ as u8;
    wire[16..64].copy_from_slice(&payload);
    wire[64..128].copy_from_slice(&signature);

    let mut full = [0u8; 184];
    full[..120].copy_from_slice(&expanded);
    full[120..].copy_from_slice(&signature);
    let digest = crypto::sha256(&full);
    let mut mid = [0u8; MID_LEN];
    mid.copy_from_slice(&digest[..MID_LEN]);

    Ok((wire, mid))
}

/// Decode and verify a 128-byte wire packet under the claimed addressing
/// triple `(fid, seq, prev_mid)`. Recomputes `dmx` and checks the signature;
/// returns `InvalidSignature` on any mismatch, never panics on attacker
/// input.
pub fn decode_and_verify(
    prefix: &[u8; PREFIX_LEN],
    fid: &[u8; FID_LEN],
    seq: u32,
    prev_mid: &[u8; MID_LEN],
    wire: &[u8; WIRE_PACKET_SIZE],
) -> Result<Packet> {
    let expected_dmx = dmx_for(prefix, fid, seq, prev_mid);
    let wire_dmx = &wire[8..15];
    if wire_dmx != expected_dmx {
        return Err(FeedError::InvalidSignature {
            fid: hex::encode(fid),
        });
    }

    let typ = PacketType::from_u8(wire[15]).ok_or_else(|| {
        FeedError::Malformed(format!("unknown packet type tag {:#04x}", wire[15]))
    })?;

    let mut payload = [0u8; PAYLOAD_LEN];
    payload.copy_from_slice(&wire[16..64]);

    let mut signature = [0u8; SIGNATURE_LEN];
    signature.copy_from_slice(&wire[64..128]);

    let expanded = expanded_block(prefix, fid, seq, prev_mid, &expected_dmx, typ, &payload);
    crypto::verify(fid, &expanded, &signature).map_err(|_| FeedError::InvalidSignature {
        fid: hex::encode(fid),
    })?;

    let mut full = [0u8; 184];
    full[..120].copy_from_slice(&expanded);
    full[120..].copy_from_slice(&signature);
    let digest = crypto::sha256(&full);
    let mut mid = [0u8; MID_LEN];
    mid.copy_from_slice(&digest[..MID_LEN]);

    Ok(Packet {
        fid: *fid,
        seq,
        prev_mid: *prev_mid,
        typ,
        payload,
        wire: *wire,
        mid,
    })
}

/// `sha256(fid || "want")[0..7]` — the demultiplex tag prefixing every
/// want-request.
pub fn want_dmx(fid: &[u8; FID_LEN]) -> [u8; DMX_LEN] {
    let mut buf = Vec::with_capacity(FID_LEN + 4);
    buf.extend_from_slice(fid);
    buf.extend_from_slice(b"want");
    let digest = crypto::sha256(&buf);
    let mut out = [0u8; DMX_LEN];
    out.copy_from_slice(&digest[..DMX_LEN]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::OsRng;

    fn keypair() -> ([u8; crypto::SKEY_LEN], [u8; FID_LEN]) {
        crypto::generate_keypair(&mut OsRng)
    }

    #[test]
    fn encode_then_decode_verifies() {
        let (skey, fid) = keypair();
        let prev_mid = {
            let mut m = [0u8; MID_LEN];
            m.copy_from_slice(&fid[..MID_LEN]);
            m
        };
        let mut payload = [0u8; PAYLOAD_LEN];
        payload[..5].copy_from_slice(b"hello");

        let (wire, mid) = encode(PREFIX_CURRENT, &fid, 1, &prev_mid, &payload, PacketType::Plain48, &skey).unwrap();
        assert_eq!(wire.len(), WIRE_PACKET_SIZE);

        let pkt = decode_and_verify(PREFIX_CURRENT, &fid, 1, &prev_mid, &wire).unwrap();
        assert_eq!(pkt.mid, mid);
        assert_eq!(&pkt.payload[..5], b"hello");
        assert_eq!(pkt.typ, PacketType::Plain48);
    }

    #[test]
    fn tampered_wire_fails_verification() {
        let (skey, fid) = keypair();
        let prev_mid = [0u8; MID_LEN];
        let payload = [0u8; PAYLOAD_LEN];
        let (mut wire, _) = encode(PREFIX_CURRENT, &fid, 1, &prev_mid, &payload, PacketType::Plain48, &skey).unwrap();
        wire[20] ^= 0xFF;
        assert!(decode_and_verify(PREFIX_CURRENT, &fid, 1, &prev_mid, &wire).is_err());
    }

    #[test]
    fn payload_over_48_bytes_is_rejected() {
        let (skey, fid) = keypair();
        let prev_mid = [0u8; MID_LEN];
        let too_long = vec![0u8; 49];
        assert!(encode(PREFIX_CURRENT, &fid, 1, &prev_mid, &too_long, PacketType::Plain48, &skey).is_err());
    }

    proptest! {
        #[test]
        fn encode_decode_round_trips_any_payload_and_seq(
            payload in proptest::collection::vec(any::<u8>(), 0..=PAYLOAD_LEN),
            seq in any::<u32>(),
            prev_mid_bytes in proptest::collection::vec(any::<u8>(), MID_LEN),
        ) {
            let (skey, fid) = keypair();
            let mut prev_mid = [0u8; MID_LEN];
            prev_mid.copy_from_slice(&prev_mid_bytes);

            let (wire, mid) = encode(PREFIX_CURRENT, &fid, seq, &prev_mid, &payload, PacketType::Plain48, &skey).unwrap();
            let pkt = decode_and_verify(PREFIX_CURRENT, &fid, seq, &prev_mid, &wire).unwrap();

            prop_assert_eq!(pkt.mid, mid);
            prop_assert_eq!(&pkt.payload[..payload.len()], payload.as_slice());
            prop_assert!(pkt.payload[payload.len()..].iter().all(|&b| b == 0));
        }

        #[test]
        fn flipping_any_payload_bit_breaks_verification(
            payload in proptest::collection::vec(any::<u8>(), 1..=PAYLOAD_LEN),
            bit in 0usize..8,
        ) {
            let (skey, fid) = keypair();
            let prev_mid = [0u8; MID_LEN];
            let (mut wire, _) = encode(PREFIX_CURRENT, &fid, 1, &prev_mid, &payload, PacketType::Plain48, &skey).unwrap();
            wire[16] ^= 1 << bit;
            prop_assert!(decode_and_verify(PREFIX_CURRENT, &fid, 1, &prev_mid, &wire).is_err());
        }
    }
}
