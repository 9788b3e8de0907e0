//! Index-bypass recovery scanner — reconstruct `vc_dict`/`apply_dict`
//! without the persisted snapshot.
//!
//! # How it works
//!
//! The scanner lists every `*.head` file under `_feeds/`, independent of
//! any prior state, and classifies each discoverable feed:
//!
//! | Health | Meaning |
//! |---|---|
//! | `Healthy` | header parses, log has at least as many packets as `front_seq` declares, parent (if any) exists |
//! | `HeaderCorrupt` | the 128-byte header does not parse |
//! | `TruncatedLog` | the log file is shorter than `front_seq - anchor_seq` packets |
//! | `DanglingParent` | the header names a `parent_fid` with no corresponding feed on disk |
//!
//! Only `Healthy` feeds are walked for reconstruction. A file update feed is
//! recognized by its `ischild`/`updfile` genesis pair; a feed is considered
//! superseded (and excluded from the reconstructed `vc_dict`) if one of its
//! children has itself become a file feed for the same name — the emergency
//! rotation pathway in §4.5. The terminal feed in that chain, plus its still
//! dormant emergency child, become the recovered binding.

use std::collections::HashMap;
use std::fs;

use chrono::Utc;

use crate::error::Result;
use crate::packet::{PacketType, WIRE_PACKET_SIZE};
use crate::store::{Feed, FeedStore, FID_LEN};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedHealth {
    Healthy,
    HeaderCorrupt,
    TruncatedLog { declared: u32, available: u32 },
    DanglingParent { missing_fid: String },
}

#[derive(Debug, Clone)]
pub struct FeedDiagnostic {
    pub fid: String,
    pub health: FeedHealth,
}

#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub feeds: Vec<FeedDiagnostic>,
    pub vc_dict: HashMap<String, (String, String)>,
    pub apply_dict: HashMap<String, u32>,
    /// Unix timestamp the scan was taken at, so a caller comparing two
    /// reports (e.g. across a restart) can tell which is newer.
    pub scanned_at: i64,
}

impl RecoveryReport {
    pub fn healthy_count(&self) -> usize {
        self.feeds.iter().filter(|d| d.health == FeedHealth::Healthy).count()
    }
}

fn hexf(fid: &[u8; FID_LEN]) -> String {
    hex::encode(fid)
}

fn discover_fids(store: &FeedStore) -> Result<Vec<[u8; FID_LEN]>> {
    let feeds_dir = store.base_dir().join("_feeds");
    if !feeds_dir.exists() {
        return Ok(Vec::new());
    }
    let mut entries: Vec<_> = fs::read_dir(&feeds_dir)?.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.file_name());

    let mut out = Vec::new();
    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(hex_fid) = name.strip_suffix(".head") else { continue };
        let Ok(bytes) = hex::decode(hex_fid) else { continue };
        let Ok(fid): std::result::Result<[u8; FID_LEN], _> = bytes.try_into() else { continue };
        out.push(fid);
    }
    Ok(out)
}

fn classify(store: &FeedStore, fid: &[u8; FID_LEN]) -> FeedHealth {
    let feed = match store.open_feed(fid) {
        Ok(feed) => feed,
        Err(_) => return FeedHealth::HeaderCorrupt,
    };

    let declared = feed.length();
    let available = match store.log_byte_len(fid) {
        Ok(bytes) => (bytes / WIRE_PACKET_SIZE as u64) as u32,
        Err(_) => 0,
    };
    if available < declared {
        return FeedHealth::TruncatedLog { declared, available };
    }

    let zero_fid = [0u8; FID_LEN];
    if feed.header.parent_fid != zero_fid && !store.feed_exists(&feed.header.parent_fid) {
        return FeedHealth::DanglingParent { missing_fid: hexf(&feed.header.parent_fid) };
    }

    FeedHealth::Healthy
}

/// `true` if `feed`'s genesis is `ischild` followed by `updfile` at seq 2 —
/// the shape of a file update feed (whether originally provisioned or
/// activated later via emergency rotation).
fn is_file_feed(store: &FeedStore, feed: &Feed) -> bool {
    if feed.length() < 2 {
        return false;
    }
    matches!(store.get_type(feed, 1), Ok(PacketType::IsChild)) && matches!(store.get_type(feed, 2), Ok(PacketType::UpdFile))
}

/// Walk forward from `start` while a child of the current feed has itself
/// become a file feed for the same name (rotation), returning the terminal
/// feed and its still-dormant emergency child.
fn terminal_binding(store: &FeedStore, start: &Feed, file_name: &str) -> Result<Option<(Feed, [u8; FID_LEN])>> {
    let mut current = start.clone();
    loop {
        let children = store.children(&current)?;
        let mut rotated_into = None;
        let mut dormant_emergency = None;

        for child_fid in &children {
            let Ok(child_feed) = store.open_feed(child_fid) else { continue };
            if is_file_feed(store, &child_feed) {
                if let Ok((name, _)) = store.read_updfile(&child_feed, 2) {
                    if name == file_name {
                        rotated_into = Some(child_feed);
                        continue;
                    }
                }
            }
            dormant_emergency = Some(*child_fid);
        }

        match rotated_into {
            Some(next) => current = next,
            None => {
                return Ok(dormant_emergency.map(|efid| (current, efid)));
            }
        }
    }
}

/// Scan `store`'s `_feeds/` directory and produce a best-effort
/// [`RecoveryReport`]. Never touches `update_cfg.json`.
pub fn scan(store: &FeedStore) -> Result<RecoveryReport> {
    let fids = discover_fids(store)?;
    let mut report = RecoveryReport {
        scanned_at: Utc::now().timestamp(),
        ..RecoveryReport::default()
    };
    let mut seen_names = std::collections::HashSet::new();

    for fid in &fids {
        let health = classify(store, fid);
        report.feeds.push(FeedDiagnostic { fid: hexf(fid), health: health.clone() });

        if health != FeedHealth::Healthy {
            continue;
        }
        let feed = store.open_feed(fid)?;
        if !is_file_feed(store, &feed) {
            continue;
        }
        let Ok((file_name, minv)) = store.read_updfile(&feed, 2) else { continue };
        if !seen_names.insert(file_name.clone()) {
            continue;
        }

        let Some((terminal, emergency_fid)) = terminal_binding(store, &feed, &file_name)? else {
            continue;
        };

        let l = terminal.length() as i64 - 3;
        let (_, terminal_minv) = store.read_updfile(&terminal, 2).unwrap_or((file_name.clone(), minv));
        let newest = if l > 0 { (terminal_minv as i64 + l - 1) as u32 } else { 0 };

        report.vc_dict.insert(file_name.clone(), (hexf(&terminal.fid()), hexf(&emergency_fid)));
        report.apply_dict.insert(file_name, newest);
    }

    Ok(report)
}
