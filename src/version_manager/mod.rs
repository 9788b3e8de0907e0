//! Replicated file-update engine: expresses file revisions as line-diffs in
//! a version dependency DAG, propagated over three feed roles bound under a
//! single update feed.
//!
//! State shared between the registered callbacks and the authoring API
//! lives in [`VersionManagerState`] behind `Rc<RefCell<_>>` — the engine is
//! single-threaded cooperative (see the crate's concurrency model), so an
//! `Rc<RefCell<_>>` costs nothing an `Arc<Mutex<_>>` would buy and keeps
//! every callback's borrow checked at the point it actually touches state.

pub mod diff;
pub mod graph;

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::config::{FileBinding, StoreConfig};
use crate::crypto;
use crate::error::{FeedError, Result};
use crate::packet::PacketType;
use crate::registry::{CallbackRole, FeedCallback, FeedRegistry, PendingOps};
use crate::store::{Feed, FeedStore};

pub const FID_LEN: usize = 32;

/// Signing keys this process holds, by fid. A node missing the key for the
/// update feed is a passive follower (`may_update == false`).
#[derive(Default)]
pub struct KeyRing {
    keys: HashMap<[u8; FID_LEN], [u8; crypto::SKEY_LEN]>,
}

impl KeyRing {
    pub fn insert(&mut self, fid: [u8; FID_LEN], skey: [u8; crypto::SKEY_LEN]) {
        self.keys.insert(fid, skey);
    }

    pub fn get(&self, fid: &[u8; FID_LEN]) -> Option<&[u8; crypto::SKEY_LEN]> {
        self.keys.get(fid)
    }

    pub fn holds(&self, fid: &[u8; FID_LEN]) -> bool {
        self.keys.contains_key(fid)
    }

    pub fn generate<R: ed25519_dalek::rand_core::CryptoRngCore>(&mut self, rng: &mut R) -> [u8; FID_LEN] {
        let (skey, fid) = crypto::generate_keypair(rng);
        self.keys.insert(fid, skey);
        fid
    }
}

fn hexf(fid: &[u8; FID_LEN]) -> String {
    hex::encode(fid)
}

fn unhexf(s: &str) -> Result<[u8; FID_LEN]> {
    let bytes = hex::decode(s).map_err(|e| FeedError::Malformed(e.to_string()))?;
    bytes.try_into().map_err(|_| FeedError::Malformed(format!("fid {s} is not 32 bytes")))
}

pub struct VersionManagerState {
    pub vc_dict: HashMap<String, (String, String)>,
    pub apply_queue: HashMap<String, u32>,
    pub apply_dict: HashMap<String, u32>,
    pub update_fid: Option<[u8; FID_LEN]>,
    pub vc_fid: Option<[u8; FID_LEN]>,
    pub may_update: bool,
    pub keys: KeyRing,
    pub workspace_dir: PathBuf,
}

impl VersionManagerState {
    fn read_file(&self, name: &str) -> Result<String> {
        Ok(std::fs::read_to_string(self.workspace_dir.join(name))?)
    }

    fn write_file(&self, name: &str, content: &str) -> Result<()> {
        Ok(std::fs::write(self.workspace_dir.join(name), content)?)
    }

    fn create_file_if_missing(&self, name: &str) -> Result<()> {
        let path = self.workspace_dir.join(name);
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, "")?;
        Ok(())
    }

    fn to_config(&self) -> StoreConfig {
        StoreConfig {
            vc_dict: self
                .vc_dict
                .iter()
                .map(|(k, (fid, efid))| {
                    (
                        k.clone(),
                        FileBinding {
                            file_fid: fid.clone(),
                            emergency_fid: efid.clone(),
                        },
                    )
                })
                .collect(),
            apply_queue: self.apply_queue.clone(),
            apply_dict: self.apply_dict.clone(),
            update_fid: self.update_fid.map(|f| hexf(&f)),
            vc_fid: self.vc_fid.map(|f| hexf(&f)),
        }
    }

    fn apply_config(&mut self, cfg: StoreConfig) {
        self.vc_dict = cfg
            .vc_dict
            .into_iter()
            .map(|(k, b)| (k, (b.file_fid, b.emergency_fid)))
            .collect();
        self.apply_queue = cfg.apply_queue;
        self.apply_dict = cfg.apply_dict;
    }
}

/// Apply a locally-held or remotely-announced version to the workspace copy
/// of the file owned by `file_fid`, or enqueue the request if the feed or
/// blob it needs has not arrived yet. Shared between the vc-feed/file-feed
/// callbacks and [`VersionManager::add_apply`].
fn apply_update(
    state: &mut VersionManagerState,
    store: &FeedStore,
    file_fid: &[u8; FID_LEN],
    target_version: u32,
) -> Result<()> {
    let fid_hex = hexf(file_fid);

    let file_feed = match store.open_feed(file_fid) {
        Ok(feed) => feed,
        Err(_) => {
            debug!(fid = %fid_hex, "waiting for file feed to arrive");
            state.apply_queue.insert(fid_hex, target_version);
            return Ok(());
        }
    };

    let (file_name, minv) = store.read_updfile(&file_feed, 2)?;
    let num_updates = file_feed.length() as i64 - 3;
    let newest = (num_updates + minv as i64 - 1) as u32;

    if target_version > newest {
        debug!(file = %file_name, target_version, "waiting for update to arrive");
        state.apply_queue.insert(fid_hex, target_version);
        return Ok(());
    }

    if target_version == newest && store.waiting_for_blob(&file_feed)?.is_some() {
        debug!(file = %file_name, "waiting for blob to complete");
        state.apply_queue.insert(fid_hex, target_version);
        return Ok(());
    }

    let current_applied = *state.apply_dict.get(&file_name).unwrap_or(&0);
    if target_version == current_applied {
        state.apply_queue.remove(&fid_hex);
        return Ok(());
    }

    let content = state.read_file(&file_name)?;
    let changes = graph::jump_versions(store, &file_feed, current_applied, target_version)?;
    let new_content = diff::apply_changes(&content, &changes);
    state.write_file(&file_name, &new_content)?;

    state.apply_queue.remove(&fid_hex);
    state.apply_dict.insert(file_name.clone(), target_version);
    info!(file = %file_name, version = target_version, "applied update");
    Ok(())
}

struct UpdateFeedCallback {
    state: Rc<RefCell<VersionManagerState>>,
}

impl FeedCallback for UpdateFeedCallback {
    fn role(&self) -> CallbackRole {
        CallbackRole::UpdateFeed
    }

    fn call(&mut self, store: &FeedStore, pending: &mut PendingOps, feed: &Feed) -> Result<()> {
        if store.waiting_for_blob(feed)?.is_some() {
            return Ok(());
        }
        let children = store.children(feed)?;
        let mut state = self.state.borrow_mut();

        if state.vc_fid.is_none() {
            if let Some(&vc_fid) = children.first() {
                state.vc_fid = Some(vc_fid);
                pending.register(vc_fid, Box::new(VcFeedCallback { state: self.state.clone() }));
            }
            return Ok(());
        }

        if let Some(&new_fid) = children.last() {
            pending.register(new_fid, Box::new(FileFeedCallback { state: self.state.clone(), fid: new_fid }));
        }
        Ok(())
    }
}

struct VcFeedCallback {
    state: Rc<RefCell<VersionManagerState>>,
}

impl FeedCallback for VcFeedCallback {
    fn role(&self) -> CallbackRole {
        CallbackRole::VcFeed
    }

    fn call(&mut self, store: &FeedStore, _pending: &mut PendingOps, feed: &Feed) -> Result<()> {
        let front_type = store.get_type(feed, -1)?;
        if front_type != PacketType::ApplyUp {
            return Ok(());
        }
        let payload = store.get_payload(feed, -1)?;
        let mut file_fid = [0u8; FID_LEN];
        file_fid.copy_from_slice(&payload[..FID_LEN]);
        let version = u32::from_be_bytes(payload[FID_LEN..FID_LEN + 4].try_into().unwrap());

        let mut state = self.state.borrow_mut();
        apply_update(&mut state, store, &file_fid, version)
    }
}

struct FileFeedCallback {
    state: Rc<RefCell<VersionManagerState>>,
    fid: [u8; FID_LEN],
}

impl FeedCallback for FileFeedCallback {
    fn role(&self) -> CallbackRole {
        CallbackRole::FileFeed(hexf(&self.fid))
    }

    fn call(&mut self, store: &FeedStore, pending: &mut PendingOps, feed: &Feed) -> Result<()> {
        if store.waiting_for_blob(feed)?.is_some() {
            return Ok(());
        }
        let front_type = store.get_type(feed, -1)?;
        let fid = feed.fid();

        match front_type {
            PacketType::Chain20 => {
                let mut state = self.state.borrow_mut();
                if let Some(&queued) = state.apply_queue.get(&hexf(&fid)) {
                    apply_update(&mut state, store, &fid, queued)?;
                }
            }
            PacketType::MkChild => {
                let (file_name, version) = store.read_updfile(feed, 2)?;
                let emergency_fid = store.children(feed)?.into_iter().next().ok_or_else(|| {
                    FeedError::Malformed("file feed's mkchild announced no emergency child".into())
                })?;
                pending.register(emergency_fid, Box::new(EmergencyFeedCallback { state: self.state.clone(), fid: emergency_fid }));

                let mut state = self.state.borrow_mut();
                state
                    .vc_dict
                    .insert(file_name.clone(), (hexf(&fid), hexf(&emergency_fid)));
                state.apply_dict.entry(file_name).or_insert(version);
            }
            PacketType::UpdFile => {
                let (file_name, _) = store.read_updfile(feed, 2)?;
                let state = self.state.borrow();
                if !state.workspace_dir.join(&file_name).exists() {
                    info!(file = %file_name, "creating new tracked file");
                    state.create_file_if_missing(&file_name)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

struct EmergencyFeedCallback {
    state: Rc<RefCell<VersionManagerState>>,
    fid: [u8; FID_LEN],
}

impl FeedCallback for EmergencyFeedCallback {
    fn role(&self) -> CallbackRole {
        CallbackRole::EmergencyFeed(hexf(&self.fid))
    }

    fn call(&mut self, store: &FeedStore, pending: &mut PendingOps, feed: &Feed) -> Result<()> {
        if store.waiting_for_blob(feed)?.is_some() {
            return Ok(());
        }
        if store.get_type(feed, -1)? != PacketType::MkChild {
            return Ok(());
        }

        let parent_fid = store.parent(feed)?.ok_or_else(|| FeedError::Malformed("emergency feed has no parent".into()))?;
        let fid = feed.fid();
        let new_emergency_fid = store.children(feed)?.into_iter().next().ok_or_else(|| {
            FeedError::Malformed("rotated emergency feed announced no successor".into())
        })?;

        pending.remove(parent_fid, CallbackRole::FileFeed(hexf(&parent_fid)));
        pending.remove(fid, CallbackRole::EmergencyFeed(hexf(&fid)));
        pending.register(fid, Box::new(FileFeedCallback { state: self.state.clone(), fid }));
        pending.register(new_emergency_fid, Box::new(EmergencyFeedCallback { state: self.state.clone(), fid: new_emergency_fid }));

        let (file_name, _) = store.read_updfile(feed, 2)?;
        let mut state = self.state.borrow_mut();
        state.vc_dict.insert(file_name, (hexf(&fid), hexf(&new_emergency_fid)));
        Ok(())
    }
}

pub struct VersionManager {
    store: FeedStore,
    registry: FeedRegistry,
    state: Rc<RefCell<VersionManagerState>>,
    config_path: PathBuf,
}

impl VersionManager {
    pub fn new(store: FeedStore, workspace_dir: impl Into<PathBuf>) -> Result<Self> {
        let workspace_dir = workspace_dir.into();
        let config_path = StoreConfig::config_path(store.base_dir());
        let cfg = StoreConfig::load(&config_path)?;

        let mut state = VersionManagerState {
            vc_dict: HashMap::new(),
            apply_queue: HashMap::new(),
            apply_dict: HashMap::new(),
            update_fid: cfg.update_fid.as_deref().map(unhexf).transpose()?,
            vc_fid: cfg.vc_fid.as_deref().map(unhexf).transpose()?,
            may_update: false,
            keys: KeyRing::default(),
            workspace_dir,
        };
        state.apply_config(cfg);

        let mut manager = Self {
            store,
            registry: FeedRegistry::new(),
            state: Rc::new(RefCell::new(state)),
            config_path,
        };

        if let Some(update_fid) = manager.state.borrow().update_fid {
            let feed = manager.store.open_feed(&update_fid)?;
            manager.registry.track(feed);
        }

        Ok(manager)
    }

    pub fn is_configured(&self) -> bool {
        self.state.borrow().update_fid.is_some()
    }

    pub fn key_ring_mut(&mut self) -> std::cell::RefMut<'_, VersionManagerState> {
        self.state.borrow_mut()
    }

    fn save_config(&self) -> Result<()> {
        self.state.borrow().to_config().save(&self.config_path)
    }

    /// Bind an already-created feed as this node's update feed. If the
    /// local key ring holds its signing key, this node is an author: any
    /// workspace file not yet tracked in `vc_dict` is provisioned with a
    /// fresh file feed and emergency feed. Otherwise callbacks are
    /// registered so remote announcements populate `vc_dict` instead.
    pub fn set_update_feed<R: ed25519_dalek::rand_core::CryptoRngCore>(&mut self, fid: [u8; FID_LEN], rng: &mut R) -> Result<()> {
        let feed = self.store.open_feed(&fid)?;
        self.registry.track(feed.clone());

        {
            let mut state = self.state.borrow_mut();
            state.update_fid = Some(fid);
        }

        let children = self.store.children(&feed)?;
        if let Some(&vc_fid) = children.first() {
            let vc_feed = self.store.open_feed(&vc_fid)?;
            self.registry.track(vc_feed);
            self.state.borrow_mut().vc_fid = Some(vc_fid);
        }

        let may_update = self.state.borrow().keys.holds(&fid);
        self.state.borrow_mut().may_update = may_update;

        if !may_update {
            self.register_callbacks()?;
            return Ok(());
        }

        if self.state.borrow().vc_fid.is_none() {
            self.create_vc_feed(&fid, rng)?;
        }
        self.provision_untracked_files(rng)?;
        Ok(())
    }

    /// Create this node's version-control feed as the update feed's first
    /// child — the role is positional (§4.5: "each child it creates is
    /// either the version-control feed (first child) or a file update feed
    /// (subsequent children)"), so this must run before any file feed is
    /// provisioned.
    fn create_vc_feed<R: ed25519_dalek::rand_core::CryptoRngCore>(&mut self, update_fid: &[u8; FID_LEN], rng: &mut R) -> Result<()> {
        let update_key = *self
            .state
            .borrow()
            .keys
            .get(update_fid)
            .ok_or_else(|| FeedError::NoKey { fid: hexf(update_fid) })?;
        let mut update_feed = self.store.open_feed(update_fid)?;

        let vfid = self.state.borrow_mut().keys.generate(rng);
        let vkey = *self.state.borrow().keys.get(&vfid).unwrap();
        let mut vc_feed = self.store.create_feed(vfid, *update_fid, update_feed.header.front_seq)?;
        self.store.append_ischild(&mut vc_feed, update_fid, &vkey)?;
        self.store.append_mkchild(&mut update_feed, &vfid, &update_key)?;

        self.registry.track(update_feed);
        self.registry.track(vc_feed);
        self.state.borrow_mut().vc_fid = Some(vfid);
        self.save_config()?;
        debug!(fid = %hexf(&vfid), "provisioned version-control feed");
        Ok(())
    }

    fn register_callbacks(&mut self) -> Result<()> {
        let update_fid = self.state.borrow().update_fid;
        let Some(update_fid) = update_fid else { return Ok(()) };
        self.registry
            .register(update_fid, Box::new(UpdateFeedCallback { state: self.state.clone() }));

        let vc_fid = self.state.borrow().vc_fid;
        if let Some(vc_fid) = vc_fid {
            self.registry
                .register(vc_fid, Box::new(VcFeedCallback { state: self.state.clone() }));
        }

        let bindings: Vec<(String, String)> = self.state.borrow().vc_dict.values().cloned().collect();
        for (file_fid_hex, emergency_fid_hex) in bindings {
            let file_fid = unhexf(&file_fid_hex)?;
            let emergency_fid = unhexf(&emergency_fid_hex)?;
            self.registry
                .register(file_fid, Box::new(FileFeedCallback { state: self.state.clone(), fid: file_fid }));
            self.registry
                .register(emergency_fid, Box::new(EmergencyFeedCallback { state: self.state.clone(), fid: emergency_fid }));
        }
        Ok(())
    }

    fn provision_untracked_files<R: ed25519_dalek::rand_core::CryptoRngCore>(&mut self, rng: &mut R) -> Result<()> {
        let workspace_dir = self.state.borrow().workspace_dir.clone();
        let Some(update_fid) = self.state.borrow().update_fid else { return Ok(()) };

        for entry in walk_workspace(&workspace_dir)? {
            let already_tracked = self.state.borrow().vc_dict.contains_key(&entry);
            if already_tracked {
                continue;
            }
            self.create_new_file_feed(&update_fid, &entry, rng)?;
        }
        Ok(())
    }

    fn create_new_file_feed<R: ed25519_dalek::rand_core::CryptoRngCore>(
        &mut self,
        update_fid: &[u8; FID_LEN],
        file_name: &str,
        rng: &mut R,
    ) -> Result<()> {
        let update_key = *self
            .state
            .borrow()
            .keys
            .get(update_fid)
            .ok_or_else(|| FeedError::NoKey { fid: hexf(update_fid) })?;

        let mut update_feed = self.store.open_feed(update_fid)?;
        let cfid = self.state.borrow_mut().keys.generate(rng);
        let ckey = *self.state.borrow().keys.get(&cfid).unwrap();

        let mut child_feed = self.store.create_feed(cfid, *update_fid, update_feed.header.front_seq)?;
        self.store.append_ischild(&mut child_feed, update_fid, &ckey)?;
        self.store.append_mkchild(&mut update_feed, &cfid, &update_key)?;
        // Base version 1, not 0: 0 is reserved crate-wide as the "nothing
        // applied yet" sentinel (see `StoreConfig::apply_dict`), so a feed's
        // own versions must start at 1.
        self.store.append_updfile(&mut child_feed, file_name, 1, &ckey)?;

        let efid = self.state.borrow_mut().keys.generate(rng);
        let ekey = *self.state.borrow().keys.get(&efid).unwrap();
        let mut emergency_feed = self.store.create_feed(efid, cfid, child_feed.header.front_seq)?;
        emergency_feed_genesis(&mut emergency_feed, &self.store, &cfid, &ekey)?;
        self.store.append_mkchild(&mut child_feed, &efid, &ckey)?;

        self.registry.track(update_feed);
        self.registry.track(child_feed);
        self.registry.track(emergency_feed);

        let mut state = self.state.borrow_mut();
        state.vc_dict.insert(file_name.to_string(), (hexf(&cfid), hexf(&efid)));
        state.apply_dict.insert(file_name.to_string(), 0);
        drop(state);
        self.save_config()?;
        debug!(file = file_name, fid = %hexf(&cfid), "provisioned file feed");
        Ok(())
    }

    /// Called by the network/ingress layer after a wire packet or blob has
    /// been accepted into `fid`'s feed, so the version manager's callbacks
    /// react to it.
    pub fn on_append(&mut self, fid: &[u8; FID_LEN]) -> Result<()> {
        let feed = self.store.open_feed(fid)?;
        self.registry.track(feed);
        self.registry.dispatch(&self.store, fid)
    }

    /// `update_file(name, new_text, dep)`: diff against the reconstructed
    /// dependency version and append the result as a new blob.
    pub fn update_file(&mut self, file_name: &str, new_text: &str, dep: i64) -> Result<()> {
        if !self.state.borrow().may_update {
            warn!("local node may not author updates");
            return Ok(());
        }
        let binding = self.state.borrow().vc_dict.get(file_name).cloned();
        let Some((fid_hex, _)) = binding else { return Ok(()) };
        let fid = unhexf(&fid_hex)?;
        let mut feed = self.store.open_feed(&fid)?;

        let current_file = self.state.borrow().read_file(file_name)?;
        let current_applied = *self.state.borrow().apply_dict.get(file_name).unwrap_or(&0);

        let (_, minv) = self.store.read_updfile(&feed, 2)?;
        let current_v = feed.length() as i64 - 3 + minv as i64 - 1;

        let dep = if dep < 0 { dep + current_v + 1 } else { dep };
        if dep > current_v {
            return Err(FeedError::UnknownVersion { version: dep as u32 });
        }

        let changes = graph::jump_versions(&self.store, &feed, current_applied, dep as u32)?;
        let reconstructed = diff::apply_changes(&current_file, &changes);
        let update_changes = diff::get_changes(&reconstructed, new_text);
        let blob = diff::encode_changes(&update_changes, dep as u32);

        let key = *self
            .state
            .borrow()
            .keys
            .get(&fid)
            .ok_or_else(|| FeedError::NoKey { fid: fid_hex.clone() })?;
        self.store.append_blob(&mut feed, &blob, &key)?;
        self.registry.track(feed);
        Ok(())
    }

    /// `emergency_update_file`: rotate the file feed via its emergency
    /// child (key-rotation pathway), then author the update on the new
    /// feed and announce it.
    pub fn emergency_update_file<R: ed25519_dalek::rand_core::CryptoRngCore>(
        &mut self,
        file_name: &str,
        new_text: &str,
        depends_on: i64,
        rng: &mut R,
    ) -> Result<()> {
        if !self.state.borrow().may_update {
            warn!("local node may not author updates");
            return Ok(());
        }
        let binding = self.state.borrow().vc_dict.get(file_name).cloned();
        let Some((old_fid_hex, emergency_fid_hex)) = binding else { return Ok(()) };
        let old_fid = unhexf(&old_fid_hex)?;
        let emergency_fid = unhexf(&emergency_fid_hex)?;

        let old_feed = self.store.open_feed(&old_fid)?;
        let mut emergency_feed = self.store.open_feed(&emergency_fid)?;
        let ekey = *self
            .state
            .borrow()
            .keys
            .get(&emergency_fid)
            .ok_or_else(|| FeedError::NoKey { fid: emergency_fid_hex.clone() })?;

        let (_, minv) = self.store.read_updfile(&old_feed, 2)?;
        let maxv = minv + old_feed.length() - 3;

        self.store.append_updfile(&mut emergency_feed, file_name, maxv, &ekey)?;

        let new_fid = self.state.borrow_mut().keys.generate(rng);
        let new_key = *self.state.borrow().keys.get(&new_fid).unwrap();
        let mut new_feed = self.store.create_feed(new_fid, emergency_fid, emergency_feed.header.front_seq)?;
        new_feed_genesis(&mut new_feed, &self.store, &emergency_fid, &new_key)?;
        self.store.append_mkchild(&mut emergency_feed, &new_fid, &ekey)?;

        self.state
            .borrow_mut()
            .vc_dict
            .insert(file_name.to_string(), (hexf(&emergency_fid), hexf(&new_fid)));
        self.save_config()?;

        self.registry.track(emergency_feed);
        self.registry.track(new_feed);

        self.update_file(file_name, new_text, depends_on)?;
        self.add_apply(file_name, maxv as i64)
    }

    /// `add_apply`: announce `v_num` on the version-control feed and apply
    /// it locally.
    pub fn add_apply(&mut self, file_name: &str, v_num: i64) -> Result<()> {
        if !self.state.borrow().may_update {
            warn!("local node may not apply updates");
            return Ok(());
        }
        let binding = self.state.borrow().vc_dict.get(file_name).cloned();
        let Some((fid_hex, _)) = binding else { return Ok(()) };
        let fid = unhexf(&fid_hex)?;
        let feed = self.store.open_feed(&fid)?;

        let (_, minv) = self.store.read_updfile(&feed, 2)?;
        let current_version_num = minv + feed.length() - 3 - 1;

        let v_num = if v_num < 0 { v_num + current_version_num as i64 + 1 } else { v_num };
        if current_version_num < v_num as u32 {
            warn!(file = file_name, v_num, "update does not exist yet");
            return Ok(());
        }
        let v_num = v_num as u32;

        let vc_fid = self.state.borrow().vc_fid.ok_or(FeedError::NoKey { fid: "vc-feed".into() })?;
        let mut vc_feed = self.store.open_feed(&vc_fid)?;
        let vc_key = *self
            .state
            .borrow()
            .keys
            .get(&vc_fid)
            .ok_or_else(|| FeedError::NoKey { fid: hexf(&vc_fid) })?;

        self.store.append_applyup(&mut vc_feed, &fid, v_num, &vc_key)?;
        self.registry.track(vc_feed);

        let mut state = self.state.borrow_mut();
        apply_update(&mut state, &self.store, &fid, v_num)
    }

    /// `create_new_file`: provision a brand new tracked file outside of
    /// `set_update_feed`'s initial workspace scan.
    pub fn create_new_file<R: ed25519_dalek::rand_core::CryptoRngCore>(&mut self, file_name: &str, rng: &mut R) -> Result<()> {
        let already_exists = self.state.borrow().workspace_dir.join(file_name).exists();
        if already_exists {
            return Ok(());
        }
        self.state.borrow().create_file_if_missing(file_name)?;

        let update_fid = self.state.borrow().update_fid.ok_or(FeedError::NoKey { fid: "update-feed".into() })?;
        self.create_new_file_feed(&update_fid, file_name, rng)
    }
}

fn emergency_feed_genesis(feed: &mut Feed, store: &FeedStore, parent_fid: &[u8; FID_LEN], skey: &[u8; crypto::SKEY_LEN]) -> Result<()> {
    store.append_ischild(feed, parent_fid, skey)
}

fn new_feed_genesis(feed: &mut Feed, store: &FeedStore, parent_fid: &[u8; FID_LEN], skey: &[u8; crypto::SKEY_LEN]) -> Result<()> {
    store.append_ischild(feed, parent_fid, skey)
}

/// List workspace-relative file paths eligible for version-manager
/// tracking: everything except the feed store's own bookkeeping.
fn walk_workspace(dir: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || name.ends_with(".log") || name.ends_with(".json") || name.ends_with(".head") {
            continue;
        }
        if entry.file_type()?.is_file() {
            out.push(name);
        }
    }
    Ok(out)
}
