//! Feed registry — a process-wide `fid -> Feed` map plus the callback
//! multimap that drives the version manager's state machine.
//!
//! Every append, whether authored locally or accepted from the network via
//! `verify_and_append_*`, funnels through [`FeedRegistry::dispatch`] so the
//! registered callbacks for that fid run synchronously, in registration
//! order, before the caller that triggered the append resumes.
//!
//! Callbacks are role-tagged rather than being opaque function pointers: the
//! version manager only ever needs four kinds (update feed, version-control
//! feed, file feed, emergency feed), and tagging them lets
//! [`FeedRegistry::remove_role`] retarget a fid's callback during emergency
//! key rotation without the caller having to keep the original closure
//! around.

use std::collections::HashMap;

use crate::error::Result;
use crate::store::{Feed, FeedStore};

pub const FID_LEN: usize = 32;

/// Which part of the version manager's state machine a callback belongs to.
/// Carries the file name for per-file roles so `remove_role` can target the
/// right entry among several files tracked by the same process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallbackRole {
    UpdateFeed,
    VcFeed,
    FileFeed(String),
    EmergencyFeed(String),
    /// Not used by the version manager; exists so tests can register a
    /// plain recording callback without inventing a production-looking role.
    Probe(String),
}

pub trait FeedCallback {
    fn role(&self) -> CallbackRole;
    fn call(&mut self, store: &FeedStore, registry: &mut PendingOps, feed: &Feed) -> Result<()>;
}

/// Side effects a callback wants applied after it returns: newly discovered
/// feeds to register, or roles to drop. Collected rather than applied
/// in-place so a callback mutating the registry while it is being iterated
/// only affects the *next* dispatch, per the re-entrancy rule.
#[derive(Default)]
pub struct PendingOps {
    pub registrations: Vec<([u8; FID_LEN], Box<dyn FeedCallback>)>,
    pub removals: Vec<([u8; FID_LEN], CallbackRole)>,
}

impl PendingOps {
    pub fn register(&mut self, fid: [u8; FID_LEN], cb: Box<dyn FeedCallback>) {
        self.registrations.push((fid, cb));
    }

    pub fn remove(&mut self, fid: [u8; FID_LEN], role: CallbackRole) {
        self.removals.push((fid, role));
    }
}

pub struct FeedRegistry {
    feeds: HashMap<[u8; FID_LEN], Feed>,
    callbacks: HashMap<[u8; FID_LEN], Vec<Box<dyn FeedCallback>>>,
}

impl FeedRegistry {
    pub fn new() -> Self {
        Self {
            feeds: HashMap::new(),
            callbacks: HashMap::new(),
        }
    }

    pub fn track(&mut self, feed: Feed) {
        self.feeds.insert(feed.fid(), feed);
    }

    pub fn get(&self, fid: &[u8; FID_LEN]) -> Option<&Feed> {
        self.feeds.get(fid)
    }

    pub fn get_mut(&mut self, fid: &[u8; FID_LEN]) -> Option<&mut Feed> {
        self.feeds.get_mut(fid)
    }

    pub fn register(&mut self, fid: [u8; FID_LEN], cb: Box<dyn FeedCallback>) {
        self.callbacks.entry(fid).or_default().push(cb);
    }

    pub fn remove_role(&mut self, fid: &[u8; FID_LEN], role: &CallbackRole) {
        if let Some(cbs) = self.callbacks.get_mut(fid) {
            cbs.retain(|cb| cb.role() != *role);
        }
    }

    /// Invoke every callback registered for `fid`, in registration order.
    /// Registrations/removals requested mid-dispatch are buffered in
    /// `PendingOps` and applied only after every callback for this dispatch
    /// has run.
    pub fn dispatch(&mut self, store: &FeedStore, fid: &[u8; FID_LEN]) -> Result<()> {
        let feed = match self.feeds.get(fid) {
            Some(feed) => feed.clone(),
            None => return Ok(()),
        };

        let mut pending = PendingOps::default();
        if let Some(cbs) = self.callbacks.get_mut(fid) {
            for cb in cbs.iter_mut() {
                cb.call(store, &mut pending, &feed)?;
            }
        }

        for (target, role) in pending.removals {
            self.remove_role(&target, &role);
        }
        for (target, cb) in pending.registrations {
            self.register(target, cb);
        }
        Ok(())
    }
}

impl Default for FeedRegistry {
    fn default() -> Self {
        Self::new()
    }
}
