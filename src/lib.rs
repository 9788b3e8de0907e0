//! # tinyfeed — signed append-only feed engine and line-diff version manager
//!
//! Two layers:
//! - the **feed engine** (`crypto`, `packet`, `blob`, `header`, `store`,
//!   `registry`): ed25519-signed, content-addressed append-only logs with
//!   fixed-size 128-byte packets and out-of-log blob sidechains
//! - the **version manager** (`version_manager`): a replicated file-update
//!   engine riding on top of feeds, expressing revisions as line-level diffs
//!   organized in a dependency DAG, with emergency key rotation
//!
//! Format guarantees:
//! - every wire packet and blob record is exactly 128 bytes; every feed
//!   header is exactly 128 bytes
//! - signature verification is never skipped: `decode_and_verify` is the
//!   only way a remote packet enters a feed
//! - appends are header-after-body: the packet lands on disk before the
//!   header advances `front_seq`, so a reader never observes a `front_seq`
//!   whose packet is missing
//! - a feed that has appended a `contdas` packet accepts no further appends

pub mod blob;
pub mod config;
pub mod crypto;
pub mod error;
pub mod header;
pub mod packet;
pub mod recovery;
pub mod registry;
pub mod store;
pub mod varint;
pub mod version_manager;

// Flat re-exports for the most common types.
pub use config::EngineConfig;
pub use crypto::CryptoError;
pub use error::{FeedError, Result};
pub use packet::{Packet, PacketType, PREFIX_CURRENT, PREFIX_LEGACY};
pub use recovery::{scan, FeedDiagnostic, FeedHealth, RecoveryReport};
pub use registry::{CallbackRole, FeedCallback, FeedRegistry};
pub use store::{Feed, FeedStore};
pub use version_manager::{KeyRing, VersionManager};
