//! Feed-directory recovery diagnostics.
//!
//! `update_cfg.json` is a plain snapshot with no write-ahead log: a crash
//! between writes can leave it missing or stale while `_feeds/` itself is
//! perfectly intact. This module scans `_feeds/` independently of that
//! snapshot — it does not read `update_cfg.json` and never writes it — and
//! reports what a caller could still recover by re-deriving `vc_dict` and
//! `apply_dict` from the packets themselves. It is diagnostic tooling: the
//! caller decides whether and how to fold the report back into the
//! persisted snapshot.

pub mod scanner;

pub use scanner::{scan, FeedDiagnostic, FeedHealth, RecoveryReport};
