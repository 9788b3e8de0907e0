//! Crate-wide error type.
//!
//! Every fallible operation in the feed engine and the version manager
//! returns `Result<T, FeedError>`. There is a single enum rather than one
//! per module because callers routinely cross module boundaries in one
//! control flow (the version manager calls through the registry into the
//! feed store into the packet codec) and need to match on error kind
//! without unwrapping module-specific wrappers first.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    /// Signature did not verify under the claimed fid. The wire packet is
    /// dropped; no state changes.
    #[error("invalid signature for fid {fid}")]
    InvalidSignature { fid: String },

    /// `get_wire`/`get_payload`/`get_type` addressed a sequence number
    /// outside `(anchor_seq, front_seq]`.
    #[error("sequence {seq} out of range ({anchor_seq}, {front_seq}]")]
    OutOfRange {
        seq: i64,
        anchor_seq: u32,
        front_seq: u32,
    },

    /// Append attempted on a feed whose last packet is `contdas`.
    #[error("feed {fid} has ended, no further appends permitted")]
    Ended { fid: String },

    /// A `chain20` payload could not be fully reassembled locally.
    #[error("incomplete blob chain for fid {fid} at seq {seq}, missing pointer {missing}")]
    IncompleteBlob {
        fid: String,
        seq: u32,
        missing: String,
    },

    /// Append attempted without holding the feed's signing key.
    #[error("no signing key held for fid {fid}")]
    NoKey { fid: String },

    /// `jump_versions` was asked to reach a version absent from the graph.
    #[error("version {version} is not reachable in the dependency graph")]
    UnknownVersion { version: u32 },

    /// The requested file is not tracked by the version manager.
    #[error("no version-controlled file named {name}")]
    UnknownFile { name: String },

    /// A decoded field violated a fixed-size or encoding invariant.
    #[error("malformed wire data: {0}")]
    Malformed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config (de)serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FeedError>;
