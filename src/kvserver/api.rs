//! KV server wire message types, shared by the client-facing API and the
//! primary-to-backup replication traffic.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Error kinds surfaced at RPC boundaries.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum ErrKind {
    /// The addressed server is not the primary in its current view.
    NotPrimary,

    /// The requested key has no value.
    NoKey,
}

impl fmt::Display for ErrKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrKind::NotPrimary => write!(f, "ErrNotPrimary"),
            ErrKind::NoKey => write!(f, "ErrNoKey"),
        }
    }
}

/// Request to a KV server.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum ApiRequest {
    /// Client: read the value of a key.
    Get { key: String },

    /// Client: write a value into a key.
    Put { key: String, value: String },

    /// Primary -> backup: apply one forwarded update.
    ForwardUpdate { key: String, value: String },

    /// Primary -> backup: replace the whole store with a snapshot.
    SyncState {
        data: HashMap<String, String>,
        view_number: u64,
    },
}

/// Reply from a KV server. A successful reply has `ok = true` and no error
/// kind.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum ApiReply {
    Get {
        value: String,
        ok: bool,
        err: Option<ErrKind>,
    },

    Put {
        ok: bool,
        err: Option<ErrKind>,
    },

    ForwardUpdate {
        ok: bool,
    },

    SyncState {
        ok: bool,
    },
}
