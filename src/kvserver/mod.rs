//! KV server: heartbeats the view service, learns its role from the
//! returned view, and behaves accordingly. As primary it serves client
//! Get/Put and forwards every update to the backup; as backup it applies
//! forwarded updates and installed state snapshots; otherwise it sits idle.

mod api;

mod replica;

mod request;

mod messages;

mod heartbeat;

mod transfer;

pub use api::{ApiReply, ApiRequest, ErrKind};

pub use replica::{KvServer, KvServerConfig, Role};
