//! Public interface to the viewkv library, linked by the view service,
//! KV server, and client executables.

#[macro_use]
mod utils;

pub mod viewserv;

pub mod kvserver;

pub mod client;

pub use utils::ViewKvError;

pub use viewserv::{
    CtrlReply, CtrlRequest, View, ViewService, ViewServiceConfig,
};

pub use kvserver::{
    ApiReply, ApiRequest, ErrKind, KvServer, KvServerConfig, Role,
};

pub use client::{ClientApiStub, ClientCtrlStub, KvClient, KvClientConfig};
