//! KV server replica struct and its serve loop.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use bytes::BytesMut;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};

use crate::kvserver::{ApiReply, ApiRequest};
use crate::utils::{
    resolve_name, safe_tcp_read, safe_tcp_write, tcp_bind_with_retry,
    ViewKvError,
};
use crate::viewserv::View;

/// Configuration parameters struct.
#[derive(Debug, Clone, Deserialize)]
pub struct KvServerConfig {
    /// Interval of heartbeats to the view service in millisecs.
    pub ping_interval_ms: u64,

    /// Deadline of steady-state outbound RPCs (Ping, ForwardUpdate) in
    /// millisecs.
    pub rpc_timeout_ms: u64,

    /// Deadline of a full state transfer in millisecs.
    pub sync_timeout_ms: u64,
}

#[allow(clippy::derivable_impls)]
impl Default for KvServerConfig {
    fn default() -> Self {
        KvServerConfig {
            ping_interval_ms: 500,
            rpc_timeout_ms: 2000,
            sync_timeout_ms: 10000,
        }
    }
}

/// Replication role, re-derived from every received view. A tag consulted
/// inside each RPC handler.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Role {
    Primary,
    Backup,
    Idle,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Role::Primary => write!(f, "primary"),
            Role::Backup => write!(f, "backup"),
            Role::Idle => write!(f, "idle"),
        }
    }
}

/// Entire mutable state of a KV server, guarded by one mutex.
pub(crate) struct ReplicaState {
    /// Locally observed view.
    pub(crate) view: View,

    /// Current role in the observed view.
    pub(crate) role: Role,

    /// The in-memory store.
    pub(crate) data: HashMap<String, String>,

    /// Name of the backup last synced to, if any.
    pub(crate) last_backup: String,

    /// True while a state transfer to a new backup is in flight.
    pub(crate) syncing: bool,

    /// Puts accepted while syncing, replayed FIFO once the transfer ends.
    pub(crate) pending_puts: VecDeque<(String, String)>,
}

impl ReplicaState {
    fn new() -> Self {
        ReplicaState {
            view: View::default(),
            role: Role::Idle,
            data: HashMap::new(),
            last_backup: String::new(),
            syncing: false,
            pending_puts: VecDeque::new(),
        }
    }
}

/// KV server replica node.
#[derive(Clone)]
pub struct KvServer {
    /// My server name (`host:port`); doubles as the listen address and the
    /// identity reported to the view service.
    pub(crate) me: String,

    /// View service address string.
    pub(crate) vs_addr: String,

    /// Configuration parameters struct.
    pub(crate) config: KvServerConfig,

    /// Entire replica state behind one mutex.
    pub(crate) state: Arc<Mutex<ReplicaState>>,
}

impl KvServer {
    /// Creates a new KV server replica.
    pub fn new(
        me: String,
        vs_addr: String,
        config: KvServerConfig,
    ) -> Result<Self, ViewKvError> {
        if config.ping_interval_ms == 0 {
            return logged_err!(&me; "invalid config.ping_interval_ms '{}'",
                                    config.ping_interval_ms);
        }
        if config.rpc_timeout_ms == 0 || config.sync_timeout_ms == 0 {
            return logged_err!(&me; "invalid config rpc timeouts '{}' '{}'",
                                    config.rpc_timeout_ms,
                                    config.sync_timeout_ms);
        }

        Ok(KvServer {
            me,
            vs_addr,
            config,
            state: Arc::new(Mutex::new(ReplicaState::new())),
        })
    }

    /// Binds the listening socket, spawns the heartbeat loop, and serves
    /// incoming connections until the termination signal fires.
    pub async fn run(
        &self,
        rx_term: watch::Receiver<bool>,
    ) -> Result<(), ViewKvError> {
        let listener =
            tcp_bind_with_retry(resolve_name(&self.me).await?, 10).await?;
        pf_info!(&self.me; "kv server listening on '{}'", self.me);

        tokio::spawn(self.clone().heartbeat_loop(rx_term.clone()));

        let mut rx_term = rx_term;
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            pf_warn!(&self.me;
                                     "error accepting connection: {}", e);
                            continue;
                        }
                    };
                    pf_debug!(&self.me; "accepted connection from '{}'",
                                        peer_addr);
                    tokio::spawn(
                        self.clone().serve_conn(stream, rx_term.clone()),
                    );
                },

                _ = rx_term.changed() => {
                    pf_warn!(&self.me; "kv server caught termination signal");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Serves one accepted connection: a sequence of request/reply
    /// exchanges until the peer closes or the server terminates.
    async fn serve_conn(
        self,
        mut stream: TcpStream,
        mut rx_term: watch::Receiver<bool>,
    ) {
        let mut read_buf = BytesMut::with_capacity(8 + 1024);

        loop {
            let req: ApiRequest = tokio::select! {
                req = safe_tcp_read(&mut read_buf, &mut stream) => {
                    match req {
                        Ok(req) => req,
                        Err(_) => break, // peer gone
                    }
                },

                _ = rx_term.changed() => break,
            };

            let reply = self.handle_request(req).await;
            if let Err(e) = safe_tcp_write(&mut stream, &reply).await {
                pf_debug!(&self.me; "error replying to peer: {}", e);
                break;
            }
        }
    }

    /// Returns a copy of the current store contents. Intended for
    /// inspection from tests and tooling; clients read through Get.
    pub async fn store_snapshot(&self) -> HashMap<String, String> {
        self.state.lock().await.data.clone()
    }

    /// Dispatches one request to its role-aware handler.
    pub(crate) async fn handle_request(&self, req: ApiRequest) -> ApiReply {
        match req {
            ApiRequest::Get { key } => self.handle_get(key).await,
            ApiRequest::Put { key, value } => {
                self.handle_put(key, value).await
            }
            ApiRequest::ForwardUpdate { key, value } => {
                self.handle_forward_update(key, value).await
            }
            ApiRequest::SyncState { data, view_number } => {
                self.handle_sync_state(data, view_number).await
            }
        }
    }
}
