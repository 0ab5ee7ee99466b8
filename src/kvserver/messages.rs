//! Primary-to-backup replication traffic: forwarding on the sender side,
//! ForwardUpdate/SyncState handlers on the receiver side.

use std::collections::HashMap;

use tokio::time::{self, Duration};

use crate::client::ClientApiStub;
use crate::kvserver::replica::{KvServer, Role};
use crate::kvserver::ApiReply;
use crate::utils::ViewKvError;

// KvServer primary-side forwarding
impl KvServer {
    /// Forwards one update to the backup with the steady-state RPC deadline.
    /// Failures are logged and swallowed; the caller proceeds with its local
    /// write either way.
    pub(crate) async fn forward_update(
        &self,
        backup: &str,
        key: &str,
        value: &str,
    ) {
        let deadline = Duration::from_millis(self.config.rpc_timeout_ms);
        let result: Result<bool, ViewKvError> =
            time::timeout(deadline, async {
                let mut stub = ClientApiStub::connect(backup).await?;
                stub.forward_update(key, value, deadline).await
            })
            .await
            .unwrap_or_else(|e| Err(e.into()));

        match result {
            Ok(true) => {}
            Ok(false) => {
                pf_warn!(&self.me;
                         "backup '{}' refused forwarded update", backup);
            }
            Err(e) => {
                pf_warn!(&self.me;
                         "forwarding to backup '{}' failed: {}", backup, e);
            }
        }
    }
}

// KvServer backup-side replication handlers
impl KvServer {
    /// Handler of ForwardUpdate from the primary.
    pub(crate) async fn handle_forward_update(
        &self,
        key: String,
        value: String,
    ) -> ApiReply {
        let mut guard = self.state.lock().await;

        if guard.role != Role::Backup {
            return ApiReply::ForwardUpdate { ok: false };
        }

        guard.data.insert(key, value);
        ApiReply::ForwardUpdate { ok: true }
    }

    /// Handler of SyncState from the primary: replaces the whole local
    /// store with the supplied snapshot. The sender is trusted to only
    /// invoke this on its designated backup, so no role check here.
    pub(crate) async fn handle_sync_state(
        &self,
        data: HashMap<String, String>,
        view_number: u64,
    ) -> ApiReply {
        let mut guard = self.state.lock().await;

        pf_info!(&self.me; "installing snapshot of {} keys (view {})",
                           data.len(), view_number);
        guard.data = data;
        ApiReply::SyncState { ok: true }
    }
}
