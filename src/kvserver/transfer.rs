//! Full-state transfer from the primary to a newly designated backup.

use std::collections::HashMap;
use std::mem;

use tokio::time::{self, Duration};

use crate::client::ClientApiStub;
use crate::kvserver::replica::KvServer;
use crate::utils::ViewKvError;

// KvServer primary-side state transfer
impl KvServer {
    /// Pushes the given snapshot to the backup with the long transfer
    /// deadline, then clears `syncing` and replays the Puts queued while
    /// the transfer was in flight, FIFO, through the normal Put path.
    ///
    /// A failed transfer also clears `syncing`; the next view change with a
    /// different backup retries with a fresh snapshot.
    pub(crate) async fn transfer_state(
        self,
        backup: String,
        snapshot: HashMap<String, String>,
        view_number: u64,
    ) {
        let num_keys = snapshot.len();
        pf_info!(&self.me; "transferring {} keys to backup '{}' (view {})",
                           num_keys, backup, view_number);

        let deadline = Duration::from_millis(self.config.sync_timeout_ms);
        let result: Result<bool, ViewKvError> =
            time::timeout(deadline, async {
                let mut stub = ClientApiStub::connect(&backup).await?;
                stub.sync_state(snapshot, view_number, deadline).await
            })
            .await
            .unwrap_or_else(|e| Err(e.into()));

        match result {
            Ok(true) => {
                pf_info!(&self.me; "state transfer of {} keys to '{}' done",
                                   num_keys, backup);
            }
            Ok(false) => {
                pf_warn!(&self.me; "backup '{}' refused state transfer",
                                   backup);
            }
            Err(e) => {
                pf_warn!(&self.me; "state transfer to '{}' failed: {}",
                                   backup, e);
            }
        }

        let pending = {
            let mut guard = self.state.lock().await;
            guard.syncing = false;
            mem::take(&mut guard.pending_puts)
        };

        if !pending.is_empty() {
            pf_info!(&self.me; "replaying {} queued puts", pending.len());
            for (key, value) in pending {
                let _ = self.handle_put(key, value).await;
            }
        }
    }
}
