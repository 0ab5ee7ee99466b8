//! Client-facing Get/Put request handlers.

use crate::kvserver::replica::{KvServer, Role};
use crate::kvserver::{ApiReply, ErrKind};

// KvServer client-facing request handlers
impl KvServer {
    /// Handler of client Get. Served from local state only; never touches
    /// the backup.
    pub(crate) async fn handle_get(&self, key: String) -> ApiReply {
        let guard = self.state.lock().await;

        if guard.role != Role::Primary {
            return ApiReply::Get {
                value: String::new(),
                ok: false,
                err: Some(ErrKind::NotPrimary),
            };
        }

        match guard.data.get(&key) {
            Some(value) => ApiReply::Get {
                value: value.clone(),
                ok: true,
                err: None,
            },
            None => ApiReply::Get {
                value: String::new(),
                ok: false,
                err: Some(ErrKind::NoKey),
            },
        }
    }

    /// Handler of client Put. While a state transfer is in flight the
    /// request is queued and acknowledged immediately; it replays through
    /// this same path once the transfer ends. Otherwise the update is
    /// forwarded to the backup (if any) before the local write.
    pub(crate) async fn handle_put(
        &self,
        key: String,
        value: String,
    ) -> ApiReply {
        let backup = {
            let mut guard = self.state.lock().await;

            if guard.role != Role::Primary {
                return ApiReply::Put {
                    ok: false,
                    err: Some(ErrKind::NotPrimary),
                };
            }

            if guard.syncing {
                guard.pending_puts.push_back((key, value));
                return ApiReply::Put {
                    ok: true,
                    err: None,
                };
            }

            guard.view.backup.clone()
            // lock released before any forwarding I/O
        };

        if !backup.is_empty() {
            self.forward_update(&backup, &key, &value).await;
        }

        let mut guard = self.state.lock().await;
        guard.data.insert(key, value);
        ApiReply::Put {
            ok: true,
            err: None,
        }
    }
}
