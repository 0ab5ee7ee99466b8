//! Heartbeat loop to the view service and view-change handling.

use std::mem;

use tokio::sync::watch;
use tokio::time::{self, Duration};

use crate::client::ClientCtrlStub;
use crate::kvserver::replica::{KvServer, ReplicaState, Role};
use crate::viewserv::View;

// KvServer heartbeat loop
impl KvServer {
    /// Periodically pings the view service with the locally observed view
    /// number, reconnecting lazily after any failure. Every returned view
    /// replaces the local one; a changed view number triggers the
    /// view-change handler.
    pub(crate) async fn heartbeat_loop(
        self,
        mut rx_term: watch::Receiver<bool>,
    ) {
        let mut ticker = time::interval(Duration::from_millis(
            self.config.ping_interval_ms,
        ));
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        let deadline = Duration::from_millis(self.config.rpc_timeout_ms);

        let mut ctrl_stub: Option<ClientCtrlStub> = None;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if ctrl_stub.is_none() {
                        match ClientCtrlStub::connect(&self.vs_addr).await {
                            Ok(stub) => {
                                pf_info!(&self.me;
                                         "connected to view service at '{}'",
                                         self.vs_addr);
                                ctrl_stub = Some(stub);
                            }
                            Err(e) => {
                                pf_debug!(&self.me;
                                          "cannot reach view service: {}", e);
                                continue;
                            }
                        }
                    }

                    let observed =
                        self.state.lock().await.view.view_number;
                    if let Some(stub) = ctrl_stub.as_mut() {
                        match stub.ping(&self.me, observed, deadline).await {
                            Ok(view) => self.observe_view(view).await,
                            Err(e) => {
                                pf_warn!(&self.me;
                                         "ping to view service failed: {}", e);
                                ctrl_stub = None;
                            }
                        }
                    }
                },

                _ = rx_term.changed() => break,
            }
        }
    }

    /// Installs a view returned by the view service.
    pub(crate) async fn observe_view(&self, view: View) {
        let mut guard = self.state.lock().await;
        if view.view_number == guard.view.view_number {
            return;
        }

        let old_view = mem::replace(&mut guard.view, view);
        self.handle_view_change(&mut guard, old_view);
    }

    /// Re-derives the role from the new view. A primary seeing a backup it
    /// has not synced to yet snapshots its store under the lock and
    /// schedules the transfer.
    fn handle_view_change(&self, guard: &mut ReplicaState, old_view: View) {
        pf_info!(&self.me;
                 "view changed from {} to {} (primary: '{}', backup: '{}')",
                 old_view.view_number, guard.view.view_number,
                 guard.view.primary, guard.view.backup);

        let new_role = if guard.view.primary == self.me {
            Role::Primary
        } else if guard.view.backup == self.me {
            Role::Backup
        } else {
            Role::Idle
        };
        if new_role != guard.role {
            pf_info!(&self.me; "role changed from {} to {}",
                               guard.role, new_role);
            guard.role = new_role;
        }

        if guard.role == Role::Primary {
            if guard.view.has_backup()
                && guard.view.backup != guard.last_backup
            {
                guard.last_backup = guard.view.backup.clone();
                guard.syncing = true;
                let snapshot = guard.data.clone();
                let backup = guard.view.backup.clone();
                let view_number = guard.view.view_number;
                pf_info!(&self.me; "new backup '{}', scheduling state transfer",
                                   backup);
                tokio::spawn(self.clone().transfer_state(
                    backup,
                    snapshot,
                    view_number,
                ));
            } else if !guard.view.has_backup() {
                guard.last_backup.clear();
            }
        }
    }
}
