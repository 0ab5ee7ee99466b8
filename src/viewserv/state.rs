//! View-management state machine: failure detection, promotion rules, and
//! the primary acknowledgement gate.

use std::collections::BTreeMap;
use std::mem;

use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

/// A view: a monotonically numbered (primary, backup) assignment. An empty
/// string means no server currently fills that role.
#[derive(Debug, PartialEq, Eq, Clone, Default, Serialize, Deserialize)]
pub struct View {
    /// Strictly increasing view number, starting from 0.
    pub view_number: u64,

    /// Name (`host:port`) of the current primary, or empty.
    pub primary: String,

    /// Name (`host:port`) of the current backup, or empty.
    pub backup: String,
}

impl View {
    /// True if some server currently holds the primary role.
    pub fn has_primary(&self) -> bool {
        !self.primary.is_empty()
    }

    /// True if some server currently holds the backup role.
    pub fn has_backup(&self) -> bool {
        !self.backup.is_empty()
    }
}

/// Liveness bookkeeping for one server that has pinged at least once.
/// Entries are never purged, so a server that resumes pinging after being
/// declared dead is recognised again.
#[derive(Debug, Clone)]
pub(crate) struct ServerInfo {
    /// The server's self-reported name.
    pub(crate) name: String,

    /// Time of the last received Ping.
    pub(crate) last_ping: Instant,

    /// Derived liveness: `now - last_ping <= dead_interval` as of the last
    /// tick or Ping.
    pub(crate) alive: bool,
}

/// Entire mutable state of the view service, guarded by one mutex in
/// [`super::ViewService`].
pub(crate) struct ViewState {
    /// The current authoritative view.
    pub(crate) view: View,

    /// All servers ever heard from, keyed by name. Name order doubles as the
    /// deterministic tie-break for role selection.
    pub(crate) servers: BTreeMap<String, ServerInfo>,

    /// Names of known servers not currently primary or backup.
    pub(crate) idle_servers: Vec<String>,

    /// Whether the current primary has pinged carrying the current view
    /// number. Vacuously true while there is no primary. Every transition
    /// that publishes a new view number with a primary in it resets this to
    /// false until that primary pings with the new number.
    pub(crate) primary_acked: bool,

    /// A server missing pings for longer than this is declared dead.
    dead_interval: Duration,
}

impl ViewState {
    pub(crate) fn new(dead_interval: Duration) -> Self {
        ViewState {
            view: View::default(),
            servers: BTreeMap::new(),
            idle_servers: Vec::new(),
            primary_acked: true,
            dead_interval,
        }
    }

    /// Handles one heartbeat: refreshes the sender's liveness, registers it
    /// if previously unknown, and records the primary's acknowledgement of
    /// the current view. Returns the current view unconditionally.
    pub(crate) fn ping(
        &mut self,
        server: &str,
        view_number: u64,
        now: Instant,
    ) -> View {
        match self.servers.get_mut(server) {
            Some(info) => {
                info.last_ping = now;
                info.alive = true;
            }
            None => {
                self.servers.insert(
                    server.into(),
                    ServerInfo {
                        name: server.into(),
                        last_ping: now,
                        alive: true,
                    },
                );
                if server != self.view.primary && server != self.view.backup {
                    self.idle_servers.push(server.into());
                }
            }
        }

        if server == self.view.primary && view_number == self.view.view_number
        {
            self.primary_acked = true;
        }

        self.view.clone()
    }

    /// Returns the current view.
    pub(crate) fn get_view(&self) -> View {
        self.view.clone()
    }

    /// One round of failure detection and role transitions. Rules are
    /// evaluated in a fixed order; each rule that fires bumps the view
    /// number, and only the final composed view is published.
    ///
    /// The acknowledgement gate: no rule that assigns, changes, or removes
    /// the primary may fire until the current primary has pinged carrying
    /// the current view number. Since any fired rule publishes a new number,
    /// it also re-arms the gate whenever a primary remains.
    pub(crate) fn tick(&mut self, now: Instant) {
        // refresh liveness of all known servers
        for info in self.servers.values_mut() {
            if now.duration_since(info.last_ping) > self.dead_interval
                && info.alive
            {
                info.alive = false;
                pf_info!("v"; "server '{}' declared dead", info.name);
            }
        }

        // dead primary
        if self.view.has_primary() && !self.is_alive(&self.view.primary) {
            if self.primary_acked
                && self.view.has_backup()
                && self.is_alive(&self.view.backup)
            {
                // promote the backup
                pf_info!("v"; "promoting backup '{}' to primary",
                              self.view.backup);
                self.view.primary = mem::take(&mut self.view.backup);
                self.view.view_number += 1;
                self.primary_acked = false;
            } else if self.primary_acked && !self.view.has_backup() {
                // nothing to promote, just vacate the primary slot
                pf_info!("v"; "removing dead primary '{}'", self.view.primary);
                self.view.primary.clear();
                self.view.view_number += 1;
                self.primary_acked = true;
            }
        }

        // dead backup
        if self.view.has_backup() && !self.is_alive(&self.view.backup) {
            pf_info!("v"; "removing dead backup '{}'", self.view.backup);
            self.view.backup.clear();
            self.view.view_number += 1;
            self.primary_acked = !self.view.has_primary();
        }

        // fill vacant primary
        if !self.view.has_primary() && self.primary_acked {
            if let Some(name) = self.pick_server(&self.view.backup.clone()) {
                pf_info!("v"; "assigning '{}' as new primary", name);
                self.view.primary = name;
                self.view.view_number += 1;
                self.primary_acked = false;
            }
        }

        // fill vacant backup
        if !self.view.has_backup()
            && self.view.has_primary()
            && self.primary_acked
        {
            if let Some(name) = self.pick_server(&self.view.primary.clone()) {
                pf_info!("v"; "assigning '{}' as new backup", name);
                self.view.backup = name;
                self.view.view_number += 1;
                self.primary_acked = false;
            }
        }
    }

    fn is_alive(&self, name: &str) -> bool {
        self.servers.get(name).is_some_and(|info| info.alive)
    }

    /// Picks the first alive server in name order that is not `excluded`,
    /// removing it from the idle list.
    fn pick_server(&mut self, excluded: &str) -> Option<String> {
        let picked = self
            .servers
            .values()
            .find(|info| info.alive && info.name != excluded)
            .map(|info| info.name.clone())?;

        self.idle_servers.retain(|name| *name != picked);
        Some(picked)
    }
}

#[cfg(test)]
mod state_tests {
    use super::*;

    const DEAD: Duration = Duration::from_millis(1500);

    fn fresh() -> (ViewState, Instant) {
        (ViewState::new(DEAD), Instant::now())
    }

    #[test]
    fn cold_start_fills_primary_then_backup() {
        let (mut state, now) = fresh();
        assert_eq!(state.get_view(), View::default());

        state.ping("a:8001", 0, now);
        state.tick(now);
        assert_eq!(state.view.view_number, 1);
        assert_eq!(state.view.primary, "a:8001");
        assert!(!state.view.has_backup());
        assert!(!state.primary_acked);

        // backup must not be assigned before the primary acks view 1
        state.ping("b:8002", 0, now);
        state.tick(now);
        assert_eq!(state.view.view_number, 1);

        state.ping("a:8001", 1, now);
        assert!(state.primary_acked);
        state.tick(now);
        assert_eq!(state.view.view_number, 2);
        assert_eq!(state.view.primary, "a:8001");
        assert_eq!(state.view.backup, "b:8002");
        // view 2 is unacked until the primary pings with it
        assert!(!state.primary_acked);
    }

    #[test]
    fn ping_registers_idle_servers() {
        let (mut state, now) = fresh();
        state.ping("a:8001", 0, now);
        state.ping("b:8002", 0, now);
        state.ping("c:8003", 0, now);
        assert_eq!(state.idle_servers.len(), 3);

        state.tick(now);
        state.ping("a:8001", 1, now);
        state.tick(now);
        // a and b now hold roles, only c stays idle
        assert_eq!(state.idle_servers, vec!["c:8003".to_string()]);
    }

    #[test]
    fn dead_primary_promotes_acked_backup() {
        let (mut state, now) = fresh();
        state.ping("a:8001", 0, now);
        state.tick(now);
        state.ping("a:8001", 1, now);
        state.ping("b:8002", 0, now);
        state.tick(now);
        state.ping("a:8001", 2, now);
        assert_eq!(state.view.view_number, 2);
        assert!(state.primary_acked);

        // a misses pings past the dead interval; b keeps pinging
        let later = now + DEAD + Duration::from_millis(1);
        state.ping("b:8002", 2, later);
        state.tick(later);
        assert_eq!(state.view.view_number, 3);
        assert_eq!(state.view.primary, "b:8002");
        assert!(!state.view.has_backup());
        assert!(!state.primary_acked);
    }

    #[test]
    fn ack_gate_blocks_promotion() {
        let (mut state, now) = fresh();
        state.ping("a:8001", 0, now);
        state.tick(now);
        state.ping("a:8001", 1, now);
        state.ping("b:8002", 0, now);
        state.tick(now);
        // view {2, a, b} exists but a has never pinged with view_number=2
        assert!(!state.primary_acked);

        let view_before = state.get_view();
        let later = now + DEAD + Duration::from_millis(1);
        state.ping("b:8002", 2, later);
        for i in 0..10u32 {
            state.tick(later + DEAD * i);
        }
        // no transition may occur, however long a stays dead
        assert_eq!(state.get_view(), view_before);
        assert!(!state.primary_acked);
    }

    #[test]
    fn dead_primary_without_backup_vacates() {
        let (mut state, now) = fresh();
        state.ping("a:8001", 0, now);
        state.tick(now);
        state.ping("a:8001", 1, now);

        let later = now + DEAD + Duration::from_millis(1);
        state.tick(later);
        assert_eq!(state.view.view_number, 2);
        assert!(!state.view.has_primary());
        assert!(state.primary_acked);
    }

    #[test]
    fn dead_backup_cleared_then_refilled_after_ack() {
        let (mut state, now) = fresh();
        state.ping("a:8001", 0, now);
        state.tick(now);
        state.ping("a:8001", 1, now);
        state.ping("b:8002", 0, now);
        state.tick(now);
        state.ping("a:8001", 2, now);

        // b dies; c is alive and idle
        let later = now + DEAD + Duration::from_millis(1);
        state.ping("a:8001", 2, later);
        state.ping("c:8003", 0, later);
        state.tick(later);
        assert_eq!(state.view.view_number, 3);
        assert_eq!(state.view.primary, "a:8001");
        assert!(!state.view.has_backup());
        // backup removal re-arms the gate, so the refill waits for the ack
        assert!(!state.primary_acked);
        state.tick(later);
        assert_eq!(state.view.view_number, 3);

        state.ping("a:8001", 3, later);
        state.tick(later);
        assert_eq!(state.view.view_number, 4);
        assert_eq!(state.view.backup, "c:8003");
    }

    #[test]
    fn dead_primary_with_dead_backup_stays_stuck() {
        let (mut state, now) = fresh();
        state.ping("a:8001", 0, now);
        state.tick(now);
        state.ping("a:8001", 1, now);
        state.ping("b:8002", 0, now);
        state.tick(now);
        state.ping("a:8001", 2, now);

        // both die: the first tick clears the dead backup, after which the
        // unacked view {3, a, ""} pins the dead primary in place
        let later = now + DEAD + Duration::from_millis(1);
        state.tick(later);
        assert_eq!(state.view.view_number, 3);
        assert_eq!(state.view.primary, "a:8001");
        assert!(!state.view.has_backup());

        state.tick(later);
        assert_eq!(state.view.view_number, 3);

        // only a's resurrection unwedges the service
        state.ping("a:8001", 3, later);
        state.ping("b:8002", 3, later);
        state.tick(later);
        assert_eq!(state.view.view_number, 4);
        assert_eq!(state.view.primary, "a:8001");
        assert_eq!(state.view.backup, "b:8002");
    }

    #[test]
    fn resurrected_server_is_eligible_again() {
        let (mut state, now) = fresh();
        state.ping("a:8001", 0, now);
        state.ping("b:8002", 0, now);
        state.tick(now);
        state.ping("a:8001", 1, now);
        state.tick(now);
        assert_eq!(state.view.backup, "b:8002");

        // b (the backup) dies, then resumes pinging
        let later = now + DEAD + Duration::from_millis(1);
        state.ping("a:8001", 2, later);
        state.tick(later);
        assert_eq!(state.view.view_number, 3);
        assert!(!state.view.has_backup());

        state.ping("a:8001", 3, later);
        state.ping("b:8002", 3, later);
        state.tick(later);
        assert_eq!(state.view.view_number, 4);
        assert_eq!(state.view.backup, "b:8002");
    }

    #[test]
    fn selection_prefers_name_order() {
        let (mut state, now) = fresh();
        state.ping("c:8003", 0, now);
        state.ping("a:8001", 0, now);
        state.ping("b:8002", 0, now);
        state.tick(now);
        assert_eq!(state.view.primary, "a:8001");

        state.ping("a:8001", 1, now);
        state.tick(now);
        assert_eq!(state.view.backup, "b:8002");
    }

    #[test]
    fn view_invariants_hold_across_trace() {
        let (mut state, mut now) = fresh();
        let mut last_number = 0;
        let servers = ["a:8001", "b:8002", "c:8003"];

        // a scripted churn trace: each phase one server goes quiet long
        // enough to be declared dead, while the others ping with whatever
        // view number they last saw
        for round in 0..40usize {
            let quiet = (round / 4) % 3;
            for (i, name) in servers.iter().enumerate() {
                if i != quiet {
                    state.ping(name, state.view.view_number, now);
                }
            }
            now += Duration::from_millis(600);
            state.tick(now);

            let view = state.get_view();
            assert!(view.view_number >= last_number);
            last_number = view.view_number;
            if view.has_primary() && view.has_backup() {
                assert_ne!(view.primary, view.backup);
            }
            if view.has_backup() {
                assert!(view.has_primary());
            }
        }
    }
}
