//! Retry/failover KV client helper: asks the view service who the primary
//! is, issues Get/Put against it, and re-routes on stale-primary errors.

use serde::Deserialize;
use tokio::time::{self, Duration};

use crate::client::{ClientApiStub, ClientCtrlStub};
use crate::kvserver::ErrKind;
use crate::utils::ViewKvError;
use crate::viewserv::View;

/// Configuration parameters struct.
#[derive(Debug, Clone, Deserialize)]
pub struct KvClientConfig {
    /// Sleep between failed attempts in millisecs.
    pub retry_interval_ms: u64,

    /// Deadline of each outbound RPC in millisecs.
    pub rpc_timeout_ms: u64,
}

#[allow(clippy::derivable_impls)]
impl Default for KvClientConfig {
    fn default() -> Self {
        KvClientConfig {
            retry_interval_ms: 500,
            rpc_timeout_ms: 2000,
        }
    }
}

/// KV client endpoint. Maintains a connection to the view service and,
/// lazily, to the current primary.
pub struct KvClient {
    /// View service address string.
    vs_addr: String,

    /// Configuration parameters struct.
    config: KvClientConfig,

    /// Connection to the view service, opened lazily.
    ctrl_stub: Option<ClientCtrlStub>,

    /// Connection to the current primary, opened lazily.
    api_stub: Option<ClientApiStub>,

    /// Name of the primary the api stub points at, or empty.
    primary: String,
}

impl KvClient {
    /// Creates a new KV client endpoint; no connection is made yet.
    pub fn new(vs_addr: String, config: KvClientConfig) -> Self {
        KvClient {
            vs_addr,
            config,
            ctrl_stub: None,
            api_stub: None,
            primary: String::new(),
        }
    }

    /// Reads the value of a key, retrying indefinitely across primary
    /// failures. Returns `Ok(None)` if the key has no value.
    pub async fn get(
        &mut self,
        key: &str,
    ) -> Result<Option<String>, ViewKvError> {
        let deadline = Duration::from_millis(self.config.rpc_timeout_ms);

        loop {
            if !self.ensure_primary().await {
                self.backoff().await;
                continue;
            }

            let outcome = match self.api_stub.as_mut() {
                Some(stub) => stub.get(key, deadline).await,
                None => continue,
            };
            match outcome {
                Ok((value, true, _)) => return Ok(Some(value)),
                Ok((_, false, Some(ErrKind::NoKey))) => return Ok(None),
                Ok(_) | Err(_) => {
                    // stale primary or transport failure
                    pf_debug!("c"; "get failed, refreshing primary");
                    self.drop_primary();
                    self.backoff().await;
                }
            }
        }
    }

    /// Writes a value into a key, retrying indefinitely across primary
    /// failures. At-least-once: a retried Put may execute more than once.
    pub async fn put(
        &mut self,
        key: &str,
        value: &str,
    ) -> Result<(), ViewKvError> {
        let deadline = Duration::from_millis(self.config.rpc_timeout_ms);

        loop {
            if !self.ensure_primary().await {
                self.backoff().await;
                continue;
            }

            let outcome = match self.api_stub.as_mut() {
                Some(stub) => stub.put(key, value, deadline).await,
                None => continue,
            };
            match outcome {
                Ok((true, _)) => return Ok(()),
                Ok(_) | Err(_) => {
                    pf_debug!("c"; "put failed, refreshing primary");
                    self.drop_primary();
                    self.backoff().await;
                }
            }
        }
    }

    /// Fetches the current view from the view service, one-shot.
    pub async fn get_view(&mut self) -> Result<View, ViewKvError> {
        let deadline = Duration::from_millis(self.config.rpc_timeout_ms);

        if self.ctrl_stub.is_none() {
            self.ctrl_stub =
                Some(ClientCtrlStub::connect(&self.vs_addr).await?);
        }
        match self.ctrl_stub.as_mut() {
            Some(stub) => match stub.get_view(deadline).await {
                Ok(view) => Ok(view),
                Err(e) => {
                    self.ctrl_stub = None;
                    Err(e)
                }
            },
            None => logged_err!("c"; "view service stub not connected"),
        }
    }

    /// Makes sure a primary is known and an api stub is connected to it.
    async fn ensure_primary(&mut self) -> bool {
        if self.primary.is_empty() {
            match self.get_view().await {
                Ok(view) => {
                    if view.has_primary() {
                        pf_debug!("c"; "current primary is '{}'",
                                       view.primary);
                        self.primary = view.primary;
                    }
                }
                Err(e) => {
                    pf_debug!("c"; "cannot fetch view: {}", e);
                }
            }
        }
        if self.primary.is_empty() {
            return false;
        }

        if self.api_stub.is_none() {
            match ClientApiStub::connect(&self.primary).await {
                Ok(stub) => self.api_stub = Some(stub),
                Err(e) => {
                    pf_debug!("c"; "cannot reach primary '{}': {}",
                                   self.primary, e);
                    self.primary.clear();
                    return false;
                }
            }
        }
        true
    }

    /// Forgets the cached primary and its connection.
    fn drop_primary(&mut self) {
        self.primary.clear();
        self.api_stub = None;
    }

    async fn backoff(&self) {
        time::sleep(Duration::from_millis(self.config.retry_interval_ms))
            .await;
    }
}
