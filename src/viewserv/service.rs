//! View service server: the RPC acceptor and the failure-detection ticker.

use std::sync::Arc;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time::{self, Duration, Instant};

use crate::utils::{
    resolve_name, safe_tcp_read, safe_tcp_write, tcp_bind_with_retry,
    ViewKvError,
};
use crate::viewserv::state::ViewState;
use crate::viewserv::View;

/// Configuration parameters struct.
#[derive(Debug, Clone, Deserialize)]
pub struct ViewServiceConfig {
    /// Interval of the failure-detection ticker in millisecs.
    pub ticker_interval_ms: u64,

    /// A server missing pings for longer than this many millisecs is
    /// declared dead. Should be at least three ping intervals.
    pub dead_interval_ms: u64,
}

#[allow(clippy::derivable_impls)]
impl Default for ViewServiceConfig {
    fn default() -> Self {
        ViewServiceConfig {
            ticker_interval_ms: 500,
            dead_interval_ms: 1500,
        }
    }
}

/// Wire request to the view service.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum CtrlRequest {
    /// Heartbeat from a KV server, carrying the view number it last
    /// observed.
    Ping { server: String, view_number: u64 },

    /// One-shot view lookup from a client.
    GetView,
}

/// Wire reply from the view service: the current view, unconditionally.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct CtrlReply {
    pub view: View,
}

/// Standalone view service.
pub struct ViewService {
    /// Address string (`host:port`) to listen on.
    addr: String,

    /// Configuration parameters struct.
    config: ViewServiceConfig,

    /// Entire service state behind one mutex.
    state: Arc<Mutex<ViewState>>,
}

impl ViewService {
    /// Creates a new view service bound to nothing yet.
    pub fn new(
        addr: String,
        config: ViewServiceConfig,
    ) -> Result<Self, ViewKvError> {
        if config.ticker_interval_ms == 0 {
            return logged_err!("v"; "invalid config.ticker_interval_ms '{}'",
                                    config.ticker_interval_ms);
        }
        if config.dead_interval_ms == 0 {
            return logged_err!("v"; "invalid config.dead_interval_ms '{}'",
                                    config.dead_interval_ms);
        }

        let dead_interval = Duration::from_millis(config.dead_interval_ms);
        Ok(ViewService {
            addr,
            config,
            state: Arc::new(Mutex::new(ViewState::new(dead_interval))),
        })
    }

    /// Binds the listening socket, spawns the ticker, and serves incoming
    /// connections until the termination signal fires.
    pub async fn run(
        &self,
        rx_term: watch::Receiver<bool>,
    ) -> Result<(), ViewKvError> {
        let listener =
            tcp_bind_with_retry(resolve_name(&self.addr).await?, 10).await?;
        pf_info!("v"; "view service listening on '{}'", self.addr);

        tokio::spawn(Self::ticker_task(
            self.state.clone(),
            Duration::from_millis(self.config.ticker_interval_ms),
            rx_term.clone(),
        ));

        let mut rx_term = rx_term;
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            pf_warn!("v"; "error accepting connection: {}", e);
                            continue;
                        }
                    };
                    pf_debug!("v"; "accepted connection from '{}'", peer_addr);
                    tokio::spawn(Self::serve_conn(
                        self.state.clone(),
                        stream,
                        rx_term.clone(),
                    ));
                },

                _ = rx_term.changed() => {
                    pf_warn!("v"; "view service caught termination signal");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Periodic failure detection and view transitions.
    async fn ticker_task(
        state: Arc<Mutex<ViewState>>,
        period: Duration,
        mut rx_term: watch::Receiver<bool>,
    ) {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    state.lock().await.tick(Instant::now());
                },

                _ = rx_term.changed() => break,
            }
        }
    }

    /// Serves one accepted connection: a sequence of request/reply
    /// exchanges until the peer closes or the service terminates.
    async fn serve_conn(
        state: Arc<Mutex<ViewState>>,
        mut stream: TcpStream,
        mut rx_term: watch::Receiver<bool>,
    ) {
        let mut read_buf = BytesMut::with_capacity(8 + 1024);

        loop {
            let req: CtrlRequest = tokio::select! {
                req = safe_tcp_read(&mut read_buf, &mut stream) => {
                    match req {
                        Ok(req) => req,
                        Err(_) => break, // peer gone
                    }
                },

                _ = rx_term.changed() => break,
            };

            let view = {
                let mut guard = state.lock().await;
                match req {
                    CtrlRequest::Ping {
                        ref server,
                        view_number,
                    } => guard.ping(server, view_number, Instant::now()),
                    CtrlRequest::GetView => guard.get_view(),
                }
            };

            if let Err(e) =
                safe_tcp_write(&mut stream, &CtrlReply { view }).await
            {
                pf_debug!("v"; "error replying to peer: {}", e);
                break;
            }
        }
    }
}
