//! View service connection stub, used by clients for view lookups and by KV
//! servers for heartbeats.

use bytes::BytesMut;
use tokio::net::TcpStream;
use tokio::time::{self, Duration};

use crate::utils::{
    safe_tcp_read, safe_tcp_write, tcp_connect_to, ViewKvError,
};
use crate::viewserv::{CtrlReply, CtrlRequest, View};

/// View service connection stub.
pub struct ClientCtrlStub {
    /// TCP connection to the view service.
    conn: TcpStream,

    /// Reply read buffer.
    reply_buf: BytesMut,
}

impl ClientCtrlStub {
    /// Connects to the view service at the given `host:port` name.
    pub async fn connect(addr: &str) -> Result<Self, ViewKvError> {
        let conn = tcp_connect_to(addr).await?;
        Ok(ClientCtrlStub {
            conn,
            reply_buf: BytesMut::with_capacity(8 + 1024),
        })
    }

    /// Issues one request and waits for its reply under the given deadline.
    /// A deadline expiry leaves the connection unusable; callers drop the
    /// stub and reconnect.
    async fn call(
        &mut self,
        req: &CtrlRequest,
        deadline: Duration,
    ) -> Result<CtrlReply, ViewKvError> {
        time::timeout(deadline, async {
            safe_tcp_write(&mut self.conn, req).await?;
            safe_tcp_read(&mut self.reply_buf, &mut self.conn).await
        })
        .await
        .unwrap_or_else(|e| Err(e.into()))
    }

    /// Sends a heartbeat carrying the observed view number; returns the
    /// current view.
    pub async fn ping(
        &mut self,
        server: &str,
        view_number: u64,
        deadline: Duration,
    ) -> Result<View, ViewKvError> {
        let reply = self
            .call(
                &CtrlRequest::Ping {
                    server: server.into(),
                    view_number,
                },
                deadline,
            )
            .await?;
        Ok(reply.view)
    }

    /// Fetches the current view.
    pub async fn get_view(
        &mut self,
        deadline: Duration,
    ) -> Result<View, ViewKvError> {
        let reply = self.call(&CtrlRequest::GetView, deadline).await?;
        Ok(reply.view)
    }
}
