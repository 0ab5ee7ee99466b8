//! KV server connection stub, used by clients against the primary and by
//! the primary against its backup.

use std::collections::HashMap;

use bytes::BytesMut;
use tokio::net::TcpStream;
use tokio::time::{self, Duration};

use crate::kvserver::{ApiReply, ApiRequest, ErrKind};
use crate::utils::{
    safe_tcp_read, safe_tcp_write, tcp_connect_to, ViewKvError,
};

/// KV server connection stub.
pub struct ClientApiStub {
    /// TCP connection to the KV server.
    conn: TcpStream,

    /// Reply read buffer.
    reply_buf: BytesMut,
}

impl ClientApiStub {
    /// Connects to the KV server at the given `host:port` name.
    pub async fn connect(addr: &str) -> Result<Self, ViewKvError> {
        let conn = tcp_connect_to(addr).await?;
        Ok(ClientApiStub {
            conn,
            reply_buf: BytesMut::with_capacity(8 + 1024),
        })
    }

    /// Issues one request and waits for its reply under the given deadline.
    /// A deadline expiry leaves the connection unusable; callers drop the
    /// stub and reconnect.
    async fn call(
        &mut self,
        req: &ApiRequest,
        deadline: Duration,
    ) -> Result<ApiReply, ViewKvError> {
        time::timeout(deadline, async {
            safe_tcp_write(&mut self.conn, req).await?;
            safe_tcp_read(&mut self.reply_buf, &mut self.conn).await
        })
        .await
        .unwrap_or_else(|e| Err(e.into()))
    }

    /// Reads the value of a key from the primary.
    pub async fn get(
        &mut self,
        key: &str,
        deadline: Duration,
    ) -> Result<(String, bool, Option<ErrKind>), ViewKvError> {
        match self
            .call(&ApiRequest::Get { key: key.into() }, deadline)
            .await?
        {
            ApiReply::Get { value, ok, err } => Ok((value, ok, err)),
            _ => logged_err!("c"; "unexpected reply type received"),
        }
    }

    /// Writes a value into a key on the primary.
    pub async fn put(
        &mut self,
        key: &str,
        value: &str,
        deadline: Duration,
    ) -> Result<(bool, Option<ErrKind>), ViewKvError> {
        match self
            .call(
                &ApiRequest::Put {
                    key: key.into(),
                    value: value.into(),
                },
                deadline,
            )
            .await?
        {
            ApiReply::Put { ok, err } => Ok((ok, err)),
            _ => logged_err!("c"; "unexpected reply type received"),
        }
    }

    /// Forwards one update to a backup.
    pub async fn forward_update(
        &mut self,
        key: &str,
        value: &str,
        deadline: Duration,
    ) -> Result<bool, ViewKvError> {
        match self
            .call(
                &ApiRequest::ForwardUpdate {
                    key: key.into(),
                    value: value.into(),
                },
                deadline,
            )
            .await?
        {
            ApiReply::ForwardUpdate { ok } => Ok(ok),
            _ => logged_err!("c"; "unexpected reply type received"),
        }
    }

    /// Pushes a full state snapshot to a backup.
    pub async fn sync_state(
        &mut self,
        data: HashMap<String, String>,
        view_number: u64,
        deadline: Duration,
    ) -> Result<bool, ViewKvError> {
        match self
            .call(&ApiRequest::SyncState { data, view_number }, deadline)
            .await?
        {
            ApiReply::SyncState { ok } => Ok(ok),
            _ => logged_err!("c"; "unexpected reply type received"),
        }
    }
}
