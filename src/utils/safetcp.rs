//! Safe TCP bind/connect/read/write helper functions.

use std::marker::Unpin;
use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use rmp_serde::decode::from_slice as decode_from_slice;
use rmp_serde::encode::to_vec as encode_to_vec;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio::time::{self, Duration};

use crate::utils::ViewKvError;

/// Receives an object of type `T` from TCP readable connection `conn_read`,
/// using `read_buf` as buffer storage for partial reads. Returns:
///   - `Ok(obj)` if successful; upon returning, bytes of the object are
///     consumed from the read buffer
///   - `Err(err)` on connection close or any unexpected error
///
/// CANCELLATION SAFETY: we cannot use `read_u64()` and `read_exact()` here
/// because this function is intended to be used as a `tokio::select!` branch
/// and that those two methods are not cancellation-safe. Instead, in the case
/// of being cancelled midway before receiving the entire object (note that
/// such cancellation can only happen at `.await` points), bytes already read
/// are stored in the read buffer and will continue to be appended by future
/// invocations until successful returning.
pub(crate) async fn safe_tcp_read<T, Conn>(
    read_buf: &mut BytesMut,
    conn_read: &mut Conn,
) -> Result<T, ViewKvError>
where
    T: DeserializeOwned,
    Conn: AsyncReadExt + Unpin,
{
    // read length of obj first
    if read_buf.capacity() < 8 {
        read_buf.reserve(8 - read_buf.capacity());
    }
    while read_buf.len() < 8 {
        // obj_len not wholesomely read from socket before last cancellation
        if conn_read.read_buf(read_buf).await? == 0 {
            return Err(ViewKvError::msg("connection closed"));
        }
    }
    let obj_len = u64::from_be_bytes(read_buf[..8].try_into().unwrap());

    // then read the obj itself
    #[allow(clippy::cast_possible_truncation)]
    let obj_end = 8 + obj_len as usize;
    if read_buf.capacity() < obj_end {
        // capacity not big enough, reserve more space
        read_buf.reserve(obj_end - read_buf.capacity());
    }
    while read_buf.len() < obj_end {
        if conn_read.read_buf(read_buf).await? == 0 {
            return Err(ViewKvError::msg("connection closed"));
        }
    }
    let obj = decode_from_slice(&read_buf[8..obj_end])?;

    // if reached this point, no further cancellation to this call is
    // possible (because there are no more awaits ahead); discard bytes
    // used in this call
    if read_buf.len() > obj_end {
        let buf_tail = Bytes::copy_from_slice(&read_buf[obj_end..]);
        read_buf.clear();
        read_buf.extend_from_slice(&buf_tail);
    } else {
        read_buf.clear();
    }

    Ok(obj)
}

/// Sends an object of type `T` through TCP writable connection `conn_write`,
/// framed as an 8-byte big-endian length followed by the encoded object.
///
/// Callers follow a strict request/response alternation on every connection,
/// so a plain `write_all()` here cannot deadlock with the peer.
pub(crate) async fn safe_tcp_write<T, Conn>(
    conn_write: &mut Conn,
    obj: &T,
) -> Result<(), ViewKvError>
where
    T: Serialize,
    Conn: AsyncWriteExt + Unpin,
{
    let obj_bytes = encode_to_vec(obj)?;
    let obj_len = obj_bytes.len() as u64;

    conn_write.write_all(&obj_len.to_be_bytes()).await?;
    conn_write.write_all(obj_bytes.as_slice()).await?;
    conn_write.flush().await?;

    Ok(())
}

/// Wrapper over tokio `TcpListener::bind()` that provides a retrying logic.
pub(crate) async fn tcp_bind_with_retry(
    bind_addr: SocketAddr,
    mut retries: u8,
) -> Result<TcpListener, ViewKvError> {
    loop {
        match TcpListener::bind(bind_addr).await {
            Ok(listener) => return Ok(listener),
            Err(err) => {
                if retries == 0 {
                    return Err(err.into());
                }
                retries -= 1;
                time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Resolves a `host:port` name string into a socket address.
pub(crate) async fn resolve_name(
    name: &str,
) -> Result<SocketAddr, ViewKvError> {
    lookup_host(name).await?.next().ok_or_else(|| {
        ViewKvError(format!("cannot resolve address '{}'", name))
    })
}

/// Connects to a peer named by a `host:port` string, resolving the host
/// first. Sets TCP_NODELAY on the resulting stream.
pub(crate) async fn tcp_connect_to(name: &str) -> Result<TcpStream, ViewKvError> {
    let addr = resolve_name(name).await?;

    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
