//! Helper utilities, functions, and macros.

#[macro_use]
mod print;

#[macro_use]
mod config;

mod error;
mod safetcp;

pub use error::ViewKvError;
pub(crate) use safetcp::{
    resolve_name, safe_tcp_read, safe_tcp_write, tcp_bind_with_retry,
    tcp_connect_to,
};
