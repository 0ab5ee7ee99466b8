//! Client-side connection stubs and the retry/failover KV client helper.

mod ctrlstub;

mod apistub;

mod kvclient;

pub use ctrlstub::ClientCtrlStub;

pub use apistub::ClientApiStub;

pub use kvclient::{KvClient, KvClientConfig};
