//! End-to-end miniature-cluster scenarios over localhost TCP, with
//! shortened timing constants so failure detection settles quickly.

use tokio::sync::watch;
use tokio::time::{self, Duration, Instant};
use viewkv::{
    ClientCtrlStub, KvClient, KvClientConfig, KvServer, KvServerConfig,
    View, ViewKvError, ViewService, ViewServiceConfig,
};

const TICK_MS: u64 = 50;
const DEAD_MS: u64 = 150;
const PING_MS: u64 = 50;

fn vs_config() -> ViewServiceConfig {
    ViewServiceConfig {
        ticker_interval_ms: TICK_MS,
        dead_interval_ms: DEAD_MS,
    }
}

fn kv_config() -> KvServerConfig {
    KvServerConfig {
        ping_interval_ms: PING_MS,
        rpc_timeout_ms: 2000,
        sync_timeout_ms: 10000,
    }
}

fn client_config() -> KvClientConfig {
    KvClientConfig {
        retry_interval_ms: 50,
        rpc_timeout_ms: 2000,
    }
}

fn spawn_vs(addr: &str) -> Result<watch::Sender<bool>, ViewKvError> {
    let service = ViewService::new(addr.into(), vs_config())?;
    let (tx_term, rx_term) = watch::channel(false);
    tokio::spawn(async move { service.run(rx_term).await });
    Ok(tx_term)
}

fn spawn_kv(
    addr: &str,
    vs: &str,
) -> Result<watch::Sender<bool>, ViewKvError> {
    let server = KvServer::new(addr.into(), vs.into(), kv_config())?;
    let (tx_term, rx_term) = watch::channel(false);
    tokio::spawn(async move { server.run(rx_term).await });
    Ok(tx_term)
}

/// Like `spawn_kv`, but also hands back the node itself so tests can
/// inspect its store directly.
fn spawn_kv_node(
    addr: &str,
    vs: &str,
) -> Result<(KvServer, watch::Sender<bool>), ViewKvError> {
    let server = KvServer::new(addr.into(), vs.into(), kv_config())?;
    let (tx_term, rx_term) = watch::channel(false);
    let node = server.clone();
    tokio::spawn(async move { node.run(rx_term).await });
    Ok((server, tx_term))
}

/// Polls the view service until the view satisfies `pred` or the window
/// elapses.
async fn await_view(
    vs: &str,
    pred: impl Fn(&View) -> bool,
    within: Duration,
) -> Result<View, ViewKvError> {
    let give_up = Instant::now() + within;
    loop {
        if let Ok(mut stub) = ClientCtrlStub::connect(vs).await {
            if let Ok(view) = stub.get_view(Duration::from_secs(2)).await {
                if pred(&view) {
                    return Ok(view);
                }
            }
        }
        if Instant::now() >= give_up {
            return Err(ViewKvError::msg(
                "view predicate not reached in time",
            ));
        }
        time::sleep(Duration::from_millis(20)).await;
    }
}

const SETTLE: Duration = Duration::from_secs(5);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cold_start_view_progression() -> Result<(), ViewKvError> {
    let vs = "127.0.0.1:37600";
    let tx_vs = spawn_vs(vs)?;

    let view = await_view(vs, |v| v.view_number == 0, SETTLE).await?;
    assert_eq!(view, View::default());

    let tx_a = spawn_kv("127.0.0.1:37601", vs)?;
    let view = await_view(vs, |v| v.view_number == 1, SETTLE).await?;
    assert_eq!(view.primary, "127.0.0.1:37601");
    assert_eq!(view.backup, "");

    let tx_b = spawn_kv("127.0.0.1:37602", vs)?;
    let view = await_view(vs, |v| v.view_number == 2, SETTLE).await?;
    assert_eq!(view.primary, "127.0.0.1:37601");
    assert_eq!(view.backup, "127.0.0.1:37602");

    for tx in [tx_a, tx_b, tx_vs] {
        tx.send(true)?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn replication_and_primary_failover() -> Result<(), ViewKvError> {
    let vs = "127.0.0.1:37610";
    let a = "127.0.0.1:37611";
    let b = "127.0.0.1:37612";
    let tx_vs = spawn_vs(vs)?;
    let tx_a = spawn_kv(a, vs)?;
    let tx_b = spawn_kv(b, vs)?;
    await_view(vs, |v| v.primary == a && v.backup == b, SETTLE).await?;
    // let both servers observe the view before relying on forwarding
    time::sleep(Duration::from_millis(200)).await;

    let mut client = KvClient::new(vs.into(), client_config());
    client.put("x", "1").await?;
    assert_eq!(client.get("x").await?, Some("1".to_string()));
    assert_eq!(client.get("nope").await?, None);

    tx_a.send(true)?;
    let view =
        await_view(vs, |v| v.primary == b, SETTLE).await?;
    assert_eq!(view.backup, "");

    // the promoted backup must already hold the data
    assert_eq!(client.get("x").await?, Some("1".to_string()));
    client.put("y", "2").await?;
    assert_eq!(client.get("y").await?, Some("2".to_string()));

    for tx in [tx_b, tx_vs] {
        tx.send(true)?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn backup_failure_and_replacement() -> Result<(), ViewKvError> {
    let vs = "127.0.0.1:37620";
    let a = "127.0.0.1:37621";
    let b = "127.0.0.1:37622";
    let c = "127.0.0.1:37623";
    let tx_vs = spawn_vs(vs)?;
    let tx_a = spawn_kv(a, vs)?;
    let tx_b = spawn_kv(b, vs)?;
    await_view(vs, |v| v.primary == a && v.backup == b, SETTLE).await?;
    time::sleep(Duration::from_millis(200)).await;

    let mut client = KvClient::new(vs.into(), client_config());
    client.put("k", "v").await?;

    tx_b.send(true)?;
    await_view(vs, |v| v.primary == a && !v.has_backup(), SETTLE).await?;

    // a replacement backup gets picked up and synced
    let tx_c = spawn_kv(c, vs)?;
    await_view(vs, |v| v.primary == a && v.backup == c, SETTLE).await?;
    time::sleep(Duration::from_millis(200)).await;

    // promote c to check it received the snapshot
    tx_a.send(true)?;
    await_view(vs, |v| v.primary == c, SETTLE).await?;
    assert_eq!(client.get("k").await?, Some("v".to_string()));

    for tx in [tx_c, tx_vs] {
        tx.send(true)?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn replication_converges_after_quiescence() -> Result<(), ViewKvError> {
    let vs = "127.0.0.1:37640";
    let a = "127.0.0.1:37641";
    let b = "127.0.0.1:37642";
    let tx_vs = spawn_vs(vs)?;
    let (srv_a, tx_a) = spawn_kv_node(a, vs)?;
    await_view(vs, |v| v.primary == a, SETTLE).await?;
    let (srv_b, tx_b) = spawn_kv_node(b, vs)?;
    await_view(vs, |v| v.primary == a && v.backup == b, SETTLE).await?;
    time::sleep(Duration::from_millis(200)).await;

    let mut client = KvClient::new(vs.into(), client_config());
    for i in 0..20 {
        client.put(&format!("q{}", i), &format!("w{}", i)).await?;
    }

    // quiescent window: no Puts in flight, both servers kept alive
    time::sleep(Duration::from_millis(2 * DEAD_MS + 100)).await;

    // the backup's store must equal the primary's, with no fail-over
    // involved in the inspection
    let primary_store = srv_a.store_snapshot().await;
    let backup_store = srv_b.store_snapshot().await;
    assert_eq!(primary_store.len(), 20);
    assert_eq!(backup_store, primary_store);

    // and the view must not have moved: both stayed alive throughout
    let view =
        await_view(vs, |v| v.primary == a && v.backup == b, SETTLE).await?;
    assert_eq!(view.view_number, 2);

    for tx in [tx_a, tx_b, tx_vs] {
        tx.send(true)?;
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn state_transfer_with_concurrent_puts() -> Result<(), ViewKvError> {
    let vs = "127.0.0.1:37630";
    let a = "127.0.0.1:37631";
    let b = "127.0.0.1:37632";
    let tx_vs = spawn_vs(vs)?;
    let tx_a = spawn_kv(a, vs)?;
    await_view(vs, |v| v.primary == a, SETTLE).await?;

    // prime the store, then add a backup and keep writing while the state
    // transfer is (possibly) in flight
    let mut client = KvClient::new(vs.into(), client_config());
    for i in 0..100 {
        client.put(&format!("key{}", i), &format!("val{}", i)).await?;
    }
    let tx_b = spawn_kv(b, vs)?;
    await_view(vs, |v| v.backup == b, SETTLE).await?;
    time::sleep(Duration::from_millis(150)).await;
    // these writes race with (or closely follow) the state transfer; they
    // must reach b through the pending queue or regular forwarding
    for i in 0..10 {
        client
            .put(&format!("extra{}", i), &format!("more{}", i))
            .await?;
    }
    time::sleep(Duration::from_millis(300)).await;

    // all writes must survive the fail-over to b
    tx_a.send(true)?;
    await_view(vs, |v| v.primary == b, SETTLE).await?;
    for i in 0..100 {
        assert_eq!(
            client.get(&format!("key{}", i)).await?,
            Some(format!("val{}", i))
        );
    }
    for i in 0..10 {
        assert_eq!(
            client.get(&format!("extra{}", i)).await?,
            Some(format!("more{}", i))
        );
    }

    for tx in [tx_b, tx_vs] {
        tx.send(true)?;
    }
    Ok(())
}
