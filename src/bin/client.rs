//! Command-line KV client driver.

use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;
use tokio::runtime::Builder;
use viewkv::{logged_err, pf_error, KvClient, KvClientConfig, ViewKvError};

/// One operation to run against the cluster.
#[derive(Debug, PartialEq, Eq, Clone)]
enum Op {
    Get { key: String },
    Put { key: String, value: String },
    View,
}

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// View service address (host:port).
    #[arg(long, default_value_t = String::from("localhost:8000"))]
    vs: String,

    /// Client operation: get, put, or view.
    #[arg(long, default_value_t = String::from("get"))]
    op: String,

    /// Key for get/put operation.
    #[arg(long, default_value_t = String::from("foo"))]
    key: String,

    /// Value for put operation.
    #[arg(long, default_value_t = String::from("bar"))]
    value: String,

    /// Comma-separated sequence of operations; overrides --op when given.
    #[arg(long, default_value_t = String::from(""))]
    ops: String,

    /// Comma-separated sequence of keys, one per entry of --ops.
    #[arg(long, default_value_t = String::from(""))]
    keys: String,

    /// Comma-separated sequence of values, one per entry of --ops.
    #[arg(long, default_value_t = String::from(""))]
    values: String,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 2)]
    threads: usize,
}

impl CliArgs {
    fn parse_op(
        op: &str,
        key: &str,
        value: &str,
    ) -> Result<Op, ViewKvError> {
        match op {
            "get" => Ok(Op::Get { key: key.into() }),
            "put" => Ok(Op::Put {
                key: key.into(),
                value: value.into(),
            }),
            "view" => Ok(Op::View),
            _ => logged_err!("c"; "unknown client operation '{}'", op),
        }
    }

    /// Sanitize command line arguments, return the `Ok(ops)` sequence to
    /// run on success or `Err(ViewKvError)` on any error.
    fn sanitize(&self) -> Result<Vec<Op>, ViewKvError> {
        if !self.vs.contains(':') {
            return logged_err!("c"; "invalid vs string '{}'", self.vs);
        }
        if self.threads < 2 {
            return logged_err!("c"; "invalid number of threads {}",
                                    self.threads);
        }

        if self.ops.is_empty() {
            return Ok(vec![Self::parse_op(
                &self.op, &self.key, &self.value,
            )?]);
        }

        let keys: Vec<&str> = self.keys.split(',').collect();
        let values: Vec<&str> = self.values.split(',').collect();
        self.ops
            .split(',')
            .enumerate()
            .map(|(i, op)| {
                Self::parse_op(
                    op,
                    keys.get(i).copied().unwrap_or(""),
                    values.get(i).copied().unwrap_or(""),
                )
            })
            .collect()
    }
}

/// Actual main function of the client driver.
fn client_main() -> Result<(), ViewKvError> {
    // read in and parse command line arguments
    let args = CliArgs::parse();
    let ops = args.sanitize()?;

    // create tokio multi-threaded runtime
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(args.threads)
        .thread_name("tokio-worker-client")
        .build()?;

    // enter tokio runtime and run the operation sequence in order
    runtime.block_on(async move {
        let mut client =
            KvClient::new(args.vs.clone(), KvClientConfig::default());

        for op in ops {
            match op {
                Op::Get { key } => {
                    let value =
                        client.get(&key).await?.unwrap_or_default();
                    println!("Get({}) = {}", key, value);
                }
                Op::Put { key, value } => {
                    client.put(&key, &value).await?;
                    println!("Put({}, {}) completed", key, value);
                }
                Op::View => {
                    let view = client.get_view().await?;
                    println!("View Number: {}", view.view_number);
                    println!(
                        "Primary: {}",
                        if view.has_primary() {
                            view.primary.as_str()
                        } else {
                            "<none>"
                        }
                    );
                    println!(
                        "Backup: {}",
                        if view.has_backup() {
                            view.backup.as_str()
                        } else {
                            "<none>"
                        }
                    );
                }
            }
        }

        Ok::<(), ViewKvError>(())
    })
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .format_module_path(false)
        .format_target(false)
        .init();

    if let Err(ref e) = client_main() {
        pf_error!("c"; "client exited: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
