//! KV server node executable.

use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;
use tokio::runtime::Builder;
use tokio::sync::watch;
use viewkv::{
    logged_err, parsed_config, pf_error, KvServer, KvServerConfig,
    ViewKvError,
};

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Address (host:port) to listen on; doubles as this server's name.
    #[arg(short, long, default_value_t = String::from("localhost:8001"))]
    addr: String,

    /// View service address (host:port).
    #[arg(short, long, default_value_t = String::from("localhost:8000"))]
    vs: String,

    /// Configuration TOML string. Every '+' is treated as newline.
    #[arg(long, default_value_t = String::from(""))]
    config: String,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 2)]
    threads: usize,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(())` on success or
    /// `Err(ViewKvError)` on any error.
    fn sanitize(&self) -> Result<(), ViewKvError> {
        if !self.addr.contains(':') {
            logged_err!("s"; "invalid addr string '{}'", self.addr)
        } else if !self.vs.contains(':') {
            logged_err!("s"; "invalid vs string '{}'", self.vs)
        } else if self.addr == self.vs {
            logged_err!("s"; "addr and vs clash on '{}'", self.addr)
        } else if self.threads < 2 {
            logged_err!("s"; "invalid number of threads {}", self.threads)
        } else {
            Ok(())
        }
    }
}

/// Actual main function of the KV server node.
fn server_main() -> Result<(), ViewKvError> {
    // read in and parse command line arguments
    let mut args = CliArgs::parse();
    args.sanitize()?;

    // parse optional config string if given
    let config_str = if args.config.is_empty() {
        None
    } else {
        args.config = args.config.replace('+', "\n");
        Some(&args.config[..])
    };
    let config = parsed_config!(config_str => KvServerConfig;
                                ping_interval_ms, rpc_timeout_ms,
                                sync_timeout_ms)?;

    // set up termination signals handler
    let (tx_term, rx_term) = watch::channel(false);
    let me = args.addr.clone();
    ctrlc::set_handler(move || {
        if let Err(e) = tx_term.send(true) {
            pf_error!(&me; "error sending to term channel: {}", e);
        }
    })?;

    // create tokio multi-threaded runtime
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(args.threads)
        .thread_name("tokio-worker-kvserver")
        .build()?;

    // enter tokio runtime and serve until termination
    runtime.block_on(async move {
        let server = KvServer::new(args.addr, args.vs, config)?;
        server.run(rx_term).await?;
        Ok::<(), ViewKvError>(())
    })
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .format_module_path(false)
        .format_target(false)
        .init();

    if let Err(ref e) = server_main() {
        pf_error!("s"; "kv server exited: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
