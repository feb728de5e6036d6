use anyhow::{Context, Result};
use clap::Parser;
use dp564_protocol::Dp564Client;
use dp564_remote::config::{load_config, RemoteConfig};
use dp564_remote::shell::{spawn_event_printer, Shell};
use std::io;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Device host name or IP address (overrides DP564_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Device control port (overrides DP564_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Seconds to wait for the TCP connection (overrides DP564_CONNECT_TIMEOUT_SECS)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    connect_timeout_secs: Option<u64>,

    /// Seconds to wait for each command acknowledgment (overrides DP564_ACK_TIMEOUT_SECS)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    ack_timeout_secs: Option<u64>,

    /// Seconds between heartbeats (overrides DP564_HEARTBEAT_SECS)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    heartbeat_secs: Option<u64>,

    /// Log protocol details (same as RUST_LOG=debug)
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply(&self, config: &mut RemoteConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(secs) = self.connect_timeout_secs {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.ack_timeout_secs {
            config.ack_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.heartbeat_secs {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let mut config = load_config().context("Failed to load configuration")?;
    args.apply(&mut config);

    println!("Initializing DP564 Remote...");
    let client = Dp564Client::new(config.client_config());
    spawn_event_printer(client.subscribe());

    println!("Connecting to DP564 at {}...", config.address());
    client.connect().with_context(|| {
        format!(
            "Could not establish a connection with the DP564 at {}",
            config.address()
        )
    })?;
    println!("Connection successful.");

    Shell::new(&client)
        .run(io::stdin().lock(), io::stdout())
        .context("Shell terminated with an error")?;

    Ok(())
}
