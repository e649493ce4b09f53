//! linelink: entry point.
//!
//! ```text
//! linelink                          Connect using linelink.toml (or defaults)
//! linelink --config <path>          Load a custom config TOML
//! linelink --host <h> --port <p>    Override the device address
//! linelink --gen-config             Write default config to stdout
//! linelink --gen-config <path>      Write default config to a file
//! ```
//!
//! Each stdin line is sent to the device followed by the configured
//! terminator. Lines from the device are printed to stdout.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use linelink_cli::config::CliConfig;
use linelink_cli::monitor::{InboundQueue, StatusMirror, VariableStore};
use linelink_core::{LineClient, LineClientHandle};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "linelink", about = "Persistent line-protocol TCP client")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "linelink.toml")]
    config: PathBuf,

    /// Device host, overrides the config file.
    #[arg(long)]
    host: Option<String>,

    /// Device port, overrides the config file.
    #[arg(short, long)]
    port: Option<u16>,

    /// Write the default configuration to PATH (or stdout) and exit.
    #[arg(long, value_name = "PATH", num_args = 0..=1)]
    gen_config: Option<Option<PathBuf>>,
}

/// Forward stdin lines from a plain thread. The channel closes at EOF or
/// after the first read error.
fn stdin_lines() -> mpsc::UnboundedReceiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let failed = line.is_err();
            if tx.send(line).is_err() || failed {
                break;
            }
        }
    });
    rx
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    match &cli.gen_config {
        Some(Some(path)) => {
            CliConfig::write_default(path)?;
            eprintln!("wrote {}", path.display());
            return Ok(());
        }
        Some(None) => {
            println!("{}", CliConfig::default_toml()?);
            return Ok(());
        }
        None => {}
    }

    // A file that does not parse is fatal rather than silently replaced.
    let loaded = CliConfig::load(&cli.config)?;
    let from_file = loaded.is_some();
    let mut config = loaded.unwrap_or_default();
    if let Some(host) = cli.host {
        config.device.host = host;
    }
    if let Some(port) = cli.port {
        config.device.port = port;
    }

    // Init tracing. Logs go to stderr so stdout carries device lines only.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("linelink v{}", env!("CARGO_PKG_VERSION"));
    if !from_file {
        info!("no config at {}; using defaults", cli.config.display());
    }
    info!("device: {}:{}", config.device.host, config.device.port);
    if config.device.keepalive_interval_ms > 0 {
        info!("keepalive every {} ms", config.device.keepalive_interval_ms);
    }

    let (inbound, mut lines) = InboundQueue::new(config.monitor.inbound_queue_limit);
    let vars = Arc::new(VariableStore::new());
    let mirror = Arc::new(StatusMirror::new(&config.monitor.variable_prefix));

    let mut client = LineClient::with_config(config.to_link_config());
    client.set_receive_callback(move |line| {
        inbound.push(line);
    });
    {
        let vars = Arc::clone(&vars);
        let mirror = Arc::clone(&mirror);
        client.set_poll_callback(move |handle: &LineClientHandle| mirror.poll(handle, &vars));
    }
    client.start()?;

    // Printer: device lines to stdout.
    let printer = tokio::spawn(async move {
        while let Some(line) = lines.recv().await {
            println!("{}", line.trim_end_matches(['\r', '\n']));
        }
    });

    // Stdin until EOF or Ctrl-C. The blocking read runs on a detached thread.
    let handle = client.handle();
    let terminator = config.device.command_terminator.clone();
    let mut stdin = stdin_lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Ctrl-C received, shutting down");
                break;
            }
            line = stdin.recv() => match line {
                Some(Ok(cmd)) => handle.enqueue(format!("{cmd}{terminator}")),
                None => {
                    info!("stdin closed, shutting down");
                    break;
                }
                Some(Err(e)) => {
                    warn!("stdin: {e}");
                    break;
                }
            },
        }
    }

    client.disconnect().await?;
    // The receive callback owned the last sender; the printer drains and ends.
    drop(client);
    printer.await?;

    for (name, value) in vars.snapshot() {
        info!("{name} = {value}");
    }
    info!("losses this session: {}", handle.loss_count());
    Ok(())
}
