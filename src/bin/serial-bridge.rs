//! Line-oriented front end for the serial bridge.
//!
//! Reads one JSON method call per stdin line, e.g.
//! `{"method":"connectLoRa","args":{"path":"/dev/ttyS1","baudRate":115200}}`,
//! and writes one JSON object per stdout line: `{"reply":...}` for each call
//! and `{"event":...}` for each pushed event.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use serial_bridge::bridge::{Bridge, MethodCall, event_payload};
use serial_bridge::logging::{self, prelude::*};
use serial_bridge::{BridgeConfig, ConnectionManager};

#[derive(Parser, Debug)]
#[command(name = "serial-bridge", version, about = "USB serial and UART bridge")]
struct Opts {
    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory scanned for UART devices.
    #[arg(long)]
    dev_dir: Option<PathBuf>,

    /// Print the device list and exit.
    #[arg(short, long)]
    list: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let opts = Opts::parse();

    let mut config = match &opts.config {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => BridgeConfig::default(),
    };
    if let Some(dir) = opts.dev_dir {
        config = config.device_dir(dir);
    }

    let manager = ConnectionManager::system(config);
    let bridge = Bridge::new(manager.clone());

    if opts.list {
        let reply = bridge.handle(&MethodCall::new("listDevices", json!(null))).await;
        println!("{}", serde_json::to_string(&reply)?);
        return Ok(());
    }

    let mut events = manager.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    info!("serial bridge ready");
    loop {
        let out = tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<MethodCall>(line) {
                    Ok(call) => json!({ "reply": bridge.handle(&call).await }),
                    Err(e) => {
                        warn!("bad method call: {}", e);
                        json!({ "error": e.to_string() })
                    }
                }
            }
            Some(event) = events.recv() => json!({ "event": event_payload(&event) }),
        };

        stdout.write_all(format!("{out}\n").as_bytes()).await?;
        stdout.flush().await?;
    }

    manager.unsubscribe();
    manager.disconnect().await;
    info!("stdin closed, exiting");
    Ok(())
}
