use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use regex::Regex;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
    sync::mpsc::{self, Receiver},
};
use tracing::{trace, warn};

use crate::{
    drivers::{Advertisement, RadioScanner},
    error::Fault,
};

/// Upper bound on a `bluetoothctl connect` round trip
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bluetooth LE scanning through `bluetoothctl`
pub struct BluetoothctlScanner {
    device_line: Regex,
}

impl BluetoothctlScanner {
    pub fn new() -> Result<Self, Fault> {
        let device_line = Regex::new(r"Device ((?:[0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2})(?:\s+(.*))?")
            .map_err(|e| Fault::Radio(e.to_string()))?;
        Ok(BluetoothctlScanner { device_line })
    }

    /// Advertisement carried by one line of scan output
    pub fn parse_line(&self, line: &str) -> Option<Advertisement> {
        let caps = self.device_line.captures(line)?;
        Some(Advertisement {
            address: caps[1].to_uppercase(),
            payload: caps
                .get(2)
                .map(|m| m.as_str().trim().as_bytes().to_vec())
                .unwrap_or_default(),
        })
    }
}

async fn bluetoothctl(args: &[&str]) -> Result<(), Fault> {
    let status = tokio::time::timeout(
        CONNECT_TIMEOUT,
        Command::new("bluetoothctl")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .status(),
    )
    .await
    .map_err(|_| Fault::Radio(format!("bluetoothctl {} timed out", args.join(" "))))??;
    if !status.success() {
        return Err(Fault::Radio(format!(
            "bluetoothctl {} exited with {}",
            args.join(" "),
            status
        )));
    }
    Ok(())
}

#[async_trait]
impl RadioScanner for BluetoothctlScanner {
    async fn scan(&mut self, duration: Duration) -> Result<Receiver<Advertisement>, Fault> {
        let mut child = Command::new("bluetoothctl")
            .args(["--timeout", &duration.as_secs().max(1).to_string(), "scan", "on"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Fault::Radio("scan output not captured".to_string()))?;

        let (tx, rx) = mpsc::channel(32);
        let parser = BluetoothctlScanner {
            device_line: self.device_line.clone(),
        };
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            trace!("bluetoothctl: {}", line);
                            if let Some(advert) = parser.parse_line(&line) {
                                if tx.send(advert).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("Could not read scan output: {}", e);
                            break;
                        }
                    }
                }
            }
            if let Err(e) = child.kill().await {
                trace!("Scan already finished: {}", e);
            }
        });
        Ok(rx)
    }

    async fn connect(&mut self, address: &str) -> Result<(), Fault> {
        bluetoothctl(&["connect", address]).await
    }

    async fn disconnect(&mut self) -> Result<(), Fault> {
        bluetoothctl(&["disconnect"]).await
    }
}
