use std::collections::HashSet;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::{
    config::{Hotspot, KnownNetwork},
    drivers::NetworkLink,
    error::Fault,
};

/// Wi-Fi association through NetworkManager's `nmcli`
pub struct NmcliLink {
    known_networks: Vec<KnownNetwork>,
    hotspot: Option<Hotspot>,
    hotspot_active: bool,
}

impl NmcliLink {
    /// * `known_networks` - in order of preference
    /// * `hotspot` - access point served while no known network is in range
    pub fn new(known_networks: Vec<KnownNetwork>, hotspot: Option<Hotspot>) -> Self {
        NmcliLink {
            known_networks,
            hotspot,
            hotspot_active: false,
        }
    }

    /// First known network whose ssid is in range
    pub fn pick(&self, visible: &HashSet<String>) -> Option<&KnownNetwork> {
        self.known_networks
            .iter()
            .find(|network| visible.contains(&network.ssid))
    }

    async fn fall_back_to_hotspot(&mut self) -> Result<(), Fault> {
        let Some(hotspot) = &self.hotspot else {
            return Err(Fault::Network("no known network in range".to_string()));
        };
        if !self.hotspot_active {
            warn!("No known network in range, serving hotspot {}", hotspot.ssid);
            nmcli(hotspot_command(hotspot).as_slice()).await?;
            self.hotspot_active = true;
        }
        Err(Fault::Network(
            "no known network in range, hotspot up".to_string(),
        ))
    }
}

async fn nmcli<S: AsRef<str>>(args: &[S]) -> Result<String, Fault> {
    let output = Command::new("nmcli")
        .args(args.iter().map(|arg| arg.as_ref()))
        .output()
        .await?;
    if !output.status.success() {
        // only the subcommand, later arguments may carry secrets
        let subcommand: Vec<&str> = args.iter().take(3).map(|arg| arg.as_ref()).collect();
        return Err(Fault::Network(format!(
            "nmcli {} failed: {}",
            subcommand.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// SSIDs of a terse `nmcli -t -f SSID device wifi list`
pub fn parse_ssids(listing: &str) -> HashSet<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|ssid| !ssid.is_empty())
        .map(|ssid| ssid.replace("\\:", ":"))
        .collect()
}

/// `nmcli` invocations joining `network`, static addressing is applied to
/// the profile before it is brought up again
pub fn connect_commands(network: &KnownNetwork) -> Vec<Vec<String>> {
    let ssid = network.ssid.clone();
    let mut join = vec![
        "device".to_string(),
        "wifi".to_string(),
        "connect".to_string(),
        ssid.clone(),
    ];
    if let Some(password) = &network.password {
        join.extend(["password".to_string(), password.clone()]);
    }
    join.extend(["name".to_string(), ssid.clone()]);

    let Some(ip) = &network.static_ip else {
        return vec![join];
    };
    let modify = vec![
        "connection".to_string(),
        "modify".to_string(),
        ssid.clone(),
        "ipv4.method".to_string(),
        "manual".to_string(),
        "ipv4.addresses".to_string(),
        format!("{}/{}", ip.address, ip.prefix),
        "ipv4.gateway".to_string(),
        ip.gateway.to_string(),
        "ipv4.dns".to_string(),
        ip.dns.to_string(),
    ];
    let up = vec!["connection".to_string(), "up".to_string(), ssid];
    vec![join, modify, up]
}

pub fn hotspot_command(hotspot: &Hotspot) -> Vec<String> {
    [
        "device",
        "wifi",
        "hotspot",
        "ssid",
        hotspot.ssid.as_str(),
        "password",
        hotspot.password.as_str(),
    ]
    .map(str::to_string)
    .to_vec()
}

#[async_trait]
impl NetworkLink for NmcliLink {
    async fn is_connected(&mut self) -> bool {
        match nmcli(&["-t", "-f", "STATE", "general"]).await {
            Ok(state) => state.trim() == "connected",
            Err(err) => {
                debug!("Could not read network state: {}", err);
                false
            }
        }
    }

    async fn connect(&mut self) -> Result<(), Fault> {
        nmcli(&["radio", "wifi", "on"]).await?;

        debug!("Scanning for known wifi networks");
        let visible = parse_ssids(
            &nmcli(&["-t", "-f", "SSID", "device", "wifi", "list", "--rescan", "yes"]).await?,
        );
        let Some(network) = self.pick(&visible).cloned() else {
            return self.fall_back_to_hotspot().await;
        };

        for args in connect_commands(&network) {
            nmcli(args.as_slice()).await?;
        }
        self.hotspot_active = false;
        match &network.static_ip {
            Some(ip) => info!("Connected to {} with static address {}", network.ssid, ip.address),
            None => info!("Connected to {}", network.ssid),
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Fault> {
        self.hotspot_active = false;
        nmcli(&["radio", "wifi", "off"]).await.map(|_| ())
    }
}
