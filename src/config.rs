use std::{net::Ipv4Addr, path::PathBuf, time::Duration};

use clap::Parser;

use crate::{drivers::Credentials, error::Fault};

/// moto-tracker command line arguments
#[derive(Parser, Debug, Clone)]
#[command(version)]
pub struct TrackerArgs {
    /// Largest per-axis change (g) that still counts as standing still
    #[arg(long, default_value_t = 0.1, env = "MOTO_TRACKER_MOTION_THRESHOLD")]
    pub motion_threshold: f32,

    /// Number of sample pairs taken when checking for motion
    #[arg(long, default_value_t = 10, env = "MOTO_TRACKER_MOTION_READS")]
    pub motion_reads: usize,

    /// Accelerometer wake interrupt threshold, in mg
    #[arg(long, default_value_t = 750, env = "MOTO_TRACKER_INTERRUPT_THRESHOLD")]
    pub interrupt_threshold_mg: u16,

    /// Time the threshold must be exceeded before the interrupt fires, in ms
    #[arg(long, default_value_t = 175, env = "MOTO_TRACKER_INTERRUPT_DURATION")]
    pub interrupt_duration_ms: u16,

    /// Normal deep sleep duration, in seconds
    #[arg(short = 's', long, default_value_t = 3600, env = "MOTO_TRACKER_SLEEP")]
    pub sleep_secs: u64,

    /// Longest time without a coordinate log, in seconds
    #[arg(long, default_value_t = 86_400, env = "MOTO_TRACKER_LOG_INTERVAL")]
    pub log_interval_secs: u64,

    /// GPS fix attempts per monitoring pass
    #[arg(long, default_value_t = 3, env = "MOTO_TRACKER_GPS_ATTEMPTS")]
    pub gps_max_attempts: u32,

    /// Timeout of a single GPS fix attempt, in seconds
    #[arg(long, default_value_t = 120, env = "MOTO_TRACKER_GPS_TIMEOUT")]
    pub gps_fix_timeout_secs: u64,

    /// Sleep between reads while the vehicle keeps moving, in seconds
    #[arg(long, default_value_t = 30, env = "MOTO_TRACKER_BETWEEN_READS")]
    pub between_reads_secs: u64,

    /// Bluetooth address of the owner's device, proximity checks are off when unset
    #[arg(short = 'o', long, env = "MOTO_TRACKER_OWNER_ADDRESS")]
    pub owner_address: Option<String>,

    /// How long to scan for the owner's device, in seconds
    #[arg(long, default_value_t = 10, env = "MOTO_TRACKER_OWNER_SCAN")]
    pub owner_scan_secs: u64,

    /// Owner-present wakes closer together than this mean the vehicle is in use, in seconds
    #[arg(long, default_value_t = 600, env = "MOTO_TRACKER_MULTI_WAKE_THRESHOLD")]
    pub multi_wake_threshold_secs: u64,

    /// Timer-only sleep taken while the owner is using the vehicle, in seconds
    #[arg(long, default_value_t = 1800, env = "MOTO_TRACKER_OWNER_SLEEP")]
    pub owner_sleep_secs: u64,

    /// Time allowed for network association at boot before a hard reset, in seconds
    #[arg(long, default_value_t = 120, env = "MOTO_TRACKER_BOOT_NETWORK_TIMEOUT")]
    pub boot_network_timeout_secs: u64,

    /// The MQTT broker, host:port
    #[arg(
        short = 'u',
        long,
        default_value = "localhost:1883",
        env = "MOTO_TRACKER_MQTT_URL"
    )]
    pub mqtt_url: String,

    /// MQTT client identifier
    #[arg(long, default_value = "ChrisGpyMTrack001", env = "MOTO_TRACKER_CLIENT_ID")]
    pub client_id: String,

    /// MQTT user
    #[arg(long, env = "MOTO_TRACKER_MQTT_USER")]
    pub mqtt_user: Option<String>,

    /// MQTT password
    #[arg(long, env = "MOTO_TRACKER_MQTT_PASSWORD")]
    pub mqtt_password: Option<String>,

    /// Prefix of every published topic, no trailing slash
    #[arg(long, default_value = "/motorcycle", env = "MOTO_TRACKER_TOPIC_PREFIX")]
    pub topic_prefix: String,

    /// Known Wi-Fi networks as ssid:password, may be repeated
    #[arg(short = 'w', long = "wifi", env = "MOTO_TRACKER_WIFI", value_delimiter = ',')]
    pub known_networks: Vec<String>,

    /// Static addressing for a known network as ssid=ip,netmask,gateway,dns
    #[arg(long = "static-ip", env = "MOTO_TRACKER_STATIC_IP", value_delimiter = ';')]
    pub static_ips: Vec<String>,

    /// Serve an access point when no known network is in range
    #[arg(long, env = "MOTO_TRACKER_HOTSPOT")]
    pub hotspot: bool,

    /// SSID of the fallback access point
    #[arg(long, default_value = "chris-gpy", env = "MOTO_TRACKER_HOTSPOT_SSID")]
    pub hotspot_ssid: String,

    /// WPA2 passphrase of the fallback access point
    #[arg(long, default_value = "micropython", env = "MOTO_TRACKER_HOTSPOT_PASSWORD")]
    pub hotspot_password: String,

    /// File holding state that survives sleep
    #[arg(
        short = 'f',
        long,
        default_value = "/var/lib/moto-tracker/state.json",
        env = "MOTO_TRACKER_STATE_FILE"
    )]
    pub state_file: PathBuf,

    /// IIO sysfs directory of the accelerometer
    #[arg(
        long,
        default_value = "/sys/bus/iio/devices/iio:device0",
        env = "MOTO_TRACKER_IIO_DEVICE"
    )]
    pub iio_device: PathBuf,

    /// gpsd address, host:port
    #[arg(long, default_value = "127.0.0.1:2947", env = "MOTO_TRACKER_GPSD")]
    pub gpsd_addr: String,
}

impl TrackerArgs {
    /// Fallback access point, when enabled
    pub fn hotspot(&self) -> Option<Hotspot> {
        self.hotspot.then(|| Hotspot {
            ssid: self.hotspot_ssid.clone(),
            password: self.hotspot_password.clone(),
        })
    }
}

/// IPv4 settings replacing DHCP on one network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticIp {
    pub address: Ipv4Addr,
    pub prefix: u8,
    pub gateway: Ipv4Addr,
    pub dns: Ipv4Addr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownNetwork {
    pub ssid: String,
    /// None for an open network
    pub password: Option<String>,
    pub static_ip: Option<StaticIp>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hotspot {
    pub ssid: String,
    pub password: String,
}

/// Settings of the wake-cycle engine, fixed for the life of the process
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub motion_threshold: f32,
    pub motion_reads: usize,
    pub interrupt_threshold_mg: u16,
    pub interrupt_duration_ms: u16,
    pub sleep: Duration,
    pub log_interval: Duration,
    pub gps_max_attempts: u32,
    pub gps_fix_timeout: Duration,
    pub between_reads: Duration,
    pub owner_address: Option<String>,
    pub owner_scan: Duration,
    pub multi_wake_threshold: Duration,
    pub owner_sleep: Duration,
    pub boot_network_timeout: Duration,
    pub topic_prefix: String,
    pub credentials: Credentials,
}

impl TrackerConfig {
    /// Full topic for one of the crate's topic suffixes
    pub fn topic(&self, suffix: &str) -> String {
        format!("{}{}", self.topic_prefix, suffix)
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            motion_threshold: 0.1,
            motion_reads: 10,
            interrupt_threshold_mg: 750,
            interrupt_duration_ms: 175,
            sleep: Duration::from_secs(3600),
            log_interval: Duration::from_secs(86_400),
            gps_max_attempts: 3,
            gps_fix_timeout: Duration::from_secs(120),
            between_reads: Duration::from_secs(30),
            owner_address: None,
            owner_scan: Duration::from_secs(10),
            multi_wake_threshold: Duration::from_secs(600),
            owner_sleep: Duration::from_secs(1800),
            boot_network_timeout: Duration::from_secs(120),
            topic_prefix: "/motorcycle".to_string(),
            credentials: Credentials {
                client_id: "ChrisGpyMTrack001".to_string(),
                user: None,
                password: None,
            },
        }
    }
}

impl From<&TrackerArgs> for TrackerConfig {
    fn from(args: &TrackerArgs) -> Self {
        TrackerConfig {
            motion_threshold: args.motion_threshold,
            motion_reads: args.motion_reads,
            interrupt_threshold_mg: args.interrupt_threshold_mg,
            interrupt_duration_ms: args.interrupt_duration_ms,
            sleep: Duration::from_secs(args.sleep_secs),
            log_interval: Duration::from_secs(args.log_interval_secs),
            gps_max_attempts: args.gps_max_attempts,
            gps_fix_timeout: Duration::from_secs(args.gps_fix_timeout_secs),
            between_reads: Duration::from_secs(args.between_reads_secs),
            owner_address: args.owner_address.clone(),
            owner_scan: Duration::from_secs(args.owner_scan_secs),
            multi_wake_threshold: Duration::from_secs(args.multi_wake_threshold_secs),
            owner_sleep: Duration::from_secs(args.owner_sleep_secs),
            boot_network_timeout: Duration::from_secs(args.boot_network_timeout_secs),
            topic_prefix: args.topic_prefix.clone(),
            credentials: Credentials {
                client_id: args.client_id.clone(),
                user: args.mqtt_user.clone(),
                password: args.mqtt_password.clone(),
            },
        }
    }
}

/// Build the known networks from `ssid:password` entries and the
/// `ssid=ip,netmask,gateway,dns` static addressing entries.
///
/// Entries without a password are open networks. A static entry must name a
/// known network.
pub fn parse_known_networks(
    entries: &[String],
    static_ips: &[String],
) -> Result<Vec<KnownNetwork>, Fault> {
    let mut networks: Vec<KnownNetwork> = entries
        .iter()
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (ssid, password) = match entry.split_once(':') {
                Some((ssid, pwd)) => (ssid, Some(pwd.to_string())),
                None => (entry.as_str(), None),
            };
            KnownNetwork {
                ssid: ssid.to_string(),
                password,
                static_ip: None,
            }
        })
        .collect();

    for entry in static_ips.iter().filter(|entry| !entry.is_empty()) {
        let (ssid, addressing) = entry
            .split_once('=')
            .ok_or_else(|| Fault::Config(format!("static ip {entry:?} has no ssid")))?;
        let network = networks
            .iter_mut()
            .find(|network| network.ssid == ssid)
            .ok_or_else(|| Fault::Config(format!("static ip for unknown network {ssid}")))?;
        network.static_ip = Some(parse_static_ip(addressing)?);
    }
    Ok(networks)
}

fn parse_static_ip(addressing: &str) -> Result<StaticIp, Fault> {
    let parts = addressing
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<Ipv4Addr>()
                .map_err(|e| Fault::Config(format!("{part:?}: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let [address, netmask, gateway, dns] = parts[..] else {
        return Err(Fault::Config(format!(
            "expected ip,netmask,gateway,dns, got {addressing:?}"
        )));
    };

    let mask = u32::from(netmask);
    if mask.leading_ones() != mask.count_ones() {
        return Err(Fault::Config(format!("netmask {netmask} is not contiguous")));
    }
    Ok(StaticIp {
        address,
        // at most 32
        prefix: mask.count_ones() as u8,
        gateway,
        dns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_defaults_match_config_defaults() {
        let args = TrackerArgs::parse_from(["moto-tracker"]);
        let from_args = TrackerConfig::from(&args);
        let defaults = TrackerConfig::default();

        assert_eq!(from_args.sleep, defaults.sleep);
        assert_eq!(from_args.log_interval, defaults.log_interval);
        assert_eq!(from_args.interrupt_threshold_mg, 750);
        assert_eq!(from_args.interrupt_duration_ms, 175);
        assert_eq!(from_args.credentials.client_id, "ChrisGpyMTrack001");
        assert!(from_args.owner_address.is_none());
    }

    #[test]
    fn topics_carry_the_prefix() {
        let config = TrackerConfig::default();
        assert_eq!(config.topic(crate::HEARTBEAT_TOPIC), "/motorcycle/heartbeat");
        assert_eq!(config.topic(crate::GPS_TOPIC), "/motorcycle/gps");
    }

    #[test]
    fn known_networks_split_on_first_colon() {
        let parsed = parse_known_networks(
            &[
                "FiOS-DJ8NN:pass:word".to_string(),
                "cafe".to_string(),
                String::new(),
            ],
            &[],
        )
        .unwrap();
        assert_eq!(parsed[0].ssid, "FiOS-DJ8NN");
        assert_eq!(parsed[0].password.as_deref(), Some("pass:word"));
        assert_eq!(parsed[1].ssid, "cafe");
        assert_eq!(parsed[1].password, None);
        assert_eq!(parsed.len(), 2);
        assert!(parsed.iter().all(|network| network.static_ip.is_none()));
    }

    #[test]
    fn static_addressing_attaches_to_its_network() {
        let parsed = parse_known_networks(
            &["FiOS-DJ8NN:secret".to_string(), "cafe".to_string()],
            &["FiOS-DJ8NN=192.168.1.185,255.255.255.0,192.168.1.1,192.168.1.1".to_string()],
        )
        .unwrap();
        assert_eq!(
            parsed[0].static_ip,
            Some(StaticIp {
                address: Ipv4Addr::new(192, 168, 1, 185),
                prefix: 24,
                gateway: Ipv4Addr::new(192, 168, 1, 1),
                dns: Ipv4Addr::new(192, 168, 1, 1),
            })
        );
        assert_eq!(parsed[1].static_ip, None);
    }

    #[test]
    fn bad_static_addressing_is_rejected() {
        let known = ["home:pwd".to_string()];
        for entry in [
            "office=10.0.0.2,255.0.0.0,10.0.0.1,10.0.0.1",
            "home=10.0.0.2,255.0.255.0,10.0.0.1,10.0.0.1",
            "home=10.0.0.2,255.0.0.0,10.0.0.1",
            "home=10.0.0.300,255.0.0.0,10.0.0.1,10.0.0.1",
            "10.0.0.2,255.0.0.0,10.0.0.1,10.0.0.1",
        ] {
            assert!(
                matches!(
                    parse_known_networks(&known, &[entry.to_string()]),
                    Err(Fault::Config(_))
                ),
                "{entry}"
            );
        }
    }

    #[test]
    fn hotspot_only_when_enabled() {
        assert_eq!(TrackerArgs::parse_from(["moto-tracker"]).hotspot(), None);

        let args = TrackerArgs::parse_from(["moto-tracker", "--hotspot"]);
        assert_eq!(
            args.hotspot(),
            Some(Hotspot {
                ssid: "chris-gpy".to_string(),
                password: "micropython".to_string(),
            })
        );
    }
}
