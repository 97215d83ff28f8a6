use clap::Parser;
use moto_tracker::{
    config::{parse_known_networks, TrackerArgs, TrackerConfig},
    controller::{Board, WakeCycleController},
    drivers::{RadioScanner, SystemClock},
    host::{
        BluetoothctlScanner, GpsdReceiver, HostPower, IioAccelerometer, JsonFileStore, MqttBus,
        NmcliLink, WakeLatch,
    },
};
use tokio::signal;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// Exit status asking the supervisor for a hard reset of the device
const RESET_EXIT_CODE: i32 = 70;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = TrackerArgs::parse();

    println!("Initializing moto tracker...");
    println!("Initializing fmt subscriber");
    // construct a subscriber that prints formatted traces to stdout
    // if RUST_LOG is not set, defaults to loglevel INFO
    let subscriber = tracing_subscriber::fmt()
        .with_thread_ids(true)
        .with_ansi(true)
        .with_thread_names(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .finish();
    // use that subscriber to process traces emitted after this point
    tracing::subscriber::set_global_default(subscriber).expect("Could not init tracing");

    let config = TrackerConfig::from(&cli);
    let latch = WakeLatch::default();

    let radio: Option<Box<dyn RadioScanner>> = match cli.owner_address {
        Some(_) => Some(Box::new(
            BluetoothctlScanner::new().expect("Could not build bluetooth scanner"),
        )),
        None => {
            info!("No owner address configured, proximity check disabled");
            None
        }
    };

    let board = Board {
        accelerometer: Box::new(IioAccelerometer::new(&cli.iio_device, latch.clone())),
        gps: Box::new(GpsdReceiver::new(cli.gpsd_addr.clone())),
        radio,
        network: Box::new(NmcliLink::new(
            parse_known_networks(&cli.known_networks, &cli.static_ips)
                .expect("Invalid wifi configuration"),
            cli.hotspot(),
        )),
        bus: Box::new(MqttBus::new(&cli.mqtt_url).expect("Invalid MQTT url")),
        store: Box::new(
            JsonFileStore::open(&cli.state_file)
                .await
                .expect("Could not open state file"),
        ),
        power: Box::new(HostPower::new(latch)),
        clock: Box::new(SystemClock),
    };

    let mut controller = WakeCycleController::new(config, board);
    info!("Running wake cycles");
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                warn!("Shutting down on ctrl+c");
                break;
            }
            cycle = controller.run_cycle() => match cycle {
                Ok(report) => match report.fault {
                    Some(fault) => warn!(
                        "{:?} cycle ended with a fault ({}), next plan {:?}",
                        report.reason, fault, report.plan
                    ),
                    None => info!("{:?} cycle done, next plan {:?}", report.reason, report.plan),
                },
                Err(err) => {
                    error!("Unrecoverable: {}, resetting", err);
                    std::process::exit(RESET_EXIT_CODE);
                }
            }
        }
    }
}
