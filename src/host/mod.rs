//! Collaborator implementations for a Linux single-board computer.

pub mod bluetooth;
pub mod gpsd;
pub mod iio;
pub mod mqtt;
pub mod network;
pub mod power;
pub mod store;

pub use bluetooth::BluetoothctlScanner;
pub use gpsd::GpsdReceiver;
pub use iio::IioAccelerometer;
pub use mqtt::MqttBus;
pub use network::NmcliLink;
pub use power::{HostPower, WakeLatch};
pub use store::JsonFileStore;
