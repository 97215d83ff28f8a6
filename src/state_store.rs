//! Typed access to the few values that survive deep sleep.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::{drivers::NonVolatileStore, error::Fault};

const CONTINUE_GPS_READ_KEY: &str = "gps_continue";
const LAST_LOCATION_LOG_KEY: &str = "last_loc_log";
const LAST_OWNER_WAKEUP_KEY: &str = "last_owner_wake";

pub struct PersistentStateStore {
    store: Box<dyn NonVolatileStore>,
}

impl PersistentStateStore {
    pub fn new(store: Box<dyn NonVolatileStore>) -> Self {
        PersistentStateStore { store }
    }

    /// Read and erase the continue flag.
    ///
    /// The flag is only reported as set once it has been erased, so a
    /// set flag is observed at most once per write.
    pub async fn take_continue_gps_read(&mut self) -> bool {
        let value = match self.store.get(CONTINUE_GPS_READ_KEY).await {
            Ok(value) => value,
            Err(err) => {
                warn!("Could not read continue flag: {}", err);
                return false;
            }
        };
        if value.unwrap_or(0) == 0 {
            return false;
        }
        if let Err(err) = self.store.erase(CONTINUE_GPS_READ_KEY).await {
            warn!("Could not erase continue flag, not resuming: {}", err);
            return false;
        }
        debug!("Consumed continue flag");
        true
    }

    pub async fn set_continue_gps_read(&mut self) -> Result<(), Fault> {
        self.store.set(CONTINUE_GPS_READ_KEY, 1).await
    }

    pub async fn last_location_log(&mut self) -> Option<DateTime<Utc>> {
        self.timestamp(LAST_LOCATION_LOG_KEY).await
    }

    pub async fn set_last_location_log(&mut self, at: DateTime<Utc>) -> Result<(), Fault> {
        self.store.set(LAST_LOCATION_LOG_KEY, at.timestamp()).await
    }

    pub async fn last_owner_wakeup(&mut self) -> Option<DateTime<Utc>> {
        self.timestamp(LAST_OWNER_WAKEUP_KEY).await
    }

    pub async fn set_last_owner_wakeup(&mut self, at: DateTime<Utc>) -> Result<(), Fault> {
        self.store.set(LAST_OWNER_WAKEUP_KEY, at.timestamp()).await
    }

    async fn timestamp(&mut self, key: &str) -> Option<DateTime<Utc>> {
        match self.store.get(key).await {
            Ok(Some(secs)) => DateTime::from_timestamp(secs, 0),
            Ok(None) => None,
            Err(err) => {
                warn!("Could not read {}: {}", key, err);
                None
            }
        }
    }
}
