use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::{drivers::RadioScanner, error::Fault, state_store::PersistentStateStore};

/// What to do after the owner's device was seen at an accelerometer wake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerVerdict {
    /// Owner-present wakes come close together, take the long timer-only sleep
    QuietSleep,
    /// Carry on with the normal motion check
    Proceed,
}

pub struct ProximityGuard {
    radio: Box<dyn RadioScanner>,
    owner_address: String,
    multi_wake_threshold: Duration,
}

impl ProximityGuard {
    pub fn new(
        radio: Box<dyn RadioScanner>,
        owner_address: impl Into<String>,
        multi_wake_threshold: Duration,
    ) -> Self {
        ProximityGuard {
            radio,
            owner_address: owner_address.into(),
            multi_wake_threshold,
        }
    }

    /// Scan for the owner's device for at most `scan_window`
    pub async fn is_owner_nearby(&mut self, scan_window: Duration) -> Result<bool, Fault> {
        let mut adverts = self.radio.scan(scan_window).await?;
        let owner = self.owner_address.as_str();

        let seen = tokio::time::timeout(scan_window, async {
            while let Some(advert) = adverts.recv().await {
                debug!("Advertisement from {}", advert.address);
                if advert.address.eq_ignore_ascii_case(owner) {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false);
        // stop the scan before the handshake
        drop(adverts);

        if !seen {
            debug!("Owner device not seen within {:?}", scan_window);
            return Ok(false);
        }

        info!("Owner device {} nearby", self.owner_address);
        if let Err(err) = self.radio.connect(&self.owner_address).await {
            debug!("Owner handshake failed: {}", err);
        }
        if let Err(err) = self.radio.disconnect().await {
            debug!("Owner disconnect failed: {}", err);
        }
        Ok(true)
    }

    /// Decide between the quiet sleep and a normal wake, recording the wake
    /// time whenever the quiet sleep is not taken
    pub async fn handle_owner_nearby(
        &self,
        store: &mut PersistentStateStore,
        now: DateTime<Utc>,
    ) -> Result<OwnerVerdict, Fault> {
        if let Some(last) = store.last_owner_wakeup().await {
            match (now - last).to_std() {
                Ok(since) if since < self.multi_wake_threshold => {
                    info!("Owner wake {:?} after the previous one, vehicle in use", since);
                    return Ok(OwnerVerdict::QuietSleep);
                }
                Ok(_) => {}
                // a previous wake in the future means the clock stepped back
                Err(_) => warn!("Last owner wake {} is ahead of the clock, ignoring it", last),
            }
        }
        store.set_last_owner_wakeup(now).await?;
        Ok(OwnerVerdict::Proceed)
    }
}
