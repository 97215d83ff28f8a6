use std::time::Duration;

use async_trait::async_trait;
use futures_util::{FutureExt, SinkExt};
use gpsd_proto::{Mode, UnifiedResponse};
use tokio::net::TcpStream;
use tokio_stream::StreamExt;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, trace, warn};

use crate::{
    drivers::{Coordinates, GpsReceiver},
    error::Fault,
};

const DISABLE_WATCH_CMD: &str = "?WATCH={\"enable\":false};";

/// GPS receiver behind a local gpsd
pub struct GpsdReceiver {
    addr: String,
    framed: Option<Framed<TcpStream, LinesCodec>>,
    last_fix: Option<Coordinates>,
}

impl GpsdReceiver {
    pub fn new(addr: impl Into<String>) -> Self {
        GpsdReceiver {
            addr: addr.into(),
            framed: None,
            last_fix: None,
        }
    }

    async fn watch(&mut self) -> Result<&mut Framed<TcpStream, LinesCodec>, Fault> {
        if self.framed.is_none() {
            let stream = TcpStream::connect(&self.addr).await?;
            let mut framed = Framed::new(stream, LinesCodec::new());
            framed
                .send(gpsd_proto::ENABLE_WATCH_CMD)
                .await
                .map_err(|e| Fault::Gps(format!("could not watch GPS: {e}")))?;
            info!("Watching gpsd at {}", self.addr);
            self.framed = Some(framed);
        }
        self.framed
            .as_mut()
            .ok_or_else(|| Fault::Gps("gpsd stream missing".to_string()))
    }
}

/// Read reports until one carries a usable position
async fn next_fix(framed: &mut Framed<TcpStream, LinesCodec>) -> Result<Coordinates, Fault> {
    loop {
        match framed.next().await {
            Some(Ok(line)) => {
                if let Some(coordinates) = parse_fix(&line) {
                    return Ok(coordinates);
                }
            }
            Some(Err(err)) => warn!("Error decoding GPS message {err}"),
            None => return Err(Fault::Gps("gpsd closed the connection".to_string())),
        }
    }
}

/// Consume the reports already buffered on a watch kept open through a nap,
/// returning the newest fix among them
fn drain_backlog(
    framed: &mut Framed<TcpStream, LinesCodec>,
) -> Result<Option<Coordinates>, Fault> {
    let mut newest = None;
    let mut drained = 0;
    while let Some(item) = framed.next().now_or_never() {
        match item {
            Some(Ok(line)) => {
                drained += 1;
                if let Some(coordinates) = parse_fix(&line) {
                    newest = Some(coordinates);
                }
            }
            Some(Err(err)) => warn!("Error decoding GPS message {err}"),
            None => return Err(Fault::Gps("gpsd closed the connection".to_string())),
        }
    }
    debug!("Drained {} buffered GPS reports", drained);
    Ok(newest)
}

/// Coordinates of a TPV report with at least a 2D fix
pub fn parse_fix(line: &str) -> Option<Coordinates> {
    trace!("Recieved GPS message {line}");
    let response: UnifiedResponse = match serde_json::from_str(line) {
        Ok(response) => response,
        Err(e) => {
            debug!("Could not decode GPS message: {line} -- {e}");
            return None;
        }
    };
    match response {
        UnifiedResponse::Tpv(tpv) => {
            if !matches!(tpv.mode, Mode::Fix2d | Mode::Fix3d) {
                trace!("TPV without fix");
                return None;
            }
            Some(Coordinates {
                lat: tpv.lat?,
                lon: tpv.lon?,
            })
        }
        other => {
            trace!("Ignoring GPS report {:?}", other);
            None
        }
    }
}

#[async_trait]
impl GpsReceiver for GpsdReceiver {
    async fn request_fix(&mut self, timeout: Duration) -> Result<bool, Fault> {
        let resumed = self.framed.is_some();
        let framed = self.watch().await?;
        if resumed {
            match drain_backlog(framed) {
                Ok(Some(coordinates)) => {
                    self.last_fix = Some(coordinates);
                    return Ok(true);
                }
                Ok(None) => {}
                Err(err) => {
                    self.framed = None;
                    return Err(err);
                }
            }
        }
        match tokio::time::timeout(timeout, next_fix(framed)).await {
            Ok(Ok(coordinates)) => {
                self.last_fix = Some(coordinates);
                Ok(true)
            }
            Ok(Err(err)) => {
                self.framed = None;
                Err(err)
            }
            Err(_) => Ok(false),
        }
    }

    async fn read_coordinates(&mut self) -> Result<Coordinates, Fault> {
        self.last_fix
            .ok_or_else(|| Fault::Gps("no fix acquired yet".to_string()))
    }

    async fn standby(&mut self) -> Result<(), Fault> {
        // gpsd powers the receiver down once no client is watching
        if let Some(mut framed) = self.framed.take() {
            if let Err(e) = framed.send(DISABLE_WATCH_CMD).await {
                debug!("Could not stop GPS watch: {e}");
            }
        }
        self.last_fix = None;
        Ok(())
    }
}
