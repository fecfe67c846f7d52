// pipeline.rs

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::*;
use tokio::{
    sync::{Mutex, RwLock},
    time::{Duration, sleep},
};

use crate::{DataLog, Reading, SensorSource, SubscriberHub};

/// Wall-clock capability. `None` until the clock can be trusted.
pub trait Clock: Send + Sync {
    fn now(&self) -> Option<DateTime<Utc>>;
}

// 2020-01-01T00:00:00Z; an ESP32 without SNTP wakes up in 1970
const CLOCK_SANE_AFTER: i64 = 1_577_836_800;

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Option<DateTime<Utc>> {
        let now = Utc::now();
        (now.timestamp() >= CLOCK_SANE_AFTER).then_some(now)
    }
}

/// sample -> stamp -> serialize -> fan out. Cheap to clone; every clone
/// shares the sensor, hub and log, and the sensor mutex keeps
/// conversions strictly sequential.
#[derive(Clone)]
pub struct TelemetryPipeline {
    sensor: Arc<Mutex<Box<dyn SensorSource>>>,
    clock: Arc<dyn Clock>,
    hub: Arc<RwLock<SubscriberHub>>,
    datalog: Arc<DataLog>,
}

impl TelemetryPipeline {
    pub fn new(
        sensor: Box<dyn SensorSource>,
        clock: Arc<dyn Clock>,
        hub: Arc<RwLock<SubscriberHub>>,
        datalog: Arc<DataLog>,
    ) -> Self {
        Self {
            sensor: Arc::new(Mutex::new(sensor)),
            clock,
            hub,
            datalog,
        }
    }

    async fn take_reading(&self) -> Reading {
        let temp = self.sensor.lock().await.sample();
        Reading::new(temp, self.clock.now())
    }

    /// One timer-driven run: the reading goes to every subscriber and
    /// to the log, always both. Append failures are absorbed by the
    /// log so the loop never skips a beat.
    pub async fn tick(&self) -> Reading {
        let reading = self.take_reading().await;
        let line = reading.to_line();
        self.hub.read().await.broadcast(&line);
        self.datalog.append(&line);
        reading
    }

    /// Subscriber-requested run: same sampling, but the result goes to
    /// the requester alone and is not logged. The timer tick owns the
    /// log cadence; logging here would double-count entries.
    pub async fn on_demand(&self, id: u64) -> Reading {
        let reading = self.take_reading().await;
        self.hub.read().await.unicast(id, &reading.to_line());
        reading
    }

    /// Drives the pipeline forever. The interval is measured from the
    /// end of each tick, so slow conversions shift the cadence instead
    /// of piling up.
    pub async fn run(self, interval: Duration) -> anyhow::Result<()> {
        info!("Telemetry loop starting, tick interval {interval:?}");
        loop {
            let reading = self.tick().await;
            debug!("Tick: temp={t} time={s}", t = reading.temp, s = reading.time);
            self.hub.write().await.prune();
            sleep(interval).await;
        }
    }
}


// EOF
