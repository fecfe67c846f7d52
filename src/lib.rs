// lib.rs
#![warn(clippy::large_futures)]

pub use std::{
    net,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

pub use anyhow::bail;
pub use chrono::*;
pub use serde::{Deserialize, Serialize};
pub use tokio::{
    sync::RwLock,
    time::{Duration, sleep},
};

mod config;
pub use config::*;

mod state;
pub use state::*;

mod sensor;
pub use sensor::*;

mod hub;
pub use hub::*;

mod datalog;
pub use datalog::*;

mod pipeline;
pub use pipeline::*;

mod connectivity;
pub use connectivity::*;

mod apiserver;
pub use apiserver::*;

#[cfg(feature = "esp32")]
mod measure;
#[cfg(feature = "esp32")]
pub use measure::*;

#[cfg(feature = "esp32")]
mod wifi;
#[cfg(feature = "esp32")]
pub use wifi::*;

#[cfg(feature = "esp32")]
mod netsvc;
#[cfg(feature = "esp32")]
pub use netsvc::*;

pub const FW_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Sensor-absent sentinel, well below anything a DS18B20 can report.
pub const NO_TEMP: f32 = -1000.0;

/// Timestamp sentinel emitted while the wall clock is unsynchronized.
pub const NO_TIME: &str = "N/A";

pub const TIME_FMT: &str = "%Y-%m-%dT%H:%M:%S";

/// The only inbound WebSocket command we recognize.
pub const CMD_GET_READINGS: &str = "getReadings";

#[derive(Clone, Debug, Serialize)]
pub struct Reading {
    pub temp: String,
    pub time: String,
}

impl Reading {
    pub fn new(temp_c: f32, stamp: Option<DateTime<Utc>>) -> Self {
        Reading {
            temp: format!("{temp_c:.2}"),
            time: stamp
                .map(|t| t.format(TIME_FMT).to_string())
                .unwrap_or_else(|| NO_TIME.to_string()),
        }
    }

    /// One JSON object, newline-terminated. This is both the WebSocket
    /// frame payload and the persisted log entry.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        line.push('\n');
        line
    }

    pub fn is_fault(&self) -> bool {
        self.temp.parse::<f32>().map(|v| v <= NO_TEMP).unwrap_or(true)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Uptime {
    pub uptime: usize,
    pub uptime_s: String,
}


// EOF
