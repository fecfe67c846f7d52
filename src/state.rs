// state.rs

use crate::*;

use std::net::Ipv4Addr;

use tokio::sync::RwLock;

pub struct MyState {
    pub config: RwLock<DeviceConfig>,
    pub settings: RwLock<Box<dyn SettingsStore>>,
    pub hub: Arc<RwLock<SubscriberHub>>,
    pub datalog: Arc<DataLog>,
    pub pipeline: RwLock<Option<TelemetryPipeline>>,
    pub conn_state: RwLock<ConnectivityState>,
    pub uptime: RwLock<usize>,
    pub api_cnt: AtomicU64,
    pub wifi_up: RwLock<bool>,
    pub ip_addr: RwLock<Ipv4Addr>,
    pub myid: RwLock<String>,
    pub reset: RwLock<bool>,
}

impl MyState {
    pub fn new(config: DeviceConfig, settings: Box<dyn SettingsStore>) -> Self {
        let datalog = Arc::new(DataLog::new(config.log_path.as_str()));
        MyState {
            config: RwLock::new(config),
            settings: RwLock::new(settings),
            hub: Arc::new(RwLock::new(SubscriberHub::new())),
            datalog,
            pipeline: RwLock::new(None),
            conn_state: RwLock::new(ConnectivityState::Idle),
            uptime: RwLock::new(0),
            api_cnt: AtomicU64::new(0),
            wifi_up: RwLock::new(false),
            ip_addr: RwLock::new(Ipv4Addr::new(0, 0, 0, 0)),
            myid: RwLock::new("esp32telem".into()),
            reset: RwLock::new(false),
        }
    }
}

// EOF
