// connectivity.rs

use log::*;
use tokio::time::{Duration, sleep};

use crate::{Credentials, PROVISION_SSID, SettingsStore};

pub const JOIN_BACKOFF: Duration = Duration::from_secs(1);
pub const SYNC_BACKOFF: Duration = Duration::from_secs(1);

/// Boot-time network identity. One transition sequence per boot:
/// Idle -> JoiningNetwork -> Joined | ProvisioningMode. The only way
/// out of ProvisioningMode is a credential save plus restart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectivityState {
    Idle,
    JoiningNetwork,
    Joined,
    ProvisioningMode,
}

/// Station-join and access-point control, mockable for tests.
pub trait NetworkControl {
    /// Issue the join request once; progress is observed via polling.
    fn start_join(&mut self, creds: &Credentials) -> anyhow::Result<()>;
    /// One status poll, not a fresh connection attempt.
    fn is_joined(&mut self) -> anyhow::Result<bool>;
    fn start_access_point(&mut self) -> anyhow::Result<()>;
}

/// Service discovery registration (mDNS on the device).
pub trait Discovery {
    fn announce(&mut self, name: &str, port: u16) -> anyhow::Result<()>;
}

/// One wall-clock synchronization attempt (SNTP status poll on the
/// device).
pub trait TimeSync {
    fn attempt(&mut self) -> anyhow::Result<()>;
}

pub struct ConnectivityManager<N, D, T> {
    net: N,
    discovery: D,
    timesync: T,
    state: ConnectivityState,
    join_retries: u32,
    mdns_name: String,
    port: u16,
}

impl<N, D, T> ConnectivityManager<N, D, T>
where
    N: NetworkControl,
    D: Discovery,
    T: TimeSync,
{
    pub fn new(
        net: N,
        discovery: D,
        timesync: T,
        join_retries: u32,
        mdns_name: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            net,
            discovery,
            timesync,
            state: ConnectivityState::Idle,
            join_retries,
            mdns_name: mdns_name.into(),
            port,
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn net(&self) -> &N {
        &self.net
    }

    /// Decides, once, whether this boot runs as a network client or as
    /// the provisioning access point. Never fails: every error path
    /// degrades to ProvisioningMode.
    pub async fn bootstrap(&mut self, settings: &mut dyn SettingsStore) -> ConnectivityState {
        let creds = match settings.load_credentials() {
            Ok(c) if c.is_provisioned() => c,
            Ok(_) => {
                info!("No stored credentials");
                return self.enter_provisioning();
            }
            Err(e) => {
                error!("Credential read failed: {e:?}");
                return self.enter_provisioning();
            }
        };

        self.state = ConnectivityState::JoiningNetwork;
        info!("Joining network {ssid:?}...", ssid = creds.ssid);
        if let Err(e) = self.net.start_join(&creds) {
            error!("Join request failed: {e:?}");
            return self.enter_provisioning();
        }
        // credentials are not held beyond the attempt
        drop(creds);

        for attempt in 1..=self.join_retries {
            match self.net.is_joined() {
                Ok(true) => return self.finish_join().await,
                Ok(false) => {
                    debug!("Not joined yet ({attempt}/{max})", max = self.join_retries)
                }
                Err(e) => {
                    warn!("Status poll failed ({attempt}/{max}): {e:?}", max = self.join_retries)
                }
            }
            sleep(JOIN_BACKOFF).await;
        }

        warn!("Join attempts exhausted");
        self.enter_provisioning()
    }

    async fn finish_join(&mut self) -> ConnectivityState {
        info!("Network joined");

        if let Err(e) = self.discovery.announce(&self.mdns_name, self.port) {
            warn!("Service announce failed: {e:?}");
        }

        // No attempt bound here: startup blocks until a time source
        // answers.
        let mut tries = 0u64;
        loop {
            match self.timesync.attempt() {
                Ok(()) => break,
                Err(e) => {
                    tries += 1;
                    warn!("Clock sync attempt {tries} failed: {e:?}");
                    sleep(SYNC_BACKOFF).await;
                }
            }
        }
        info!("Clock synchronized");

        self.state = ConnectivityState::Joined;
        self.state
    }

    fn enter_provisioning(&mut self) -> ConnectivityState {
        warn!("Starting provisioning access point {PROVISION_SSID:?}");
        if let Err(e) = self.net.start_access_point() {
            error!("Access point start failed: {e:?}");
        }
        self.state = ConnectivityState::ProvisioningMode;
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemSettings;
    use anyhow::bail;
    use std::sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    };

    struct MockNet {
        joined_after: Option<u32>,
        join_fails: bool,
        polls: Arc<AtomicU32>,
        ap_started: Arc<AtomicBool>,
    }

    impl MockNet {
        fn new(joined_after: Option<u32>) -> Self {
            Self {
                joined_after,
                join_fails: false,
                polls: Arc::new(AtomicU32::new(0)),
                ap_started: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl NetworkControl for MockNet {
        fn start_join(&mut self, creds: &Credentials) -> anyhow::Result<()> {
            assert!(creds.is_provisioned());
            if self.join_fails {
                bail!("radio says no");
            }
            Ok(())
        }

        fn is_joined(&mut self) -> anyhow::Result<bool> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(self.joined_after.is_some_and(|k| n >= k))
        }

        fn start_access_point(&mut self) -> anyhow::Result<()> {
            self.ap_started.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct MockDiscovery(Arc<AtomicU32>);

    impl Discovery for MockDiscovery {
        fn announce(&mut self, _name: &str, _port: u16) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct MockSync {
        fail_first: u32,
        calls: Arc<AtomicU32>,
    }

    impl TimeSync for MockSync {
        fn attempt(&mut self) -> anyhow::Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                bail!("no time source");
            }
            Ok(())
        }
    }

    fn manager(
        net: MockNet,
        sync_fail_first: u32,
    ) -> (
        ConnectivityManager<MockNet, MockDiscovery, MockSync>,
        Arc<AtomicU32>,
        Arc<AtomicU32>,
    ) {
        let announces = Arc::new(AtomicU32::new(0));
        let syncs = Arc::new(AtomicU32::new(0));
        let mgr = ConnectivityManager::new(
            net,
            MockDiscovery(announces.clone()),
            MockSync {
                fail_first: sync_fail_first,
                calls: syncs.clone(),
            },
            10,
            "unit",
            80,
        );
        (mgr, announces, syncs)
    }

    fn provisioned() -> MemSettings {
        let mut settings = MemSettings::default();
        settings
            .save_credentials(&Credentials {
                ssid: "lab".into(),
                pass: "hunter2".into(),
            })
            .unwrap();
        settings
    }

    #[tokio::test(start_paused = true)]
    async fn empty_credentials_go_straight_to_provisioning() {
        let net = MockNet::new(Some(1));
        let polls = net.polls.clone();
        let ap = net.ap_started.clone();
        let (mut mgr, announces, _) = manager(net, 0);

        let state = mgr.bootstrap(&mut MemSettings::default()).await;

        assert_eq!(state, ConnectivityState::ProvisioningMode);
        assert_eq!(mgr.state(), ConnectivityState::ProvisioningMode);
        assert_eq!(polls.load(Ordering::SeqCst), 0, "no join polls");
        assert!(ap.load(Ordering::SeqCst));
        assert_eq!(announces.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reachable_network_joins_within_bound() {
        let net = MockNet::new(Some(3));
        let polls = net.polls.clone();
        let ap = net.ap_started.clone();
        let (mut mgr, announces, syncs) = manager(net, 0);

        let state = mgr.bootstrap(&mut provisioned()).await;

        assert_eq!(state, ConnectivityState::Joined);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
        assert!(!ap.load(Ordering::SeqCst));
        assert_eq!(announces.load(Ordering::SeqCst), 1);
        assert_eq!(syncs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_network_exhausts_exactly_the_bound() {
        let net = MockNet::new(None);
        let polls = net.polls.clone();
        let ap = net.ap_started.clone();
        let (mut mgr, announces, _) = manager(net, 0);

        let state = mgr.bootstrap(&mut provisioned()).await;

        assert_eq!(state, ConnectivityState::ProvisioningMode);
        assert_eq!(polls.load(Ordering::SeqCst), 10);
        assert!(ap.load(Ordering::SeqCst));
        assert_eq!(announces.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_join_request_degrades_to_provisioning() {
        let mut net = MockNet::new(Some(1));
        net.join_fails = true;
        let polls = net.polls.clone();
        let ap = net.ap_started.clone();
        let (mut mgr, _, _) = manager(net, 0);

        let state = mgr.bootstrap(&mut provisioned()).await;

        assert_eq!(state, ConnectivityState::ProvisioningMode);
        assert_eq!(polls.load(Ordering::SeqCst), 0);
        assert!(ap.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn clock_sync_retries_until_a_source_answers() {
        let net = MockNet::new(Some(1));
        let (mut mgr, _, syncs) = manager(net, 4);

        let state = mgr.bootstrap(&mut provisioned()).await;

        assert_eq!(state, ConnectivityState::Joined);
        assert_eq!(syncs.load(Ordering::SeqCst), 5);
    }
}

// EOF
