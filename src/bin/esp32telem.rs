// bin/esp32telem.rs

#![warn(clippy::large_futures)]

use std::{sync::Arc, time::Duration};

use esp32telem::*;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::{AnyInputPin, IOPin, Input, InputPin, PinDriver, Pull};
use esp_idf_hal::prelude::Peripherals;
use esp_idf_svc::{eventloop::EspSystemEventLoop, hal::gpio, nvs, wifi::WifiDriver};
use esp_idf_sys::{esp, esp_app_desc};
use log::*;
use one_wire_bus::OneWire;
use tokio::time::sleep;

const CONFIG_RESET_COUNT: i32 = 9;


esp_app_desc!();

fn main() -> anyhow::Result<()> {
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    // eventfd is needed by our mio poll implementation.  Note you should set max_fds
    // higher if you have other code that may need eventfd.

    #[allow(clippy::needless_update)]
    let config = esp_idf_sys::esp_vfs_eventfd_config_t {
        max_fds: 1,
        ..Default::default()
    };
    esp! { unsafe { esp_idf_sys::esp_vfs_eventfd_register(&config) } }?;

    info!("Hello.");
    info!("Starting up, firmware {FW_VERSION}");

    let sysloop = EspSystemEventLoop::take()?;
    let nvs_default_partition = nvs::EspDefaultNvsPartition::take()?;

    let ns = env!("CARGO_BIN_NAME");
    let nvs = match nvs::EspNvs::new(nvs_default_partition.clone(), ns, true) {
        Ok(nvs) => {
            info!("Got namespace {ns:?} from default partition");
            nvs
        }
        Err(e) => panic!("Could not get namespace {ns}: {e:?}"),
    };
    let mut settings = NvsSettings::new(nvs);

    #[cfg(feature = "reset_settings")]
    let config = {
        let c = DeviceConfig::default();
        settings.save_config(&c)?;
        settings.save_credentials(&Credentials::default())?;
        c
    };

    #[cfg(not(feature = "reset_settings"))]
    let config = match settings.load_config() {
        None => {
            error!("Could not read persisted config, using defaults");
            let c = DeviceConfig::default();
            settings.save_config(&c)?;
            info!("Successfully saved default config.");
            c
        }

        // using settings saved on nvs if we could find them
        Some(c) => c,
    };
    info!("My config:\n{config:#?}");

    let peripherals = Peripherals::take().unwrap();
    let pins = peripherals.pins;
    let button = gpio::PinDriver::input(pins.gpio9.downgrade_input())?;

    // the original hardware has its DS18B20 on gpio4
    let mut onew_pin = pins.gpio4.downgrade();
    info!("Scanning 1-wire devices on gpio4...");
    let sensor: Box<dyn SensorSource> = {
        let mut pin_drv = gpio::PinDriver::input_output_od(&mut onew_pin)?;
        pin_drv.set_pull(Pull::Up)?;
        let mut bus = OneWire::new(pin_drv)?;
        match scan_1wire(&mut bus) {
            Ok(devs) if !devs.is_empty() => {
                drop(bus);
                info!("Onewire response:\n{devs:#?}");
                Box::new(OneWireSensor::new(onew_pin, devs[0]))
            }
            other => {
                error!("No sensor found: {other:?}");
                // keep ticking; readings carry the sentinel temperature
                Box::new(|| NO_TEMP)
            }
        }
    };

    let wifidriver = WifiDriver::new(
        peripherals.modem,
        sysloop.clone(),
        Some(nvs_default_partition),
    )?;

    let state = Box::pin(MyState::new(config.clone(), Box::new(settings)));
    let shared_state = Arc::new(state);

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(Box::pin(async move {
            let net = match EspNetworkControl::new(wifidriver, &config) {
                Ok(net) => net,
                Err(e) => {
                    error!("Wi-Fi init failed: {e:?}");
                    return;
                }
            };
            *shared_state.myid.write().await = net.myid().to_string();

            let mut manager = ConnectivityManager::new(
                net,
                MdnsDiscovery::new(),
                SntpTimeSync::new(),
                config.join_retries,
                config.mdns_name.clone(),
                config.port,
            );

            let mode = {
                let mut settings = shared_state.settings.write().await;
                Box::pin(manager.bootstrap(settings.as_mut())).await
            };
            *shared_state.conn_state.write().await = mode;
            if let Some(ip) = manager.net().ip_addr() {
                *shared_state.ip_addr.write().await = ip;
            }
            // either the station or the provisioning AP is up now
            *shared_state.wifi_up.write().await = true;

            match mode {
                ConnectivityState::Joined => {
                    let pipeline = TelemetryPipeline::new(
                        sensor,
                        Arc::new(SystemClock),
                        shared_state.hub.clone(),
                        shared_state.datalog.clone(),
                    );
                    *shared_state.pipeline.write().await = Some(pipeline.clone());

                    let interval = Duration::from_millis(config.interval_ms);
                    info!("Entering main loop...");
                    tokio::select! {
                        _ = Box::pin(pipeline.run(interval)) => { error!("pipeline.run() ended."); }
                        _ = Box::pin(run_api_server(shared_state.clone())) => { error!("run_api_server() ended."); }
                        _ = Box::pin(poll_reset(shared_state.clone(), button)) => { error!("poll_reset() ended."); }
                    };
                }
                _ => {
                    info!("Provisioning mode: waiting for credentials...");
                    tokio::select! {
                        _ = Box::pin(run_api_server(shared_state.clone())) => { error!("run_api_server() ended."); }
                        _ = Box::pin(poll_reset(shared_state.clone(), button)) => { error!("poll_reset() ended."); }
                    };
                }
            }
        }));

    // not actually returning from main() but we reboot instead
    info!("main() finished, reboot.");
    FreeRtos::delay_ms(3000);
    esp_idf_hal::reset::restart();
}

async fn poll_reset(
    state: Arc<Pin<Box<MyState>>>,
    button: PinDriver<'_, AnyInputPin, Input>,
) -> anyhow::Result<()> {
    let mut uptime: usize = 0;
    loop {
        sleep(Duration::from_secs(2)).await;

        uptime += 2;
        *(state.uptime.write().await) = uptime;

        if *state.reset.read().await {
            esp_idf_hal::reset::restart();
        }

        if button.is_low() {
            Box::pin(factory_reset(&state, &button)).await?;
        }
    }
}

async fn factory_reset(
    state: &Arc<Pin<Box<MyState>>>,
    button: &PinDriver<'_, AnyInputPin, Input>,
) -> anyhow::Result<()> {
    let mut reset_cnt = CONFIG_RESET_COUNT;

    while button.is_low() {
        // button is pressed and kept down, countdown and factory reset if reach zero
        error!("Reset? {reset_cnt}");

        if reset_cnt == 0 {
            error!("Factory resetting...");

            let mut settings = state.settings.write().await;
            settings.save_config(&DeviceConfig::default())?;
            settings.save_credentials(&Credentials::default())?;
            drop(settings);

            sleep(Duration::from_millis(2000)).await;
            esp_idf_hal::reset::restart();
        }

        reset_cnt -= 1;
        sleep(Duration::from_millis(500)).await;
    }
    Ok(())
}

// EOF
