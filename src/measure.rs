// measure.rs

use embedded_hal::digital::{InputPin, OutputPin};
use esp_idf_hal::{
    delay::{Ets, FreeRtos},
    gpio::{AnyIOPin, PinDriver, Pull},
};
use esp_idf_sys::EspError;
use log::*;
use one_wire_bus::{Address, OneWire, OneWireError};

use crate::{NO_TEMP, SensorSource};

// When performing a measurement it can happen that no device was found on the one-wire-bus
// in addition to the bus errors. Therefore we extend the error cases for proper error handling.
#[derive(Debug)]
pub enum MeasurementError<E> {
    OneWireError(OneWireError<E>),
    NoDeviceFound,
}

impl<E> From<OneWireError<E>> for MeasurementError<E> {
    fn from(value: OneWireError<E>) -> Self {
        MeasurementError::OneWireError(value)
    }
}

/// Enumerate DS18B20 devices on one candidate pin.
pub fn scan_1wire<P, E>(one_wire_bus: &mut OneWire<P>) -> Result<Vec<Address>, OneWireError<E>>
where
    P: OutputPin<Error = E> + InputPin<Error = E>,
    E: core::fmt::Debug,
{
    let mut devs = Vec::new();
    for device in one_wire_bus.devices(false, &mut Ets) {
        devs.push(device?);
    }
    Ok(devs)
}

/// The first DS18B20 found at boot. The bus is rebuilt around the owned
/// pin for every conversion, so nothing holds the pin between samples.
pub struct OneWireSensor {
    pin: AnyIOPin,
    addr: Address,
}

unsafe impl Send for OneWireSensor {}

impl OneWireSensor {
    pub fn new(pin: AnyIOPin, addr: Address) -> Self {
        Self { pin, addr }
    }

    fn read(&mut self) -> Result<f32, MeasurementError<EspError>> {
        let mut pin_drv = PinDriver::input_output_od(&mut self.pin)
            .map_err(|e| MeasurementError::OneWireError(OneWireError::PinError(e)))?;
        pin_drv
            .set_pull(Pull::Up)
            .map_err(|e| MeasurementError::OneWireError(OneWireError::PinError(e)))?;
        let mut bus = OneWire::new(pin_drv)?;

        ds18b20::start_simultaneous_temp_measurement(&mut bus, &mut Ets)?;
        ds18b20::Resolution::Bits12.delay_for_measurement_time(&mut FreeRtos);

        let sensor = ds18b20::Ds18b20::new::<EspError>(self.addr)?;
        let data = sensor.read_data(&mut bus, &mut Ets)?;
        Ok(data.temperature)
    }
}

impl SensorSource for OneWireSensor {
    fn sample(&mut self) -> f32 {
        match self.read() {
            Ok(t) => t,
            Err(e) => {
                warn!("Sensor read failed: {e:?}");
                NO_TEMP
            }
        }
    }
}

// EOF
