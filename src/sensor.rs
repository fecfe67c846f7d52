// sensor.rs

/// One blocking conversion on the sensor bus, worst case a few hundred
/// milliseconds for a DS18B20 at 12-bit resolution.
///
/// A missing or faulty sensor reports [`crate::NO_TEMP`] or lower;
/// there is no separate error channel, callers check the range.
pub trait SensorSource: Send {
    fn sample(&mut self) -> f32;
}

impl<F> SensorSource for F
where
    F: FnMut() -> f32 + Send,
{
    fn sample(&mut self) -> f32 {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NO_TEMP;

    #[test]
    fn closures_are_sensors() {
        let mut fixed = || 21.25f32;
        assert_eq!(fixed.sample(), 21.25);

        let mut absent = || NO_TEMP;
        assert!(absent.sample() <= NO_TEMP);
    }
}

// EOF
