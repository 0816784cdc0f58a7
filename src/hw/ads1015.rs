/// ADS1015 4-channel 12-bit ADC — single-shot reads only.
///
/// One conversion per call: write the config register with OS=1 and the
/// channel mux, poll OS until the conversion completes, read the result.
/// The 12-bit result sits left-aligned in the 16-bit conversion register.
use super::i2c::{I2cError, SharedI2c};
use std::thread;
use std::time::Duration;

const REG_CONVERSION: u8 = 0x00;
const REG_CONFIG: u8 = 0x01;

/// Config word, MSB first:
///   OS=1 (start), MUX=100+ch (single-ended), PGA=001 (±4.096 V), MODE=1
///   DR=100 (1600 SPS), comparator disabled.
const CONFIG_BASE_MSB: u8 = 0b1000_0011;
const CONFIG_LSB: u8 = 0b1000_0011;

/// Conversion at 1600 SPS takes 625 µs; poll a handful of times with a
/// short sleep before giving up.
const CONVERSION_POLLS: u32 = 8;

pub struct Ads1015 {
    bus: SharedI2c,
    addr: u8,
}

impl Ads1015 {
    pub fn new(bus: SharedI2c, addr: u8) -> Self {
        Self { bus, addr }
    }

    /// Single-shot read of one single-ended channel (AIN0..AIN3).
    /// Returns the unsigned 12-bit result, 0..4095.
    pub fn read_channel(&mut self, channel: u8) -> Result<u16, I2cError> {
        let channel = channel & 0x03;
        let msb = CONFIG_BASE_MSB | 0b0100_0000 | (channel << 4);
        self.bus.write(self.addr, &[REG_CONFIG, msb, CONFIG_LSB])?;

        for _ in 0..CONVERSION_POLLS {
            let mut cfg = [0u8; 2];
            self.bus.write_read(self.addr, &[REG_CONFIG], &mut cfg)?;
            if cfg[0] & 0x80 != 0 {
                let mut conv = [0u8; 2];
                self.bus
                    .write_read(self.addr, &[REG_CONVERSION], &mut conv)?;
                let word = ((conv[0] as u16) << 8) | conv[1] as u16;
                return Ok(word >> 4);
            }
            thread::sleep(Duration::from_micros(200));
        }
        Err(I2cError::Timeout(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::i2c::{MockI2c, ADDR_ADC};

    fn adc() -> (Ads1015, MockI2c) {
        let mock = MockI2c::new();
        let bus = SharedI2c::new(Box::new(mock.clone()));
        (Ads1015::new(bus, ADDR_ADC), mock)
    }

    #[test]
    fn reads_full_scale_and_zero() {
        let (mut adc, mock) = adc();
        mock.set_adc_raw(0, 0);
        assert_eq!(adc.read_channel(0).unwrap(), 0);

        mock.set_adc_raw(0, 4095);
        assert_eq!(adc.read_channel(0).unwrap(), 4095);
    }

    #[test]
    fn channel_mux_selects_the_right_input() {
        let (mut adc, mock) = adc();
        mock.set_adc_raw(0, 100);
        mock.set_adc_raw(2, 3_000);
        assert_eq!(adc.read_channel(0).unwrap(), 100);
        assert_eq!(adc.read_channel(2).unwrap(), 3_000);
    }

    #[test]
    fn bus_errors_propagate() {
        let (mut adc, mock) = adc();
        mock.fail_next(ADDR_ADC, 1);
        assert!(adc.read_channel(0).is_err());
    }
}
