/// Shared I²C bus — one initialized bus, all peripherals go through it.
///
/// The bus is a trait so the whole engine runs against `MockI2c` off-target;
/// a physical adapter implements the same two calls over the platform's
/// i2c device node. Every operation is bounded by the transport's 100 ms
/// timeout contract (`I2C_OP_TIMEOUT_MS`); the retry policy on top of that
/// lives in the MCP23017 driver, not here.
///
/// Serialization: `SharedI2c` holds the bus behind a mutex and exposes
/// per-call locking plus `transaction()` for multi-write sequences that
/// must not interleave with another task (full LCD row writes).
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Upper bound on any single bus operation.
pub const I2C_OP_TIMEOUT_MS: u64 = 100;

/// Fixed 7-bit addresses on the console bus.
pub const ADDR_INPUT_EXPANDER: u8 = 0x20;
pub const ADDR_OUTPUT_EXPANDER: u8 = 0x21;
pub const ADDR_LCD: u8 = 0x27;
pub const ADDR_ADC: u8 = 0x48;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum I2cError {
    #[error("device 0x{0:02x} did not acknowledge")]
    Nack(u8),
    #[error("bus timeout after {0} ms")]
    Timeout(u64),
    #[error("bus fault: {0}")]
    Bus(String),
}

pub trait I2cBus: Send {
    fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<(), I2cError>;
    fn write_read(&mut self, addr: u8, out: &[u8], input: &mut [u8]) -> Result<(), I2cError>;
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SharedI2c {
    inner: Arc<Mutex<Box<dyn I2cBus>>>,
}

impl SharedI2c {
    pub fn new(bus: Box<dyn I2cBus>) -> Self {
        Self { inner: Arc::new(Mutex::new(bus)) }
    }

    pub fn write(&self, addr: u8, bytes: &[u8]) -> Result<(), I2cError> {
        self.lock().write(addr, bytes)
    }

    pub fn write_read(&self, addr: u8, out: &[u8], input: &mut [u8]) -> Result<(), I2cError> {
        self.lock().write_read(addr, out, input)
    }

    /// Run a multi-operation sequence while holding the bus, so another
    /// task's transaction cannot interleave mid-sequence.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&mut dyn I2cBus) -> Result<T, I2cError>,
    ) -> Result<T, I2cError> {
        f(self.lock().as_mut())
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn I2cBus>> {
        // A poisoned bus mutex means a driver panicked mid-transaction; the
        // register state is recoverable, so keep the bus usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Mock bus — simulates both MCP23017s, the LCD backpack, and the ADS1015
// ---------------------------------------------------------------------------

const MCP_REG_COUNT: usize = 0x16;
const MCP_GPIOA: usize = 0x12;
const MCP_GPIOB: usize = 0x13;
const MCP_OLATA: usize = 0x14;
const MCP_OLATB: usize = 0x15;
const ADS_REG_CONVERSION: u8 = 0x00;
const ADS_REG_CONFIG: u8 = 0x01;

struct MockState {
    /// MCP23017 register files, keyed by device address.
    expanders: HashMap<u8, [u8; MCP_REG_COUNT]>,
    /// Last byte written to the PCF8574 LCD backpack.
    lcd_last_byte: u8,
    /// Count of bytes clocked out to the LCD (transaction accounting).
    lcd_write_count: u64,
    /// Simulated ADC raw readings per AIN channel (12-bit).
    adc_raw: [u16; 4],
    adc_config: [u8; 2],
    /// Scripted failures: remaining operations on this address that fail.
    fail_remaining: HashMap<u8, u32>,
    /// Addresses that never acknowledge (absent devices).
    absent: Vec<u8>,
    /// Full write log for assertions: (addr, bytes).
    writes: Vec<(u8, Vec<u8>)>,
}

/// Register-level simulation of the console's bus devices, with scripted
/// failure injection for recovery testing. Cloning yields another handle on
/// the same simulated hardware, so tests keep a control handle while the
/// drivers own the bus.
#[derive(Clone)]
pub struct MockI2c {
    state: Arc<Mutex<MockState>>,
}

impl MockI2c {
    pub fn new() -> Self {
        let mut expanders = HashMap::new();
        for addr in [ADDR_INPUT_EXPANDER, ADDR_OUTPUT_EXPANDER] {
            let mut regs = [0u8; MCP_REG_COUNT];
            // Power-on reset: all pins inputs.
            regs[0x00] = 0xFF;
            regs[0x01] = 0xFF;
            expanders.insert(addr, regs);
        }
        Self {
            state: Arc::new(Mutex::new(MockState {
                expanders,
                lcd_last_byte: 0,
                lcd_write_count: 0,
                adc_raw: [0; 4],
                adc_config: [0x85, 0x83],
                fail_remaining: HashMap::new(),
                absent: Vec::new(),
                writes: Vec::new(),
            })),
        }
    }

    /// Make the next `n` operations addressed to `addr` fail with a NACK.
    pub fn fail_next(&self, addr: u8, n: u32) {
        self.st().fail_remaining.insert(addr, n);
    }

    /// Mark a device as permanently absent.
    pub fn set_absent(&self, addr: u8) {
        self.st().absent.push(addr);
    }

    /// Drive the simulated input pins of an expander (16-bit, A = low byte).
    pub fn set_expander_inputs(&self, addr: u8, value: u16) {
        if let Some(regs) = self.st().expanders.get_mut(&addr) {
            regs[MCP_GPIOA] = (value & 0xFF) as u8;
            regs[MCP_GPIOB] = (value >> 8) as u8;
        }
    }

    /// Current output latch of an expander (16-bit, A = low byte).
    pub fn expander_outputs(&self, addr: u8) -> u16 {
        self.st()
            .expanders
            .get(&addr)
            .map(|r| (r[MCP_OLATA] as u16) | ((r[MCP_OLATB] as u16) << 8))
            .unwrap_or(0)
    }

    pub fn expander_reg(&self, addr: u8, reg: u8) -> u8 {
        self.st()
            .expanders
            .get(&addr)
            .map(|r| r[reg as usize])
            .unwrap_or(0)
    }

    pub fn set_adc_raw(&self, channel: u8, raw: u16) {
        self.st().adc_raw[channel as usize & 3] = raw.min(4095);
    }

    pub fn lcd_write_count(&self) -> u64 {
        self.st().lcd_write_count
    }

    /// Writes addressed to `addr` since the last `clear_log()`.
    pub fn writes_to(&self, addr: u8) -> Vec<Vec<u8>> {
        self.st()
            .writes
            .iter()
            .filter(|(a, _)| *a == addr)
            .map(|(_, b)| b.clone())
            .collect()
    }

    pub fn clear_log(&self) {
        self.st().writes.clear();
    }

    fn st(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockI2c {
    fn default() -> Self {
        Self::new()
    }
}

fn check(st: &mut MockState, addr: u8) -> Result<(), I2cError> {
    if st.absent.contains(&addr) {
        return Err(I2cError::Nack(addr));
    }
    if let Some(n) = st.fail_remaining.get_mut(&addr) {
        if *n > 0 {
            *n -= 1;
            return Err(I2cError::Nack(addr));
        }
    }
    Ok(())
}

fn selected_adc_channel(st: &MockState) -> usize {
    // MUX bits 14:12 of the config word; 0b100..0b111 = AIN0..AIN3.
    ((st.adc_config[0] >> 4) & 0x03) as usize
}

impl I2cBus for MockI2c {
    fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<(), I2cError> {
        let mut st = self.st();
        check(&mut st, addr)?;
        st.writes.push((addr, bytes.to_vec()));

        if let Some(regs) = st.expanders.get_mut(&addr) {
            // [reg] or [reg, v] or [reg, vA, vB] (sequential addressing).
            if let Some((&reg, values)) = bytes.split_first() {
                for (i, &v) in values.iter().enumerate() {
                    let idx = reg as usize + i;
                    if idx < MCP_REG_COUNT {
                        regs[idx] = v;
                        // GPIO writes land on the output latch too.
                        if idx == MCP_GPIOA {
                            regs[MCP_OLATA] = v;
                        } else if idx == MCP_GPIOB {
                            regs[MCP_OLATB] = v;
                        }
                    }
                }
            }
        } else if addr == ADDR_LCD {
            if let Some(&last) = bytes.last() {
                st.lcd_last_byte = last;
            }
            st.lcd_write_count += bytes.len() as u64;
        } else if addr == ADDR_ADC {
            if bytes.len() >= 3 && bytes[0] == ADS_REG_CONFIG {
                st.adc_config = [bytes[1], bytes[2]];
            }
        }
        Ok(())
    }

    fn write_read(&mut self, addr: u8, out: &[u8], input: &mut [u8]) -> Result<(), I2cError> {
        let mut st = self.st();
        check(&mut st, addr)?;

        if let Some(regs) = st.expanders.get(&addr) {
            let reg = out.first().copied().unwrap_or(0) as usize;
            for (i, slot) in input.iter_mut().enumerate() {
                *slot = if reg + i < MCP_REG_COUNT { regs[reg + i] } else { 0 };
            }
        } else if addr == ADDR_ADC {
            match out.first().copied() {
                Some(ADS_REG_CONVERSION) => {
                    // 12-bit result left-aligned in a 16-bit register.
                    let raw = st.adc_raw[selected_adc_channel(&st)];
                    let word = raw << 4;
                    if input.len() >= 2 {
                        input[0] = (word >> 8) as u8;
                        input[1] = (word & 0xFF) as u8;
                    }
                }
                Some(ADS_REG_CONFIG) => {
                    // Conversion always complete in the mock: OS bit set.
                    if input.len() >= 2 {
                        input[0] = st.adc_config[0] | 0x80;
                        input[1] = st.adc_config[1];
                    }
                }
                _ => input.fill(0),
            }
        } else {
            input.fill(0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_mock() -> (SharedI2c, MockI2c) {
        let mock = MockI2c::new();
        (SharedI2c::new(Box::new(mock.clone())), mock)
    }

    #[test]
    fn expander_registers_round_trip() {
        let (bus, _) = shared_mock();
        bus.write(ADDR_OUTPUT_EXPANDER, &[0x00, 0x00, 0x00]).unwrap();

        let mut back = [0u8; 2];
        bus.write_read(ADDR_OUTPUT_EXPANDER, &[0x00], &mut back).unwrap();
        assert_eq!(back, [0x00, 0x00]);
    }

    #[test]
    fn scripted_failures_then_recovery() {
        let (bus, mock) = shared_mock();
        mock.fail_next(ADDR_OUTPUT_EXPANDER, 2);

        assert!(bus.write(ADDR_OUTPUT_EXPANDER, &[0x14, 0x01]).is_err());
        assert!(bus.write(ADDR_OUTPUT_EXPANDER, &[0x14, 0x01]).is_err());
        assert!(bus.write(ADDR_OUTPUT_EXPANDER, &[0x14, 0x01]).is_ok());
        // Failures are per-address — the other expander is untouched.
        assert!(bus.write(ADDR_INPUT_EXPANDER, &[0x00, 0xFF]).is_ok());
    }

    #[test]
    fn absent_device_nacks_forever() {
        let (bus, mock) = shared_mock();
        mock.set_absent(ADDR_LCD);
        assert_eq!(bus.write(ADDR_LCD, &[0x00]), Err(I2cError::Nack(ADDR_LCD)));
    }

    #[test]
    fn adc_returns_configured_raw() {
        let (bus, mock) = shared_mock();
        mock.set_adc_raw(0, 2048);

        // Select AIN0 single-ended: MUX=100 in config bits 14:12.
        bus.write(ADDR_ADC, &[ADS_REG_CONFIG, 0xC3, 0x83]).unwrap();
        let mut conv = [0u8; 2];
        bus.write_read(ADDR_ADC, &[ADS_REG_CONVERSION], &mut conv).unwrap();
        let raw = (((conv[0] as u16) << 8) | conv[1] as u16) >> 4;
        assert_eq!(raw, 2048);
    }

    #[test]
    fn input_pins_reflect_simulated_levels() {
        let (bus, mock) = shared_mock();
        mock.set_expander_inputs(ADDR_INPUT_EXPANDER, 0xFFF5);

        let mut ports = [0u8; 2];
        bus.write_read(ADDR_INPUT_EXPANDER, &[0x12], &mut ports).unwrap();
        assert_eq!(ports, [0xF5, 0xFF]);
    }
}
