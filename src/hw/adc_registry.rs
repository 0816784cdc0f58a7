/// ADC scan results as a queryable registry — no events.
///
/// The I/O task is the only writer; modules poll `get_value` from their
/// update ticks. Readers take a short mutex for a word-sized copy, which is
/// the whole cross-task surface of this data.
use super::ads1015::Ads1015;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdcChannelId {
    TroopsSlider,
}

#[derive(Debug, Clone, Copy)]
pub struct AdcChannelConfig {
    pub id: AdcChannelId,
    pub hw_channel: u8,
    pub i2c_addr: u8,
    /// Consumers treat changes below this as noise.
    pub change_threshold_percent: u8,
    pub name: &'static str,
}

/// The console's channel map: the troops slider on AIN0.
pub const ADC_CHANNELS: [AdcChannelConfig; 1] = [AdcChannelConfig {
    id: AdcChannelId::TroopsSlider,
    hw_channel: 0,
    i2c_addr: super::i2c::ADDR_ADC,
    change_threshold_percent: 1,
    name: "troops_slider",
}];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdcReading {
    pub raw: u16,
    pub percent: u8,
    pub timestamp_ms: u64,
}

/// 12-bit raw → 0..100, clamped.
pub fn raw_to_percent(raw: u16) -> u8 {
    ((raw.min(4095) as u32 * 100) / 4095) as u8
}

pub struct AdcRegistry {
    values: Mutex<HashMap<AdcChannelId, AdcReading>>,
}

impl AdcRegistry {
    pub fn new() -> Self {
        Self { values: Mutex::new(HashMap::new()) }
    }

    pub fn get_value(&self, id: AdcChannelId) -> Option<AdcReading> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .copied()
    }

    pub fn store(&self, id: AdcChannelId, raw: u16, now_ms: u64) {
        let reading = AdcReading { raw, percent: raw_to_percent(raw), timestamp_ms: now_ms };
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, reading);
    }
}

impl Default for AdcRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Scanner — invoked from the I/O task at the 100 ms cadence
// ---------------------------------------------------------------------------

pub struct AdcScanner {
    adc: Ads1015,
    channels: &'static [AdcChannelConfig],
    /// Per-channel consecutive read failures, for rate-limited warnings.
    failures: HashMap<AdcChannelId, u32>,
}

impl AdcScanner {
    pub fn new(adc: Ads1015, channels: &'static [AdcChannelConfig]) -> Self {
        Self { adc, channels, failures: HashMap::new() }
    }

    pub fn scan(&mut self, registry: &AdcRegistry, now_ms: u64) {
        for ch in self.channels {
            match self.adc.read_channel(ch.hw_channel) {
                Ok(raw) => {
                    self.failures.remove(&ch.id);
                    registry.store(ch.id, raw, now_ms);
                }
                Err(e) => {
                    let n = self.failures.entry(ch.id).or_insert(0);
                    *n += 1;
                    // The first failure and every 50th afterwards; the
                    // registry keeps its last good value meanwhile.
                    if *n == 1 || *n % 50 == 0 {
                        tracing::warn!("ADC read failed on {} (x{}): {}", ch.name, n, e);
                    }
                }
            }
        }
    }
}
