/// MCP23017 16-pin I²C I/O expander driver with health tracking and recovery.
///
/// Register map (IOCON.BANK = 0, the power-on layout):
///   IODIR  direction      GPPU  pull-ups      GPIO  port read
///   OLAT   output latch   (A = pins 0..7, B = pins 8..15)
///
/// Intent (direction / pull-ups / output latch) is cached so a board that
/// browns out or gets unplugged can be reinitialized to exactly the state
/// the application believes it has.
///
/// Failure policy: 3 consecutive errors mark the board unhealthy and
/// schedule a recovery attempt; attempts back off 100 ms ×2 up to 5 s, max
/// 5 attempts before holding at the cap. A cheap IODIR write/read/compare
/// health check runs every 10 s while the board is healthy. The owning task
/// drives both through `service()`.
use super::i2c::{I2cError, SharedI2c};

pub const REG_IODIRA: u8 = 0x00;
pub const REG_IODIRB: u8 = 0x01;
pub const REG_GPPUA: u8 = 0x0C;
pub const REG_GPPUB: u8 = 0x0D;
pub const REG_GPIOA: u8 = 0x12;
pub const REG_GPIOB: u8 = 0x13;
pub const REG_OLATA: u8 = 0x14;
pub const REG_OLATB: u8 = 0x15;

const UNHEALTHY_THRESHOLD: u8 = 3;
const RECOVERY_BACKOFF_INITIAL_MS: u64 = 100;
const RECOVERY_BACKOFF_MAX_MS: u64 = 5_000;
const RECOVERY_MAX_ATTEMPTS: u8 = 5;
const HEALTH_CHECK_INTERVAL_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct ExpanderHealth {
    pub healthy: bool,
    pub error_count: u32,
    pub consecutive_errors: u8,
    pub recovery_count: u32,
    pub last_error_ms: u64,
    pub last_health_check_ms: u64,
}

impl ExpanderHealth {
    fn new() -> Self {
        Self {
            healthy: true,
            error_count: 0,
            consecutive_errors: 0,
            recovery_count: 0,
            last_error_ms: 0,
            last_health_check_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardMode {
    /// All pins inputs with pull-ups (button board).
    InputsPulledUp,
    /// All pins outputs, latches cleared (LED board).
    OutputsCleared,
}

type RecoveryCallback = Box<dyn Fn(u8) + Send>;

pub struct Mcp23017 {
    bus: SharedI2c,
    addr: u8,
    // Cached intent, written back verbatim on recovery.
    iodir: u16,
    gppu: u16,
    olat: u16,
    health: ExpanderHealth,
    recovery_attempts: u8,
    next_recovery_ms: u64,
    backoff_ms: u64,
    recovery_cb: Option<RecoveryCallback>,
}

impl Mcp23017 {
    /// Configure a board for its role. Fails if the chip is absent.
    pub fn begin(bus: SharedI2c, addr: u8, mode: BoardMode) -> Result<Self, I2cError> {
        let (iodir, gppu, olat) = match mode {
            BoardMode::InputsPulledUp => (0xFFFF, 0xFFFF, 0x0000),
            BoardMode::OutputsCleared => (0x0000, 0x0000, 0x0000),
        };
        let mut chip = Self {
            bus,
            addr,
            iodir,
            gppu,
            olat,
            health: ExpanderHealth::new(),
            recovery_attempts: 0,
            next_recovery_ms: 0,
            backoff_ms: RECOVERY_BACKOFF_INITIAL_MS,
            recovery_cb: None,
        };
        chip.write_intent()?;
        tracing::info!("MCP23017 0x{:02x} configured as {:?}", addr, mode);
        Ok(chip)
    }

    pub fn set_recovery_callback(&mut self, cb: RecoveryCallback) {
        self.recovery_cb = Some(cb);
    }

    pub fn health(&self) -> &ExpanderHealth {
        &self.health
    }

    pub fn is_healthy(&self) -> bool {
        self.health.healthy
    }

    pub fn addr(&self) -> u8 {
        self.addr
    }

    /// Drive one output pin. The latch cache is updated first so the intent
    /// survives a failed write and recovery restores the requested level.
    pub fn write_pin(&mut self, pin: u8, high: bool, now_ms: u64) -> Result<(), I2cError> {
        if high {
            self.olat |= 1 << pin;
        } else {
            self.olat &= !(1 << pin);
        }
        let (reg, value) = if pin < 8 {
            (REG_OLATA, (self.olat & 0xFF) as u8)
        } else {
            (REG_OLATB, (self.olat >> 8) as u8)
        };
        let r = self.bus.write(self.addr, &[reg, value]);
        self.track(r, now_ms)
    }

    /// Read both ports in one transaction (GPIOA then GPIOB, sequential).
    pub fn read_inputs(&mut self, now_ms: u64) -> Result<u16, I2cError> {
        let mut buf = [0u8; 2];
        let r = self.bus.write_read(self.addr, &[REG_GPIOA], &mut buf);
        self.track(r, now_ms)?;
        Ok((buf[0] as u16) | ((buf[1] as u16) << 8))
    }

    /// Periodic driver servicing: recovery attempts while unhealthy, the
    /// 10 s IODIR round-trip check while healthy. Call from the owning
    /// task's tick; cheap when nothing is due.
    pub fn service(&mut self, now_ms: u64) {
        if !self.health.healthy {
            if now_ms >= self.next_recovery_ms {
                self.attempt_recovery(now_ms);
            }
            return;
        }
        if now_ms.saturating_sub(self.health.last_health_check_ms) >= HEALTH_CHECK_INTERVAL_MS {
            self.health_check(now_ms);
        }
    }

    /// Write IODIRA, read it back, compare. A mismatch means the chip reset
    /// behind our back (brown-out) and is treated like a bus error streak.
    pub fn health_check(&mut self, now_ms: u64) {
        self.health.last_health_check_ms = now_ms;
        let expected = (self.iodir & 0xFF) as u8;
        let result = self
            .bus
            .write(self.addr, &[REG_IODIRA, expected])
            .and_then(|_| {
                let mut back = [0u8; 1];
                self.bus.write_read(self.addr, &[REG_IODIRA], &mut back)?;
                Ok(back[0])
            });
        match result {
            Ok(read_back) if read_back == expected => {
                self.health.consecutive_errors = 0;
            }
            Ok(read_back) => {
                tracing::warn!(
                    "MCP23017 0x{:02x} health check mismatch: wrote {:#04x}, read {:#04x}",
                    self.addr,
                    expected,
                    read_back
                );
                self.mark_unhealthy(now_ms);
            }
            Err(e) => {
                tracing::warn!("MCP23017 0x{:02x} health check failed: {}", self.addr, e);
                let _ = self.track::<()>(Err(e), now_ms);
            }
        }
    }

    fn track<T>(&mut self, result: Result<T, I2cError>, now_ms: u64) -> Result<T, I2cError> {
        match result {
            Ok(v) => {
                self.health.consecutive_errors = 0;
                Ok(v)
            }
            Err(e) => {
                self.health.error_count += 1;
                self.health.consecutive_errors = self.health.consecutive_errors.saturating_add(1);
                self.health.last_error_ms = now_ms;
                if self.health.healthy && self.health.consecutive_errors >= UNHEALTHY_THRESHOLD {
                    self.mark_unhealthy(now_ms);
                }
                Err(e)
            }
        }
    }

    fn mark_unhealthy(&mut self, now_ms: u64) {
        tracing::warn!(
            "MCP23017 0x{:02x} unhealthy after {} consecutive errors — recovery in {} ms",
            self.addr,
            self.health.consecutive_errors,
            RECOVERY_BACKOFF_INITIAL_MS
        );
        self.health.healthy = false;
        self.recovery_attempts = 0;
        self.backoff_ms = RECOVERY_BACKOFF_INITIAL_MS;
        self.next_recovery_ms = now_ms + self.backoff_ms;
    }

    fn attempt_recovery(&mut self, now_ms: u64) {
        match self.write_intent() {
            Ok(()) => {
                self.health.healthy = true;
                self.health.consecutive_errors = 0;
                self.health.recovery_count += 1;
                self.recovery_attempts = 0;
                self.backoff_ms = RECOVERY_BACKOFF_INITIAL_MS;
                tracing::info!(
                    "MCP23017 0x{:02x} recovered (recovery #{})",
                    self.addr,
                    self.health.recovery_count
                );
                if let Some(cb) = &self.recovery_cb {
                    cb(self.addr);
                }
            }
            Err(e) => {
                self.health.error_count += 1;
                self.health.last_error_ms = now_ms;
                self.recovery_attempts = self.recovery_attempts.saturating_add(1);
                if self.recovery_attempts < RECOVERY_MAX_ATTEMPTS {
                    self.backoff_ms = (self.backoff_ms * 2).min(RECOVERY_BACKOFF_MAX_MS);
                } else {
                    // Hold at the cap; the board may come back eventually.
                    self.backoff_ms = RECOVERY_BACKOFF_MAX_MS;
                }
                self.next_recovery_ms = now_ms + self.backoff_ms;
                tracing::warn!(
                    "MCP23017 0x{:02x} recovery attempt {} failed ({}) — next in {} ms",
                    self.addr,
                    self.recovery_attempts,
                    e,
                    self.backoff_ms
                );
            }
        }
    }

    /// Reinitialize direction / pull-up / latch registers from cached intent.
    fn write_intent(&mut self) -> Result<(), I2cError> {
        let pairs = [
            (REG_IODIRA, (self.iodir & 0xFF) as u8),
            (REG_IODIRB, (self.iodir >> 8) as u8),
            (REG_GPPUA, (self.gppu & 0xFF) as u8),
            (REG_GPPUB, (self.gppu >> 8) as u8),
            (REG_OLATA, (self.olat & 0xFF) as u8),
            (REG_OLATB, (self.olat >> 8) as u8),
        ];
        for (reg, value) in pairs {
            self.bus.write(self.addr, &[reg, value])?;
        }
        Ok(())
    }
}
