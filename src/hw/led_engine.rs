/// LED effect engine — single consumer of a bounded command queue, driving
/// the output expander (board 1).
///
/// Each LED keeps one record `{effect, phase_start, blink_rate, deadline}`;
/// a new command replaces the record atomically. The level law is a pure
/// function of the record and `now_ms`:
///
///   OFF         low
///   ON          high
///   BLINK       ((now − phase_start) / rate) even → low, odd → high
///   BLINK_TIMED as BLINK until `now ≥ deadline`, then OFF
///
/// The engine ticks at 20 ms and writes a pin only when its computed level
/// changed, so a steady ON costs one bus write, not fifty per second. The
/// board's health servicing (recovery, 10 s IODIR check) rides on the same
/// tick.
use super::mcp23017::Mcp23017;
use super::pins;
use crate::events::now_ms;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

pub const LED_QUEUE_CAPACITY: usize = 16;
pub const DEFAULT_BLINK_RATE_MS: u64 = 500;
const TICK_MS: u64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedEffect {
    Off,
    On,
    Blink,
    BlinkTimed,
}

/// Logical LED identity; resolved to a board-1 pin at the engine boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedTarget {
    /// Outgoing-nuke LEDs by kind index: 0 Atom, 1 Hydro, 2 MIRV.
    Nuke(u8),
    /// Alert LEDs: 0 WARNING, 1 Atom, 2 Hydro, 3 MIRV, 4 Land, 5 Naval.
    Alert(u8),
    Link,
}

impl LedTarget {
    pub fn pin(&self) -> u8 {
        match self {
            Self::Nuke(i) => pins::PIN_LED_NUKE_ATOM + (i & 0x03),
            Self::Alert(i) => pins::PIN_LED_WARNING + (i % 6),
            Self::Link => pins::PIN_LED_LINK,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LedCommand {
    pub target: LedTarget,
    pub effect: LedEffect,
    pub blink_rate_ms: u64,
    pub duration_ms: u64,
}

impl LedCommand {
    pub fn off(target: LedTarget) -> Self {
        Self { target, effect: LedEffect::Off, blink_rate_ms: DEFAULT_BLINK_RATE_MS, duration_ms: 0 }
    }

    pub fn on(target: LedTarget) -> Self {
        Self { target, effect: LedEffect::On, blink_rate_ms: DEFAULT_BLINK_RATE_MS, duration_ms: 0 }
    }

    pub fn blink(target: LedTarget, blink_rate_ms: u64) -> Self {
        Self { target, effect: LedEffect::Blink, blink_rate_ms, duration_ms: 0 }
    }

    pub fn blink_timed(target: LedTarget, blink_rate_ms: u64, duration_ms: u64) -> Self {
        Self { target, effect: LedEffect::BlinkTimed, blink_rate_ms, duration_ms }
    }
}

#[derive(Debug, Clone, Copy)]
struct LedRecord {
    effect: LedEffect,
    phase_start_ms: u64,
    blink_rate_ms: u64,
    off_deadline_ms: u64,
}

impl LedRecord {
    fn from_command(cmd: &LedCommand, now: u64) -> Self {
        Self {
            effect: cmd.effect,
            phase_start_ms: now,
            blink_rate_ms: cmd.blink_rate_ms.max(1),
            off_deadline_ms: now + cmd.duration_ms,
        }
    }

    /// The pure level law described in the module header.
    fn level_at(&self, now: u64) -> bool {
        match self.effect {
            LedEffect::Off => false,
            LedEffect::On => true,
            LedEffect::Blink => self.blink_phase(now),
            LedEffect::BlinkTimed => {
                if now >= self.off_deadline_ms {
                    false
                } else {
                    self.blink_phase(now)
                }
            }
        }
    }

    fn blink_phase(&self, now: u64) -> bool {
        (now.saturating_sub(self.phase_start_ms) / self.blink_rate_ms) % 2 == 1
    }

    /// Timed blinks collapse to OFF once expired so the record stops
    /// needing per-tick evaluation.
    fn settle(&mut self, now: u64) {
        if self.effect == LedEffect::BlinkTimed && now >= self.off_deadline_ms {
            self.effect = LedEffect::Off;
        }
    }
}

// ---------------------------------------------------------------------------
// Engine task
// ---------------------------------------------------------------------------

pub async fn run(
    mut board: Mcp23017,
    mut rx: mpsc::Receiver<LedCommand>,
    flags: std::sync::Arc<crate::SystemFlags>,
) {
    tracing::info!("LED engine starting on expander 0x{:02x}", board.addr());
    let mut records: HashMap<u8, LedRecord> = HashMap::new();
    let mut levels: HashMap<u8, bool> = HashMap::new();
    let mut tick = tokio::time::interval(Duration::from_millis(TICK_MS));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            cmd = rx.recv() => {
                let Some(cmd) = cmd else {
                    tracing::info!("LED command queue closed — engine stopping");
                    return;
                };
                let now = now_ms();
                records.insert(cmd.target.pin(), LedRecord::from_command(&cmd, now));
            }
            _ = tick.tick() => {
                let now = now_ms();
                service_tick(&mut board, &mut records, &mut levels, now);
                flags.set_output_board_healthy(board.is_healthy());
            }
        }
    }
}

/// One engine tick: settle expired records, drive changed levels, service
/// board health. Split out of the task loop for deterministic tests.
fn service_tick(
    board: &mut Mcp23017,
    records: &mut HashMap<u8, LedRecord>,
    levels: &mut HashMap<u8, bool>,
    now: u64,
) {
    for (&pin, rec) in records.iter_mut() {
        rec.settle(now);
        let want = rec.level_at(now);
        let have = levels.get(&pin).copied().unwrap_or(false);
        if want != have {
            match board.write_pin(pin, want, now) {
                Ok(()) => {
                    levels.insert(pin, want);
                }
                Err(e) => {
                    // Leave `levels` untouched — the write is retried next
                    // tick once the board recovers.
                    tracing::debug!("LED pin {} write failed: {}", pin, e);
                }
            }
        }
    }
    board.service(now);
}
