/// Alert module — incoming-attack LEDs on the output expander.
///
/// Every LED is a pure function of the tracker's incoming counts: the
/// kind-specific LED is ON while its count > 0, and the WARNING LED is ON
/// while anything incoming is in flight. ATOM / HYDRO / MIRV counts drop on
/// explicit NUKE_EXPLODED / NUKE_INTERCEPTED resolutions; LAND and NAVAL
/// have no resolution events on the game side and age out of the tracker
/// after 15 s instead. No other timers exist here.
use super::{HardwareModule, ModuleContext, ModuleStatus};
use crate::events::{EventKind, InternalEvent};
use crate::hw::led_engine::{LedCommand, LedTarget};
use crate::nuke_tracker::{Direction, NukeKind};
use anyhow::Result;

const TEST_SWEEP_MS: u64 = 2_000;

/// (kind, alert-LED index); WARNING is index 0.
const ALERT_LEDS: [(NukeKind, u8); 5] = [
    (NukeKind::Atom, 1),
    (NukeKind::Hydro, 2),
    (NukeKind::Mirv, 3),
    (NukeKind::Land, 4),
    (NukeKind::Naval, 5),
];

pub struct AlertModule {
    /// Last commanded level per alert index 0..=5 (0 = WARNING).
    last_on: [Option<bool>; 6],
    test_until_ms: u64,
    /// Mirrors the LED board's health, published by the engine task.
    board_ok: bool,
}

impl AlertModule {
    pub fn new() -> Self {
        Self { last_on: [None; 6], test_until_ms: 0, board_ok: true }
    }

    fn set_led(&mut self, ctx: &mut ModuleContext, index: u8, on: bool) {
        if self.last_on[index as usize] == Some(on) {
            return;
        }
        let target = LedTarget::Alert(index);
        let cmd = if on { LedCommand::on(target) } else { LedCommand::off(target) };
        ctx.send_led(cmd);
        self.last_on[index as usize] = Some(on);
    }

    /// Re-derive all six LEDs from the tracker counts.
    fn sync_leds(&mut self, ctx: &mut ModuleContext) {
        if ctx.now_ms < self.test_until_ms {
            return;
        }
        for (kind, index) in ALERT_LEDS {
            let on = ctx.tracker.get_active_count(kind, Direction::Incoming) > 0;
            self.set_led(ctx, index, on);
        }
        let warning = ctx.tracker.any_incoming();
        self.set_led(ctx, 0, warning);
    }
}

impl Default for AlertModule {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareModule for AlertModule {
    fn name(&self) -> &'static str {
        "alert"
    }

    fn init(&mut self, ctx: &mut ModuleContext) -> Result<()> {
        for index in 0..6 {
            ctx.send_led(LedCommand::off(LedTarget::Alert(index)));
        }
        self.last_on = [Some(false); 6];
        Ok(())
    }

    fn update(&mut self, ctx: &mut ModuleContext) -> Result<()> {
        self.board_ok = ctx.flags.output_board_healthy();
        // Covers LAND/NAVAL expiry between events.
        self.sync_leds(ctx);
        Ok(())
    }

    fn handle_event(&mut self, event: &InternalEvent, ctx: &mut ModuleContext) -> bool {
        match event.kind() {
            EventKind::AlertAtom
            | EventKind::AlertHydro
            | EventKind::AlertMirv
            | EventKind::AlertLand
            | EventKind::AlertNaval
            | EventKind::NukeExploded
            | EventKind::NukeIntercepted
            | EventKind::GameEnd => {
                self.sync_leds(ctx);
                true
            }
            EventKind::HardwareTest => {
                for index in 0..6 {
                    ctx.send_led(LedCommand::blink_timed(LedTarget::Alert(index), 200, TEST_SWEEP_MS));
                }
                self.test_until_ms = ctx.now_ms + TEST_SWEEP_MS;
                self.last_on = [None; 6];
                true
            }
            _ => false,
        }
    }

    fn get_status(&self, out: &mut ModuleStatus) {
        out.operational = out.initialized && self.board_ok;
    }

    fn shutdown(&mut self, ctx: &mut ModuleContext) -> Result<()> {
        for index in 0..6 {
            ctx.send_led(LedCommand::off(LedTarget::Alert(index)));
        }
        Ok(())
    }
}
