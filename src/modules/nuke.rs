/// Nuke module — launch buttons in, outgoing-nuke LEDs out.
///
/// A debounced press on the ATOM / HYDRO / MIRV buttons becomes an outbound
/// NUKE_LAUNCHED game event (the game assigns the unit id and echoes the
/// launch back). LED state is a pure function of the tracker's outgoing
/// counts: BLINK while count > 0, OFF at zero, so overlapping launches and
/// out-of-order resolutions can never strand an LED.
use super::{HardwareModule, ModuleContext, ModuleStatus};
use crate::events::{now_ms, EventKind, GameEvent, InternalEvent};
use crate::hw::led_engine::{LedCommand, LedEffect, LedTarget, DEFAULT_BLINK_RATE_MS};
use crate::hw::pins;
use crate::nuke_tracker::{Direction, NukeKind};
use crate::ws::protocol::build_event;
use anyhow::Result;

/// Hardware-test sweep duration.
const TEST_SWEEP_MS: u64 = 2_000;

const KINDS: [NukeKind; 3] = [NukeKind::Atom, NukeKind::Hydro, NukeKind::Mirv];

fn led_index(kind: NukeKind) -> u8 {
    match kind {
        NukeKind::Atom => 0,
        NukeKind::Hydro => 1,
        NukeKind::Mirv => 2,
        // Land/Naval have no outgoing LED; unreachable for this module.
        _ => 0,
    }
}

fn button_kind(button_index: u8) -> Option<NukeKind> {
    match button_index {
        pins::PIN_BTN_ATOM => Some(NukeKind::Atom),
        pins::PIN_BTN_HYDRO => Some(NukeKind::Hydro),
        pins::PIN_BTN_MIRV => Some(NukeKind::Mirv),
        _ => None,
    }
}

pub struct NukeModule {
    /// Last commanded effect per kind, to elide duplicate LED commands.
    last_effect: [Option<LedEffect>; 3],
    /// Hardware-test sweep suppresses count-sync until this time.
    test_until_ms: u64,
    launches_sent: u32,
    /// Mirrors the LED board's health, published by the engine task.
    board_ok: bool,
}

impl NukeModule {
    pub fn new() -> Self {
        Self { last_effect: [None; 3], test_until_ms: 0, launches_sent: 0, board_ok: true }
    }

    /// Re-derive every LED from the current counts.
    fn sync_leds(&mut self, ctx: &mut ModuleContext) {
        if ctx.now_ms < self.test_until_ms {
            return;
        }
        for kind in KINDS {
            let active = ctx.tracker.get_active_count(kind, Direction::Outgoing) > 0;
            let want = if active { LedEffect::Blink } else { LedEffect::Off };
            let idx = led_index(kind) as usize;
            if self.last_effect[idx] != Some(want) {
                let target = LedTarget::Nuke(led_index(kind));
                let cmd = match want {
                    LedEffect::Blink => LedCommand::blink(target, DEFAULT_BLINK_RATE_MS),
                    _ => LedCommand::off(target),
                };
                ctx.send_led(cmd);
                self.last_effect[idx] = Some(want);
            }
        }
    }

    fn post_launch(&mut self, kind: NukeKind, ctx: &mut ModuleContext) {
        let event = GameEvent::new(
            EventKind::NukeLaunched,
            now_ms(),
            format!("{} launch", kind.as_wire()),
            format!(r#"{{"type":"{}"}}"#, kind.as_wire()),
        );
        ctx.send_ws(build_event(&event));
        self.launches_sent += 1;
        tracing::info!("{} launch requested from panel", kind.as_wire());
    }
}

impl Default for NukeModule {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareModule for NukeModule {
    fn name(&self) -> &'static str {
        "nuke"
    }

    fn init(&mut self, ctx: &mut ModuleContext) -> Result<()> {
        // Known-dark starting point.
        for kind in KINDS {
            ctx.send_led(LedCommand::off(LedTarget::Nuke(led_index(kind))));
        }
        self.last_effect = [Some(LedEffect::Off); 3];
        Ok(())
    }

    fn update(&mut self, ctx: &mut ModuleContext) -> Result<()> {
        self.board_ok = ctx.flags.output_board_healthy();
        self.sync_leds(ctx);
        Ok(())
    }

    fn handle_event(&mut self, event: &InternalEvent, ctx: &mut ModuleContext) -> bool {
        match event.kind() {
            EventKind::ButtonPressed => {
                let Some(kind) = event.event.button_index().and_then(button_kind) else {
                    return false;
                };
                self.post_launch(kind, ctx);
                true
            }
            EventKind::NukeLaunched
            | EventKind::NukeExploded
            | EventKind::NukeIntercepted
            | EventKind::GameEnd => {
                // Tracker counts were updated before routing; re-sync now
                // rather than waiting for the next tick.
                self.sync_leds(ctx);
                true
            }
            EventKind::HardwareTest => {
                for kind in KINDS {
                    ctx.send_led(LedCommand::blink_timed(
                        LedTarget::Nuke(led_index(kind)),
                        200,
                        TEST_SWEEP_MS,
                    ));
                }
                self.test_until_ms = ctx.now_ms + TEST_SWEEP_MS;
                self.last_effect = [None; 3];
                true
            }
            _ => false,
        }
    }

    fn get_status(&self, out: &mut ModuleStatus) {
        out.operational = out.initialized && self.board_ok;
    }

    fn shutdown(&mut self, ctx: &mut ModuleContext) -> Result<()> {
        for kind in KINDS {
            ctx.send_led(LedCommand::off(LedTarget::Nuke(led_index(kind))));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventSource;
    use crate::nuke_tracker::Direction;
    use crate::testutil::{game_event, TestHarness};
    use serde_json::Value;

    fn module() -> (NukeModule, TestHarness) {
        let mut h = TestHarness::new();
        let mut m = NukeModule::new();
        h.with_ctx(|ctx| m.init(ctx)).unwrap();
        h.drain_leds();
        (m, h)
    }

    fn button_event(index: u8) -> InternalEvent {
        InternalEvent::new(
            GameEvent::new(
                EventKind::ButtonPressed,
                0,
                String::new(),
                format!(r#"{{"buttonIndex":{}}}"#, index),
            ),
            EventSource::Button,
        )
    }

    #[test]
    fn button_press_broadcasts_a_launch() {
        let (mut m, mut h) = module();
        h.with_ctx(|ctx| m.handle_event(&button_event(pins::PIN_BTN_HYDRO), ctx));

        let frames = h.drain_ws();
        assert_eq!(frames.len(), 1);
        let v: Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(v["type"], "event");
        assert_eq!(v["payload"]["type"], "NUKE_LAUNCHED");
        assert_eq!(v["payload"]["data"]["type"], "Hydro");
    }

    #[test]
    fn unmapped_button_is_ignored() {
        let (mut m, mut h) = module();
        let consumed = h.with_ctx(|ctx| m.handle_event(&button_event(6), ctx));
        assert!(!consumed);
        assert!(h.drain_ws().is_empty());
    }

    #[test]
    fn led_blinks_while_outgoing_and_stops_at_zero() {
        let (mut m, mut h) = module();
        h.tracker.apply(&game_event(EventKind::NukeLaunched, r#"{"nukeUnitID":10,"type":"Atom"}"#), 0);
        let ev = game_event(EventKind::NukeLaunched, r#"{"nukeUnitID":10,"type":"Atom"}"#);
        h.with_ctx(|ctx| m.handle_event(&ev, ctx));

        let cmds = h.drain_leds();
        assert!(cmds
            .iter()
            .any(|c| c.target == LedTarget::Nuke(0) && c.effect == LedEffect::Blink));

        // Resolution drops the count to zero → OFF.
        h.tracker.resolve(10, true, 100);
        let ev = game_event(EventKind::NukeExploded, r#"{"unitID":10}"#);
        h.with_ctx(|ctx| m.handle_event(&ev, ctx));
        let cmds = h.drain_leds();
        assert!(cmds
            .iter()
            .any(|c| c.target == LedTarget::Nuke(0) && c.effect == LedEffect::Off));
    }

    #[test]
    fn steady_count_sends_no_duplicate_commands() {
        let (mut m, mut h) = module();
        h.tracker.register_launch(1, NukeKind::Mirv, Direction::Outgoing, 0);
        h.with_ctx(|ctx| m.update(ctx)).unwrap();
        assert_eq!(h.drain_leds().len(), 1);

        for _ in 0..10 {
            h.with_ctx(|ctx| m.update(ctx)).unwrap();
        }
        assert!(h.drain_leds().is_empty());
    }

    #[test]
    fn hardware_test_sweeps_then_resyncs() {
        let (mut m, mut h) = module();
        let ev = InternalEvent::simple(EventKind::HardwareTest, EventSource::WebSocket);
        h.with_ctx(|ctx| m.handle_event(&ev, ctx));
        let cmds = h.drain_leds();
        assert_eq!(cmds.len(), 3);
        assert!(cmds.iter().all(|c| c.effect == LedEffect::BlinkTimed));

        // During the sweep, count-sync stays quiet.
        h.now_ms = 1_000;
        h.with_ctx(|ctx| m.update(ctx)).unwrap();
        assert!(h.drain_leds().is_empty());

        // After the sweep the LEDs re-derive from counts.
        h.now_ms = 2_500;
        h.with_ctx(|ctx| m.update(ctx)).unwrap();
        assert_eq!(h.drain_leds().len(), 3);
    }
}
