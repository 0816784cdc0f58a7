/// Troops module — slider input and the in-game LCD screen.
///
/// Owns the LCD only while the system-status module has yielded it AND the
/// phase is IN_GAME. Shows "current / max" (right-aligned, K/M/B scaled) on
/// line 1 and "P% (calc)" on line 2, where calc is the troop count the
/// current slider position commits.
///
/// Slider policy: the ADC registry is polled on every update; a
/// `set-troops-percent` command goes out only when the quantized percent
/// moved ≥ 1 point since the last send. Two stable reads send nothing.
use super::{HardwareModule, ModuleContext, ModuleStatus};
use crate::events::{EventKind, InternalEvent};
use crate::game_state::GamePhase;
use crate::hw::adc_registry::AdcChannelId;
use crate::ws::protocol::build_troops_percent;
use anyhow::Result;

/// Minimum percent movement before a new command is broadcast.
const SEND_THRESHOLD_PERCENT: u8 = 1;

pub struct TroopsModule {
    current_troops: u64,
    max_troops: u64,
    slider_percent: u8,
    last_sent_percent: Option<u8>,
    display_dirty: bool,
    last_line1: String,
    last_line2: String,
}

impl TroopsModule {
    pub fn new() -> Self {
        Self {
            current_troops: 0,
            max_troops: 0,
            slider_percent: 0,
            last_sent_percent: None,
            display_dirty: true,
            last_line1: String::new(),
            last_line2: String::new(),
        }
    }

    fn owns_lcd(&self, ctx: &ModuleContext) -> bool {
        ctx.phase == GamePhase::InGame && !ctx.flags.status_display_active()
    }

    fn render(&mut self, ctx: &mut ModuleContext) {
        let committed = (self.slider_percent as u64 * self.current_troops) / 100;
        let line1 = format!(
            "{:>16}",
            format!("{} / {}", scale(self.current_troops), scale(self.max_troops))
        );
        let line2 = format!(
            "{:<16}",
            format!("{}% ({})", self.slider_percent, scale(committed))
        );

        if self.display_dirty {
            self.last_line1.clear();
            self.last_line2.clear();
            self.display_dirty = false;
        }
        let Some(lcd) = ctx.lcd.as_deref_mut() else {
            return;
        };
        if line1 != self.last_line1 {
            match lcd.write_line(0, &line1) {
                Ok(()) => self.last_line1 = line1,
                Err(e) => tracing::warn!("Troops LCD line 1 failed: {}", e),
            }
        }
        if line2 != self.last_line2 {
            match lcd.write_line(1, &line2) {
                Ok(()) => self.last_line2 = line2,
                Err(e) => tracing::warn!("Troops LCD line 2 failed: {}", e),
            }
        }
    }
}

impl Default for TroopsModule {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareModule for TroopsModule {
    fn name(&self) -> &'static str {
        "troops"
    }

    fn init(&mut self, _ctx: &mut ModuleContext) -> Result<()> {
        Ok(())
    }

    fn update(&mut self, ctx: &mut ModuleContext) -> Result<()> {
        if let Some(reading) = ctx.adc.get_value(AdcChannelId::TroopsSlider) {
            self.slider_percent = reading.percent;
        }

        if ctx.phase == GamePhase::InGame {
            let moved = match self.last_sent_percent {
                Some(last) => self.slider_percent.abs_diff(last) >= SEND_THRESHOLD_PERCENT,
                None => true,
            };
            if moved {
                ctx.send_ws(build_troops_percent(self.slider_percent));
                self.last_sent_percent = Some(self.slider_percent);
                tracing::debug!("Slider → {}%", self.slider_percent);
            }
        }

        if self.owns_lcd(ctx) {
            self.render(ctx);
        }
        Ok(())
    }

    fn handle_event(&mut self, event: &InternalEvent, _ctx: &mut ModuleContext) -> bool {
        match event.kind() {
            EventKind::TroopUpdate => {
                if let Some((current, max)) = event.event.troops() {
                    self.current_troops = current;
                    self.max_troops = max;
                    self.display_dirty = true;
                } else {
                    tracing::warn!("TROOP_UPDATE without troop counts");
                }
                true
            }
            EventKind::GameStart => {
                // Take the LCD: force a full redraw of our screen.
                self.display_dirty = true;
                self.last_sent_percent = None;
                true
            }
            EventKind::GameEnd | EventKind::WsDisconnected => {
                // Release the LCD; the status module owns it again.
                self.display_dirty = true;
                true
            }
            _ => false,
        }
    }

    fn get_status(&self, out: &mut ModuleStatus) {
        out.operational = out.initialized;
    }

    fn shutdown(&mut self, _ctx: &mut ModuleContext) -> Result<()> {
        Ok(())
    }
}

/// Human scaling with K/M/B suffixes; one decimal when the scaled value is
/// below 10 and the decimal is meaningful ("1.1M", "120K", "999").
fn scale(n: u64) -> String {
    const STEPS: [(u64, &str); 3] = [(1_000_000_000, "B"), (1_000_000, "M"), (1_000, "K")];
    for (divisor, suffix) in STEPS {
        if n >= divisor {
            let whole = n / divisor;
            let tenth = (n % divisor) * 10 / divisor;
            return if whole < 10 && tenth != 0 {
                format!("{}.{}{}", whole, tenth, suffix)
            } else {
                format!("{}{}", whole, suffix)
            };
        }
    }
    n.to_string()
}
