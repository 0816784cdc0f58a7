/// System status module — owns the 16×2 LCD in every phase except IN_GAME.
///
/// Screen arbitration, checked in order on every update tick:
///   1. captive portal        "   Setup WiFi   " / "  Read Manual   "
///   2. WS server not up yet  boot splash stays (dirty NOT cleared)
///   3. no userscript         " Waiting for    " / " Connection" + scan
///   4. game-end latch        "   VICTORY!     " or "    DEFEAT      "
///   5. phase screens         lobby / spawning; IN_GAME yields the LCD
///
/// The scan animation is a single dot walking the last 3 columns of line 2
/// (frames ".  ", " . ", "  .", " . " at 250 ms). A line is physically
/// written only when the rendered text differs from the last rendered text,
/// so a static screen costs zero bus traffic.
use super::{HardwareModule, ModuleContext, ModuleStatus};
use crate::events::{EventKind, InternalEvent};
use crate::game_state::GamePhase;
use anyhow::Result;

/// Boot splash minimum hold.
const BOOT_SPLASH_MS: u64 = 1_200;
const ANIMATION_INTERVAL_MS: u64 = 250;
/// Dot positions over the last 3 columns; frame 3 walks back through center.
const SCAN_FRAMES: [&str; 4] = [".  ", " . ", "  .", " . "];

const LINE_SPLASH_1: &str = "  OTS Firmware  ";
const LINE_SPLASH_2: &str = "  Booting...    ";
const LINE_PORTAL_1: &str = "   Setup WiFi   ";
const LINE_PORTAL_2: &str = "  Read Manual   ";
const LINE_WAITING_1: &str = " Waiting for    ";
const LINE_LOBBY_1: &str = " Connected!     ";
const LINE_SPAWNING_1: &str = "   Spawning...  ";
const LINE_SPAWNING_2: &str = " Get Ready!     ";
const LINE_VICTORY: &str = "   VICTORY!     ";
const LINE_DEFEAT: &str = "    DEFEAT      ";
const LINE_GOOD_GAME: &str = " Good Game!     ";

pub struct SystemStatusModule {
    boot_hold_until_ms: u64,
    ws_connected: bool,
    display_active: bool,
    display_dirty: bool,
    show_game_end: bool,
    player_won: bool,
    animation_frame: u8,
    animation_last_ms: u64,
    last_line1: String,
    last_line2: String,
    lcd_available: bool,
    lcd_errors: u32,
}

impl SystemStatusModule {
    pub fn new() -> Self {
        Self {
            boot_hold_until_ms: 0,
            ws_connected: false,
            display_active: true,
            display_dirty: true,
            show_game_end: false,
            player_won: false,
            animation_frame: 0,
            animation_last_ms: 0,
            last_line1: String::new(),
            last_line2: String::new(),
            lcd_available: false,
            lcd_errors: 0,
        }
    }

    /// 13-char base + 3-char animation suffix = one 16-char line.
    fn animated_line(&self, base: &str) -> String {
        format!("{:<13}{}", base, SCAN_FRAMES[self.animation_frame as usize % 4])
    }

    fn reset_animation(&mut self, now: u64) {
        self.animation_frame = 0;
        self.animation_last_ms = now;
    }

    /// Write both lines, eliding unchanged ones. A failed write keeps the
    /// cache stale so the next tick retries naturally.
    fn render(&mut self, ctx: &mut ModuleContext, line1: &str, line2: &str) {
        if self.display_dirty {
            self.last_line1.clear();
            self.last_line2.clear();
            self.display_dirty = false;
        }
        let Some(lcd) = ctx.lcd.as_deref_mut() else {
            return;
        };
        if line1 != self.last_line1 {
            match lcd.write_line(0, line1) {
                Ok(()) => self.last_line1 = line1.to_owned(),
                Err(e) => {
                    self.lcd_errors += 1;
                    tracing::warn!("LCD line 1 write failed: {}", e);
                }
            }
        }
        if line2 != self.last_line2 {
            match lcd.write_line(1, line2) {
                Ok(()) => self.last_line2 = line2.to_owned(),
                Err(e) => {
                    self.lcd_errors += 1;
                    tracing::warn!("LCD line 2 write failed: {}", e);
                }
            }
        }
    }
}

impl Default for SystemStatusModule {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareModule for SystemStatusModule {
    fn name(&self) -> &'static str {
        "system_status"
    }

    fn init(&mut self, ctx: &mut ModuleContext) -> Result<()> {
        self.lcd_available = ctx.lcd.is_some();
        self.boot_hold_until_ms = ctx.now_ms + BOOT_SPLASH_MS;
        self.display_active = true;
        self.display_dirty = true;
        ctx.flags.set_status_display_active(true);
        self.render(ctx, LINE_SPLASH_1, LINE_SPLASH_2);
        Ok(())
    }

    fn update(&mut self, ctx: &mut ModuleContext) -> Result<()> {
        let now = ctx.now_ms;

        // Animations only tick while this module is showing something.
        if self.display_active
            && now.saturating_sub(self.animation_last_ms) >= ANIMATION_INTERVAL_MS
        {
            self.animation_frame = (self.animation_frame + 1) % 4;
            self.animation_last_ms = now;
        }

        // 1. Captive portal outranks everything.
        if ctx.flags.portal_mode() {
            self.display_active = true;
            ctx.flags.set_status_display_active(true);
            self.render(ctx, LINE_PORTAL_1, LINE_PORTAL_2);
            return Ok(());
        }

        // 2. Boot: hold the splash until the server listens (and at least
        //    the minimum splash time). Dirty is left set on purpose.
        if now < self.boot_hold_until_ms || !ctx.flags.server_listening() {
            self.display_active = true;
            ctx.flags.set_status_display_active(true);
            let dirty = self.display_dirty;
            self.render(ctx, LINE_SPLASH_1, LINE_SPLASH_2);
            self.display_dirty = dirty;
            return Ok(());
        }

        // 3. No userscript → waiting screen with the scan animation.
        if !self.ws_connected {
            self.display_active = true;
            ctx.flags.set_status_display_active(true);
            let line2 = self.animated_line(" Connection");
            self.render(ctx, LINE_WAITING_1, &line2);
            return Ok(());
        }

        // 4. Latched game-end screen.
        if self.show_game_end {
            self.display_active = true;
            ctx.flags.set_status_display_active(true);
            let line1 = if self.player_won { LINE_VICTORY } else { LINE_DEFEAT };
            self.render(ctx, line1, LINE_GOOD_GAME);
            return Ok(());
        }

        // 5. Phase screens.
        match ctx.phase {
            GamePhase::Lobby | GamePhase::Ended => {
                self.display_active = true;
                ctx.flags.set_status_display_active(true);
                let line2 = self.animated_line(" Waiting Game");
                self.render(ctx, LINE_LOBBY_1, &line2);
            }
            GamePhase::Spawning => {
                self.display_active = true;
                ctx.flags.set_status_display_active(true);
                self.render(ctx, LINE_SPAWNING_1, LINE_SPAWNING_2);
            }
            GamePhase::InGame => {
                // Yield the LCD to the troops module.
                if self.display_active {
                    tracing::debug!("SystemStatus yielding LCD for game");
                }
                self.display_active = false;
                ctx.flags.set_status_display_active(false);
            }
            GamePhase::Won | GamePhase::Lost => {
                self.show_game_end = true;
                self.player_won = ctx.phase == GamePhase::Won;
                self.display_active = true;
                self.display_dirty = true;
                ctx.flags.set_status_display_active(true);
            }
        }
        Ok(())
    }

    fn handle_event(&mut self, event: &InternalEvent, ctx: &mut ModuleContext) -> bool {
        let now = ctx.now_ms;
        match event.kind() {
            EventKind::WsConnected => {
                self.ws_connected = true;
                self.display_active = true;
                self.display_dirty = true;
                self.show_game_end = false;
                self.reset_animation(now);
                true
            }
            EventKind::WsDisconnected => {
                self.ws_connected = false;
                self.display_active = true;
                self.display_dirty = true;
                self.show_game_end = false;
                self.reset_animation(now);
                true
            }
            EventKind::GameStart => {
                self.display_active = false;
                ctx.flags.set_status_display_active(false);
                true
            }
            EventKind::GameSpawning => {
                self.display_active = true;
                self.display_dirty = true;
                true
            }
            EventKind::GameEnd => {
                match event.event.victory() {
                    Some(won) => {
                        self.show_game_end = true;
                        self.player_won = won;
                    }
                    // No verdict — back to the lobby screen on next render.
                    None => self.show_game_end = false,
                }
                self.display_active = true;
                self.display_dirty = true;
                true
            }
            _ => false,
        }
    }

    fn get_status(&self, out: &mut ModuleStatus) {
        out.operational = self.lcd_available;
        out.error_count += self.lcd_errors;
    }

    fn shutdown(&mut self, ctx: &mut ModuleContext) -> Result<()> {
        if let Some(lcd) = ctx.lcd.as_deref_mut() {
            let _ = lcd.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
impl SystemStatusModule {
    fn lines(&self) -> (&str, &str) {
        (&self.last_line1, &self.last_line2)
    }
}
