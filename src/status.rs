/// RGB status indicator — one onboard LED summarizing the whole console.
///
/// Derivation, highest priority first:
///   any module in error        red, fast blink
///   no network                 off
///   network, no userscript     yellow
///   userscript, not in game    purple
///   in game                    green
///
/// Registered as a wildcard dispatcher subscriber so every event that could
/// change the inputs refreshes the LED; the physical write is elided while
/// the derived state is unchanged.
use crate::dispatcher::Subscriber;
use crate::events::InternalEvent;
use crate::game_state::GamePhase;
use crate::modules::ModuleContext;

const ERROR_BLINK_MS: u64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RgbColor {
    Off,
    Red,
    Yellow,
    Purple,
    Green,
}

/// Derived LED state: color plus an optional blink period.
pub type RgbState = (RgbColor, Option<u64>);

pub fn derive(error: bool, network_up: bool, userscript: bool, phase: GamePhase) -> RgbState {
    if error {
        (RgbColor::Red, Some(ERROR_BLINK_MS))
    } else if !network_up {
        (RgbColor::Off, None)
    } else if !userscript {
        (RgbColor::Yellow, None)
    } else if phase == GamePhase::InGame {
        (RgbColor::Green, None)
    } else {
        (RgbColor::Purple, None)
    }
}

pub trait RgbLed: Send {
    fn set(&mut self, color: RgbColor, blink_ms: Option<u64>);
}

/// Default driver on a board without the RGB package stuffed: log edges.
pub struct LogRgbLed;

impl RgbLed for LogRgbLed {
    fn set(&mut self, color: RgbColor, blink_ms: Option<u64>) {
        match blink_ms {
            Some(ms) => tracing::info!("Status LED → {:?} (blink {} ms)", color, ms),
            None => tracing::info!("Status LED → {:?}", color),
        }
    }
}

pub struct StatusIndicator {
    led: Box<dyn RgbLed>,
    last: Option<RgbState>,
}

impl StatusIndicator {
    pub fn new(led: Box<dyn RgbLed>) -> Self {
        Self { led, last: None }
    }

    #[cfg(test)]
    pub fn last_state(&self) -> Option<RgbState> {
        self.last
    }
}

impl Subscriber for StatusIndicator {
    fn name(&self) -> &'static str {
        "status_rgb"
    }

    fn on_event(&mut self, _event: &InternalEvent, ctx: &mut ModuleContext) -> bool {
        let state = derive(
            ctx.any_module_error,
            ctx.flags.network_up(),
            ctx.flags.userscript_connected(),
            ctx.phase,
        );
        if self.last != Some(state) {
            self.led.set(state.0, state.1);
            self.last = Some(state);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_priority_order() {
        // Error wins over everything.
        assert_eq!(
            derive(true, true, true, GamePhase::InGame),
            (RgbColor::Red, Some(200))
        );
        assert_eq!(derive(false, false, false, GamePhase::Lobby), (RgbColor::Off, None));
        assert_eq!(derive(false, true, false, GamePhase::Lobby), (RgbColor::Yellow, None));
        assert_eq!(derive(false, true, true, GamePhase::Lobby), (RgbColor::Purple, None));
        assert_eq!(derive(false, true, true, GamePhase::Won), (RgbColor::Purple, None));
        assert_eq!(derive(false, true, true, GamePhase::InGame), (RgbColor::Green, None));
    }

    #[test]
    fn indicator_elides_repeat_states() {
        use crate::events::{EventKind, EventSource};
        use crate::testutil::TestHarness;
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        struct CountingLed(Arc<AtomicU32>);
        impl RgbLed for CountingLed {
            fn set(&mut self, _c: RgbColor, _b: Option<u64>) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let sets = Arc::new(AtomicU32::new(0));
        let mut ind = StatusIndicator::new(Box::new(CountingLed(sets.clone())));
        let mut h = TestHarness::new();
        h.flags.set_network_up(true);

        let ev = InternalEvent::simple(EventKind::Info, EventSource::System);
        for _ in 0..5 {
            h.with_ctx(|ctx| ind.on_event(&ev, ctx));
        }
        assert_eq!(sets.load(Ordering::SeqCst), 1);
        assert_eq!(ind.last_state(), Some((RgbColor::Yellow, None)));

        // Userscript shows up → one more write.
        h.flags.add_userscript();
        h.with_ctx(|ctx| ind.on_event(&ev, ctx));
        assert_eq!(sets.load(Ordering::SeqCst), 2);
        assert_eq!(ind.last_state(), Some((RgbColor::Purple, None)));
    }
}
