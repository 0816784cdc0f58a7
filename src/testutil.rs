/// Shared test fixtures: a harness that owns every capability a
/// `ModuleContext` borrows, so module and dispatcher tests can drive the
/// system synchronously with a scripted clock.
use crate::can::CanRequest;
use crate::events::{EventKind, EventSource, GameEvent, InternalEvent};
use crate::game_state::GamePhase;
use crate::hw::adc_registry::AdcRegistry;
use crate::hw::i2c::{MockI2c, SharedI2c, ADDR_LCD};
use crate::hw::lcd::Lcd;
use crate::hw::led_engine::LedCommand;
use crate::modules::ModuleContext;
use crate::nuke_tracker::NukeTracker;
use crate::SystemFlags;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

pub struct TestHarness {
    pub tracker: NukeTracker,
    pub adc: AdcRegistry,
    pub leds_tx: mpsc::Sender<LedCommand>,
    leds_rx: mpsc::Receiver<LedCommand>,
    pub out_tx: broadcast::Sender<String>,
    out_rx: broadcast::Receiver<String>,
    pub sound_tx: mpsc::Sender<CanRequest>,
    sound_rx: mpsc::Receiver<CanRequest>,
    pub flags: Arc<SystemFlags>,
    pub phase: GamePhase,
    pub now_ms: u64,
    pub lcd: Option<Lcd>,
    pub lcd_mock: MockI2c,
    pub any_module_error: bool,
}

impl TestHarness {
    pub fn new() -> Self {
        // Generous queues so a test never silently drops.
        let (leds_tx, leds_rx) = mpsc::channel(256);
        let (out_tx, out_rx) = broadcast::channel(256);
        let (sound_tx, sound_rx) = mpsc::channel(256);
        let lcd_mock = MockI2c::new();
        let bus = SharedI2c::new(Box::new(lcd_mock.clone()));
        let lcd = Lcd::init(bus, ADDR_LCD).ok();
        Self {
            tracker: NukeTracker::new(),
            adc: AdcRegistry::new(),
            leds_tx,
            leds_rx,
            out_tx,
            out_rx,
            sound_tx,
            sound_rx,
            flags: Arc::new(SystemFlags::new()),
            phase: GamePhase::Lobby,
            now_ms: 0,
            lcd,
            lcd_mock,
            any_module_error: false,
        }
    }

    /// Borrow everything into a `ModuleContext` for one call.
    pub fn with_ctx<T>(&mut self, f: impl FnOnce(&mut ModuleContext) -> T) -> T {
        let mut ctx = ModuleContext {
            now_ms: self.now_ms,
            phase: self.phase,
            tracker: &self.tracker,
            adc: &self.adc,
            leds: &self.leds_tx,
            outbound: &self.out_tx,
            sound: &self.sound_tx,
            lcd: self.lcd.as_mut(),
            flags: self.flags.as_ref(),
            any_module_error: self.any_module_error,
        };
        f(&mut ctx)
    }

    pub fn drain_leds(&mut self) -> Vec<LedCommand> {
        let mut out = Vec::new();
        while let Ok(cmd) = self.leds_rx.try_recv() {
            out.push(cmd);
        }
        out
    }

    pub fn drain_ws(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(text) = self.out_rx.try_recv() {
            out.push(text);
        }
        out
    }

    pub fn drain_sound(&mut self) -> Vec<CanRequest> {
        let mut out = Vec::new();
        while let Ok(req) = self.sound_rx.try_recv() {
            out.push(req);
        }
        out
    }
}

/// A wire-shaped game event with a JSON data payload.
pub fn game_event(kind: EventKind, data: &str) -> InternalEvent {
    InternalEvent::new(
        GameEvent::new(kind, 0, String::new(), data.to_owned()),
        EventSource::WebSocket,
    )
}

pub fn simple_event(kind: EventKind, source: EventSource) -> InternalEvent {
    InternalEvent::simple(kind, source)
}
