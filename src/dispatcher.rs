/// Event dispatcher — the single point of delivery for every event in the
/// system, and the task that owns all mutable game state.
///
/// Producers (WS server, I/O task, modules) hold a cheap `DispatcherHandle`
/// and post without blocking; the consumer drains the bounded queue in FIFO
/// order. Per event, delivery runs in a fixed order:
///
///   1. game-phase state machine        (handlers see the updated phase)
///   2. nuke tracker                    (handlers see the updated counts)
///   3. module routing                  (every module, never short-circuits)
///   4. registry subscribers            (kind-specific first, then wildcard,
///                                       in registration order; returning
///                                       `true` stops the rest)
///
/// The same task drives the 20 ms module update tick and the 1 s
/// housekeeping sweep (LAND/NAVAL expiry), so modules never need locks.
///
/// Backpressure: a full queue drops the event with an ERROR log and a
/// counter bump. Inbound INFO heartbeats from the WebSocket are dropped
/// before they ever reach the queue.
use crate::can::CanRequest;
use crate::events::{now_ms, EventKind, EventSource, GameEvent, InternalEvent};
use crate::game_state::GameState;
use crate::hw::adc_registry::AdcRegistry;
use crate::hw::lcd::Lcd;
use crate::hw::led_engine::LedCommand;
use crate::modules::{ModuleContext, ModuleManager};
use crate::nuke_tracker::NukeTracker;
use crate::SystemFlags;
use serde_json::json;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};

pub const EVENT_QUEUE_CAPACITY: usize = 64;
const MODULE_TICK_MS: u64 = 20;
const HOUSEKEEPING_MS: u64 = 1_000;
/// Outbound keepalive ping cadence, in housekeeping sweeps.
const PING_EVERY_SWEEPS: u64 = 10;

// ---------------------------------------------------------------------------
// Producer handle
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<InternalEvent>,
    dropped: Arc<AtomicU64>,
}

/// Create the queue. The receiver half goes to `Dispatcher::new`.
pub fn channel() -> (DispatcherHandle, mpsc::Receiver<InternalEvent>) {
    let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    (DispatcherHandle { tx, dropped: Arc::new(AtomicU64::new(0)) }, rx)
}

impl DispatcherHandle {
    /// Non-blocking post. WebSocket INFO heartbeats are intentionally
    /// dropped here so they can't build queue pressure.
    pub fn post(&self, event: InternalEvent) {
        if event.kind() == EventKind::Info && event.source == EventSource::WebSocket {
            return;
        }
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(ev)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    "Event queue full — dropping {:?} (total dropped: {})",
                    ev.kind(),
                    self.dropped.load(Ordering::Relaxed)
                );
            }
            Err(mpsc::error::TrySendError::Closed(ev)) => {
                tracing::debug!("Dispatcher gone — dropping {:?}", ev.kind());
            }
        }
    }

    pub fn post_simple(&self, kind: EventKind, source: EventSource) {
        self.post(InternalEvent::simple(kind, source));
    }

    pub fn post_from_game_event(&self, event: GameEvent, source: EventSource) {
        self.post(InternalEvent::new(event, source));
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub fn new_for_test() -> (Self, mpsc::Receiver<InternalEvent>) {
        channel()
    }
}

// ---------------------------------------------------------------------------
// Subscriber registry
// ---------------------------------------------------------------------------

pub type HandlerId = u32;

/// Additional event consumers outside the module framework (the RGB status
/// indicator, test probes). `None` kind = wildcard.
pub trait Subscriber: Send {
    fn name(&self) -> &'static str;
    /// Return `true` to stop delivery to later subscribers for this event.
    fn on_event(&mut self, event: &InternalEvent, ctx: &mut ModuleContext) -> bool;
}

struct Registration {
    id: HandlerId,
    kind: Option<EventKind>,
    subscriber: Box<dyn Subscriber>,
}

pub struct SubscriberRegistry {
    entries: Vec<Registration>,
    next_id: HandlerId,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self { entries: Vec::new(), next_id: 1 }
    }

    pub fn register(
        &mut self,
        kind: Option<EventKind>,
        subscriber: Box<dyn Subscriber>,
    ) -> HandlerId {
        let id = self.next_id;
        self.next_id += 1;
        tracing::debug!(
            "Subscriber {} registered for {:?}",
            subscriber.name(),
            kind.map(|k| k.as_wire()).unwrap_or("*")
        );
        self.entries.push(Registration { id, kind, subscriber });
        id
    }

    pub fn unregister(&mut self, id: HandlerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|r| r.id != id);
        before != self.entries.len()
    }

    /// Kind-specific subscribers first, then wildcards, each in
    /// registration order. A `true` return stops the remainder; a panic is
    /// logged with the subscriber identity and delivery continues.
    fn deliver(&mut self, event: &InternalEvent, ctx: &mut ModuleContext) {
        let kind = event.kind();
        for pass_wildcard in [false, true] {
            for reg in &mut self.entries {
                let matches = match reg.kind {
                    Some(k) => !pass_wildcard && k == kind,
                    None => pass_wildcard,
                };
                if !matches {
                    continue;
                }
                match catch_unwind(AssertUnwindSafe(|| reg.subscriber.on_event(event, ctx))) {
                    Ok(true) => return,
                    Ok(false) => {}
                    Err(_) => {
                        tracing::error!(
                            "Subscriber {} panicked on {:?} — continuing",
                            reg.subscriber.name(),
                            kind
                        );
                    }
                }
            }
        }
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

pub struct Dispatcher {
    rx: mpsc::Receiver<InternalEvent>,
    shutdown: watch::Receiver<bool>,
    game_state: GameState,
    tracker: NukeTracker,
    manager: ModuleManager,
    registry: SubscriberRegistry,
    adc: Arc<AdcRegistry>,
    leds: mpsc::Sender<LedCommand>,
    outbound: broadcast::Sender<String>,
    sound: mpsc::Sender<CanRequest>,
    lcd: Option<Lcd>,
    flags: Arc<SystemFlags>,
    dropped: Arc<AtomicU64>,
    identity: crate::config::DeviceIdentity,
    housekeeping_ticks: u64,
}

#[allow(clippy::too_many_arguments)]
impl Dispatcher {
    pub fn new(
        handle: &DispatcherHandle,
        rx: mpsc::Receiver<InternalEvent>,
        shutdown: watch::Receiver<bool>,
        manager: ModuleManager,
        adc: Arc<AdcRegistry>,
        leds: mpsc::Sender<LedCommand>,
        outbound: broadcast::Sender<String>,
        sound: mpsc::Sender<CanRequest>,
        lcd: Option<Lcd>,
        flags: Arc<SystemFlags>,
    ) -> Self {
        Self {
            rx,
            shutdown,
            game_state: GameState::new(),
            tracker: NukeTracker::new(),
            manager,
            registry: SubscriberRegistry::new(),
            adc,
            leds,
            outbound,
            sound,
            lcd,
            flags,
            dropped: handle.dropped.clone(),
            identity: crate::config::DeviceIdentity::default(),
            housekeeping_ticks: 0,
        }
    }

    /// Owner/serial for the diagnostic report; set once at boot.
    pub fn set_identity(&mut self, identity: crate::config::DeviceIdentity) {
        self.identity = identity;
    }

    pub fn register_subscriber(
        &mut self,
        kind: Option<EventKind>,
        subscriber: Box<dyn Subscriber>,
    ) -> HandlerId {
        self.registry.register(kind, subscriber)
    }

    pub fn unregister_subscriber(&mut self, id: HandlerId) -> bool {
        self.registry.unregister(id)
    }

    /// Initialize all modules. Must run before `run()`; a failure here is a
    /// startup abort, per the module-framework contract.
    pub fn init_modules(&mut self) -> anyhow::Result<()> {
        let now = now_ms();
        let phase = self.game_state.get_phase();
        let Self { manager, tracker, adc, leds, outbound, sound, lcd, flags, .. } = self;
        let mut ctx = ModuleContext {
            now_ms: now,
            phase,
            tracker,
            adc: &**adc,
            leds,
            outbound,
            sound,
            lcd: lcd.as_mut(),
            flags: &**flags,
            any_module_error: false,
        };
        manager.init_all(&mut ctx)
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        tracing::info!("Dispatcher starting ({} modules)", self.manager.len());
        let mut tick = tokio::time::interval(Duration::from_millis(MODULE_TICK_MS));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut housekeeping = tokio::time::interval(Duration::from_millis(HOUSEKEEPING_MS));
        housekeeping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = self.rx.recv() => {
                    let Some(event) = event else {
                        tracing::info!("Event queue closed — dispatcher stopping");
                        break;
                    };
                    self.dispatch(event);
                }
                _ = tick.tick() => self.tick_modules(now_ms()),
                _ = housekeeping.tick() => self.housekeeping(now_ms()),
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        tracing::info!("Shutdown requested — stopping dispatcher");
                        break;
                    }
                }
            }
        }

        self.shutdown_modules();
        Ok(())
    }

    /// Deliver one event through all four passes. Synchronous so tests can
    /// drive exact sequences.
    pub fn dispatch(&mut self, event: InternalEvent) {
        let now = now_ms();
        tracing::debug!("Dispatch {:?} from {:?}", event.kind(), event.source);

        self.game_state.update(&event.event);
        self.tracker.apply(&event, now);

        let phase = self.game_state.get_phase();
        let any_err = self.manager.any_error();
        {
            let Self { manager, registry, tracker, adc, leds, outbound, sound, lcd, flags, .. } =
                &mut *self;
            let mut ctx = ModuleContext {
                now_ms: now,
                phase,
                tracker,
                adc: &**adc,
                leds,
                outbound,
                sound,
                lcd: lcd.as_mut(),
                flags: &**flags,
                any_module_error: any_err,
            };
            manager.route_event(&event, &mut ctx);
            registry.deliver(&event, &mut ctx);
        }

        if event.kind() == EventKind::HardwareDiagnostic {
            self.report_diagnostics();
        }
    }

    /// One module update tick (≥ 50 Hz in production).
    pub fn tick_modules(&mut self, now: u64) {
        let phase = self.game_state.get_phase();
        let any_err = self.manager.any_error();
        let Self { manager, tracker, adc, leds, outbound, sound, lcd, flags, .. } = &mut *self;
        let mut ctx = ModuleContext {
            now_ms: now,
            phase,
            tracker,
            adc: &**adc,
            leds,
            outbound,
            sound,
            lcd: lcd.as_mut(),
            flags: &**flags,
            any_module_error: any_err,
        };
        manager.update_all(&mut ctx);
    }

    fn housekeeping(&mut self, now: u64) {
        self.tracker.expire_stale(now);
        self.housekeeping_ticks += 1;
        // Keepalive ping so clients can tell a dead link from a quiet one.
        if self.housekeeping_ticks % PING_EVERY_SWEEPS == 0 {
            let _ = self.outbound.send(crate::ws::protocol::build_ping());
        }
    }

    /// Module statuses + queue pressure, logged and broadcast outbound.
    fn report_diagnostics(&mut self) {
        let statuses = self.manager.statuses();
        for (name, st) in &statuses {
            tracing::info!(
                "diag {}: initialized={} operational={} errors={} last={:?}",
                name,
                st.initialized,
                st.operational,
                st.error_count,
                st.last_error
            );
        }
        let dropped = self.dropped.load(Ordering::Relaxed);
        tracing::info!("diag dispatcher: dropped_events={}", dropped);

        let payload = json!({
            "modules": statuses
                .iter()
                .map(|(name, st)| {
                    json!({
                        "name": name,
                        "initialized": st.initialized,
                        "operational": st.operational,
                        "errorCount": st.error_count,
                        "lastError": st.last_error,
                    })
                })
                .collect::<Vec<_>>(),
            "droppedEvents": dropped,
            "owner": self.identity.owner_name,
            "serial": self.identity.serial,
        });
        let event = GameEvent::new(
            EventKind::Info,
            now_ms(),
            "hardware diagnostic".to_owned(),
            payload.to_string(),
        );
        let _ = self.outbound.send(crate::ws::protocol::build_event(&event));
    }

    fn shutdown_modules(&mut self) {
        let now = now_ms();
        let phase = self.game_state.get_phase();
        let Self { manager, tracker, adc, leds, outbound, sound, lcd, flags, .. } = &mut *self;
        let mut ctx = ModuleContext {
            now_ms: now,
            phase,
            tracker,
            adc: &**adc,
            leds,
            outbound,
            sound,
            lcd: lcd.as_mut(),
            flags: &**flags,
            any_module_error: false,
        };
        manager.shutdown_all(&mut ctx);
        tracing::info!("Dispatcher stopped");
    }

    #[cfg(test)]
    pub fn game_phase(&self) -> crate::game_state::GamePhase {
        self.game_state.get_phase()
    }

    #[cfg(test)]
    pub fn tracker(&self) -> &NukeTracker {
        &self.tracker
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_state::GamePhase;
    use crate::modules::nuke::NukeModule;
    use crate::modules::system_status::SystemStatusModule;
    use crate::nuke_tracker::{Direction, NukeKind};
    use crate::testutil::game_event;
    use crate::hw::led_engine::{LedEffect, LedTarget};

    struct DispatcherFixture {
        dispatcher: Dispatcher,
        #[allow(dead_code)]
        handle: DispatcherHandle,
        leds_rx: mpsc::Receiver<LedCommand>,
        out_rx: broadcast::Receiver<String>,
        _sound_rx: mpsc::Receiver<CanRequest>,
        _shutdown_tx: watch::Sender<bool>,
    }

    fn fixture(manager: ModuleManager) -> DispatcherFixture {
        let (handle, rx) = channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (leds_tx, leds_rx) = mpsc::channel(256);
        let (out_tx, out_rx) = broadcast::channel(256);
        let (sound_tx, sound_rx) = mpsc::channel(256);
        let flags = Arc::new(SystemFlags::new());
        flags.set_server_listening(true);
        let mut dispatcher = Dispatcher::new(
            &handle,
            rx,
            shutdown_rx,
            manager,
            Arc::new(AdcRegistry::new()),
            leds_tx,
            out_tx,
            sound_tx,
            None,
            flags,
        );
        dispatcher.init_modules().expect("module init");
        DispatcherFixture {
            dispatcher,
            handle,
            leds_rx,
            out_rx,
            _sound_rx: sound_rx,
            _shutdown_tx: shutdown_tx,
        }
    }

    fn drain_leds(rx: &mut mpsc::Receiver<LedCommand>) -> Vec<LedCommand> {
        let mut out = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            out.push(cmd);
        }
        out
    }

    #[test]
    fn overlapping_atom_nukes_share_one_led() {
        // Two overlapping launches: the LED blinks until BOTH are resolved.
        let mut manager = ModuleManager::new();
        manager.register(Box::new(NukeModule::new()), true).unwrap();
        let mut f = fixture(manager);

        f.dispatcher
            .dispatch(game_event(EventKind::NukeLaunched, r#"{"nukeUnitID":10,"type":"Atom"}"#));
        f.dispatcher.tick_modules(100);
        let cmds = drain_leds(&mut f.leds_rx);
        assert!(cmds
            .iter()
            .any(|c| c.target == LedTarget::Nuke(0) && c.effect == LedEffect::Blink));

        f.dispatcher
            .dispatch(game_event(EventKind::NukeLaunched, r#"{"nukeUnitID":11,"type":"Atom"}"#));
        f.dispatcher.tick_modules(600);
        // First nuke resolves — still one in flight, LED must stay blinking.
        f.dispatcher
            .dispatch(game_event(EventKind::NukeExploded, r#"{"unitID":10}"#));
        f.dispatcher.tick_modules(700);
        let cmds = drain_leds(&mut f.leds_rx);
        assert!(
            !cmds
                .iter()
                .any(|c| c.target == LedTarget::Nuke(0) && c.effect == LedEffect::Off),
            "LED turned off while unit 11 still in flight"
        );
        assert_eq!(
            f.dispatcher
                .tracker()
                .get_active_count(NukeKind::Atom, Direction::Outgoing),
            1
        );

        // Second resolves — now OFF.
        f.dispatcher
            .dispatch(game_event(EventKind::NukeIntercepted, r#"{"unitID":11}"#));
        f.dispatcher.tick_modules(800);
        let cmds = drain_leds(&mut f.leds_rx);
        assert!(cmds
            .iter()
            .any(|c| c.target == LedTarget::Nuke(0) && c.effect == LedEffect::Off));
    }

    #[test]
    fn game_phase_flow_through_dispatch() {
        let mut manager = ModuleManager::new();
        manager
            .register(Box::new(SystemStatusModule::new()), true)
            .unwrap();
        let mut f = fixture(manager);
        // A connected userscript is the precondition for the flow.
        f.dispatcher
            .dispatch(InternalEvent::simple(EventKind::WsConnected, EventSource::System));

        f.dispatcher
            .dispatch(InternalEvent::simple(EventKind::GameSpawning, EventSource::WebSocket));
        assert_eq!(f.dispatcher.game_phase(), GamePhase::Spawning);

        f.dispatcher
            .dispatch(InternalEvent::simple(EventKind::GameStart, EventSource::WebSocket));
        assert_eq!(f.dispatcher.game_phase(), GamePhase::InGame);
        // SystemStatus yields the LCD in game (well past the boot splash).
        f.dispatcher.tick_modules(now_ms() + 10_000);
        assert!(!f.dispatcher.flags.status_display_active());

        f.dispatcher
            .dispatch(game_event(EventKind::GameEnd, r#"{"victory":true}"#));
        assert_eq!(f.dispatcher.game_phase(), GamePhase::Won);
    }

    #[test]
    fn malformed_then_valid_event_keeps_dispatching() {
        let mut manager = ModuleManager::new();
        manager.register(Box::new(NukeModule::new()), true).unwrap();
        let mut f = fixture(manager);

        // The WS layer degrades a malformed frame to INFO; even posted
        // directly it must not wedge anything.
        let msg = crate::ws::protocol::parse(r#"{"type":"event","payload":{}}"#);
        if let crate::ws::protocol::WsMessage::Event(ev) = msg {
            f.dispatcher.dispatch(InternalEvent::new(ev, EventSource::WebSocket));
        }

        f.dispatcher
            .dispatch(game_event(EventKind::NukeLaunched, r#"{"nukeUnitID":1,"type":"MIRV"}"#));
        assert_eq!(
            f.dispatcher
                .tracker()
                .get_active_count(NukeKind::Mirv, Direction::Outgoing),
            1
        );
    }

    #[test]
    fn heartbeats_never_reach_the_queue() {
        let (handle, mut rx) = channel();
        handle.post_simple(EventKind::Info, EventSource::WebSocket);
        assert!(rx.try_recv().is_err());

        // INFO from other sources still flows.
        handle.post_simple(EventKind::Info, EventSource::System);
        assert_eq!(rx.try_recv().unwrap().kind(), EventKind::Info);
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let (handle, _rx) = channel();
        for _ in 0..EVENT_QUEUE_CAPACITY {
            handle.post_simple(EventKind::GameStart, EventSource::WebSocket);
        }
        assert_eq!(handle.dropped_count(), 0);
        handle.post_simple(EventKind::GameStart, EventSource::WebSocket);
        assert_eq!(handle.dropped_count(), 1);
    }

    // -- registry semantics -------------------------------------------------

    struct ClosureSub {
        name: &'static str,
        hits: Arc<AtomicU64>,
        stop: bool,
    }

    impl Subscriber for ClosureSub {
        fn name(&self) -> &'static str {
            self.name
        }
        fn on_event(&mut self, _event: &InternalEvent, _ctx: &mut ModuleContext) -> bool {
            self.hits.fetch_add(1, Ordering::SeqCst);
            self.stop
        }
    }

    fn sub(name: &'static str, stop: bool) -> (ClosureSub, Arc<AtomicU64>) {
        let hits = Arc::new(AtomicU64::new(0));
        (ClosureSub { name, hits: hits.clone(), stop }, hits)
    }

    #[test]
    fn specific_subscribers_run_before_wildcards() {
        let mut f = fixture(ModuleManager::new());
        let (specific, specific_hits) = sub("specific", true);
        let (wildcard, wildcard_hits) = sub("wildcard", false);
        // Wildcard registered FIRST, but the specific one still stops it.
        f.dispatcher.register_subscriber(None, Box::new(wildcard));
        f.dispatcher
            .register_subscriber(Some(EventKind::GameStart), Box::new(specific));

        f.dispatcher
            .dispatch(InternalEvent::simple(EventKind::GameStart, EventSource::WebSocket));
        assert_eq!(specific_hits.load(Ordering::SeqCst), 1);
        assert_eq!(wildcard_hits.load(Ordering::SeqCst), 0);

        // A kind the specific one ignores reaches the wildcard.
        f.dispatcher
            .dispatch(InternalEvent::simple(EventKind::GameEnd, EventSource::WebSocket));
        assert_eq!(wildcard_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_removes_delivery() {
        let mut f = fixture(ModuleManager::new());
        let (s, hits) = sub("removable", false);
        let id = f.dispatcher.register_subscriber(None, Box::new(s));

        f.dispatcher
            .dispatch(InternalEvent::simple(EventKind::Info, EventSource::System));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(f.dispatcher.unregister_subscriber(id));
        f.dispatcher
            .dispatch(InternalEvent::simple(EventKind::Info, EventSource::System));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn diagnostic_event_broadcasts_a_report() {
        let mut f = fixture(ModuleManager::new());
        f.dispatcher
            .dispatch(InternalEvent::simple(EventKind::HardwareDiagnostic, EventSource::WebSocket));
        let report = f.out_rx.try_recv().expect("diagnostic broadcast");
        assert!(report.contains("droppedEvents"));
    }

    #[test]
    fn handshake_state_resets_game_phase() {
        // Userscript disconnect mid-game resets to LOBBY.
        let mut manager = ModuleManager::new();
        manager
            .register(Box::new(SystemStatusModule::new()), true)
            .unwrap();
        let mut f = fixture(manager);
        f.dispatcher
            .dispatch(InternalEvent::simple(EventKind::WsConnected, EventSource::System));
        f.dispatcher
            .dispatch(InternalEvent::simple(EventKind::GameStart, EventSource::WebSocket));
        assert_eq!(f.dispatcher.game_phase(), GamePhase::InGame);

        f.dispatcher
            .dispatch(InternalEvent::simple(EventKind::WsDisconnected, EventSource::System));
        assert_eq!(f.dispatcher.game_phase(), GamePhase::Lobby);
        // SystemStatus reclaims the display.
        f.dispatcher.tick_modules(now_ms() + 10_000);
        assert!(f.dispatcher.flags.status_display_active());
    }

    #[test]
    fn handle_post_is_order_preserving() {
        let (handle, mut rx) = channel();
        for kind in [EventKind::GameSpawning, EventKind::GameStart, EventKind::GameEnd] {
            handle.post_simple(kind, EventSource::WebSocket);
        }
        assert_eq!(rx.try_recv().unwrap().kind(), EventKind::GameSpawning);
        assert_eq!(rx.try_recv().unwrap().kind(), EventKind::GameStart);
        assert_eq!(rx.try_recv().unwrap().kind(), EventKind::GameEnd);
    }
}
