/// Hardware module framework — the uniform contract every peripheral
/// module implements, and the manager that drives them.
///
/// Modules are plain structs owned by the dispatcher consumer task; all
/// shared capability (LED queue, WS broadcast, CAN queue, ADC registry,
/// tracker counts, LCD) arrives through a `ModuleContext` built fresh for
/// every call, the way rule evaluators receive their context. Handlers
/// must not block — anything slow goes to an owning task via the queues in
/// the context.
///
/// Failure posture: a module returning `Err` (or panicking) is logged,
/// counted against that module, and the tick/event goes on to the next
/// module. `init_all` is the exception: the first failure of an *enabled*
/// module aborts startup.
pub mod alert;
pub mod main_power;
pub mod nuke;
pub mod sound;
pub mod system_status;
pub mod troops;

use crate::can::CanRequest;
use crate::events::InternalEvent;
use crate::game_state::GamePhase;
use crate::hw::adc_registry::AdcRegistry;
use crate::hw::lcd::Lcd;
use crate::hw::led_engine::LedCommand;
use crate::nuke_tracker::NukeTracker;
use crate::SystemFlags;
use anyhow::Result;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tokio::sync::{broadcast, mpsc};

pub const MAX_MODULES: usize = 8;
const LAST_ERROR_MAX: usize = 64;

#[derive(Debug, Clone, Default)]
pub struct ModuleStatus {
    pub initialized: bool,
    pub operational: bool,
    pub error_count: u32,
    pub last_error: String,
}

/// Everything a module may touch during one call.
pub struct ModuleContext<'a> {
    pub now_ms: u64,
    pub phase: GamePhase,
    pub tracker: &'a NukeTracker,
    pub adc: &'a AdcRegistry,
    pub leds: &'a mpsc::Sender<LedCommand>,
    pub outbound: &'a broadcast::Sender<String>,
    pub sound: &'a mpsc::Sender<CanRequest>,
    pub lcd: Option<&'a mut Lcd>,
    pub flags: &'a SystemFlags,
    /// True when any registered module currently reports errors; consumed
    /// by the RGB status subscriber.
    pub any_module_error: bool,
}

impl ModuleContext<'_> {
    /// Non-blocking LED command; a full queue is dropped with a WARN
    /// (ResourceExhausted — the engine will be re-synced next tick anyway).
    pub fn send_led(&self, cmd: LedCommand) {
        if let Err(e) = self.leds.try_send(cmd) {
            tracing::warn!("LED queue full — dropping command: {}", e);
        }
    }

    /// Broadcast a frame to all WS clients. No receivers is normal when no
    /// client is connected.
    pub fn send_ws(&self, text: String) {
        let _ = self.outbound.send(text);
    }

    pub fn send_sound(&self, req: CanRequest) {
        if let Err(e) = self.sound.try_send(req) {
            tracing::warn!("CAN queue full — dropping request: {}", e);
        }
    }
}

pub trait HardwareModule: Send {
    fn name(&self) -> &'static str;

    /// Acquire peripherals; must not leak partial state on error.
    fn init(&mut self, ctx: &mut ModuleContext) -> Result<()>;

    /// Periodic tick from the manager (≥ 50 Hz). Non-blocking.
    fn update(&mut self, ctx: &mut ModuleContext) -> Result<()>;

    /// React to one event. `true` = consumed (routing still continues to
    /// the other modules; several may independently react).
    fn handle_event(&mut self, event: &InternalEvent, ctx: &mut ModuleContext) -> bool;

    /// Fill `operational` (and anything else module-specific). The manager
    /// has already filled `initialized` / `error_count` / `last_error`.
    fn get_status(&self, out: &mut ModuleStatus);

    fn shutdown(&mut self, ctx: &mut ModuleContext) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

struct ModuleSlot {
    module: Box<dyn HardwareModule>,
    enabled: bool,
    init_ok: bool,
    error_count: u32,
    last_error: String,
}

impl ModuleSlot {
    fn record_error(&mut self, context: &str, detail: String) {
        self.error_count += 1;
        let mut msg = format!("{}: {}", context, detail);
        if msg.len() > LAST_ERROR_MAX {
            let mut end = LAST_ERROR_MAX;
            while !msg.is_char_boundary(end) {
                end -= 1;
            }
            msg.truncate(end);
        }
        self.last_error = msg;
    }
}

pub struct ModuleManager {
    slots: Vec<ModuleSlot>,
}

impl ModuleManager {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn register(&mut self, module: Box<dyn HardwareModule>, enabled: bool) -> Result<()> {
        if self.slots.len() >= MAX_MODULES {
            anyhow::bail!("module table full ({} slots)", MAX_MODULES);
        }
        tracing::info!(
            "Module registered: {} ({})",
            module.name(),
            if enabled { "enabled" } else { "disabled" }
        );
        self.slots.push(ModuleSlot {
            module,
            enabled,
            init_ok: false,
            error_count: 0,
            last_error: String::new(),
        });
        Ok(())
    }

    /// Initialize every enabled module in registration order. The first
    /// failure of an enabled module aborts with that error.
    pub fn init_all(&mut self, ctx: &mut ModuleContext) -> Result<()> {
        for slot in &mut self.slots {
            if !slot.enabled {
                tracing::info!("Module {} disabled — skipping init", slot.module.name());
                continue;
            }
            match slot.module.init(ctx) {
                Ok(()) => {
                    slot.init_ok = true;
                    tracing::info!("Module {} initialized", slot.module.name());
                }
                Err(e) => {
                    slot.record_error("init", e.to_string());
                    return Err(e.context(format!("module {} init failed", slot.module.name())));
                }
            }
        }
        Ok(())
    }

    /// Tick every enabled module. Errors and panics are contained per slot.
    pub fn update_all(&mut self, ctx: &mut ModuleContext) {
        for slot in &mut self.slots {
            if !slot.enabled || !slot.init_ok {
                continue;
            }
            let result = catch_unwind(AssertUnwindSafe(|| slot.module.update(ctx)));
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!("Module {} update error: {:#}", slot.module.name(), e);
                    slot.record_error("update", e.to_string());
                }
                Err(_) => {
                    tracing::error!("Module {} panicked in update", slot.module.name());
                    slot.record_error("update", "panic".to_owned());
                }
            }
        }
    }

    /// Deliver one event to every enabled module — deliberately NOT
    /// short-circuiting: several modules may react to the same event.
    /// Returns whether any module consumed it.
    pub fn route_event(&mut self, event: &InternalEvent, ctx: &mut ModuleContext) -> bool {
        let mut consumed = false;
        for slot in &mut self.slots {
            if !slot.enabled || !slot.init_ok {
                continue;
            }
            let result = catch_unwind(AssertUnwindSafe(|| slot.module.handle_event(event, ctx)));
            match result {
                Ok(c) => consumed |= c,
                Err(_) => {
                    tracing::error!(
                        "Module {} panicked handling {:?}",
                        slot.module.name(),
                        event.kind()
                    );
                    slot.record_error("handle_event", "panic".to_owned());
                }
            }
        }
        consumed
    }

    pub fn shutdown_all(&mut self, ctx: &mut ModuleContext) {
        for slot in &mut self.slots {
            if !slot.init_ok {
                continue;
            }
            if let Err(e) = slot.module.shutdown(ctx) {
                tracing::warn!("Module {} shutdown error: {:#}", slot.module.name(), e);
            }
            slot.init_ok = false;
        }
    }

    pub fn statuses(&self) -> Vec<(&'static str, ModuleStatus)> {
        self.slots
            .iter()
            .map(|slot| {
                let mut st = ModuleStatus {
                    initialized: slot.init_ok,
                    operational: slot.init_ok,
                    error_count: slot.error_count,
                    last_error: slot.last_error.clone(),
                };
                slot.module.get_status(&mut st);
                (slot.module.name(), st)
            })
            .collect()
    }

    pub fn any_error(&self) -> bool {
        self.slots
            .iter()
            .any(|s| s.error_count > 0 || (s.enabled && !s.init_ok))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for ModuleManager {
    fn default() -> Self {
        Self::new()
    }
}
