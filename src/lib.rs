/// OTS tactical console — bridges a browser game to tabletop hardware.
///
/// Task pipeline, wired in `run()`:
///
///   WS server ──┐                                   ┌─▶ LED engine (board 1)
///   I/O task  ──┼─▶ dispatcher ─▶ modules ──────────┼─▶ WS broadcast
///   (buttons,   │   (game state, nuke tracker,      └─▶ CAN sound task
///    slider)    │    LCD arbitration)
///
/// All cross-task traffic is bounded channels; the dispatcher consumer is
/// the only task that touches game state, so nothing here needs a lock
/// beyond the I²C bus handle and the one-word ADC registry reads.
pub mod can;
pub mod config;
pub mod dispatcher;
pub mod events;
pub mod game_state;
pub mod hw;
pub mod modules;
pub mod nuke_tracker;
pub mod status;
pub mod ws;

#[cfg(test)]
pub(crate) mod testutil;

use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};

// ---------------------------------------------------------------------------
// Cross-task flags
// ---------------------------------------------------------------------------

/// The few booleans that genuinely cross task boundaries. Everything else
/// travels through events; these are for the "what screen should I show
/// right now" class of reads that can't wait for a queue.
#[derive(Debug)]
pub struct SystemFlags {
    server_listening: AtomicBool,
    portal_mode: AtomicBool,
    network_up: AtomicBool,
    userscript_clients: AtomicUsize,
    status_display_active: AtomicBool,
    input_board_healthy: AtomicBool,
    output_board_healthy: AtomicBool,
}

impl SystemFlags {
    pub fn new() -> Self {
        Self {
            server_listening: AtomicBool::new(false),
            portal_mode: AtomicBool::new(false),
            network_up: AtomicBool::new(false),
            userscript_clients: AtomicUsize::new(0),
            status_display_active: AtomicBool::new(true),
            input_board_healthy: AtomicBool::new(true),
            output_board_healthy: AtomicBool::new(true),
        }
    }

    pub fn server_listening(&self) -> bool {
        self.server_listening.load(Ordering::Acquire)
    }

    pub fn set_server_listening(&self, v: bool) {
        self.server_listening.store(v, Ordering::Release);
    }

    pub fn portal_mode(&self) -> bool {
        self.portal_mode.load(Ordering::Acquire)
    }

    pub fn set_portal_mode(&self, v: bool) {
        self.portal_mode.store(v, Ordering::Release);
    }

    pub fn network_up(&self) -> bool {
        self.network_up.load(Ordering::Acquire)
    }

    pub fn set_network_up(&self, v: bool) {
        self.network_up.store(v, Ordering::Release);
    }

    pub fn userscript_connected(&self) -> bool {
        self.userscript_clients.load(Ordering::Acquire) > 0
    }

    /// Increment the userscript count; returns the previous count.
    pub fn add_userscript(&self) -> usize {
        self.userscript_clients.fetch_add(1, Ordering::AcqRel)
    }

    /// Decrement the userscript count; returns the previous count.
    /// Saturates at zero — a double-close must not wrap.
    pub fn remove_userscript(&self) -> usize {
        self.userscript_clients
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0)
    }

    /// Whether the system-status module currently owns the LCD.
    pub fn status_display_active(&self) -> bool {
        self.status_display_active.load(Ordering::Acquire)
    }

    pub fn set_status_display_active(&self, v: bool) {
        self.status_display_active.store(v, Ordering::Release);
    }

    /// Expander health, published by the tasks that own each board so
    /// modules can report `operational` truthfully.
    pub fn input_board_healthy(&self) -> bool {
        self.input_board_healthy.load(Ordering::Acquire)
    }

    pub fn set_input_board_healthy(&self, v: bool) {
        self.input_board_healthy.store(v, Ordering::Release);
    }

    pub fn output_board_healthy(&self) -> bool {
        self.output_board_healthy.load(Ordering::Acquire)
    }

    pub fn set_output_board_healthy(&self, v: bool) {
        self.output_board_healthy.store(v, Ordering::Release);
    }
}

impl Default for SystemFlags {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

pub async fn run() -> Result<()> {
    let config_dir = config::config_dir();
    let cfg = config::load_or_default(&config_dir)?;

    // -----------------------------------------------------------------------
    // Logging — rolling daily file under the config dir; stderr only sees
    // what RUST_LOG asks for. Initialized first so even init failures land
    // in the log.
    // -----------------------------------------------------------------------
    let log_dir = if cfg.log_dir.as_os_str().is_empty() {
        config_dir.join("logs")
    } else {
        cfg.log_dir.clone()
    };
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "console.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // Keep the flush guard alive for the process lifetime.
    std::mem::forget(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ots_console_lib=debug".parse()?),
        )
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();

    // Panics land in the log before the task dies.
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_owned());
        let message = if let Some(s) = info.payload().downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        tracing::error!("PANIC at {}: {}", location, message);
    }));

    tracing::info!("OTS console v{} starting — logs → {}", env!("CARGO_PKG_VERSION"), log_dir.display());

    // -----------------------------------------------------------------------
    // Persisted state. Missing Wi-Fi credentials put the device in captive
    // portal mode instead of crashing (the provisioning collaborator owns
    // getting us out of it).
    // -----------------------------------------------------------------------
    let wifi = config::WifiStore::new(&config_dir);
    let identity = config::IdentityStore::new(&config_dir).get();
    tracing::info!(
        "Device identity: owner={:?} serial={:?}",
        identity.owner_name,
        identity.serial
    );

    let flags = Arc::new(SystemFlags::new());
    if !wifi.exists() {
        tracing::warn!("No Wi-Fi credentials stored — entering captive portal mode");
        flags.set_portal_mode(true);
    }

    // -----------------------------------------------------------------------
    // Buses and drivers. The physical I²C/CAN adapters belong to the
    // platform layer; this build wires the simulated ones.
    // -----------------------------------------------------------------------
    if !cfg.mock_hardware {
        tracing::warn!("Physical I²C adapter not linked in this build — using simulated bus");
    }
    let mock_bus = hw::i2c::MockI2c::new();
    // Simulated buttons idle high like real pull-ups.
    mock_bus.set_expander_inputs(hw::i2c::ADDR_INPUT_EXPANDER, 0xFFFF);
    let bus = hw::i2c::SharedI2c::new(Box::new(mock_bus));

    let input_board = hw::mcp23017::Mcp23017::begin(
        bus.clone(),
        hw::i2c::ADDR_INPUT_EXPANDER,
        hw::mcp23017::BoardMode::InputsPulledUp,
    )?;
    let output_board = hw::mcp23017::Mcp23017::begin(
        bus.clone(),
        hw::i2c::ADDR_OUTPUT_EXPANDER,
        hw::mcp23017::BoardMode::OutputsCleared,
    )?;
    let lcd = match hw::lcd::Lcd::init(bus.clone(), hw::i2c::ADDR_LCD) {
        Ok(lcd) => Some(lcd),
        Err(e) => {
            tracing::warn!("LCD unavailable ({}) — running headless", e);
            None
        }
    };
    let ads = hw::ads1015::Ads1015::new(bus.clone(), hw::i2c::ADDR_ADC);

    if !cfg.mock_can {
        tracing::warn!("Physical CAN controller not linked in this build — using mock transport");
    }
    let can_transport: Box<dyn can::transport::CanTransport> =
        Box::new(can::transport::MockCan::new());

    // -----------------------------------------------------------------------
    // Channel bundle.
    // -----------------------------------------------------------------------
    let (dispatcher_handle, event_rx) = dispatcher::channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (led_tx, led_rx) = mpsc::channel(hw::led_engine::LED_QUEUE_CAPACITY);
    let (can_tx, can_rx) = mpsc::channel(can::CAN_QUEUE_CAPACITY);
    let (out_tx, _out_keepalive) = broadcast::channel::<String>(64);

    // -----------------------------------------------------------------------
    // Modules + dispatcher.
    // -----------------------------------------------------------------------
    let mut manager = modules::ModuleManager::new();
    manager.register(Box::new(modules::system_status::SystemStatusModule::new()), true)?;
    manager.register(Box::new(modules::troops::TroopsModule::new()), true)?;
    manager.register(Box::new(modules::nuke::NukeModule::new()), true)?;
    manager.register(Box::new(modules::alert::AlertModule::new()), true)?;
    manager.register(Box::new(modules::main_power::MainPowerModule::new()), true)?;
    manager.register(Box::new(modules::sound::SoundModule::new()), true)?;

    let adc_registry = Arc::new(hw::adc_registry::AdcRegistry::new());
    let mut disp = dispatcher::Dispatcher::new(
        &dispatcher_handle,
        event_rx,
        shutdown_rx,
        manager,
        adc_registry.clone(),
        led_tx,
        out_tx.clone(),
        can_tx,
        lcd,
        flags.clone(),
    );
    disp.register_subscriber(
        None,
        Box::new(status::StatusIndicator::new(Box::new(status::LogRgbLed))),
    );
    disp.set_identity(identity);
    disp.init_modules()?;

    // -----------------------------------------------------------------------
    // Spawn the pipeline.
    // -----------------------------------------------------------------------
    tokio::spawn(hw::led_engine::run(output_board, led_rx, flags.clone()));
    tokio::spawn(can::run(can_transport, can_rx));

    let io = hw::io_task::IoTask::new(
        input_board,
        hw::buttons::ButtonScanner::new(&hw::pins::BUTTON_PINS),
        hw::adc_registry::AdcScanner::new(ads, &hw::adc_registry::ADC_CHANNELS),
        adc_registry,
        dispatcher_handle.clone(),
        flags.clone(),
    );
    tokio::spawn(io.run());

    let ws_cfg = ws::server::WsServerConfig { port: cfg.ws_port };
    let ws_dispatcher = dispatcher_handle.clone();
    let ws_flags = flags.clone();
    tokio::spawn(async move {
        if let Err(e) = ws::server::run(ws_cfg, ws_dispatcher, out_tx, ws_flags).await {
            tracing::error!("WS server failed: {:#}", e);
        }
    });

    let dispatcher_task = tokio::spawn(disp.run());
    tracing::info!("System ready");

    // -----------------------------------------------------------------------
    // Run until interrupted; the dispatcher shuts modules down on the way
    // out so the panel goes dark instead of freezing mid-state.
    // -----------------------------------------------------------------------
    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received — shutting down");
    let _ = shutdown_tx.send(true);
    match dispatcher_task.await {
        Ok(result) => result?,
        Err(e) => tracing::error!("Dispatcher task join error: {}", e),
    }
    Ok(())
}
