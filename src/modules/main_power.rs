/// Main power module — the LINK LED, a one-glance connection report.
///
///   no network                OFF
///   network up, no userscript BLINK @ 500 ms
///   userscript connected      ON
///   WS error                  BLINK @ 200 ms (until the next WS edge)
use super::{HardwareModule, ModuleContext, ModuleStatus};
use crate::events::{EventKind, InternalEvent};
use crate::hw::led_engine::{LedCommand, LedTarget, DEFAULT_BLINK_RATE_MS};
use anyhow::Result;

const ERROR_BLINK_MS: u64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Off,
    Searching,
    Connected,
    Error,
}

pub struct MainPowerModule {
    network_up: bool,
    ws_up: bool,
    ws_error: bool,
    last_commanded: Option<LinkState>,
}

impl MainPowerModule {
    pub fn new() -> Self {
        Self { network_up: false, ws_up: false, ws_error: false, last_commanded: None }
    }

    fn desired(&self) -> LinkState {
        if self.ws_error {
            LinkState::Error
        } else if !self.network_up {
            LinkState::Off
        } else if !self.ws_up {
            LinkState::Searching
        } else {
            LinkState::Connected
        }
    }

    fn sync_led(&mut self, ctx: &mut ModuleContext) {
        let want = self.desired();
        if self.last_commanded == Some(want) {
            return;
        }
        let cmd = match want {
            LinkState::Off => LedCommand::off(LedTarget::Link),
            LinkState::Searching => LedCommand::blink(LedTarget::Link, DEFAULT_BLINK_RATE_MS),
            LinkState::Connected => LedCommand::on(LedTarget::Link),
            LinkState::Error => LedCommand::blink(LedTarget::Link, ERROR_BLINK_MS),
        };
        ctx.send_led(cmd);
        self.last_commanded = Some(want);
        tracing::debug!("Link LED → {:?}", want);
    }
}

impl Default for MainPowerModule {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareModule for MainPowerModule {
    fn name(&self) -> &'static str {
        "main_power"
    }

    fn init(&mut self, ctx: &mut ModuleContext) -> Result<()> {
        self.network_up = ctx.flags.network_up();
        ctx.send_led(LedCommand::off(LedTarget::Link));
        self.last_commanded = Some(LinkState::Off);
        Ok(())
    }

    fn update(&mut self, ctx: &mut ModuleContext) -> Result<()> {
        self.sync_led(ctx);
        Ok(())
    }

    fn handle_event(&mut self, event: &InternalEvent, ctx: &mut ModuleContext) -> bool {
        match event.kind() {
            EventKind::NetworkConnected => self.network_up = true,
            EventKind::NetworkDisconnected => {
                self.network_up = false;
                self.ws_up = false;
            }
            EventKind::WsConnected => {
                self.ws_up = true;
                self.ws_error = false;
            }
            EventKind::WsDisconnected => {
                self.ws_up = false;
                self.ws_error = false;
            }
            EventKind::WsError => self.ws_error = true,
            _ => return false,
        }
        self.sync_led(ctx);
        true
    }

    fn get_status(&self, out: &mut ModuleStatus) {
        out.operational = out.initialized;
    }

    fn shutdown(&mut self, ctx: &mut ModuleContext) -> Result<()> {
        ctx.send_led(LedCommand::off(LedTarget::Link));
        Ok(())
    }
}
